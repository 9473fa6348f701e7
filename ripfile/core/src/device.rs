//! The consumed device contract.
//!
//! Devices supply raw transport primitives; the core never implements one
//! (the `ripfile-mem` crate carries the RAM transport used by tests).

use crate::{DeviceFd, FileError, FileFlags, FileResult};
use std::io::SeekFrom;

/// A raw transport the core wraps file nodes around.
///
/// `read`/`write` follow the usual short-count contract: `Ok(0)` from `read`
/// is end of data, `Ok(0)` from `write` means the transport accepted nothing
/// and the caller treats it as EOF. Richer failure reasons go through
/// [`Device::report_error`] on the way out.
pub trait Device: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn open(&self, name: &[u8], flags: FileFlags) -> FileResult<DeviceFd>;

    fn read(&self, fd: DeviceFd, buf: &mut [u8]) -> FileResult<usize>;

    fn write(&self, fd: DeviceFd, buf: &[u8]) -> FileResult<usize>;

    /// Reposition the transport, returning the new absolute offset.
    fn seek(&self, fd: DeviceFd, pos: SeekFrom) -> FileResult<u64>;

    fn close(&self, fd: DeviceFd) -> FileResult<()>;

    /// Bytes past the current offset (`total == false`) or the total data
    /// length (`total == true`). `Ok(None)` when the transport cannot tell.
    fn bytes_available(&self, _fd: DeviceFd, _total: bool) -> FileResult<Option<u64>> {
        Ok(None)
    }

    /// Tear the descriptor down without flushing. Best effort.
    fn abort(&self, fd: DeviceFd) {
        let _ = self.close(fd);
    }

    /// Preferred buffer size for nodes on this device. `0` means no
    /// preference; the core falls back to its standard or small size.
    fn buffer_size_hint(&self) -> usize {
        0
    }

    fn prefers_small_buffer(&self) -> bool {
        false
    }

    /// Error-reporting hook: invoked with every transport failure the core
    /// is about to surface, before the error propagates to the caller.
    fn report_error(&self, _err: &FileError) {}
}
