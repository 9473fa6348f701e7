//! The polymorphic operation set of a file node.
//!
//! The thirteen slots of the classic vtable are a trait here. Every method
//! has an error-family default body, so an implementation only overrides the
//! slots its node kind really provides; [`ClosedOps`] overrides nothing and
//! is therefore the vtable of the shared closed sentinel.

use crate::error::{FileError, FileErrorKind, FileResult};
use crate::ids::FileHandle;
use crate::table::FileTable;

/// Decode-side status a filter can report without consuming input.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FilterInfo {
    /// Decoded length, when the format announces it up front.
    pub expected_len: Option<u64>,
    /// Whether the end-of-data marker has been consumed.
    pub eod: bool,
}

fn stand_in<T>(fs: &FileTable, h: FileHandle, context: &'static str) -> FileResult<T> {
    // The error family is only ever wired into non-filter slots; a filter
    // landing here is a contract violation by its implementor.
    debug_assert!(
        fs.get(h).is_none_or(|n| !n.flags().is_filter()),
        "error stand-in dispatched on a filter node ({context})"
    );
    Err(FileError::new(FileErrorKind::Closed, context))
}

/// Operation set dispatched through a node.
///
/// Implementations are stateless: all per-node state lives in the
/// [`FileNode`](crate::FileNode) reached through the table, so one `Arc`'d
/// ops value serves every node of its kind and a filter's ops can re-enter
/// the table to drive its underlying node.
pub trait FileOps: Send + Sync + 'static {
    /// Fill the buffered window and return its first byte; `Ok(None)` is end
    /// of data.
    fn fill(&self, fs: &mut FileTable, h: FileHandle) -> FileResult<Option<u8>> {
        let _ = (fs, h);
        Ok(None)
    }

    /// Write the buffered window through and start a fresh one holding
    /// `byte`.
    fn flush_byte(&self, fs: &mut FileTable, h: FileHandle, byte: u8) -> FileResult<()> {
        let _ = byte;
        stand_in(fs, h, "ops.flush_byte")
    }

    /// One-time setup after the node is linked into the registry.
    fn init(&self, fs: &mut FileTable, h: FileHandle) -> FileResult<()> {
        stand_in(fs, h, "ops.init")
    }

    fn close(&self, fs: &mut FileTable, h: FileHandle) -> FileResult<()> {
        stand_in(fs, h, "ops.close")
    }

    /// Release buffered resources. Best effort, never fails.
    fn dispose(&self, fs: &mut FileTable, h: FileHandle) {
        let _ = (fs, h);
    }

    /// Bytes readable past the logical position (`total == false`) or the
    /// total data length (`total == true`); `Ok(None)` when unknowable.
    fn bytes_available(
        &self,
        fs: &mut FileTable,
        h: FileHandle,
        total: bool,
    ) -> FileResult<Option<u64>> {
        let _ = (fs, h, total);
        Ok(None)
    }

    /// Discard the buffered window so the next operation re-syncs with the
    /// transport.
    fn reset(&self, fs: &mut FileTable, h: FileHandle) -> FileResult<()> {
        stand_in(fs, h, "ops.reset")
    }

    fn position(&self, fs: &mut FileTable, h: FileHandle) -> FileResult<u64> {
        stand_in(fs, h, "ops.position")
    }

    fn set_position(&self, fs: &mut FileTable, h: FileHandle, offset: u64) -> FileResult<()> {
        let _ = offset;
        stand_in(fs, h, "ops.set_position")
    }

    /// Flush everything buffered to the transport (or discard / drain, per
    /// node direction).
    fn flush_file(&self, fs: &mut FileTable, h: FileHandle) -> FileResult<()> {
        stand_in(fs, h, "ops.flush_file")
    }

    /// Filter slot: encode `src`, returning how many input bytes were
    /// consumed.
    fn encode(&self, fs: &mut FileTable, h: FileHandle, src: &[u8]) -> FileResult<usize> {
        let _ = src;
        stand_in(fs, h, "ops.encode")
    }

    /// Filter slot: decode into `dst`, returning how many bytes were
    /// produced.
    fn decode(&self, fs: &mut FileTable, h: FileHandle, dst: &mut [u8]) -> FileResult<usize> {
        let _ = dst;
        stand_in(fs, h, "ops.decode")
    }

    /// Filter slot: report decode-side status.
    fn decode_info(&self, fs: &mut FileTable, h: FileHandle) -> FileResult<FilterInfo> {
        stand_in(fs, h, "ops.decode_info")
    }

    /// Last transport error recorded on the node.
    fn last_error(&self, fs: &FileTable, h: FileHandle) -> Option<FileErrorKind> {
        let _ = (fs, h);
        Some(FileErrorKind::Closed)
    }
}

/// The closed sentinel's operation set: the entire error family.
///
/// A reference to a destroyed node is rewritten to point at the sentinel
/// node wired to this, so dispatch through it yields EOF/failure instead of
/// dereferencing freed state.
pub struct ClosedOps;

impl FileOps for ClosedOps {}

/// Device-backed implementation used by ordinary, base, and standard files.
pub struct RealFileOps;

impl FileOps for RealFileOps {
    fn fill(&self, fs: &mut FileTable, h: FileHandle) -> FileResult<Option<u8>> {
        fs.fill_real(h)
    }

    fn flush_byte(&self, fs: &mut FileTable, h: FileHandle, byte: u8) -> FileResult<()> {
        fs.flush_byte_real(h, byte)
    }

    fn init(&self, _fs: &mut FileTable, _h: FileHandle) -> FileResult<()> {
        // Buffers are allocated lazily on first fill/flush.
        Ok(())
    }

    fn close(&self, fs: &mut FileTable, h: FileHandle) -> FileResult<()> {
        fs.close_real(h)
    }

    fn dispose(&self, fs: &mut FileTable, h: FileHandle) {
        fs.dispose_real(h);
    }

    fn bytes_available(
        &self,
        fs: &mut FileTable,
        h: FileHandle,
        total: bool,
    ) -> FileResult<Option<u64>> {
        fs.bytes_available_real(h, total)
    }

    fn reset(&self, fs: &mut FileTable, h: FileHandle) -> FileResult<()> {
        fs.reset_real(h);
        Ok(())
    }

    fn position(&self, fs: &mut FileTable, h: FileHandle) -> FileResult<u64> {
        fs.position_real(h)
    }

    fn set_position(&self, fs: &mut FileTable, h: FileHandle, offset: u64) -> FileResult<()> {
        fs.set_position_real(h, offset)
    }

    fn flush_file(&self, fs: &mut FileTable, h: FileHandle) -> FileResult<()> {
        fs.flush_file_real(h)
    }

    fn last_error(&self, fs: &FileTable, h: FileHandle) -> Option<FileErrorKind> {
        fs.get(h).and_then(|n| n.last_error())
    }
}
