//! Logical position accounting and the seek engine.

use crate::device::Device;
use crate::error::{FileError, FileErrorKind, FileResult};
use crate::flags::FileFlags;
use crate::ids::{DeviceFd, FileHandle};
use crate::table::FileTable;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::io::SeekFrom;
use std::sync::Arc;
use tracing::trace;

/// Chunk bound for sparse zero-extension.
pub const BASEMAP_LEN: usize = 16 * 1024;

// Shared zero-filled scratch for materializing seek gaps. The lock admits
// one extension at a time; releasing on every exit path is the guard drop.
static BASEMAP: Lazy<Mutex<Box<[u8]>>> =
    Lazy::new(|| Mutex::new(vec![0u8; BASEMAP_LEN].into_boxed_slice()));

fn write_all(device: &Arc<dyn Device>, fd: DeviceFd, data: &[u8]) -> FileResult<()> {
    let mut written = 0;
    while written < data.len() {
        match device.write(fd, &data[written..]) {
            Err(err) => {
                device.report_error(&err);
                return Err(err);
            }
            Ok(0) => {
                let err = FileError::new(FileErrorKind::Eof, "file.zero_fill");
                device.report_error(&err);
                return Err(err);
            }
            Ok(n) => written += n,
        }
    }
    Ok(())
}

impl FileTable {
    /// Dispatch the get-position slot.
    pub fn position(&mut self, h: FileHandle) -> FileResult<u64> {
        let ops = self.ops_of(h, "file.position")?;
        ops.position(self, h)
    }

    /// Dispatch the set-position slot.
    pub fn set_position(&mut self, h: FileHandle, offset: u64) -> FileResult<()> {
        let ops = self.ops_of(h, "file.set_position")?;
        ops.set_position(self, h, offset)
    }

    /// Dispatch the flush-whole-file slot.
    pub fn flush_file(&mut self, h: FileHandle) -> FileResult<()> {
        let ops = self.ops_of(h, "file.flush_file")?;
        ops.flush_file(self, h)
    }

    /// Logical position: the raw transport offset corrected by the buffered
    /// window (unread bytes subtract, unflushed bytes add).
    pub(crate) fn position_real(&mut self, h: FileHandle) -> FileResult<u64> {
        let (device, fd) = self.device_of(h, "file.position")?;
        let raw = device.seek(fd, SeekFrom::Current(0))?;
        let node = self.require(h, "file.position")?;
        if node.flags.contains(FileFlags::LAST_FILL) {
            Ok(raw - node.unread() as u64)
        } else if node.flags.contains(FileFlags::DIRTY) {
            Ok(raw + node.len as u64)
        } else {
            Ok(raw)
        }
    }

    /// Reposition. A target inside the already-buffered window is a pure
    /// in-memory cursor move; anything else resets the node, and a target
    /// past the end of the store sparse-extends it with zero bytes.
    pub(crate) fn set_position_real(&mut self, h: FileHandle, target: u64) -> FileResult<()> {
        {
            let node = self.require(h, "file.set_position")?;
            if !node.is_open() {
                return Err(FileError::new(FileErrorKind::Closed, "file.set_position"));
            }
        }
        let (device, fd) = self.device_of(h, "file.set_position")?;

        if self
            .get(h)
            .is_some_and(|n| n.flags.contains(FileFlags::LAST_FILL))
        {
            // The raw offset sits at the end of the buffered window; the
            // window start is that minus the last fill's size.
            let raw = device.seek(fd, SeekFrom::Current(0))?;
            let node = self.require(h, "file.set_position")?;
            if let Some(window_start) = raw.checked_sub(node.len as u64)
                && target >= window_start
                && target <= raw
            {
                node.pos = (target - window_start) as usize;
                node.flags.remove(FileFlags::EOF);
                return Ok(());
            }
        }

        // Leaving the window needs a transport that can actually reposition.
        if !self
            .require(h, "file.set_position")?
            .flags
            .contains(FileFlags::REWINDABLE)
        {
            return Err(FileError::new(FileErrorKind::InvalidSeek, "file.set_position"));
        }

        self.flush_dirty(h)?;
        self.reset_real(h);
        let end = device.seek(fd, SeekFrom::End(0))?;
        if target > end {
            trace!(handle = ?h, gap = target - end, "sparse-extending file");
            self.zero_extend(&device, fd, target - end)?;
        } else {
            device.seek(fd, SeekFrom::Start(target))?;
        }
        self.require(h, "file.set_position")?
            .flags
            .remove(FileFlags::EOF);
        Ok(())
    }

    /// Materialize a seek gap by writing zero bytes from the shared scratch,
    /// full chunks first and the final partial chunk separately.
    fn zero_extend(&mut self, device: &Arc<dyn Device>, fd: DeviceFd, gap: u64) -> FileResult<()> {
        let scratch = BASEMAP.lock();
        let mut remaining = gap;
        while remaining >= BASEMAP_LEN as u64 {
            write_all(device, fd, &scratch)?;
            remaining -= BASEMAP_LEN as u64;
        }
        if remaining > 0 {
            write_all(device, fd, &scratch[..remaining as usize])?;
        }
        Ok(())
    }

    /// Flush-to-file: a read/write node last used for reading just discards
    /// its window; an output node writes through; a pure input node drains
    /// to end-of-data and goes EOF.
    pub(crate) fn flush_file_real(&mut self, h: FileHandle) -> FileResult<()> {
        let flags = self.require(h, "file.flush_file")?.flags;
        if !flags.is_open() {
            return Err(FileError::new(FileErrorKind::Closed, "file.flush_file"));
        }
        if flags.readable() && flags.writable() && flags.contains(FileFlags::LAST_FILL) {
            self.reset_real(h);
            return Ok(());
        }
        if flags.contains(FileFlags::DIRTY) {
            return self.flush_dirty(h);
        }
        if flags.readable() {
            let (device, fd) = self.device_of(h, "file.flush_file")?;
            device.seek(fd, SeekFrom::End(0))?;
            self.reset_real(h);
            self.require(h, "file.flush_file")?
                .flags
                .insert(FileFlags::EOF);
        }
        Ok(())
    }
}
