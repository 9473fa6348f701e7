//! Buffered-window management: lazy allocation, fill/flush, and the
//! zero-copy window API.

use crate::device::Device;
use crate::error::{FileError, FileErrorKind, FileResult};
use crate::flags::FileFlags;
use crate::ids::{DeviceFd, FileHandle};
use crate::node::BufState;
use crate::table::FileTable;
use std::sync::Arc;
use tracing::trace;

/// Standard lazy buffer size when the device gives no hint.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;
/// Buffer size for nodes flagged `SMALL_BUFF` (or on devices preferring it).
pub const SMALL_BUFFER_SIZE: usize = 128;

impl FileTable {
    /// Read one byte, filling the window as needed. `Ok(None)` is EOF.
    pub fn getc(&mut self, h: FileHandle) -> FileResult<Option<u8>> {
        if let Some(node) = self.get_mut(h)
            && node.is_open()
            && node.unread() > 0
        {
            let b = node.window()[node.pos];
            node.pos += 1;
            return Ok(Some(b));
        }
        self.fill_buf(h)
    }

    /// Step the read cursor back over the last byte returned by [`getc`].
    ///
    /// [`getc`]: FileTable::getc
    pub fn ungetc(&mut self, h: FileHandle) -> FileResult<()> {
        let node = self.require(h, "file.ungetc")?;
        if node.flags.contains(FileFlags::LAST_FILL) && node.pos > 0 {
            node.pos -= 1;
            Ok(())
        } else {
            Err(FileError::new(FileErrorKind::InvalidSeek, "file.ungetc"))
        }
    }

    /// Write one byte, flushing through the node's ops when the window is
    /// full (or not yet in flush direction).
    pub fn putc(&mut self, h: FileHandle, byte: u8) -> FileResult<()> {
        if let Some(node) = self.get_mut(h)
            && node.is_open()
            && node.flags.contains(FileFlags::DIRTY)
            && node.len < node.buf.capacity()
        {
            let at = node.len;
            node.window_mut()[at] = byte;
            node.len = at + 1;
            return Ok(());
        }
        let ops = self.ops_of(h, "file.putc")?;
        ops.flush_byte(self, h, byte)
    }

    /// Read into `out`, returning how many bytes arrived before EOF.
    pub fn read(&mut self, h: FileHandle, out: &mut [u8]) -> FileResult<usize> {
        let mut total = 0;
        while total < out.len() {
            {
                let node = self.require(h, "file.read")?;
                let avail = node.unread();
                if avail > 0 {
                    let n = avail.min(out.len() - total);
                    out[total..total + n]
                        .copy_from_slice(&node.window()[node.pos..node.pos + n]);
                    node.pos += n;
                    total += n;
                    continue;
                }
            }
            match self.fill_buf(h)? {
                Some(byte) => {
                    out[total] = byte;
                    total += 1;
                }
                None => break,
            }
        }
        Ok(total)
    }

    /// Write all of `data` through the buffered window.
    pub fn write(&mut self, h: FileHandle, data: &[u8]) -> FileResult<()> {
        let mut total = 0;
        while total < data.len() {
            let chunk = self.put_file_buf(h, data.len() - total)?;
            let n = chunk.len();
            debug_assert!(n > 0, "put_file_buf returned an empty window");
            chunk.copy_from_slice(&data[total..total + n]);
            total += n;
        }
        Ok(())
    }

    /// Dispatch the fill slot.
    pub fn fill_buf(&mut self, h: FileHandle) -> FileResult<Option<u8>> {
        let ops = self.ops_of(h, "file.fill")?;
        ops.fill(self, h)
    }

    /// Dispatch the flush-byte slot.
    pub fn flush_byte(&mut self, h: FileHandle, byte: u8) -> FileResult<()> {
        let ops = self.ops_of(h, "file.flush_byte")?;
        ops.flush_byte(self, h, byte)
    }

    /// Dispatch the reset slot.
    pub fn reset(&mut self, h: FileHandle) -> FileResult<()> {
        let ops = self.ops_of(h, "file.reset")?;
        ops.reset(self, h)
    }

    /// Dispatch the bytes-available slot.
    pub fn bytes_available(&mut self, h: FileHandle, total: bool) -> FileResult<Option<u64>> {
        let ops = self.ops_of(h, "file.bytes_available")?;
        ops.bytes_available(self, h, total)
    }

    /// Zero-copy read window: up to `max` already-buffered bytes, consumed
    /// by the act of handing them out. Never touches the transport.
    pub fn get_file_buf(&mut self, h: FileHandle, max: usize) -> FileResult<&[u8]> {
        let node = self.require(h, "file.get_buf")?;
        let n = node.unread().min(max);
        let start = node.pos;
        node.pos += n;
        Ok(&node.window()[start..start + n])
    }

    /// Zero-copy write window: reserve up to `want` bytes for the caller to
    /// fill, flushing proactively so the buffer never lands exactly full
    /// (at least one free byte always remains after the call).
    pub fn put_file_buf(&mut self, h: FileHandle, want: usize) -> FileResult<&mut [u8]> {
        self.leave_fill_window(h, want, "file.put_buf")?;
        self.ensure_buffer(h, "file.put_buf")?;
        let free = {
            let node = self.require(h, "file.put_buf")?;
            node.buf.capacity() - node.len
        };
        if want >= free {
            self.flush_dirty(h)?;
        }
        let node = self.require(h, "file.put_buf")?;
        node.flags.insert(FileFlags::DIRTY);
        let start = node.len;
        let n = want.min(node.buf.capacity() - start - 1);
        node.len = start + n;
        Ok(&mut node.window_mut()[start..start + n])
    }

    /// Make sure at least one byte is buffered, filling on demand and then
    /// un-getting so peeking does not consume. `Ok(false)` is EOF.
    pub fn ensure_not_empty(&mut self, h: FileHandle) -> FileResult<bool> {
        {
            let node = self.require(h, "file.ensure_not_empty")?;
            if node.unread() > 0 {
                return Ok(true);
            }
        }
        match self.fill_buf(h)? {
            Some(_) => {
                self.ungetc(h)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Leave fill direction before writing. The device is stepped back over
    /// the unread tail of the window plus up to `overwrite` just-consumed
    /// bytes, so the write lands where the reader logically stands — and a
    /// get/put pair of equal counts writes back over exactly the bytes it
    /// got.
    fn leave_fill_window(
        &mut self,
        h: FileHandle,
        overwrite: usize,
        context: &'static str,
    ) -> FileResult<()> {
        let (back, has_device) = {
            let node = self.require(h, context)?;
            if !node.is_open() {
                return Err(FileError::new(FileErrorKind::Closed, context));
            }
            debug_assert!(node.flags.writable(), "write access on a read-only node");
            if !node.flags.contains(FileFlags::LAST_FILL) {
                return Ok(());
            }
            // The window grants at most capacity - 1 bytes; rewinding past
            // what the write can cover would clobber bytes it never touches.
            let granted = overwrite.min(node.buf.capacity().saturating_sub(1));
            let back = node.unread() + granted.min(node.pos);
            node.drop_window();
            (back, node.device.is_some())
        };
        if back > 0 && has_device {
            let (device, fd) = self.device_of(h, context)?;
            device.seek(fd, std::io::SeekFrom::Current(-(back as i64)))?;
        }
        Ok(())
    }

    pub(crate) fn device_of(
        &mut self,
        h: FileHandle,
        context: &'static str,
    ) -> FileResult<(Arc<dyn Device>, DeviceFd)> {
        let node = self.require(h, context)?;
        match (node.device.clone(), node.descriptor) {
            (Some(device), Some(fd)) => Ok((device, fd)),
            _ => Err(FileError::new(FileErrorKind::Closed, context)),
        }
    }

    /// Lazily allocate the window: device hint first, then the small or
    /// standard default. A failed allocation surfaces as out-of-memory and
    /// leaves the unallocated sentinel in place.
    pub(crate) fn ensure_buffer(&mut self, h: FileHandle, context: &'static str) -> FileResult<()> {
        let node = self.require(h, context)?;
        if node.buf.is_allocated() {
            return Ok(());
        }
        let hint = node.device.as_ref().map_or(0, |d| d.buffer_size_hint());
        let size = if hint > 0 {
            hint
        } else if node.flags.contains(FileFlags::SMALL_BUFF) {
            SMALL_BUFFER_SIZE
        } else {
            DEFAULT_BUFFER_SIZE
        };
        // A window needs room for at least one byte plus the one-free-byte
        // guarantee of put_file_buf.
        let size = size.max(2);
        let mut storage: Vec<u8> = Vec::new();
        if storage.try_reserve_exact(size).is_err() {
            return Err(FileError::new(FileErrorKind::OutOfMemory, context));
        }
        storage.resize(size, 0);
        node.buf = BufState::Allocated(storage.into_boxed_slice());
        trace!(handle = ?h, size, "allocated file buffer");
        Ok(())
    }

    /// Device-backed fill: the "unbuffered next char" contract.
    pub(crate) fn fill_real(&mut self, h: FileHandle) -> FileResult<Option<u8>> {
        {
            let node = self.require(h, "file.fill")?;
            if !node.is_open() {
                return Err(FileError::new(FileErrorKind::Closed, "file.fill"));
            }
            debug_assert!(node.flags.readable(), "fill on a non-readable node");
            if node.flags.contains(FileFlags::EOF) {
                return Ok(None);
            }
        }
        // Switching direction on a read/write node flushes pending output
        // first.
        if self.get(h).is_some_and(|n| n.dirty_len() > 0) {
            self.flush_dirty(h)?;
        }
        self.ensure_buffer(h, "file.fill")?;
        let (device, fd) = self.device_of(h, "file.fill")?;
        let node = self.require(h, "file.fill")?;
        match device.read(fd, node.window_mut()) {
            Err(err) => {
                node.error = Some(err.kind());
                device.report_error(&err);
                Err(err)
            }
            Ok(0) => {
                node.drop_window();
                node.flags.insert(FileFlags::EOF);
                Ok(None)
            }
            Ok(n) => {
                node.len = n;
                node.pos = 1;
                node.flags.remove(FileFlags::DIRTY);
                node.flags.insert(FileFlags::LAST_FILL);
                Ok(Some(node.window()[0]))
            }
        }
    }

    /// Device-backed flush-byte: write the dirty window through, then start
    /// a fresh window holding `byte`. The byte itself travels with the next
    /// write-through, so physical writes always move whole windows;
    /// transport contents come out the same, only the batching boundary
    /// sits one byte earlier.
    pub(crate) fn flush_byte_real(&mut self, h: FileHandle, byte: u8) -> FileResult<()> {
        self.leave_fill_window(h, 0, "file.flush_byte")?;
        // First write on a never-allocated buffer must only buffer the byte:
        // allocating here leaves the dirty count at zero, so flush_dirty is
        // a no-op and no physical write happens.
        self.ensure_buffer(h, "file.flush_byte")?;
        self.flush_dirty(h)?;
        let node = self.require(h, "file.flush_byte")?;
        node.window_mut()[0] = byte;
        node.pos = 0;
        node.len = 1;
        node.flags.insert(FileFlags::DIRTY);
        Ok(())
    }

    /// Write the dirty window through the device. Short writes are EOF.
    pub(crate) fn flush_dirty(&mut self, h: FileHandle) -> FileResult<()> {
        let dirty = self.get(h).map_or(0, |n| n.dirty_len());
        if dirty == 0 {
            return Ok(());
        }
        let (device, fd) = self.device_of(h, "file.flush")?;
        let mut written = 0;
        while written < dirty {
            let result = {
                let node = self.require(h, "file.flush")?;
                device.write(fd, &node.window()[written..dirty])
            };
            match result {
                Err(err) => {
                    self.require(h, "file.flush")?.error = Some(err.kind());
                    device.report_error(&err);
                    return Err(err);
                }
                Ok(0) => {
                    let err = FileError::new(FileErrorKind::Eof, "file.flush");
                    self.require(h, "file.flush")?.error = Some(err.kind());
                    device.report_error(&err);
                    return Err(err);
                }
                Ok(n) => written += n,
            }
        }
        self.require(h, "file.flush")?.drop_window();
        Ok(())
    }

    pub(crate) fn bytes_available_real(
        &mut self,
        h: FileHandle,
        total: bool,
    ) -> FileResult<Option<u64>> {
        let (device, fd) = self.device_of(h, "file.bytes_available")?;
        let raw = device.bytes_available(fd, total)?;
        if total {
            return Ok(raw);
        }
        let unread = self.require(h, "file.bytes_available")?.unread() as u64;
        Ok(raw.map(|n| n + unread))
    }

    pub(crate) fn reset_real(&mut self, h: FileHandle) {
        if let Some(node) = self.get_mut(h) {
            node.drop_window();
        }
    }

    pub(crate) fn dispose_real(&mut self, h: FileHandle) {
        if let Some(node) = self.get_mut(h) {
            node.drop_window();
            node.buf = BufState::Unallocated;
        }
    }
}
