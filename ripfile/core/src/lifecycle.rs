//! Save-level lifecycle: close, bulk restore, context-scoped filter
//! teardown, and out-of-band finalization.

use crate::error::{FileError, FileErrorKind, FileResult};
use crate::flags::FileFlags;
use crate::ids::{FileHandle, PdfContextId};
use crate::ops::FilterInfo;
use crate::table::FileTable;
use smallvec::SmallVec;
use tracing::{debug, trace};

impl FileTable {
    /// Close a node through its close slot. Closing an already-closed node
    /// is the defined `Closed` failure and performs no transport call.
    pub fn close(&mut self, h: FileHandle) -> FileResult<()> {
        let (close_source, underlying) = {
            let node = self.require(h, "file.close")?;
            (
                node.flags.is_filter() && node.flags.contains(FileFlags::CLOSE_SOURCE),
                node.underlying,
            )
        };
        let ops = self.ops_of(h, "file.close")?;
        ops.close(self, h)?;
        if close_source
            && let Some(u) = underlying
            && self.get(u).is_some()
        {
            // Best effort; a severed or already-closed source is fine.
            let _ = self.close(u);
        }
        Ok(())
    }

    /// Dispatch the filter-encode slot.
    pub fn encode(&mut self, h: FileHandle, src: &[u8]) -> FileResult<usize> {
        let ops = self.ops_of(h, "filter.encode")?;
        ops.encode(self, h, src)
    }

    /// Dispatch the filter-decode slot.
    pub fn decode(&mut self, h: FileHandle, dst: &mut [u8]) -> FileResult<usize> {
        let ops = self.ops_of(h, "filter.decode")?;
        ops.decode(self, h, dst)
    }

    /// Dispatch the filter-decode-info slot.
    pub fn decode_info(&mut self, h: FileHandle) -> FileResult<FilterInfo> {
        let ops = self.ops_of(h, "filter.decode_info")?;
        ops.decode_info(self, h)
    }

    /// Dispatch the last-error slot.
    pub fn last_error(&self, h: FileHandle) -> Option<FileErrorKind> {
        match self.get(h) {
            Some(node) => node.ops.clone().last_error(self, h),
            None => Some(FileErrorKind::Closed),
        }
    }

    /// Device-backed close: flush pending output, release the descriptor,
    /// and mark the node closed. Standard streams only flush.
    pub(crate) fn close_real(&mut self, h: FileHandle) -> FileResult<()> {
        let flags = self.require(h, "file.close")?.flags;
        if !flags.is_open() {
            return Err(FileError::new(FileErrorKind::Closed, "file.close"));
        }
        if flags.contains(FileFlags::STD) {
            return self.flush_dirty(h);
        }
        if flags.contains(FileFlags::DIRTY) {
            self.flush_dirty(h)?;
        }
        let (device, fd) = self.device_of(h, "file.close")?;
        device.close(fd)?;
        let node = self.require(h, "file.close")?;
        node.drop_window();
        node.flags.remove(FileFlags::OPEN);
        trace!(handle = ?h, "closed file node");
        Ok(())
    }

    /// Force a node closed, swallowing every error: output is flushed best
    /// effort, the close and dispose slots run, and the node ends up closed
    /// no matter what they report.
    pub(crate) fn force_close(&mut self, h: FileHandle) {
        let Some(node) = self.get(h) else { return };
        if !node.is_open() {
            return;
        }
        if node.flags.writable() {
            let _ = self.flush_dirty(h);
        }
        if let Ok(ops) = self.ops_of(h, "file.force_close") {
            // A failed close slot still releases the descriptor, unflushed.
            if ops.close(self, h).is_err()
                && let Some(node) = self.get_mut(h)
                && let (Some(device), Some(fd)) = (node.device.take(), node.descriptor.take())
            {
                device.abort(fd);
            }
            ops.dispose(self, h);
        }
        if let Some(node) = self.get_mut(h) {
            node.flags.remove(FileFlags::OPEN);
            node.error = None;
        }
    }

    /// Bulk restore to save level `level`: force-close and unlink every
    /// node created at a strictly greater depth, then null every surviving
    /// node's `underlying` link to a local node this sweep invalidated.
    ///
    /// Global-class nodes are only swept by a restore to the outermost
    /// level; a global underlying is never severed by a local restore.
    /// Per-node close failures are discarded, and the ambient pending error
    /// is saved around the sweep so cleanup noise cannot mask it.
    pub fn restore(&mut self, level: u32) {
        let saved = self.save_pending_error();

        let mut local_victims: SmallVec<[FileHandle; 8]> = SmallVec::new();
        for h in self.resident_handles() {
            let Some(node) = self.get(h) else { continue };
            let tag = node.save_tag();
            if tag.depth() <= level {
                continue;
            }
            if tag.is_global() && level != 0 {
                continue;
            }
            trace!(handle = ?h, depth = tag.depth(), "restore sweeping node");
            self.force_close(h);
            if !tag.is_global() {
                local_victims.push(h);
            }
            self.free_slot(h);
        }

        if !local_victims.is_empty() {
            for h in self.resident_handles() {
                if let Some(node) = self.get_mut(h)
                    && let Some(u) = node.underlying
                    && local_victims.contains(&u)
                {
                    node.underlying = None;
                }
            }
        }

        debug!(level, swept = local_victims.len(), "restored file registry");
        self.restore_pending_error(saved);
    }

    /// Close every filter stacked on a node owned by `context` (optionally
    /// just those stacked on `target`), severing the chain. The wrapper
    /// nodes stay registered and are reclaimed normally.
    pub fn close_pdf_filters(&mut self, context: PdfContextId, target: Option<FileHandle>) {
        for h in self.resident_handles() {
            let Some(u) = self.get(h).and_then(|n| n.underlying) else {
                continue;
            };
            let Some(under) = self.get(u) else {
                // Generation mismatch: the chain is already severed.
                continue;
            };
            if under.pdf_context() != Some(context) {
                continue;
            }
            if let Some(t) = target
                && t != u
            {
                continue;
            }
            debug!(handle = ?h, underlying = ?u, context = context.get(), "closing context filter");
            self.force_close(h);
            if let Some(node) = self.get_mut(h) {
                node.underlying = None;
            }
        }
    }

    /// Out-of-band destruction of one node: close it, unlink it, and
    /// redirect every other node's `underlying` reference to the shared
    /// closed sentinel so later dispatch yields the error family instead of
    /// dangling.
    ///
    /// # Panics
    ///
    /// A node not present in the registry means the registry structure is
    /// inconsistent; that is always fatal.
    pub fn finalize(&mut self, h: FileHandle) {
        assert!(!h.is_closed_sentinel(), "finalize of the closed sentinel");
        assert!(
            self.get(h).is_some(),
            "finalize: node not present in the file registry"
        );
        debug!(handle = ?h, "finalizing file node");
        self.force_close(h);
        self.free_slot(h);
        for other in self.resident_handles() {
            if let Some(node) = self.get_mut(other)
                && node.underlying == Some(h)
            {
                node.underlying = Some(FileHandle::CLOSED);
            }
        }
    }
}
