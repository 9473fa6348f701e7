//! The file registry.
//!
//! One arena holds every live node; each slot carries an allocation-class
//! tag and a generation counter. The two scope-ordered lists of the classic
//! design become iteration orders over the arena, and unlinking a node bumps
//! its slot generation so every outstanding [`FileHandle`] to it reads as
//! absent from then on. Slot 0 is permanently occupied by the closed
//! sentinel.

use crate::device::Device;
use crate::error::{FileError, FileErrorKind, FileResult};
use crate::flags::FileFlags;
use crate::ids::{AllocClass, FileHandle, PdfContextId, SaveTag};
use crate::node::{FileNode, ParamDict};
use crate::ops::{ClosedOps, FileOps, RealFileOps};
use crate::params::FileParams;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, trace};

pub(crate) struct Slot {
    pub(crate) generation: u32,
    pub(crate) node: Option<FileNode>,
}

/// Registry of every live file and filter node.
///
/// Single-mutator model: the table is owned by the interpreter thread and
/// all structural mutation (link, unlink, restore sweeps) happens there.
pub struct FileTable {
    pub(crate) slots: Vec<Slot>,
    params: FileParams,
    /// Ambient "error signalled" state, saved and put back around the
    /// best-effort restore sweep so cleanup noise never masks a pending
    /// error.
    pending_error: Option<FileErrorKind>,
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FileTable {
    pub fn new() -> Self {
        // The sentinel is a real resident node so dispatch through
        // FileHandle::CLOSED needs no special casing; it is closed, global,
        // and wired to the error family.
        let sentinel = FileNode::new(
            b"",
            FileFlags::empty(),
            SaveTag::global(0),
            Arc::new(ClosedOps),
        );
        Self {
            slots: vec![Slot {
                generation: 0,
                node: Some(sentinel),
            }],
            params: FileParams::default(),
            pending_error: None,
        }
    }

    /// Resolve a handle, failing safe: a freed or replaced slot yields
    /// `None` even though the index is in range.
    pub fn get(&self, h: FileHandle) -> Option<&FileNode> {
        let slot = self.slots.get(h.index())?;
        if slot.generation != h.generation() {
            return None;
        }
        slot.node.as_ref()
    }

    pub fn get_mut(&mut self, h: FileHandle) -> Option<&mut FileNode> {
        let slot = self.slots.get_mut(h.index())?;
        if slot.generation != h.generation() {
            return None;
        }
        slot.node.as_mut()
    }

    pub(crate) fn require(
        &mut self,
        h: FileHandle,
        context: &'static str,
    ) -> FileResult<&mut FileNode> {
        self.get_mut(h)
            .ok_or(FileError::new(FileErrorKind::Closed, context))
    }

    pub(crate) fn ops_of(&self, h: FileHandle, context: &'static str) -> FileResult<Arc<dyn FileOps>> {
        self.get(h)
            .map(|n| n.ops.clone())
            .ok_or(FileError::new(FileErrorKind::Closed, context))
    }

    fn link(&mut self, node: FileNode) -> FileHandle {
        // Slot 0 is never reused; start probing after it.
        for (index, slot) in self.slots.iter_mut().enumerate().skip(1) {
            if slot.node.is_none() {
                slot.node = Some(node);
                return FileHandle::new(index as u32, slot.generation);
            }
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        FileHandle::new(index, 0)
    }

    /// Unlink a node: the slot is emptied and its generation bumped, which
    /// retires every outstanding handle to the old occupant.
    pub(crate) fn free_slot(&mut self, h: FileHandle) {
        debug_assert!(!h.is_closed_sentinel(), "the closed sentinel is never unlinked");
        if let Some(slot) = self.slots.get_mut(h.index())
            && slot.generation == h.generation()
        {
            slot.node = None;
            slot.generation = slot.generation.wrapping_add(1);
        }
    }

    /// Open a transport-backed file node at the VM's current save level.
    pub fn open_file(
        &mut self,
        device: Arc<dyn Device>,
        name: &[u8],
        flags: FileFlags,
        save: SaveTag,
    ) -> FileResult<FileHandle> {
        debug_assert!(
            flags.intersects(FileFlags::READ | FileFlags::WRITE),
            "a file must be opened for reading, writing, or both"
        );
        debug_assert!(!flags.is_filter(), "filters go through open_filter");

        let fd = device.open(name, flags)?;
        let mut node = FileNode::new(name, flags | FileFlags::OPEN, save, Arc::new(RealFileOps));
        if device.prefers_small_buffer() {
            node.flags.insert(FileFlags::SMALL_BUFF);
        }
        // Device transports seek; standard streams are strictly sequential.
        if !flags.contains(FileFlags::STD) {
            node.flags.insert(FileFlags::REWINDABLE);
        }
        node.descriptor = Some(fd);
        node.device = Some(device);
        let h = self.link(node);
        let ops = self.ops_of(h, "file.open")?;
        if let Err(err) = ops.init(self, h) {
            // Failed setup must not leave a half-linked node or a live
            // descriptor behind.
            if let Some(node) = self.get_mut(h)
                && let (Some(device), Some(fd)) = (node.device.take(), node.descriptor.take())
            {
                device.abort(fd);
            }
            self.free_slot(h);
            return Err(err);
        }
        debug!(
            name = %String::from_utf8_lossy(name),
            handle = ?h,
            depth = save.depth(),
            global = save.is_global(),
            "opened file node"
        );
        Ok(h)
    }

    /// Register a standard stream. Never swept by restore; close only
    /// flushes.
    pub fn open_std(
        &mut self,
        device: Arc<dyn Device>,
        name: &[u8],
        flags: FileFlags,
    ) -> FileResult<FileHandle> {
        self.open_file(device, name, flags | FileFlags::STD, SaveTag::global(0))
    }

    /// Layer a filter node over `underlying`, with caller-supplied ops for
    /// the encode/decode slots.
    pub fn open_filter(
        &mut self,
        ops: Arc<dyn FileOps>,
        underlying: Option<FileHandle>,
        flags: FileFlags,
        save: SaveTag,
        pdf_context: Option<PdfContextId>,
        param_dict: Option<Arc<ParamDict>>,
    ) -> FileResult<FileHandle> {
        debug_assert!(
            flags.intersects(FileFlags::READ | FileFlags::WRITE),
            "a filter must be opened for reading, writing, or both"
        );
        let mut node = FileNode::new(
            b"",
            flags | FileFlags::FILTER | FileFlags::OPEN,
            save,
            ops,
        );
        node.underlying = underlying;
        node.pdf_context = pdf_context;
        node.param_dict = param_dict;
        let h = self.link(node);
        let ops = self.ops_of(h, "filter.open")?;
        if let Err(err) = ops.init(self, h) {
            self.free_slot(h);
            return Err(err);
        }
        debug!(handle = ?h, underlying = ?underlying, "opened filter node");
        Ok(h)
    }

    /// Resolve a node's `underlying` link, treating a stale generation as
    /// already severed.
    pub fn resolve_underlying(&self, h: FileHandle) -> Option<FileHandle> {
        let u = self.get(h)?.underlying?;
        self.get(u).map(|_| u)
    }

    /// Walk local-class nodes in slot order, then (optionally) global-class
    /// nodes, as one logical sequence. The sentinel is not a registry
    /// member and is skipped.
    pub fn iter(
        &self,
        include_global: bool,
    ) -> impl Iterator<Item = (FileHandle, &FileNode)> + '_ {
        let pass = move |class: AllocClass| {
            self.slots
                .iter()
                .enumerate()
                .skip(1)
                .filter_map(move |(index, slot)| {
                    let node = slot.node.as_ref()?;
                    (node.save.class() == class)
                        .then(|| (FileHandle::new(index as u32, slot.generation), node))
                })
        };
        pass(AllocClass::Local).chain(
            include_global
                .then(|| pass(AllocClass::Global))
                .into_iter()
                .flatten(),
        )
    }

    pub(crate) fn resident_handles(&self) -> Vec<FileHandle> {
        self.iter(true).map(|(h, _)| h).collect()
    }

    /// Device-closing guard: refuse to let `device` shut down while live
    /// nodes still reference it. A closed base file merely loses its device
    /// binding, which is safe since nothing can use it again.
    pub fn close_device(&mut self, device: &Arc<dyn Device>) -> FileResult<()> {
        for h in self.resident_handles() {
            let Some(node) = self.get(h) else { continue };
            let Some(bound) = node.device.as_ref() else {
                continue;
            };
            if !Arc::ptr_eq(bound, device) {
                continue;
            }
            if !node.is_open() && node.flags.contains(FileFlags::BASE) {
                let node = self.get_mut(h).expect("handle resolved above");
                node.device = None;
                node.descriptor = None;
                continue;
            }
            trace!(handle = ?h, device = device.name(), "device close refused");
            return Err(FileError::new(
                FileErrorKind::AccessConflict,
                "device.close_guard",
            ));
        }
        Ok(())
    }

    /// Mark a node closed without touching any transport. Filter close
    /// implementations call this after releasing their own state; closing
    /// an already-closed node is the defined `Closed` failure.
    pub fn mark_closed(&mut self, h: FileHandle) -> FileResult<()> {
        let node = self.require(h, "file.close")?;
        if !node.is_open() {
            return Err(FileError::new(FileErrorKind::Closed, "file.close"));
        }
        node.drop_window();
        node.flags.remove(FileFlags::OPEN);
        Ok(())
    }

    /// Mark a node at end of data (filter decoders use this when the
    /// end-of-data marker is consumed).
    pub fn mark_eof(&mut self, h: FileHandle) -> FileResult<()> {
        let node = self.require(h, "file.mark_eof")?;
        node.flags.insert(FileFlags::EOF);
        Ok(())
    }

    /// Bind or unbind the owning execution context of a node.
    pub fn set_pdf_context(
        &mut self,
        h: FileHandle,
        context: Option<PdfContextId>,
    ) -> FileResult<()> {
        self.require(h, "file.set_context")?.pdf_context = context;
        Ok(())
    }

    pub fn params(&self) -> &FileParams {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut FileParams {
        &mut self.params
    }

    /// Record an ambient pending error (the VM's "error signalled" state).
    pub fn signal_error(&mut self, kind: FileErrorKind) {
        self.pending_error = Some(kind);
    }

    pub fn pending_error(&self) -> Option<FileErrorKind> {
        self.pending_error
    }

    pub fn take_pending_error(&mut self) -> Option<FileErrorKind> {
        self.pending_error.take()
    }

    pub(crate) fn save_pending_error(&mut self) -> Option<FileErrorKind> {
        self.pending_error.take()
    }

    pub(crate) fn restore_pending_error(&mut self, saved: Option<FileErrorKind>) {
        self.pending_error = saved;
    }

    /// Human-readable description of one node's state, including its
    /// underlying chain. Diagnostics only.
    pub fn dump(&self, h: FileHandle) -> String {
        let mut out = String::new();
        let mut cursor = Some(h);
        while let Some(current) = cursor {
            match self.get(current) {
                Some(node) => {
                    let _ = writeln!(out, "{current:?} -> {node:?}");
                    cursor = node.underlying;
                }
                None => {
                    let _ = writeln!(out, "{current:?} -> <absent>");
                    cursor = None;
                }
            }
        }
        out
    }
}
