//! The file node record.

use crate::device::Device;
use crate::error::FileErrorKind;
use crate::flags::FileFlags;
use crate::ids::{DeviceFd, FileHandle, PdfContextId, SaveTag};
use crate::ops::FileOps;
use smallvec::SmallVec;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Opaque parameter object attached to a filter node. Owned (strong) for the
/// node's whole lifetime; the host traces it through the `Arc` natively.
pub type ParamDict = dyn Any + Send + Sync;

/// Name bytes a base file's allocation reserves regardless of actual length.
pub const MAX_BASE_NAME: usize = 128;

/// The buffered window's backing store.
///
/// `Unallocated` is the distinguished "not yet allocated" state: a brand-new
/// node carries it until the first fill or flush actually needs bytes, and a
/// failed allocation leaves it in place.
pub(crate) enum BufState {
    Unallocated,
    Allocated(Box<[u8]>),
}

impl BufState {
    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        match self {
            BufState::Unallocated => 0,
            BufState::Allocated(buf) => buf.len(),
        }
    }

    #[inline]
    pub(crate) fn is_allocated(&self) -> bool {
        matches!(self, BufState::Allocated(_))
    }
}

/// A registered file-like object: a transport-backed file or a stacked
/// filter.
///
/// All per-node state lives here; behavior is dispatched through `ops`.
/// Buffered-window invariant: `pos <= len <= buf.capacity()`. In fill
/// direction `len` is the window size and `pos` the consumed prefix; in
/// flush direction `len` is the dirty byte count.
pub struct FileNode {
    pub(crate) name: SmallVec<[u8; 24]>,
    pub(crate) flags: FileFlags,
    pub(crate) descriptor: Option<DeviceFd>,
    pub(crate) buf: BufState,
    pub(crate) pos: usize,
    pub(crate) len: usize,
    pub(crate) device: Option<Arc<dyn Device>>,
    /// Weak link to the node this one is layered on. Generation-checked on
    /// every resolve; a stale handle reads as "chain already severed".
    pub(crate) underlying: Option<FileHandle>,
    pub(crate) save: SaveTag,
    pub(crate) pdf_context: Option<PdfContextId>,
    pub(crate) param_dict: Option<Arc<ParamDict>>,
    pub(crate) ops: Arc<dyn FileOps>,
    pub(crate) error: Option<FileErrorKind>,
}

impl FileNode {
    pub(crate) fn new(
        name: &[u8],
        flags: FileFlags,
        save: SaveTag,
        ops: Arc<dyn FileOps>,
    ) -> Self {
        Self {
            name: SmallVec::from_slice(name),
            flags,
            descriptor: None,
            buf: BufState::Unallocated,
            pos: 0,
            len: 0,
            device: None,
            underlying: None,
            save,
            pdf_context: None,
            param_dict: None,
            ops,
            error: None,
        }
    }

    #[inline]
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    #[inline]
    pub fn flags(&self) -> FileFlags {
        self.flags
    }

    #[inline]
    pub fn save_tag(&self) -> SaveTag {
        self.save
    }

    #[inline]
    pub fn descriptor(&self) -> Option<DeviceFd> {
        self.descriptor
    }

    #[inline]
    pub fn underlying(&self) -> Option<FileHandle> {
        self.underlying
    }

    #[inline]
    pub fn pdf_context(&self) -> Option<PdfContextId> {
        self.pdf_context
    }

    #[inline]
    pub fn param_dict(&self) -> Option<&Arc<ParamDict>> {
        self.param_dict.as_ref()
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.flags.is_open()
    }

    #[inline]
    pub fn last_error(&self) -> Option<FileErrorKind> {
        self.error
    }

    /// Unread bytes left in the buffered window (fill direction only).
    #[inline]
    pub fn unread(&self) -> usize {
        if self.flags.contains(FileFlags::LAST_FILL) {
            self.len - self.pos
        } else {
            0
        }
    }

    /// Buffered bytes awaiting flush (flush direction only).
    #[inline]
    pub fn dirty_len(&self) -> usize {
        if self.flags.contains(FileFlags::DIRTY) {
            self.len
        } else {
            0
        }
    }

    /// Allocation footprint of this node for the host allocator's block
    /// accounting: the record itself plus its name allotment. Filters and
    /// standard streams store no name bytes, base files reserve a fixed
    /// maximum, ordinary files carry `length + 1`.
    pub fn alloc_len(&self) -> usize {
        let name_bytes = if self
            .flags
            .intersects(FileFlags::FILTER | FileFlags::STD)
        {
            0
        } else if self.flags.contains(FileFlags::BASE) {
            MAX_BASE_NAME
        } else {
            self.name.len() + 1
        };
        size_of::<FileNode>() + name_bytes
    }

    #[inline]
    pub(crate) fn window(&self) -> &[u8] {
        match &self.buf {
            BufState::Allocated(buf) => buf,
            BufState::Unallocated => &[],
        }
    }

    #[inline]
    pub(crate) fn window_mut(&mut self) -> &mut [u8] {
        match &mut self.buf {
            BufState::Allocated(buf) => buf,
            BufState::Unallocated => &mut [],
        }
    }

    pub(crate) fn drop_window(&mut self) {
        self.pos = 0;
        self.len = 0;
        self.flags.remove(FileFlags::LAST_FILL | FileFlags::DIRTY);
    }
}

impl fmt::Debug for FileNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileNode")
            .field("name", &String::from_utf8_lossy(&self.name))
            .field("flags", &self.flags)
            .field("save", &self.save)
            .field("descriptor", &self.descriptor)
            .field("buf_capacity", &self.buf.capacity())
            .field("pos", &self.pos)
            .field("len", &self.len)
            .field("device", &self.device.as_ref().map(|d| d.name()))
            .field("underlying", &self.underlying)
            .field("pdf_context", &self.pdf_context)
            .field("error", &self.error)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::ClosedOps;

    fn node(flags: FileFlags, name: &[u8]) -> FileNode {
        FileNode::new(name, flags, SaveTag::local(1), Arc::new(ClosedOps))
    }

    #[test]
    fn alloc_len_follows_the_sizing_formula() {
        let base = size_of::<FileNode>();
        assert_eq!(node(FileFlags::FILTER, b"ignored").alloc_len(), base);
        assert_eq!(node(FileFlags::STD, b"").alloc_len(), base);
        assert_eq!(
            node(FileFlags::BASE, b"%dev%").alloc_len(),
            base + MAX_BASE_NAME
        );
        assert_eq!(
            node(FileFlags::READ, b"%ram%job.ps").alloc_len(),
            base + b"%ram%job.ps".len() + 1
        );
    }

    #[test]
    fn unread_and_dirty_are_direction_gated() {
        let mut n = node(FileFlags::READ | FileFlags::WRITE, b"x");
        n.buf = BufState::Allocated(vec![0; 8].into_boxed_slice());
        n.len = 5;
        n.pos = 2;
        assert_eq!(n.unread(), 0);
        assert_eq!(n.dirty_len(), 0);

        n.flags.insert(FileFlags::LAST_FILL);
        assert_eq!(n.unread(), 3);

        n.flags.remove(FileFlags::LAST_FILL);
        n.flags.insert(FileFlags::DIRTY);
        assert_eq!(n.dirty_len(), 5);
    }
}
