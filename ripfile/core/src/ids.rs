//! Core identifier types.

use core::num::NonZeroU32;

/// Weak handle to a node in a [`FileTable`](crate::FileTable): a slot index
/// paired with the slot's generation at the time the node was created.
///
/// Dereferencing a handle whose generation no longer matches the slot fails
/// safely ("absent"), which is how a severed filter chain is detected: the
/// generation plays the role of a per-identity filter id, bumped whenever a
/// slot's occupant is replaced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FileHandle {
    index: u32,
    generation: u32,
}

impl FileHandle {
    /// The shared closed sentinel: slot 0, generation 0, never reclaimed.
    ///
    /// Its node dispatches the error family for every operation, so a
    /// destroyed node's remaining referents can be redirected here instead of
    /// being left dangling.
    pub const CLOSED: FileHandle = FileHandle {
        index: 0,
        generation: 0,
    };

    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    #[inline]
    pub fn index(self) -> usize {
        self.index as usize
    }

    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }

    #[inline]
    pub fn is_closed_sentinel(self) -> bool {
        self == FileHandle::CLOSED
    }
}

/// Opaque descriptor returned by a [`Device`](crate::Device) on open.
///
/// Meaningless once the owning node's device binding is dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct DeviceFd(pub u64);

/// VM allocation class of a node, deciding which half of the registry it
/// lives in and which restore sweeps may reclaim it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AllocClass {
    Local,
    Global,
}

const GLOBAL_BIT: u32 = 1 << 31;
const DEPTH_MASK: u32 = GLOBAL_BIT - 1;

/// Packed (allocation-class bit | save depth) tag stamped on a node at
/// creation.
///
/// Restoring to level `L` invalidates every local node with `depth() > L`;
/// global nodes are only swept by a restore to the outermost level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct SaveTag(u32);

impl SaveTag {
    #[inline]
    pub fn local(depth: u32) -> Self {
        debug_assert!(depth <= DEPTH_MASK);
        Self(depth & DEPTH_MASK)
    }

    #[inline]
    pub fn global(depth: u32) -> Self {
        debug_assert!(depth <= DEPTH_MASK);
        Self(GLOBAL_BIT | (depth & DEPTH_MASK))
    }

    #[inline]
    pub fn depth(self) -> u32 {
        self.0 & DEPTH_MASK
    }

    #[inline]
    pub fn is_global(self) -> bool {
        self.0 & GLOBAL_BIT != 0
    }

    #[inline]
    pub fn class(self) -> AllocClass {
        if self.is_global() {
            AllocClass::Global
        } else {
            AllocClass::Local
        }
    }
}

/// Identifier of the higher-level execution context that owns a node.
///
/// `0` is reserved for "no owning context"; nodes without one store `None`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct PdfContextId(NonZeroU32);

impl PdfContextId {
    #[inline]
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    #[inline]
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_tag_packs_class_and_depth() {
        let local = SaveTag::local(7);
        assert_eq!(local.depth(), 7);
        assert_eq!(local.class(), AllocClass::Local);

        let global = SaveTag::global(7);
        assert_eq!(global.depth(), 7);
        assert!(global.is_global());
        assert_ne!(local, global);
    }

    #[test]
    fn zero_context_id_is_rejected() {
        assert!(PdfContextId::new(0).is_none());
        assert_eq!(PdfContextId::new(3).map(PdfContextId::get), Some(3));
    }
}
