//! Node flag bits.

use bitflags::bitflags;

bitflags! {
    /// State and capability bits of a [`FileNode`](crate::FileNode).
    ///
    /// The access bits (`READ`/`WRITE`) are fixed at open time; the direction
    /// markers (`LAST_FILL`/`DIRTY`) track which way the buffered window was
    /// last used and are what the position engine consults when adjusting a
    /// raw transport offset.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct FileFlags: u32 {
        /// End of data observed on the transport.
        const EOF = 1 << 0;
        const READ = 1 << 1;
        const WRITE = 1 << 2;
        /// The node holds a live descriptor (or a live filter state).
        const OPEN = 1 << 3;
        /// Standard stream: never swept by restore, close only flushes.
        const STD = 1 << 4;
        /// The node is a stacked filter rather than a transport-backed file.
        const FILTER = 1 << 5;
        /// Base file of a device (fixed-size name allotment).
        const BASE = 1 << 6;
        /// Prefer the small buffer size when lazily allocating.
        const SMALL_BUFF = 1 << 7;
        /// The transport supports rewinding to offset zero.
        const REWINDABLE = 1 << 8;
        /// The buffered window holds data from the last fill.
        const LAST_FILL = 1 << 9;
        /// The buffered window holds bytes not yet flushed.
        const DIRTY = 1 << 10;
        /// Filter: closing this node also closes its underlying node.
        const CLOSE_SOURCE = 1 << 11;
        /// Filter: the decoder has consumed its end-of-data marker.
        const EOD_SEEN = 1 << 12;
    }
}

impl FileFlags {
    #[inline]
    pub fn readable(self) -> bool {
        self.contains(FileFlags::READ)
    }

    #[inline]
    pub fn writable(self) -> bool {
        self.contains(FileFlags::WRITE)
    }

    #[inline]
    pub fn is_open(self) -> bool {
        self.contains(FileFlags::OPEN)
    }

    #[inline]
    pub fn is_filter(self) -> bool {
        self.contains(FileFlags::FILTER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_markers_are_distinct_from_access_bits() {
        let flags = FileFlags::READ | FileFlags::WRITE | FileFlags::LAST_FILL;
        assert!(flags.readable());
        assert!(flags.writable());
        assert!(!flags.contains(FileFlags::DIRTY));
    }
}
