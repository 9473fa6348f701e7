//! File and filter node core of the raster interpreter VM.
//!
//! A [`FileTable`] registers every live file-like object — transport-backed
//! files and stacked data filters — and dispatches buffered I/O, seeking
//! (including sparse forward extension), and a lifecycle tied to the VM's
//! transactional save/restore model. Transports are supplied from outside
//! through the [`Device`] trait; filter codecs plug in through [`FileOps`].
//!
//! Handles are weak: a [`FileHandle`] into the table carries a generation
//! and reads as absent once its node is reclaimed, so a restore sweep can
//! tear down whole save levels without ever leaving a dangling reference.
//! Where a reference must keep dispatching after its target dies, it is
//! redirected to the shared closed sentinel ([`FileHandle::CLOSED`]) whose
//! operation set is the error family.

mod buffer;
mod device;
mod error;
mod flags;
mod ids;
mod lifecycle;
mod node;
mod ops;
mod params;
mod position;
mod table;

pub use buffer::{DEFAULT_BUFFER_SIZE, SMALL_BUFFER_SIZE};
pub use device::Device;
pub use error::{FileError, FileErrorKind, FileResult};
pub use flags::FileFlags;
pub use ids::{AllocClass, DeviceFd, FileHandle, PdfContextId, SaveTag};
pub use node::{FileNode, MAX_BASE_NAME, ParamDict};
pub use ops::{ClosedOps, FileOps, FilterInfo, RealFileOps};
pub use params::{FileParams, LOW_MEM_FILTER_PURGE};
pub use position::BASEMAP_LEN;
pub use table::FileTable;
