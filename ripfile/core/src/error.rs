//! Error types for the file/filter core.

use thiserror::Error;

pub type FileResult<T> = Result<T, FileError>;

/// Failure classification for file and filter operations.
///
/// Ordinary transport failures travel as `Err` return values; nothing in the
/// core panics on I/O. Registry-structure violations (see
/// [`FileTable::finalize`](crate::FileTable::finalize)) are fatal instead.
#[derive(Error, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileErrorKind {
    /// The node is closed, was never opened, or the handle is stale.
    #[error("file is closed")]
    Closed,
    /// End of data where the operation required more.
    #[error("unexpected end of file")]
    Eof,
    /// The underlying device reported an I/O failure.
    #[error("io error")]
    Io,
    /// Buffer or node allocation failed.
    #[error("ran out of memory")]
    OutOfMemory,
    /// A device cannot be shut down while live nodes still reference it.
    #[error("access conflict")]
    AccessConflict,
    /// The named file does not exist on the device.
    #[error("file not found")]
    NotFound,
    /// The requested reposition cannot be expressed on this transport.
    #[error("invalid seek")]
    InvalidSeek,
    /// The operation is not provided by this node kind.
    #[error("operation not supported")]
    NotSupported,
    /// An offset or length does not fit the transport's range.
    #[error("offset out of range")]
    WouldOverflow,
    /// The parameter name is not recognized by this module.
    #[error("unknown parameter")]
    UnknownParam,
}

/// An error paired with a static context string naming the operation that
/// raised it (`"area.op"`).
#[derive(Error, Clone, Copy, Debug, PartialEq, Eq)]
#[error("{context}: {kind}")]
pub struct FileError {
    kind: FileErrorKind,
    context: &'static str,
}

impl FileError {
    pub fn new(kind: FileErrorKind, context: &'static str) -> Self {
        Self { kind, context }
    }

    #[inline]
    pub fn kind(&self) -> FileErrorKind {
        self.kind
    }

    #[inline]
    pub fn context(&self) -> &'static str {
        self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_carries_kind_and_context() {
        let err = FileError::new(FileErrorKind::Eof, "file.fill");
        assert_eq!(err.kind(), FileErrorKind::Eof);
        assert_eq!(err.context(), "file.fill");
        assert_eq!(err.to_string(), "file.fill: unexpected end of file");
    }
}
