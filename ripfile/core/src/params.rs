//! Module configuration exposed through the host parameter subsystem.

use crate::error::{FileError, FileErrorKind, FileResult};

/// Parameter name: purge encoded filters to disk under low memory.
pub const LOW_MEM_FILTER_PURGE: &str = "LowMemFilterPurge";

/// Module parameters of the file core.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileParams {
    pub low_mem_filter_purge: bool,
}

impl FileParams {
    /// Set a parameter by name. Setting always succeeds for a recognized
    /// name.
    pub fn set(&mut self, name: &str, value: bool) -> FileResult<()> {
        match name {
            LOW_MEM_FILTER_PURGE => {
                self.low_mem_filter_purge = value;
                Ok(())
            }
            _ => Err(FileError::new(FileErrorKind::UnknownParam, "params.set")),
        }
    }

    /// Get a parameter by name, filling in the current value.
    pub fn get(&self, name: &str) -> FileResult<bool> {
        match name {
            LOW_MEM_FILTER_PURGE => Ok(self.low_mem_filter_purge),
            _ => Err(FileError::new(FileErrorKind::UnknownParam, "params.get")),
        }
    }
}
