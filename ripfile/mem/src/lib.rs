//! In-memory [`Device`](ripfile_core::Device) transport.
//!
//! Backs the core's test suite and serves as the interpreter's `%ram%`
//! device: a name-to-contents map with independent descriptors, sparse
//! zero-extension on writes past the end, and call counters so tests can
//! assert on physical transport traffic.

mod config;
mod device;

pub use config::MemDeviceConfig;
pub use device::MemDevice;
