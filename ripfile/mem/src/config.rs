//! RAM device configuration.

/// Tuning knobs for a [`MemDevice`](crate::MemDevice).
#[derive(Clone, Copy, Debug)]
pub struct MemDeviceConfig {
    /// Buffer size hint handed to the core; `0` means no preference.
    pub buffer_size_hint: usize,
    /// Whether nodes on this device should use the small buffer default.
    pub prefers_small_buffer: bool,
}

impl Default for MemDeviceConfig {
    fn default() -> Self {
        Self {
            buffer_size_hint: 0,
            prefers_small_buffer: false,
        }
    }
}
