/// Display device module - hardware capability set and the types it speaks

// Module declarations
pub mod display_device;
pub mod display_mode;
pub mod display_filter;
pub mod frame_buffer;

// Re-export everything from display_device.rs
pub use display_device::*;

// Re-export from other modules
pub use display_mode::*;
pub use display_filter::*;
pub use frame_buffer::*;

// Mock display device for tests (no hardware required)
#[cfg(test)]
pub mod mock_display_device;

#[cfg(test)]
#[path = "display_device_tests.rs"]
mod tests;
