/// Presenter module - retrace signalling, swap chain, mode negotiation,
/// fade transitions and the frame scheduler that composes them

// Module declarations
pub mod retrace_signal;
pub mod swapchain;
pub mod transition;
pub mod mode_manager;
pub mod frame_presenter;

// Re-export everything from frame_presenter.rs
pub use frame_presenter::*;

// Re-export from other modules
pub use retrace_signal::*;
pub use swapchain::*;
pub use transition::*;
pub use mode_manager::*;

/// Whether a frame may wait for the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// Wait for the outstanding flip before accepting a new frame
    Blocking,
    /// Drop the new frame while a flip is outstanding
    NonBlocking,
}
