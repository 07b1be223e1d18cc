/*!
# Vsync Presenter

Frame-presentation core for real-time renderers on fixed-refresh displays.

The crate decides when a rendered frame becomes visible. It owns a small ring
of frame buffers, hands them to the display hardware at vertical retrace,
confirms each flip from the retrace interrupt, and renegotiates the display
mode without ever freeing a buffer the hardware is still reading. Hardware
access goes through the `DisplayDevice` trait; concrete backends (console
video interface, page-flip display) live in `vsync_presenter_backends` and
are selected at runtime through the engine's backend registry.

## Architecture

- **RetraceSignal**: interrupt-safe mailbox between the retrace handler and the main loop
- **SwapChain**: buffer ring and slot ownership
- **DisplayModeManager**: mode negotiation and chain reallocation
- **TransitionController**: retrace-driven fade ramps
- **FramePresenter**: the scheduler tying them together
*/

// Internal modules
mod error;
mod engine;
mod config;
pub mod log;
pub mod display_device;
pub mod presenter;

// Main vsync namespace module
pub mod vsync {
    // Error types
    pub use crate::error::{Error, Result};

    // Process-wide services
    pub use crate::engine::{BackendFactory, Engine};

    // Configuration
    pub use crate::config::{PresentConfig, ResetFade};

    // Top-level scheduler
    pub use crate::presenter::{FramePresenter, PresentStats, PresentationRequest, SyncPolicy};

    // Logging sub-module (types only, NOT macros)
    pub mod log {
        pub use crate::log::{Logger, LogEntry, LogSeverity, DefaultLogger};
    }

    // Render sub-module with the device seam and presentation types
    pub mod render {
        pub use crate::display_device::*;
        pub use crate::presenter::*;
    }
}

// Re-export math library at crate root
pub use glam;
