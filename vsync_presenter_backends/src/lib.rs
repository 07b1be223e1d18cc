/*!
# Vsync Presenter - Display Backends

Concrete `DisplayDevice` implementations for the vsync presenter core:

- **ConsoleDisplay**: fixed-function console video interface. Interrupt-driven
  retraces, manual framebuffer latch, arbitrary aligned geometry, 7-tap copy
  filter.
- **PageFlipDisplay**: accelerated display front end. Asynchronous page-flip
  queue of depth one, completions delivered on a polled event queue,
  enumerated connector modes only.

Both simulate their hardware's timing generator on a dedicated thread. The
backends are registered with the engine and selected by name at startup.
*/

mod vblank;
mod debug;
mod console;
mod page_flip;

pub use console::{ConsoleDisplay, ConsoleSettings, TvStandard};
pub use page_flip::{ConnectorInfo, PageFlipDisplay};

// Re-export diagnostics
pub use debug::{print_present_report, HardwareCounters, HardwareStats};

use vsync_presenter::vsync::{Engine, Result};

/// Register both backends with the engine
///
/// # Example
///
/// ```no_run
/// use vsync_presenter::vsync::{Engine, FramePresenter, PresentConfig};
///
/// Engine::initialize()?;
/// vsync_presenter_backends::register_backends()?;
///
/// let config = PresentConfig::default();
/// let device = Engine::create_device("page_flip", &config)?;
/// let presenter = FramePresenter::new(device, config)?;
/// # Ok::<(), vsync_presenter::vsync::Error>(())
/// ```
pub fn register_backends() -> Result<()> {
    Engine::register_backend("console", ConsoleDisplay::from_config)?;
    Engine::register_backend("page_flip", PageFlipDisplay::from_config)?;
    Ok(())
}
