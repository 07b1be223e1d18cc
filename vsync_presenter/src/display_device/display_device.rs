/// DisplayDevice trait - capability set every display backend implements
///
/// The presenter drives both hardware families (fixed-function console video
/// interface, page-flip display front end) through this one interface. The
/// backend is chosen at startup; there is no per-backend control flow in the
/// presenter.

use bitflags::bitflags;
use crate::display_device::{DisplayFilter, DisplayLimits, DisplayMode, FrameBuffer, RefreshDescriptor};
use crate::error::Result;
use crate::presenter::{RetraceEvent, RetraceSignal};

/// Opaque hardware handle for a registered frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u64);

bitflags! {
    /// Optional hardware features
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DisplayFeatures: u32 {
        /// Retraces arrive from interrupt context through the attached signal.
        /// Without it the presenter pumps `poll_retrace`.
        const INTERRUPT_RETRACE  = 1 << 0;
        /// A pre-retrace notification fires shortly before each retrace
        const PRE_RETRACE        = 1 << 1;
        /// Any aligned geometry inside the limits can be scanned out
        const ARBITRARY_GEOMETRY = 1 << 2;
        /// Progressive scan is available for full-height modes
        const PROGRESSIVE        = 1 << 3;
        /// Output goes through a vertical copy filter
        const COPY_FILTER        = 1 << 4;
        /// Output can be forced to black
        const BLANKING           = 1 << 5;
    }
}

/// Static description of what a device can do
#[derive(Debug, Clone)]
pub struct DisplayCapabilities {
    pub limits: DisplayLimits,
    /// Enumerated hardware modes
    pub modes: Vec<DisplayMode>,
    /// Mode used for a 0x0 request or when a mode set is refused
    pub preferred: DisplayMode,
    pub features: DisplayFeatures,
    /// Largest swap chain the device can register
    pub max_chain_depth: usize,
    /// Retraces to wait after a mode set before output is stable
    pub settle_retraces: u32,
}

impl DisplayCapabilities {
    pub fn has(&self, feature: DisplayFeatures) -> bool {
        self.features.contains(feature)
    }

    /// Whether `(width, height)` can be scanned out exactly
    pub fn supports_geometry(&self, width: u32, height: u32) -> bool {
        if self.has(DisplayFeatures::ARBITRARY_GEOMETRY) {
            self.limits.admits(width, height)
        } else {
            self.modes.iter().any(|m| m.width == width && m.height == height)
        }
    }
}

/// Result of a mode set request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeSetOutcome {
    /// Mode latched; takes effect at the next retrace
    Applied,
    /// Hardware refused the mode
    Unsupported,
}

/// Display hardware capability set
///
/// Completion of `request_flip` is never reported synchronously: it arrives
/// through the attached `RetraceSignal` (interrupt backends) or as a
/// confirmed `RetraceEvent` from `poll_retrace` (polled backends).
pub trait DisplayDevice: Send {
    /// Backend name for diagnostics
    fn name(&self) -> &str;

    /// Hardware limits, modes and features
    fn capabilities(&self) -> DisplayCapabilities;

    /// Refresh descriptor the hardware would use for a geometry
    fn refresh_for(&self, width: u32, height: u32) -> RefreshDescriptor;

    /// Program a display mode
    fn mode_set(&mut self, mode: &DisplayMode) -> Result<ModeSetOutcome>;

    /// Make a frame buffer scannable, returning its hardware handle
    fn register_buffer(&mut self, buffer: &FrameBuffer) -> Result<BufferHandle>;

    /// Forget a frame buffer; it must not be on screen or queued
    fn unregister_buffer(&mut self, handle: BufferHandle);

    /// Point scanout at `handle` without a flip
    ///
    /// Only used while the output is blanked for a mode switch.
    fn set_scanout(&mut self, handle: BufferHandle) -> Result<()>;

    /// Queue a flip to `handle` at the next retrace
    ///
    /// # Errors
    ///
    /// `FlipQueueFull` / `DeviceBusy` are transient; the frame is dropped.
    fn request_flip(&mut self, handle: BufferHandle) -> Result<()>;

    /// Drain one pending hardware event without blocking
    fn poll_retrace(&mut self) -> Option<RetraceEvent>;

    /// Route retrace interrupts to `signal`
    fn attach_retrace(&mut self, signal: RetraceSignal);

    /// Stop delivering retrace interrupts
    fn detach_retrace(&mut self);

    /// Apply deflicker, brightness and fade state
    fn set_display_filter(&mut self, filter: &DisplayFilter) -> Result<()>;

    /// Force the output to black (or release it)
    fn set_blank(&mut self, blank: bool);

    /// Buffer currently being scanned out
    fn scanout(&self) -> Option<BufferHandle>;
}
