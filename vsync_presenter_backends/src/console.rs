/// ConsoleDisplay - fixed-function console video interface
///
/// The video interface (VI) scans out an external framebuffer in packed
/// 4:2:2. Flipping is a manual latch: the CPU writes the next framebuffer
/// address and the VI picks it up at the following retrace. The retrace
/// interrupt is delivered to the attached `RetraceSignal` from the VI
/// thread; a pre-retrace interrupt fires a little earlier for frame pacing.
/// Output goes through a 7-tap vertical copy filter used for deflicker,
/// brightness and fades.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use glam::UVec2;
use slotmap::{new_key_type, Key, KeyData, SlotMap};
use vsync_presenter::vsync::{Error, PresentConfig, Result};
use vsync_presenter::vsync::render::{
    BufferHandle, DisplayCapabilities, DisplayDevice, DisplayFeatures, DisplayFilter,
    DisplayLimits, DisplayMode, FrameBuffer, ModeSetOutcome, PixelFormat, RefreshDescriptor,
    RetraceEvent, RetraceSignal, ScanMode,
};
use vsync_presenter::{present_bail, present_debug, present_info, present_warn};

use crate::debug::{HardwareCounters, HardwareStats};
use crate::vblank::{VblankClock, VblankPeriod, VblankPhase};

/// External framebuffer widths are multiples of 16 pixels
const XFB_WIDTH_ALIGN: u32 = 16;
/// Row pitch of the external framebuffer in bytes
const XFB_STRIDE_ALIGN: u32 = 32;
/// Pre-retrace interrupt lead time
const PRE_RETRACE_LEAD: Duration = Duration::from_millis(2);
/// Retraces the VI needs after a mode change before the picture is stable
const SETTLE_RETRACES: u32 = 2;

new_key_type! {
    /// Key of a registered external framebuffer
    struct XfbKey;
}

/// Analogue TV standard the console is wired to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TvStandard {
    #[default]
    Ntsc,
    Pal,
}

impl TvStandard {
    pub fn max_width(self) -> u32 {
        720
    }

    pub fn max_height(self) -> u32 {
        match self {
            TvStandard::Ntsc => 480,
            TvStandard::Pal => 576,
        }
    }

    /// Field rate of full-height modes, millihertz
    fn interlaced_millihertz(self) -> u32 {
        match self {
            TvStandard::Ntsc => 59_940,
            TvStandard::Pal => 50_000,
        }
    }

    /// Rate of the non-interlaced low-resolution modes, millihertz
    fn double_strike_millihertz(self) -> u32 {
        match self {
            TvStandard::Ntsc => 59_826,
            TvStandard::Pal => 50_080,
        }
    }
}

/// Console output wiring
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleSettings {
    pub standard: TvStandard,
    /// Component cable: full-height modes can scan progressively
    pub progressive_cable: bool,
}

/// Registers the VI thread reads at retrace
struct ViRegisters {
    frame: u64,
    /// Framebuffer on screen
    current: Option<BufferHandle>,
    /// Framebuffer latched at the next retrace
    next: Option<BufferHandle>,
    signal: Option<RetraceSignal>,
    blanked: bool,
    taps: [u8; 7],
}

/// Console video interface backend
pub struct ConsoleDisplay {
    settings: ConsoleSettings,
    capabilities: DisplayCapabilities,
    mode: Option<DisplayMode>,
    xfbs: SlotMap<XfbKey, UVec2>,
    registers: Arc<Mutex<ViRegisters>>,
    period: Arc<VblankPeriod>,
    counters: Arc<HardwareCounters>,
    clock: VblankClock,
}

impl ConsoleDisplay {
    /// Power up the video interface
    ///
    /// The VI starts scanning (blanked) immediately at the preferred mode's
    /// rate.
    pub fn new(settings: ConsoleSettings) -> Result<Self> {
        let capabilities = Self::build_capabilities(&settings);
        let registers = Arc::new(Mutex::new(ViRegisters {
            frame: 0,
            current: None,
            next: None,
            signal: None,
            blanked: true,
            taps: DisplayFilter::default().copy_filter_taps(false),
        }));
        let period = Arc::new(VblankPeriod::new(capabilities.preferred.refresh));
        let counters = Arc::new(HardwareCounters::default());

        let vi = registers.clone();
        let vi_counters = counters.clone();
        let clock = VblankClock::spawn("console-vi", period.clone(), Some(PRE_RETRACE_LEAD), move |phase| {
            let mut regs = vi.lock().unwrap_or_else(|e| e.into_inner());
            match phase {
                VblankPhase::PreRetrace(frame) => {
                    if let Some(signal) = &regs.signal {
                        signal.on_pre_retrace(frame);
                    }
                }
                VblankPhase::Retrace(frame) => {
                    regs.frame = frame;
                    vi_counters.retrace();
                    let latched = regs.next.take();
                    if latched.is_some() {
                        regs.current = latched;
                        vi_counters.flip_latched();
                    }
                    if let Some(signal) = &regs.signal {
                        signal.deliver(match latched {
                            Some(handle) => RetraceEvent::flip(frame, handle),
                            None => RetraceEvent::retrace(frame),
                        });
                    }
                }
            }
        })?;

        present_info!("vsync::ConsoleDisplay", "Video interface up ({:?}, {} cable)",
            settings.standard, if settings.progressive_cable { "component" } else { "composite" });

        Ok(Self {
            settings,
            capabilities,
            mode: None,
            xfbs: SlotMap::with_key(),
            registers,
            period,
            counters,
            clock,
        })
    }

    /// Backend factory for the engine registry
    pub fn from_config(_config: &PresentConfig) -> Result<Box<dyn DisplayDevice>> {
        Ok(Box::new(Self::new(ConsoleSettings::default())?))
    }

    fn build_capabilities(settings: &ConsoleSettings) -> DisplayCapabilities {
        let standard = settings.standard;
        let max_height = standard.max_height();
        let mode = |width, height| {
            DisplayMode::new(width, height, Self::refresh_for_settings(settings, height), PixelFormat::Yuyv422)
        };
        let preferred = mode(640, max_height);

        let mut features = DisplayFeatures::INTERRUPT_RETRACE
            | DisplayFeatures::PRE_RETRACE
            | DisplayFeatures::ARBITRARY_GEOMETRY
            | DisplayFeatures::COPY_FILTER
            | DisplayFeatures::BLANKING;
        if settings.progressive_cable {
            features |= DisplayFeatures::PROGRESSIVE;
        }

        DisplayCapabilities {
            limits: DisplayLimits {
                min_width: XFB_WIDTH_ALIGN,
                min_height: 16,
                max_width: standard.max_width(),
                max_height,
                width_align: XFB_WIDTH_ALIGN,
                height_align: 2,
                stride_align: XFB_STRIDE_ALIGN,
            },
            modes: vec![
                preferred,
                mode(720, max_height),
                mode(640, max_height / 2),
                mode(320, max_height / 2),
            ],
            preferred,
            features,
            max_chain_depth: 3,
            settle_retraces: SETTLE_RETRACES,
        }
    }

    /// Heights up to half the standard use double-strike; taller ones are
    /// interlaced, or progressive on a component cable
    fn refresh_for_settings(settings: &ConsoleSettings, height: u32) -> RefreshDescriptor {
        let standard = settings.standard;
        if height <= standard.max_height() / 2 {
            RefreshDescriptor::new(ScanMode::DoubleStrike, standard.double_strike_millihertz())
        } else if settings.progressive_cable {
            RefreshDescriptor::new(ScanMode::Progressive, standard.interlaced_millihertz())
        } else {
            RefreshDescriptor::new(ScanMode::Interlaced, standard.interlaced_millihertz())
        }
    }

    fn registers(&self) -> MutexGuard<'_, ViRegisters> {
        self.registers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn key(handle: BufferHandle) -> XfbKey {
        KeyData::from_ffi(handle.0).into()
    }

    pub fn settings(&self) -> ConsoleSettings {
        self.settings
    }

    /// Hardware-side counters, shared with the VI thread
    pub fn counters(&self) -> Arc<HardwareCounters> {
        self.counters.clone()
    }

    pub fn hardware_stats(&self) -> HardwareStats {
        self.counters.snapshot()
    }

    /// Copy filter taps currently programmed
    pub fn filter_taps(&self) -> [u8; 7] {
        self.registers().taps
    }

    pub fn is_blanked(&self) -> bool {
        self.registers().blanked
    }

    /// Whether the VI thread is alive
    pub fn is_scanning(&self) -> bool {
        self.clock.is_running()
    }
}

impl DisplayDevice for ConsoleDisplay {
    fn name(&self) -> &str {
        "console"
    }

    fn capabilities(&self) -> DisplayCapabilities {
        self.capabilities.clone()
    }

    fn refresh_for(&self, _width: u32, height: u32) -> RefreshDescriptor {
        Self::refresh_for_settings(&self.settings, height)
    }

    fn mode_set(&mut self, mode: &DisplayMode) -> Result<ModeSetOutcome> {
        let expected = Self::refresh_for_settings(&self.settings, mode.height);
        if !self.capabilities.limits.admits(mode.width, mode.height)
            || mode.refresh != expected
            || mode.format != PixelFormat::Yuyv422
        {
            present_debug!("vsync::ConsoleDisplay", "VI cannot scan out {}", mode);
            return Ok(ModeSetOutcome::Unsupported);
        }

        self.period.set(mode.refresh);
        self.mode = Some(*mode);
        self.counters.mode_set();
        present_debug!("vsync::ConsoleDisplay", "VI programmed for {}", mode);
        Ok(ModeSetOutcome::Applied)
    }

    fn register_buffer(&mut self, buffer: &FrameBuffer) -> Result<BufferHandle> {
        if buffer.format() != PixelFormat::Yuyv422 {
            return Err(Error::BufferAllocationFailed(format!(
                "external framebuffer must be Yuyv422, got {:?}", buffer.format()
            )));
        }
        if !self.capabilities.supports_geometry(buffer.width(), buffer.height())
            || buffer.stride() % XFB_STRIDE_ALIGN != 0
        {
            return Err(Error::BufferAllocationFailed(format!(
                "{}x{} (stride {}) is not a valid external framebuffer",
                buffer.width(), buffer.height(), buffer.stride()
            )));
        }
        let key = self.xfbs.insert(UVec2::new(buffer.width(), buffer.height()));
        Ok(BufferHandle(key.data().as_ffi()))
    }

    fn unregister_buffer(&mut self, handle: BufferHandle) {
        {
            let mut regs = self.registers();
            if regs.current == Some(handle) {
                if !regs.blanked {
                    present_warn!("vsync::ConsoleDisplay", "Framebuffer {:?} freed while on screen", handle);
                }
                regs.current = None;
            }
            if regs.next == Some(handle) {
                present_warn!("vsync::ConsoleDisplay", "Framebuffer {:?} freed while latched", handle);
                regs.next = None;
            }
        }
        self.xfbs.remove(Self::key(handle));
    }

    fn set_scanout(&mut self, handle: BufferHandle) -> Result<()> {
        if !self.xfbs.contains_key(Self::key(handle)) {
            present_bail!("vsync::ConsoleDisplay", "Framebuffer {:?} not registered", handle);
        }
        let mut regs = self.registers();
        regs.current = Some(handle);
        regs.next = None;
        Ok(())
    }

    fn request_flip(&mut self, handle: BufferHandle) -> Result<()> {
        if !self.xfbs.contains_key(Self::key(handle)) {
            present_bail!("vsync::ConsoleDisplay", "Framebuffer {:?} not registered", handle);
        }
        let mut regs = self.registers();
        if regs.next.is_some() {
            self.counters.flip_refused();
            return Err(Error::DeviceBusy);
        }
        regs.next = Some(handle);
        Ok(())
    }

    fn poll_retrace(&mut self) -> Option<RetraceEvent> {
        // Retraces arrive by interrupt only
        None
    }

    fn attach_retrace(&mut self, signal: RetraceSignal) {
        self.registers().signal = Some(signal);
    }

    fn detach_retrace(&mut self) {
        self.registers().signal = None;
    }

    fn set_display_filter(&mut self, filter: &DisplayFilter) -> Result<()> {
        let interlaced = self.mode.is_some_and(|m| m.refresh.is_interlaced());
        let taps = filter.copy_filter_taps(interlaced);
        self.registers().taps = taps;
        Ok(())
    }

    fn set_blank(&mut self, blank: bool) {
        self.registers().blanked = blank;
    }

    fn scanout(&self) -> Option<BufferHandle> {
        self.registers().current
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "console_tests.rs"]
mod tests;
