/// PageFlipDisplay - accelerated display front end with an asynchronous
/// page-flip queue
///
/// A flip request is queued to the display controller and completes at a
/// later vblank. The controller reports every vblank, and every completed
/// flip, as an event on a bounded event queue; there is no interrupt path,
/// so the presenter drains the queue through `poll_retrace`. The queue
/// holds one pending flip. Only the connector's enumerated modes can be
/// programmed.

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard};

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

/// Pending vblank events before the controller starts dropping them
const EVENT_QUEUE_DEPTH: usize = 64;
/// Scanout pitch alignment in bytes
const PITCH_ALIGN: u32 = 64;

new_key_type! {
    /// Key of a registered scanout buffer
    struct FbKey;
}

/// Connector description: the modes the attached display accepts
#[derive(Debug, Clone)]
pub struct ConnectorInfo {
    pub name: String,
    /// Enumerated modes, preferred first
    pub modes: Vec<DisplayMode>,
    /// Vblanks before a new mode is stable
    pub settle_retraces: u32,
}

impl Default for ConnectorInfo {
    fn default() -> Self {
        let mode = |width, height, millihertz| {
            DisplayMode::new(width, height, RefreshDescriptor::new(ScanMode::Progressive, millihertz),
                PixelFormat::Xrgb8888)
        };
        Self {
            name: "HDMI-A-1".to_string(),
            modes: vec![
                mode(1280, 720, 60_000),
                mode(1920, 1080, 60_000),
                mode(1920, 1080, 50_000),
                mode(1280, 720, 50_000),
                mode(1024, 768, 60_000),
                mode(800, 600, 60_000),
                mode(640, 480, 59_940),
            ],
            settle_retraces: 1,
        }
    }
}

/// State shared with the display controller thread
struct CrtcState {
    frame: u64,
    current: Option<BufferHandle>,
    pending: Option<BufferHandle>,
    blanked: bool,
    gain: f32,
}

/// Page-flip display backend
pub struct PageFlipDisplay {
    connector: ConnectorInfo,
    capabilities: DisplayCapabilities,
    framebuffers: SlotMap<FbKey, UVec2>,
    crtc: Arc<Mutex<CrtcState>>,
    events: Receiver<RetraceEvent>,
    period: Arc<VblankPeriod>,
    counters: Arc<HardwareCounters>,
    clock: VblankClock,
}

impl PageFlipDisplay {
    /// Open the connector and start the display controller
    ///
    /// # Errors
    ///
    /// `InitializationFailed` if the connector reports no modes.
    pub fn new(connector: ConnectorInfo) -> Result<Self> {
        let Some(&preferred) = connector.modes.first() else {
            let error = Error::InitializationFailed(format!("connector {} reports no modes", connector.name));
            vsync_presenter::present_error!("vsync::PageFlipDisplay", "{}", error);
            return Err(error);
        };
        let capabilities = Self::build_capabilities(&connector, preferred);

        let crtc = Arc::new(Mutex::new(CrtcState {
            frame: 0,
            current: None,
            pending: None,
            blanked: true,
            gain: 1.0,
        }));
        let (sender, events) = mpsc::sync_channel(EVENT_QUEUE_DEPTH);
        let period = Arc::new(VblankPeriod::new(preferred.refresh));
        let counters = Arc::new(HardwareCounters::default());

        let controller = crtc.clone();
        let controller_counters = counters.clone();
        let clock = VblankClock::spawn("page-flip-crtc", period.clone(), None, move |phase| {
            if let VblankPhase::Retrace(frame) = phase {
                let event = {
                    let mut state = controller.lock().unwrap_or_else(|e| e.into_inner());
                    state.frame = frame;
                    match state.pending.take() {
                        Some(handle) => {
                            state.current = Some(handle);
                            controller_counters.flip_latched();
                            RetraceEvent::flip(frame, handle)
                        }
                        None => RetraceEvent::retrace(frame),
                    }
                };
                controller_counters.retrace();
                Self::post(&sender, event, &controller_counters);
            }
        })?;

        present_info!("vsync::PageFlipDisplay", "Connector {} up, {} modes, preferred {}",
            connector.name, connector.modes.len(), preferred);

        Ok(Self {
            connector,
            capabilities,
            framebuffers: SlotMap::with_key(),
            crtc,
            events,
            period,
            counters,
            clock,
        })
    }

    /// Backend factory for the engine registry
    pub fn from_config(_config: &PresentConfig) -> Result<Box<dyn DisplayDevice>> {
        Ok(Box::new(Self::new(ConnectorInfo::default())?))
    }

    fn post(sender: &SyncSender<RetraceEvent>, event: RetraceEvent, counters: &HardwareCounters) {
        match sender.try_send(event) {
            Ok(()) => {}
            // Nobody draining; the presenter's watchdog covers a lost completion
            Err(TrySendError::Full(_)) => counters.event_dropped(),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn build_capabilities(connector: &ConnectorInfo, preferred: DisplayMode) -> DisplayCapabilities {
        let modes = &connector.modes;
        let min_width = modes.iter().map(|m| m.width).min().unwrap_or(preferred.width);
        let min_height = modes.iter().map(|m| m.height).min().unwrap_or(preferred.height);
        let max_width = modes.iter().map(|m| m.width).max().unwrap_or(preferred.width);
        let max_height = modes.iter().map(|m| m.height).max().unwrap_or(preferred.height);

        DisplayCapabilities {
            limits: DisplayLimits {
                min_width,
                min_height,
                max_width,
                max_height,
                width_align: 1,
                height_align: 1,
                stride_align: PITCH_ALIGN,
            },
            modes: modes.clone(),
            preferred,
            features: DisplayFeatures::PROGRESSIVE | DisplayFeatures::BLANKING,
            max_chain_depth: 3,
            settle_retraces: connector.settle_retraces,
        }
    }

    fn crtc(&self) -> MutexGuard<'_, CrtcState> {
        self.crtc.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn key(handle: BufferHandle) -> FbKey {
        KeyData::from_ffi(handle.0).into()
    }

    pub fn connector(&self) -> &ConnectorInfo {
        &self.connector
    }

    /// Hardware-side counters, shared with the controller thread
    pub fn counters(&self) -> Arc<HardwareCounters> {
        self.counters.clone()
    }

    pub fn hardware_stats(&self) -> HardwareStats {
        self.counters.snapshot()
    }

    /// Output gain currently applied
    pub fn gain(&self) -> f32 {
        self.crtc().gain
    }

    pub fn is_blanked(&self) -> bool {
        self.crtc().blanked
    }

    /// Whether the controller thread is alive
    pub fn is_scanning(&self) -> bool {
        self.clock.is_running()
    }
}

impl DisplayDevice for PageFlipDisplay {
    fn name(&self) -> &str {
        "page_flip"
    }

    fn capabilities(&self) -> DisplayCapabilities {
        self.capabilities.clone()
    }

    fn refresh_for(&self, width: u32, height: u32) -> RefreshDescriptor {
        self.connector.modes.iter()
            .find(|m| m.width == width && m.height == height)
            .map_or(self.capabilities.preferred.refresh, |m| m.refresh)
    }

    fn mode_set(&mut self, mode: &DisplayMode) -> Result<ModeSetOutcome> {
        if !self.connector.modes.contains(mode) {
            present_debug!("vsync::PageFlipDisplay", "{} not offered by {}", mode, self.connector.name);
            return Ok(ModeSetOutcome::Unsupported);
        }
        self.period.set(mode.refresh);
        self.counters.mode_set();
        Ok(ModeSetOutcome::Applied)
    }

    fn register_buffer(&mut self, buffer: &FrameBuffer) -> Result<BufferHandle> {
        let scannable = buffer.format() == PixelFormat::Xrgb8888
            && buffer.stride() % PITCH_ALIGN == 0
            && self.capabilities.supports_geometry(buffer.width(), buffer.height());
        if !scannable {
            return Err(Error::BufferAllocationFailed(format!(
                "{}x{} {:?} (pitch {}) cannot be scanned out by {}",
                buffer.width(), buffer.height(), buffer.format(), buffer.stride(), self.connector.name
            )));
        }
        let key = self.framebuffers.insert(UVec2::new(buffer.width(), buffer.height()));
        Ok(BufferHandle(key.data().as_ffi()))
    }

    fn unregister_buffer(&mut self, handle: BufferHandle) {
        {
            let mut state = self.crtc();
            if state.current == Some(handle) {
                if !state.blanked {
                    present_warn!("vsync::PageFlipDisplay", "Framebuffer {:?} removed while on screen", handle);
                }
                state.current = None;
            }
            if state.pending == Some(handle) {
                present_warn!("vsync::PageFlipDisplay", "Framebuffer {:?} removed with a flip pending", handle);
                state.pending = None;
            }
        }
        self.framebuffers.remove(Self::key(handle));
    }

    fn set_scanout(&mut self, handle: BufferHandle) -> Result<()> {
        if !self.framebuffers.contains_key(Self::key(handle)) {
            present_bail!("vsync::PageFlipDisplay", "Framebuffer {:?} not registered", handle);
        }
        let mut state = self.crtc();
        state.current = Some(handle);
        state.pending = None;
        Ok(())
    }

    fn request_flip(&mut self, handle: BufferHandle) -> Result<()> {
        if !self.framebuffers.contains_key(Self::key(handle)) {
            present_bail!("vsync::PageFlipDisplay", "Framebuffer {:?} not registered", handle);
        }
        let mut state = self.crtc();
        if state.pending.is_some() {
            self.counters.flip_refused();
            return Err(Error::FlipQueueFull);
        }
        state.pending = Some(handle);
        Ok(())
    }

    fn poll_retrace(&mut self) -> Option<RetraceEvent> {
        self.events.try_recv().ok()
    }

    fn attach_retrace(&mut self, _signal: RetraceSignal) {
        present_debug!("vsync::PageFlipDisplay", "No retrace interrupt, events are polled");
    }

    fn detach_retrace(&mut self) {}

    fn set_display_filter(&mut self, filter: &DisplayFilter) -> Result<()> {
        self.crtc().gain = filter.gain();
        Ok(())
    }

    fn set_blank(&mut self, blank: bool) {
        self.crtc().blanked = blank;
    }

    fn scanout(&self) -> Option<BufferHandle> {
        self.crtc().current
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "page_flip_tests.rs"]
mod tests;
