/// Mock display device for unit tests (no hardware required)
///
/// The device half is handed to the presenter; the `MockHardware` half stays
/// with the test and plays the role of the video hardware: it fires
/// retraces, latches pending flips and records what reached the screen.
/// In interrupt mode a retrace calls the attached `RetraceSignal` directly,
/// in polled mode it queues an event for `poll_retrace`.

#[cfg(test)]
use std::collections::VecDeque;
#[cfg(test)]
use std::sync::{Arc, Mutex, MutexGuard};
#[cfg(test)]
use glam::UVec2;
#[cfg(test)]
use rustc_hash::FxHashMap;

#[cfg(test)]
use crate::display_device::{
    BufferHandle, DisplayCapabilities, DisplayDevice, DisplayFeatures, DisplayFilter,
    DisplayLimits, DisplayMode, FrameBuffer, ModeSetOutcome, PixelFormat,
    RefreshDescriptor, ScanMode,
};
#[cfg(test)]
use crate::error::{Error, Result};
#[cfg(test)]
use crate::presenter::{RetraceEvent, RetraceSignal};

// ============================================================================
// Shared hardware state
// ============================================================================

#[cfg(test)]
pub const MOCK_REFRESH: RefreshDescriptor = RefreshDescriptor::new(ScanMode::Progressive, 60_000);

#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockScanout {
    pub frame: u64,
    pub handle: BufferHandle,
    pub size: UVec2,
}

#[cfg(test)]
#[derive(Default)]
pub struct MockHardwareState {
    pub frame: u64,
    pub signal: Option<RetraceSignal>,
    pub polled_events: VecDeque<RetraceEvent>,
    /// A `poll_retrace` on an empty queue completes the pending flip
    pub auto_retrace: bool,
    pub pending_flip: Option<BufferHandle>,
    pub scanout: Option<BufferHandle>,
    pub registered: FxHashMap<BufferHandle, UVec2>,
    pub next_handle: u64,
    pub mode: Option<DisplayMode>,
    pub mode_sets: Vec<DisplayMode>,
    pub unsupported: Vec<UVec2>,
    pub blanked: bool,
    pub filters: Vec<DisplayFilter>,
    /// Flips that reached the screen, in order
    pub displayed: Vec<MockScanout>,
    pub flip_requests: u32,
    /// Latch flips but never report the completion
    pub drop_flip_events: bool,
    /// Keep pending flips pending across retraces
    pub hold_flips: bool,
    /// Refuse every flip request with this error
    pub reject_flips: Option<Error>,
    /// Fail the registration after this many more buffers
    pub fail_registration_after: Option<usize>,
    /// Buffers unregistered while the hardware could still read them
    pub freed_while_scanned: u32,
}

/// Test-side handle to the mock hardware
#[cfg(test)]
#[derive(Clone)]
pub struct MockHardware {
    state: Arc<Mutex<MockHardwareState>>,
}

#[cfg(test)]
impl MockHardware {
    pub fn state(&self) -> MutexGuard<'_, MockHardwareState> {
        self.state.lock().unwrap()
    }

    /// One vertical retrace: pre-retrace, latch the pending flip, retrace
    pub fn fire_retrace(&self) -> u64 {
        let mut state = self.state();
        Self::retrace_locked(&mut state);
        state.frame
    }

    pub fn fire_retraces(&self, count: u32) {
        for _ in 0..count {
            self.fire_retrace();
        }
    }

    fn retrace_locked(state: &mut MockHardwareState) {
        state.frame += 1;
        let frame = state.frame;

        let latched = if state.hold_flips { None } else { state.pending_flip.take() };
        if let Some(handle) = latched {
            state.scanout = Some(handle);
            let size = state.registered.get(&handle).copied().unwrap_or(UVec2::ZERO);
            state.displayed.push(MockScanout { frame, handle, size });
        }

        let event = match latched {
            Some(handle) if !state.drop_flip_events => RetraceEvent::flip(frame, handle),
            _ => RetraceEvent::retrace(frame),
        };

        match &state.signal {
            Some(signal) => {
                signal.on_pre_retrace(frame);
                signal.deliver(event);
            }
            None => state.polled_events.push_back(event),
        }
    }

    pub fn frame(&self) -> u64 {
        self.state().frame
    }

    pub fn displayed(&self) -> Vec<MockScanout> {
        self.state().displayed.clone()
    }

    pub fn pending_flip(&self) -> Option<BufferHandle> {
        self.state().pending_flip
    }

    pub fn registered_count(&self) -> usize {
        self.state().registered.len()
    }

    pub fn set_drop_flip_events(&self, drop: bool) {
        self.state().drop_flip_events = drop;
    }

    pub fn set_hold_flips(&self, hold: bool) {
        self.state().hold_flips = hold;
    }

    pub fn set_reject_flips(&self, error: Option<Error>) {
        self.state().reject_flips = error;
    }

    pub fn set_fail_registration_after(&self, count: Option<usize>) {
        self.state().fail_registration_after = count;
    }

    pub fn set_unsupported(&self, width: u32, height: u32) {
        self.state().unsupported.push(UVec2::new(width, height));
    }

    pub fn set_auto_retrace(&self, auto: bool) {
        self.state().auto_retrace = auto;
    }
}

// ============================================================================
// Mock device
// ============================================================================

#[cfg(test)]
pub struct MockDisplayDevice {
    hardware: MockHardware,
    capabilities: DisplayCapabilities,
}

#[cfg(test)]
impl MockDisplayDevice {
    /// Interrupt-driven device: 640x480 and 320x240 modes, arbitrary geometry
    pub fn new() -> (Self, MockHardware) {
        Self::with_capabilities(Self::default_capabilities())
    }

    /// Device without retrace interrupts; retraces are queued for polling
    pub fn polled() -> (Self, MockHardware) {
        let mut caps = Self::default_capabilities();
        caps.features.remove(DisplayFeatures::INTERRUPT_RETRACE | DisplayFeatures::PRE_RETRACE);
        Self::with_capabilities(caps)
    }

    pub fn with_capabilities(capabilities: DisplayCapabilities) -> (Self, MockHardware) {
        let hardware = MockHardware {
            state: Arc::new(Mutex::new(MockHardwareState {
                next_handle: 1,
                ..Default::default()
            })),
        };
        (Self { hardware: hardware.clone(), capabilities }, hardware)
    }

    pub fn default_capabilities() -> DisplayCapabilities {
        let vga = DisplayMode::new(640, 480, MOCK_REFRESH, PixelFormat::Xrgb8888);
        let qvga = DisplayMode::new(320, 240, MOCK_REFRESH, PixelFormat::Xrgb8888);
        DisplayCapabilities {
            limits: DisplayLimits {
                min_width: 16,
                min_height: 16,
                max_width: 640,
                max_height: 480,
                width_align: 16,
                height_align: 2,
                stride_align: 32,
            },
            modes: vec![vga, qvga],
            preferred: vga,
            features: DisplayFeatures::INTERRUPT_RETRACE
                | DisplayFeatures::PRE_RETRACE
                | DisplayFeatures::ARBITRARY_GEOMETRY
                | DisplayFeatures::PROGRESSIVE
                | DisplayFeatures::COPY_FILTER
                | DisplayFeatures::BLANKING,
            max_chain_depth: 3,
            settle_retraces: 0,
        }
    }
}

#[cfg(test)]
impl DisplayDevice for MockDisplayDevice {
    fn name(&self) -> &str {
        "mock"
    }

    fn capabilities(&self) -> DisplayCapabilities {
        self.capabilities.clone()
    }

    fn refresh_for(&self, _width: u32, _height: u32) -> RefreshDescriptor {
        MOCK_REFRESH
    }

    fn mode_set(&mut self, mode: &DisplayMode) -> Result<ModeSetOutcome> {
        let mut state = self.hardware.state();
        state.mode_sets.push(*mode);
        if state.unsupported.contains(&mode.size()) {
            return Ok(ModeSetOutcome::Unsupported);
        }
        state.mode = Some(*mode);
        Ok(ModeSetOutcome::Applied)
    }

    fn register_buffer(&mut self, buffer: &FrameBuffer) -> Result<BufferHandle> {
        let mut state = self.hardware.state();
        if let Some(remaining) = state.fail_registration_after {
            if remaining == 0 {
                return Err(Error::BufferAllocationFailed("mock registration refused".to_string()));
            }
            state.fail_registration_after = Some(remaining - 1);
        }
        let handle = BufferHandle(state.next_handle);
        state.next_handle += 1;
        state.registered.insert(handle, UVec2::new(buffer.width(), buffer.height()));
        Ok(handle)
    }

    fn unregister_buffer(&mut self, handle: BufferHandle) {
        let mut state = self.hardware.state();
        let scanned = state.scanout == Some(handle) && !state.blanked;
        if scanned || state.pending_flip == Some(handle) {
            state.freed_while_scanned += 1;
        }
        if state.scanout == Some(handle) {
            state.scanout = None;
        }
        state.registered.remove(&handle);
    }

    fn set_scanout(&mut self, handle: BufferHandle) -> Result<()> {
        let mut state = self.hardware.state();
        if !state.registered.contains_key(&handle) {
            return Err(Error::BackendError(format!("unknown buffer {:?}", handle)));
        }
        state.scanout = Some(handle);
        Ok(())
    }

    fn request_flip(&mut self, handle: BufferHandle) -> Result<()> {
        let mut state = self.hardware.state();
        if let Some(error) = state.reject_flips.clone() {
            return Err(error);
        }
        if state.pending_flip.is_some() {
            return Err(Error::FlipQueueFull);
        }
        if !state.registered.contains_key(&handle) {
            return Err(Error::BackendError(format!("unknown buffer {:?}", handle)));
        }
        state.pending_flip = Some(handle);
        state.flip_requests += 1;
        Ok(())
    }

    fn poll_retrace(&mut self) -> Option<RetraceEvent> {
        let mut state = self.hardware.state();
        if state.polled_events.is_empty() && state.auto_retrace
            && state.pending_flip.is_some() && state.signal.is_none() {
            MockHardware::retrace_locked(&mut state);
        }
        state.polled_events.pop_front()
    }

    fn attach_retrace(&mut self, signal: RetraceSignal) {
        if self.capabilities.has(DisplayFeatures::INTERRUPT_RETRACE) {
            self.hardware.state().signal = Some(signal);
        }
    }

    fn detach_retrace(&mut self) {
        self.hardware.state().signal = None;
    }

    fn set_display_filter(&mut self, filter: &DisplayFilter) -> Result<()> {
        self.hardware.state().filters.push(*filter);
        Ok(())
    }

    fn set_blank(&mut self, blank: bool) {
        self.hardware.state().blanked = blank;
    }

    fn scanout(&self) -> Option<BufferHandle> {
        self.hardware.state().scanout
    }
}
