/// FramePresenter - top-level presentation scheduler
///
/// Owns the display device, the retrace signal, the mode manager (and
/// through it the swap chain) and the fade controller. Everything here runs
/// on the main loop; the retrace handler only touches `RetraceSignal`.
///
/// Every public operation starts with `pump`, which drains polled hardware
/// events, reaps a confirmed flip, advances the settle period and the fade
/// ramp by the number of retraces since the last pump, runs the retrace
/// watchdog and issues the next queued flip.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::PresentConfig;
use crate::display_device::{
    DisplayCapabilities, DisplayDevice, DisplayFeatures, DisplayMode, FadeLevel, FrameBuffer,
};
use crate::error::{Error, Result};
use crate::presenter::{
    DisplayModeManager, ModeListener, ModeState, RetraceSignal, SlotId, SyncPolicy,
    TerminalAction, TransitionController, TransitionSignal, TransitionState, MIN_CHAIN_DEPTH,
};

/// Events drained from a polled device per pump
const MAX_POLLED_EVENTS: usize = 64;

/// Presentation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PresentStats {
    /// Frames handed to `submit_frame`
    pub submitted: u64,
    /// Flips that reached the screen (including forced ones)
    pub displayed: u64,
    /// Frames dropped by the non-blocking policy
    pub dropped: u64,
    /// Frames dropped because the device refused the flip
    pub device_busy: u64,
    /// Refresh intervals missed between a flip request and its completion
    pub missed_vblanks: u64,
    /// Frames rejected or discarded because their geometry was replaced
    pub stale_frames: u64,
    /// Flips completed by the watchdog
    pub forced_flips: u64,
    /// Frames held back while a mode switch settled
    pub held_frames: u64,
}

/// A frame handed to the hardware and waiting for its flip
#[derive(Debug, Clone, Copy)]
pub struct PresentationRequest {
    pub slot: SlotId,
    /// Flip sequence number armed in the retrace signal
    pub sequence: u64,
    /// Retrace counter when the flip was requested
    pub frame: u64,
    pub issued_at: Instant,
}

/// Frame presenter
pub struct FramePresenter {
    device: Box<dyn DisplayDevice>,
    signal: RetraceSignal,
    config: PresentConfig,
    interrupt: bool,
    pre_retrace: bool,
    modes: DisplayModeManager,
    transition: TransitionController,
    in_flight: Option<PresentationRequest>,
    next_sequence: u64,
    last_frame: u64,
    paced_pre_frame: u64,
    seen_stray_flips: u64,
    ui_active: bool,
    signals: VecDeque<TransitionSignal>,
    stats: PresentStats,
}

impl FramePresenter {
    /// Negotiate the initial mode, build the swap chain and start the
    /// boot fade-in
    ///
    /// # Errors
    ///
    /// Setup failures are fatal: `InitializationFailed` for an unusable
    /// device, `ModeNotSupported` / `BufferAllocationFailed` from the
    /// initial mode set.
    pub fn new(mut device: Box<dyn DisplayDevice>, config: PresentConfig) -> Result<Self> {
        let config = config.validate();
        let capabilities = device.capabilities();
        if capabilities.max_chain_depth < MIN_CHAIN_DEPTH {
            let error = Error::InitializationFailed(format!(
                "'{}' supports {} buffers, at least {} required",
                device.name(), capabilities.max_chain_depth, MIN_CHAIN_DEPTH
            ));
            crate::present_error!("vsync::FramePresenter", "{}", error);
            return Err(error);
        }

        let signal = RetraceSignal::new(capabilities.preferred.refresh);
        let interrupt = capabilities.has(DisplayFeatures::INTERRUPT_RETRACE);
        let pre_retrace = capabilities.has(DisplayFeatures::PRE_RETRACE);
        let mut modes = DisplayModeManager::new(capabilities, &config);
        modes.configure(device.as_mut(), &signal, config.requested_width, config.requested_height)?;

        if interrupt {
            device.attach_retrace(signal.clone());
        }

        let transition = TransitionController::new(&config);
        let mut presenter = Self {
            device,
            last_frame: signal.frame(),
            paced_pre_frame: signal.pre_frame(),
            seen_stray_flips: 0,
            signal,
            config,
            interrupt,
            pre_retrace,
            modes,
            transition,
            in_flight: None,
            next_sequence: 1,
            ui_active: false,
            signals: VecDeque::new(),
            stats: PresentStats::default(),
        };

        let started = presenter.transition.begin_fade_in();
        presenter.after_transition(started);

        if let Some(mode) = presenter.modes.current_mode() {
            crate::present_info!("vsync::FramePresenter", "Presenting on '{}' at {}, {} buffers, {:?}",
                presenter.device.name(), mode, presenter.modes.chain_depth(), presenter.sync_policy());
        }
        Ok(presenter)
    }

    // ===== RENDERER INTERFACE =====

    /// Take a free slot to render into
    ///
    /// With every free slot in use the blocking policy waits for the
    /// outstanding flip; the non-blocking policy returns `DeviceBusy` so the
    /// renderer can skip the frame.
    ///
    /// # Errors
    ///
    /// `ChainExhausted` if the renderer itself holds every free slot,
    /// `InvalidState` after `shutdown`.
    pub fn acquire(&mut self) -> Result<SlotId> {
        self.pump();
        loop {
            let chain = self.modes.chain_mut()
                .ok_or_else(|| Error::InvalidState("presenter is stopped".to_string()))?;
            match chain.acquire() {
                Err(Error::ChainExhausted) => {}
                result => return result,
            }

            let held = self.modes.state() == ModeState::Configuring
                && self.modes.chain().is_some_and(|c| c.queued_len() > 0);
            if self.in_flight.is_none() && !held {
                crate::present_error!("vsync::FramePresenter",
                    "No free slot and no flip outstanding; renderer holds every buffer");
                return Err(Error::ChainExhausted);
            }

            if self.sync_policy() == SyncPolicy::NonBlocking {
                return Err(Error::DeviceBusy);
            }
            if self.in_flight.is_some() {
                self.wait_for_flip(true);
            } else if !self.wait_one_retrace() {
                return Err(Error::DeviceBusy);
            }
        }
    }

    /// Writable pixels of a slot returned by `acquire`
    pub fn buffer_mut(&mut self, slot: SlotId) -> Result<&mut FrameBuffer> {
        self.modes.chain_mut()
            .ok_or_else(|| Error::InvalidState("presenter is stopped".to_string()))?
            .buffer_mut(slot)
    }

    /// Hand a rendered slot to the display
    ///
    /// Steady-state problems never surface here: a frame dropped by the
    /// non-blocking policy, refused by the device or rendered at a replaced
    /// geometry is counted in `stats` and `Ok(())` is returned.
    ///
    /// # Errors
    ///
    /// `InvalidSlot` if the slot is not owned by the renderer,
    /// `InvalidState` after `shutdown`, or a backend error from the flip.
    pub fn submit_frame(&mut self, slot: SlotId) -> Result<()> {
        self.pump();
        self.stats.submitted += 1;

        let chain = self.modes.chain()
            .ok_or_else(|| Error::InvalidState("presenter is stopped".to_string()))?;
        if slot.generation() != chain.generation() {
            self.stats.stale_frames += 1;
            crate::present_debug!("vsync::FramePresenter",
                "Frame from chain generation {} discarded after mode switch", slot.generation());
            return Ok(());
        }
        let state = chain.state(slot)?;
        if state != crate::presenter::SlotState::Rendering {
            return Err(Error::InvalidSlot(format!(
                "submit_frame: slot {} is {:?}", slot.index(), state
            )));
        }

        if self.modes.state() == ModeState::Configuring {
            self.present_slot(slot)?;
            self.stats.held_frames += 1;
            crate::present_debug!("vsync::FramePresenter", "Frame held until the mode settles");
            return Ok(());
        }

        if self.outstanding() {
            match self.sync_policy() {
                SyncPolicy::Blocking => self.drain()?,
                SyncPolicy::NonBlocking => {
                    if let Some(chain) = self.modes.chain_mut() {
                        chain.discard(slot)?;
                    }
                    self.stats.dropped += 1;
                    crate::present_debug!("vsync::FramePresenter", "Flip outstanding, frame dropped");
                    return Ok(());
                }
            }
        }

        self.present_slot(slot)?;
        self.issue_next()
    }

    fn present_slot(&mut self, slot: SlotId) -> Result<()> {
        match self.modes.chain_mut() {
            Some(chain) => chain.present(slot),
            None => Err(Error::InvalidState("presenter is stopped".to_string())),
        }
    }

    /// Wait for the outstanding flip
    ///
    /// Blocking waits sleep on the retrace signal (interrupt devices) or
    /// spin-poll the device, and are bounded by the watchdog. Returns `true`
    /// once the flip that was outstanding on entry has retired.
    pub fn wait_for_flip(&mut self, blocking: bool) -> bool {
        self.pump();
        let Some(request) = self.in_flight else {
            return true;
        };
        if !blocking {
            return false;
        }

        while self.is_in_flight(request.sequence) {
            let deadline = self.watchdog_deadline(&request);
            if Instant::now() >= deadline {
                self.force_flip(request);
                break;
            }
            if self.interrupt {
                self.signal.wait_confirmed(request.sequence, deadline);
            } else {
                self.spin_until(deadline, |signal| signal.is_confirmed(request.sequence));
            }
            self.pump();
        }
        true
    }

    /// Wait for the next pre-retrace before rendering
    ///
    /// Only waits under the blocking policy with no flip outstanding, and
    /// returns at once if a pre-retrace already fired since the last flip
    /// request.
    pub fn pace(&mut self) {
        self.pump();
        if self.sync_policy() != SyncPolicy::Blocking || self.in_flight.is_some() {
            return;
        }

        let deadline = Instant::now() + self.signal.frame_period() * 2;
        if self.pre_retrace {
            if self.signal.pre_frame() <= self.paced_pre_frame {
                self.signal.wait_pre_retrace(self.paced_pre_frame, deadline);
            }
        } else {
            self.wait_one_retrace_until(deadline);
        }
        self.paced_pre_frame = self.signal.pre_frame();
        self.pump();
    }

    // ===== MODE CHANGES =====

    /// Switch to the mode nearest `(width, height)`; `(0, 0)` selects the
    /// device's preferred mode
    ///
    /// Drains the outstanding flip before any buffer is freed. Frames
    /// submitted after this returns render at the new geometry. Returns
    /// `false` when the mode was already current.
    ///
    /// # Errors
    ///
    /// `ModeNotSupported` or `BufferAllocationFailed` once the old chain is
    /// gone. The presenter is then `Stopped` and every later call returns
    /// `InvalidState`.
    pub fn request_mode(&mut self, width: u32, height: u32) -> Result<bool> {
        if self.modes.state() == ModeState::Stopped {
            return Err(Error::InvalidState("presenter is stopped".to_string()));
        }
        self.pump();

        let target = self.modes.resolve(&*self.device, width, height);
        if self.modes.current_mode() == Some(target) {
            crate::present_debug!("vsync::FramePresenter", "Mode {} already current", target);
            return Ok(false);
        }

        self.drain()?;
        let discarded = self.discard_queued();
        if discarded > 0 {
            self.stats.stale_frames += discarded;
            crate::present_debug!("vsync::FramePresenter",
                "{} held frame(s) discarded by mode switch", discarded);
        }

        let changed = match self.modes.configure(self.device.as_mut(), &self.signal, width, height) {
            Ok(changed) => changed,
            Err(e) => {
                // Stopped without a chain; nothing is left for the handler
                self.device.detach_retrace();
                return Err(e);
            }
        };
        self.issue_next()?;
        Ok(changed)
    }

    /// Register a collaborator for geometry changes
    pub fn add_listener(&mut self, listener: Box<dyn ModeListener>) {
        self.modes.add_listener(listener);
    }

    pub fn set_deflicker_strength(&mut self, strength: u8) {
        self.modes.set_deflicker_strength(self.device.as_mut(), strength);
    }

    pub fn set_brightness(&mut self, brightness: i8) {
        self.modes.set_brightness(self.device.as_mut(), brightness);
    }

    // ===== TRANSITIONS =====
    //
    // Each ramp starts with a pump so retraces that happened before the
    // request are not counted as ramp steps.

    /// Ramp the output in from black
    pub fn begin_fade_in(&mut self) {
        self.pump();
        let signal = self.transition.begin_fade_in();
        self.after_transition(signal);
    }

    /// Fade out ahead of application exit
    pub fn begin_exit(&mut self) {
        self.pump();
        let signal = self.transition.begin_fade_out(TerminalAction::Exit);
        self.after_transition(signal);
    }

    /// Fade out ahead of a content reset
    pub fn begin_reset(&mut self) {
        self.pump();
        let signal = self.transition.begin_fade_out(TerminalAction::Reset);
        self.after_transition(signal);
    }

    /// Next completed ramp, oldest first
    pub fn take_transition_signal(&mut self) -> Option<TransitionSignal> {
        self.signals.pop_front()
    }

    fn after_transition(&mut self, signal: Option<TransitionSignal>) {
        if let Some(signal) = signal {
            self.handle_transition(signal);
        }
        self.modes.set_fade(self.device.as_mut(), self.transition.fade_level());
    }

    fn handle_transition(&mut self, signal: TransitionSignal) {
        match signal {
            TransitionSignal::FadeInComplete => {
                crate::present_debug!("vsync::FramePresenter", "Fade-in complete");
                self.modes.apply_full_strength(self.device.as_mut());
            }
            TransitionSignal::FadeOutComplete(TerminalAction::Exit) => {
                crate::present_info!("vsync::FramePresenter", "Exit fade complete, output blanked");
                self.modes.blank_for_exit(self.device.as_mut());
            }
            TransitionSignal::FadeOutComplete(TerminalAction::Reset) => {
                crate::present_info!("vsync::FramePresenter", "Reset fade complete");
            }
        }
        self.signals.push_back(signal);
    }

    // ===== HOUSEKEEPING =====

    /// Process everything the hardware reported since the last call
    pub fn pump(&mut self) {
        let drained = self.interrupt || self.poll_events();

        self.reap();
        self.note_stray_flips();

        let frame = self.signal.frame();
        let retraces = frame.saturating_sub(self.last_frame);
        if retraces > 0 {
            self.last_frame = frame;
            self.modes.on_retrace(self.device.as_mut(), retraces);
            for _ in 0..retraces {
                if !self.transition.is_active() {
                    break;
                }
                let signal = self.transition.step();
                self.after_transition(signal);
            }
        }

        // Events still queued may hold the completion the watchdog is
        // waiting for
        if drained {
            self.check_watchdog();
        }

        if let Err(e) = self.issue_next() {
            crate::present_error!("vsync::FramePresenter", "Flip request failed: {}", e);
        }
    }

    /// Deliver queued events of a polled device; `false` if some remain
    fn poll_events(&mut self) -> bool {
        for _ in 0..MAX_POLLED_EVENTS {
            match self.device.poll_retrace() {
                Some(event) => {
                    self.signal.deliver(event);
                }
                None => return true,
            }
        }
        false
    }

    /// Log completions the signal refused because another buffer was armed
    fn note_stray_flips(&mut self) {
        let strays = self.signal.stray_flips();
        if strays == self.seen_stray_flips {
            return;
        }
        let late = strays - self.seen_stray_flips;
        self.seen_stray_flips = strays;

        let slot = self.signal.last_stray()
            .and_then(|handle| self.modes.chain().and_then(|c| c.slot_for_handle(handle)));
        match slot {
            Some(slot) => crate::present_info!("vsync::FramePresenter",
                "Ignored {} late flip completion(s), last for slot {}", late, slot.index()),
            None => crate::present_info!("vsync::FramePresenter",
                "Ignored {} late flip completion(s) of a released buffer", late),
        }
    }

    /// Release the slot of a confirmed flip
    fn reap(&mut self) {
        let Some(request) = self.in_flight else {
            return;
        };
        if !self.signal.is_confirmed(request.sequence) {
            return;
        }
        self.in_flight = None;
        self.retire(request);

        let gap = self.signal.confirmed_frame().saturating_sub(request.frame);
        if gap > 1 {
            self.stats.missed_vblanks += gap - 1;
            crate::present_info!("vsync::FramePresenter", "Missed {} vblank(s) before flip {}",
                gap - 1, request.sequence);
        }
    }

    fn retire(&mut self, request: PresentationRequest) {
        let Some(chain) = self.modes.chain_mut() else {
            return;
        };
        match chain.release(request.slot) {
            Ok(_) => self.stats.displayed += 1,
            Err(e) => crate::present_error!("vsync::FramePresenter", "Flip {} not released: {}",
                request.sequence, e),
        }
    }

    fn check_watchdog(&mut self) {
        let Some(request) = self.in_flight else {
            return;
        };
        let retraces = self.signal.frame().saturating_sub(request.frame);
        if retraces > self.config.watchdog_intervals as u64 || Instant::now() >= self.watchdog_deadline(&request) {
            self.force_flip(request);
        }
    }

    fn watchdog_deadline(&self, request: &PresentationRequest) -> Instant {
        request.issued_at + self.signal.frame_period() * (self.config.watchdog_intervals + 1)
    }

    /// Treat a flip whose confirmation never came as complete
    fn force_flip(&mut self, request: PresentationRequest) {
        if !self.is_in_flight(request.sequence) {
            return;
        }
        let missed_intervals = self.signal.frame().saturating_sub(request.frame)
            .max(self.config.watchdog_intervals as u64) as u32;
        crate::present_warn!("vsync::FramePresenter", "{} on '{}', forcing flip {} (driver health)",
            Error::HardwareEventLost { missed_intervals }, self.device.name(), request.sequence);

        self.signal.force_confirm(request.sequence);
        self.in_flight = None;
        self.stats.forced_flips += 1;
        self.retire(request);
    }

    /// Hand the oldest queued slot to the hardware
    fn issue_next(&mut self) -> Result<()> {
        if self.in_flight.is_some() || self.modes.state() != ModeState::Stable {
            return Ok(());
        }
        let Some(chain) = self.modes.chain_mut() else {
            return Ok(());
        };
        let Some(slot) = chain.next_queued() else {
            return Ok(());
        };

        let handle = chain.handle(slot)?;
        let sequence = self.next_sequence;
        let frame = self.signal.frame();
        self.signal.arm(sequence, handle);

        match self.device.request_flip(handle) {
            Ok(()) => {
                self.next_sequence += 1;
                self.paced_pre_frame = self.signal.pre_frame();
                self.in_flight = Some(PresentationRequest {
                    slot,
                    sequence,
                    frame,
                    issued_at: Instant::now(),
                });
                Ok(())
            }
            Err(e) => {
                self.signal.disarm();
                chain.unqueue(slot)?;
                if e.is_transient() {
                    self.stats.device_busy += 1;
                    crate::present_debug!("vsync::FramePresenter", "{}, frame dropped", e);
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Flip outstanding or frames waiting for one
    fn outstanding(&self) -> bool {
        self.in_flight.is_some() || self.modes.chain().is_some_and(|c| c.queued_len() > 0)
    }

    fn is_in_flight(&self, sequence: u64) -> bool {
        self.in_flight.is_some_and(|r| r.sequence == sequence)
    }

    /// Retire every flip and every queued frame that can still be flipped
    fn drain(&mut self) -> Result<()> {
        loop {
            if self.in_flight.is_some() {
                self.wait_for_flip(true);
                continue;
            }
            let queued = self.modes.chain().map_or(0, |c| c.queued_len());
            if queued == 0 || self.modes.state() != ModeState::Stable {
                return Ok(());
            }
            self.issue_next()?;
        }
    }

    /// Drop queued frames that were never flipped
    fn discard_queued(&mut self) -> u64 {
        let Some(chain) = self.modes.chain_mut() else {
            return 0;
        };
        let mut discarded = 0;
        while let Some(slot) = chain.next_queued() {
            if chain.unqueue(slot).is_err() {
                break;
            }
            discarded += 1;
        }
        discarded
    }

    fn wait_one_retrace(&mut self) -> bool {
        let deadline = Instant::now() + self.signal.frame_period() * 2;
        let arrived = self.wait_one_retrace_until(deadline);
        self.pump();
        arrived
    }

    fn wait_one_retrace_until(&mut self, deadline: Instant) -> bool {
        let after = self.signal.frame();
        if self.interrupt {
            self.signal.wait_retrace(after, deadline)
        } else {
            self.spin_until(deadline, |signal| signal.frame() > after)
        }
    }

    /// Bounded spin-poll for devices without retrace interrupts
    fn spin_until(&mut self, deadline: Instant, done: impl Fn(&RetraceSignal) -> bool) -> bool {
        loop {
            if done(&self.signal) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            match self.device.poll_retrace() {
                Some(event) => {
                    self.signal.deliver(event);
                }
                None => {
                    std::hint::spin_loop();
                    std::thread::yield_now();
                }
            }
        }
    }

    /// Drain, detach from the hardware and free every buffer
    ///
    /// Idempotent. The presenter is unusable afterwards.
    pub fn shutdown(&mut self) {
        if self.modes.state() == ModeState::Stopped {
            return;
        }
        if let Err(e) = self.drain() {
            crate::present_warn!("vsync::FramePresenter", "Drain before shutdown failed: {}", e);
        }
        let discarded = self.discard_queued();
        self.stats.stale_frames += discarded;

        self.device.detach_retrace();
        self.modes.shutdown(self.device.as_mut());
        crate::present_info!("vsync::FramePresenter",
            "Presenter on '{}' stopped: {} submitted, {} displayed, {} dropped, {} missed vblanks",
            self.device.name(), self.stats.submitted, self.stats.displayed,
            self.stats.dropped, self.stats.missed_vblanks);
    }

    // ===== DIAGNOSTICS =====

    pub fn stats(&self) -> PresentStats {
        self.stats
    }

    pub fn current_mode(&self) -> Option<DisplayMode> {
        self.modes.current_mode()
    }

    pub fn supported_modes(&self) -> &[DisplayMode] {
        self.modes.supported_modes()
    }

    pub fn mode_state(&self) -> ModeState {
        self.modes.state()
    }

    pub fn transition_state(&self) -> TransitionState {
        self.transition.state()
    }

    pub fn fade_level(&self) -> Option<FadeLevel> {
        self.transition.fade_level()
    }

    pub fn capabilities(&self) -> &DisplayCapabilities {
        self.modes.capabilities()
    }

    pub fn device_name(&self) -> &str {
        self.device.name()
    }

    /// Current policy, see `PresentConfig::sync_policy`
    pub fn sync_policy(&self) -> SyncPolicy {
        self.config.sync_policy(self.ui_active)
    }

    /// An active UI overlay forces blocking presentation
    pub fn set_ui_active(&mut self, active: bool) {
        self.ui_active = active;
    }

    /// Last retrace counter seen
    pub fn frame_counter(&self) -> u64 {
        self.signal.frame()
    }

    /// Refresh interval of the current mode
    pub fn frame_period(&self) -> Duration {
        self.signal.frame_period()
    }

    /// The flip waiting for confirmation, if any
    pub fn in_flight(&self) -> Option<PresentationRequest> {
        self.in_flight
    }

    pub fn config(&self) -> &PresentConfig {
        &self.config
    }
}

impl Drop for FramePresenter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "frame_presenter_tests.rs"]
mod tests;
