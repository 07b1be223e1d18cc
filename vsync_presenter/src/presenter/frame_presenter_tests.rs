use super::*;
use crate::display_device::mock_display_device::{MockDisplayDevice, MockHardware};
use crate::presenter::SlotState;
use glam::UVec2;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

/// No boot fade, watchdog far beyond any scheduling hiccup
fn quiet_config() -> PresentConfig {
    PresentConfig { fade_in: false, watchdog_intervals: 30, ..Default::default() }
}

fn non_blocking_config() -> PresentConfig {
    PresentConfig { vsync: false, ..quiet_config() }
}

fn presenter(config: PresentConfig) -> (FramePresenter, MockHardware) {
    let (device, hardware) = MockDisplayDevice::new();
    (started(FramePresenter::new(Box::new(device), config).unwrap()), hardware)
}

/// Drop the completion of a disabled boot fade-in
fn started(mut p: FramePresenter) -> FramePresenter {
    while p.take_transition_signal().is_some() {}
    p
}

/// Polled device that completes a pending flip whenever it is polled
fn polled_presenter(config: PresentConfig) -> (FramePresenter, MockHardware) {
    let (device, hardware) = MockDisplayDevice::polled();
    hardware.set_auto_retrace(true);
    (started(FramePresenter::new(Box::new(device), config).unwrap()), hardware)
}

/// Polled device whose retraces only come from the test
fn manual_polled_presenter(config: PresentConfig) -> (FramePresenter, MockHardware) {
    let (device, hardware) = MockDisplayDevice::polled();
    (started(FramePresenter::new(Box::new(device), config).unwrap()), hardware)
}

fn render(p: &mut FramePresenter) -> SlotId {
    let slot = p.acquire().unwrap();
    p.buffer_mut(slot).unwrap().words_mut().fill(0x00ff_8040);
    slot
}

/// Fires retraces on a background thread until dropped
struct RetraceThread {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl RetraceThread {
    fn start(hardware: MockHardware, period: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = thread::spawn(move || {
            while !flag.load(Ordering::Acquire) {
                thread::sleep(period);
                hardware.fire_retrace();
            }
        });
        Self { stop, handle: Some(handle) }
    }
}

impl Drop for RetraceThread {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap();
        }
    }
}

// ============================================================================
// Startup
// ============================================================================

#[test]
fn test_new_configures_preferred_mode() {
    let (p, hardware) = presenter(PresentConfig::default());
    assert_eq!(p.mode_state(), ModeState::Stable);
    assert_eq!(p.current_mode().unwrap().size(), UVec2::new(640, 480));
    assert_eq!(p.supported_modes().len(), 2);
    assert_eq!(hardware.registered_count(), 3);
    assert!(hardware.state().signal.is_some());
    // Boot fade-in running
    assert_eq!(p.transition_state(), TransitionState::FadingIn);
    assert_eq!(p.fade_level().unwrap().level, 0);
}

#[test]
fn test_new_honours_requested_geometry_and_depth() {
    let config = PresentConfig {
        requested_width: 320,
        requested_height: 240,
        triple_buffering: false,
        ..quiet_config()
    };
    let (p, hardware) = presenter(config);
    assert_eq!(p.current_mode().unwrap().size(), UVec2::new(320, 240));
    assert_eq!(hardware.registered_count(), 2);
}

#[test]
fn test_new_fails_on_allocation_failure() {
    let (device, hardware) = MockDisplayDevice::new();
    hardware.set_fail_registration_after(Some(0));
    let result = FramePresenter::new(Box::new(device), quiet_config());
    assert!(matches!(result, Err(Error::BufferAllocationFailed(_))));
}

#[test]
fn test_new_rejects_single_buffer_device() {
    let mut caps = MockDisplayDevice::default_capabilities();
    caps.max_chain_depth = 1;
    let (device, _hw) = MockDisplayDevice::with_capabilities(caps);
    let result = FramePresenter::new(Box::new(device), quiet_config());
    assert!(matches!(result, Err(Error::InitializationFailed(_))));
}

// ============================================================================
// Scenario A: double buffer, blocking
// ============================================================================

#[test]
fn test_double_buffer_acquire_blocks_until_first_flip() {
    let config = PresentConfig { triple_buffering: false, ..quiet_config() };
    let (mut p, hardware) = polled_presenter(config);

    let first = render(&mut p);
    p.submit_frame(first).unwrap();
    assert_eq!(hardware.displayed().len(), 0);

    // Only free slot is in flight: acquire must wait for the first flip
    let second = render(&mut p);
    assert_eq!(hardware.displayed().len(), 1);
    p.submit_frame(second).unwrap();

    assert!(p.wait_for_flip(true));
    let stats = p.stats();
    assert_eq!(stats.submitted, 2);
    assert_eq!(stats.displayed, 2);
    assert_eq!(stats.dropped, 0);
    assert_eq!(stats.forced_flips, 0);
}

#[test]
fn test_blocking_submit_waits_for_outstanding_flip() {
    let (mut p, hardware) = presenter(quiet_config());

    let first = render(&mut p);
    p.submit_frame(first).unwrap();
    let second = render(&mut p);
    assert_eq!(hardware.displayed().len(), 0);

    let isr = hardware.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(5));
        isr.fire_retrace();
    });
    p.submit_frame(second).unwrap();
    handle.join().unwrap();
    // First flip retired before the second was accepted
    assert_eq!(hardware.displayed().len(), 1);
    assert_eq!(p.in_flight().unwrap().slot, second);
}

#[test]
fn test_blocking_with_retrace_interrupts() {
    let config = PresentConfig { triple_buffering: false, ..quiet_config() };
    let (mut p, hardware) = presenter(config);
    let _retraces = RetraceThread::start(hardware.clone(), Duration::from_millis(2));

    for _ in 0..20 {
        let slot = render(&mut p);
        p.submit_frame(slot).unwrap();
    }
    assert!(p.wait_for_flip(true));

    let stats = p.stats();
    assert_eq!(stats.submitted, 20);
    assert_eq!(stats.displayed, 20);
    assert_eq!(stats.dropped, 0);
    assert_eq!(stats.forced_flips, 0);
    assert_eq!(hardware.state().freed_while_scanned, 0);
}

// ============================================================================
// Scenario B: non-blocking, slow consumer
// ============================================================================

#[test]
fn test_non_blocking_drops_while_flip_outstanding() {
    let (mut p, hardware) = presenter(non_blocking_config());
    let retrace_after = [0, 2, 4, 6, 8, 9];

    for i in 0..10 {
        let slot = render(&mut p);
        p.submit_frame(slot).unwrap();
        if retrace_after.contains(&i) {
            hardware.fire_retrace();
        }
        let chain = p.modes.chain().unwrap();
        chain.check_invariants().unwrap();
        // Nothing in flight may be handed out again
        if let Some(request) = p.in_flight() {
            assert_eq!(chain.state(request.slot).unwrap(), SlotState::Queued);
        }
    }
    p.wait_for_flip(false);

    let stats = p.stats();
    assert_eq!(stats.submitted, 10);
    assert_eq!(stats.displayed, 6);
    assert_eq!(stats.dropped, 4);
    assert_eq!(hardware.displayed().len(), 6);
    assert_eq!(hardware.state().freed_while_scanned, 0);
}

#[test]
fn test_non_blocking_acquire_reports_busy() {
    let config = PresentConfig { triple_buffering: false, ..non_blocking_config() };
    let (mut p, hardware) = presenter(config);

    let slot = render(&mut p);
    p.submit_frame(slot).unwrap();
    assert_eq!(p.acquire(), Err(Error::DeviceBusy));

    hardware.fire_retrace();
    assert!(p.acquire().is_ok());
}

#[test]
fn test_non_blocking_wait_returns_immediately() {
    let (mut p, _hardware) = presenter(non_blocking_config());
    let slot = render(&mut p);
    p.submit_frame(slot).unwrap();

    let start = Instant::now();
    assert!(!p.wait_for_flip(false));
    assert!(start.elapsed() < Duration::from_millis(100));
    // Still in flight, still protected
    assert!(p.in_flight().is_some());
}

#[test]
fn test_chain_exhausted_by_renderer() {
    let (mut p, _hardware) = presenter(quiet_config());
    let _a = p.acquire().unwrap();
    let _b = p.acquire().unwrap();
    assert_eq!(p.acquire(), Err(Error::ChainExhausted));
}

// ============================================================================
// Scenario C: live mode switch
// ============================================================================

#[test]
fn test_mode_switch_mid_stream() {
    let (mut p, hardware) = polled_presenter(quiet_config());

    for _ in 0..3 {
        let slot = render(&mut p);
        p.submit_frame(slot).unwrap();
    }
    // Renderer still holds a 640x480 slot across the switch
    let stale = render(&mut p);

    assert!(p.request_mode(320, 240).unwrap());
    assert_eq!(p.current_mode().unwrap().size(), UVec2::new(320, 240));
    let switch_index = hardware.displayed().len();
    assert_eq!(switch_index, 3);

    p.submit_frame(stale).unwrap();
    assert_eq!(p.stats().stale_frames, 1);

    for _ in 0..3 {
        let slot = p.acquire().unwrap();
        let buffer = p.buffer_mut(slot).unwrap();
        assert_eq!((buffer.width(), buffer.height()), (320, 240));
        p.submit_frame(slot).unwrap();
    }
    p.wait_for_flip(true);

    let displayed = hardware.displayed();
    assert_eq!(displayed.len(), 6);
    for scanout in &displayed[..switch_index] {
        assert_eq!(scanout.size, UVec2::new(640, 480));
    }
    for scanout in &displayed[switch_index..] {
        assert_eq!(scanout.size, UVec2::new(320, 240));
    }
    assert_eq!(hardware.state().freed_while_scanned, 0);
}

#[test]
fn test_mode_switch_drains_interrupt_flip() {
    let (mut p, hardware) = presenter(quiet_config());
    let _retraces = RetraceThread::start(hardware.clone(), Duration::from_millis(2));

    let slot = render(&mut p);
    p.submit_frame(slot).unwrap();
    p.request_mode(320, 240).unwrap();

    assert!(p.in_flight().is_none());
    assert_eq!(p.stats().forced_flips, 0);
    assert_eq!(hardware.state().freed_while_scanned, 0);
}

#[test]
fn test_request_mode_identical_is_noop() {
    let (mut p, hardware) = presenter(quiet_config());
    assert!(!p.request_mode(640, 480).unwrap());
    assert!(!p.request_mode(0, 0).unwrap());
    assert_eq!(hardware.state().mode_sets.len(), 1);
}

#[test]
fn test_request_mode_zero_restores_preferred() {
    let (mut p, _hardware) = presenter(quiet_config());
    p.request_mode(320, 240).unwrap();
    assert!(p.request_mode(0, 0).unwrap());
    assert_eq!(p.current_mode(), Some(p.capabilities().preferred));
}

#[test]
fn test_request_mode_round_trip_within_limits() {
    let (mut p, _hardware) = presenter(quiet_config());
    let limits = p.capabilities().limits;
    for (w, h) in [(333, 241), (1000, 9000), (17, 17), (512, 384)] {
        p.request_mode(w, h).unwrap();
        let mode = p.current_mode().unwrap();
        assert!(limits.admits(mode.width, mode.height), "{}x{} -> {}", w, h, mode);
        if limits.admits(w, h) {
            assert_eq!((mode.width, mode.height), (w, h));
        }
    }
}

#[test]
fn test_failed_mode_switch_stops_presenter() {
    let (mut p, hardware) = presenter(quiet_config());
    let slot = render(&mut p);
    p.submit_frame(slot).unwrap();
    hardware.fire_retrace();
    p.pump();
    assert_eq!(p.stats().displayed, 1);

    // Old chain is freed, the first buffer of the new one is refused
    hardware.set_fail_registration_after(Some(0));
    let result = p.request_mode(320, 240);
    assert!(matches!(result, Err(Error::BufferAllocationFailed(_))));

    assert_eq!(p.mode_state(), ModeState::Stopped);
    assert_eq!(p.current_mode(), None);
    assert_eq!(hardware.registered_count(), 0);
    assert!(hardware.state().signal.is_none());

    assert!(matches!(p.acquire(), Err(Error::InvalidState(_))));
    assert!(matches!(p.submit_frame(slot), Err(Error::InvalidState(_))));
    assert!(matches!(p.request_mode(640, 480), Err(Error::InvalidState(_))));
    assert!(p.wait_for_flip(true));
    p.shutdown();
}

#[test]
fn test_frames_held_while_mode_settles() {
    let mut caps = MockDisplayDevice::default_capabilities();
    caps.settle_retraces = 2;
    let (device, hardware) = MockDisplayDevice::with_capabilities(caps);
    let mut p = started(FramePresenter::new(Box::new(device), quiet_config()).unwrap());
    hardware.fire_retraces(2);
    p.pump();
    assert_eq!(p.mode_state(), ModeState::Stable);

    p.request_mode(320, 240).unwrap();
    assert_eq!(p.mode_state(), ModeState::Configuring);
    assert!(hardware.state().blanked);

    let slot = render(&mut p);
    p.submit_frame(slot).unwrap();
    assert_eq!(p.stats().held_frames, 1);
    assert_eq!(p.stats().dropped, 0);
    assert!(hardware.pending_flip().is_none());

    hardware.fire_retraces(2);
    p.pump();
    assert_eq!(p.mode_state(), ModeState::Stable);
    assert!(!hardware.state().blanked);
    assert!(hardware.pending_flip().is_some());

    hardware.fire_retrace();
    p.pump();
    let displayed = hardware.displayed();
    assert_eq!(displayed.last().unwrap().size, UVec2::new(320, 240));
    assert_eq!(p.stats().displayed, 1);
}

#[test]
fn test_listener_sees_new_geometry() {
    struct Recorder(Arc<Mutex<Vec<DisplayMode>>>);
    impl ModeListener for Recorder {
        fn mode_changed(&mut self, mode: &DisplayMode) {
            self.0.lock().unwrap().push(*mode);
        }
    }

    let (mut p, _hardware) = presenter(quiet_config());
    let seen = Arc::new(Mutex::new(Vec::new()));
    p.add_listener(Box::new(Recorder(seen.clone())));
    p.request_mode(320, 240).unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].size(), UVec2::new(320, 240));
}

// ============================================================================
// Scenario D: fade timing
// ============================================================================

#[test]
fn test_exit_fade_counts_retraces_not_frames() {
    let (mut p, hardware) = presenter(quiet_config());
    let mut rng = Pcg32::seed_from_u64(22);
    p.begin_exit();
    assert_eq!(p.transition_state(), TransitionState::FadingOut);

    for retrace in 1..=22 {
        // Variable render time between retraces
        thread::sleep(Duration::from_micros(rng.random_range(0..3_000)));
        hardware.fire_retrace();
        p.pump();

        let level = p.fade_level().unwrap().level;
        if retrace < 22 {
            assert!(level > 0, "level reached 0 after {} retraces", retrace);
            assert_eq!(p.take_transition_signal(), None);
        } else {
            assert_eq!(level, 0);
        }
    }
    assert_eq!(
        p.take_transition_signal(),
        Some(TransitionSignal::FadeOutComplete(TerminalAction::Exit))
    );
    assert!(hardware.state().blanked);
}

#[test]
fn test_fade_steps_batched_retraces() {
    let (mut p, hardware) = presenter(quiet_config());
    p.begin_exit();
    hardware.fire_retraces(10);
    p.pump();
    assert_eq!(p.fade_level().unwrap().level, 12);
    hardware.fire_retraces(12);
    p.pump();
    assert_eq!(p.fade_level().unwrap().level, 0);
}

#[test]
fn test_boot_fade_in_enables_deflicker() {
    let config = PresentConfig { deflicker_strength: 60, fade_in: true, ..quiet_config() };
    let (mut p, hardware) = presenter(config);
    assert_eq!(hardware.state().filters.last().unwrap().deflicker_strength, 0);

    hardware.fire_retraces(22);
    p.pump();
    assert_eq!(p.take_transition_signal(), Some(TransitionSignal::FadeInComplete));
    let last = *hardware.state().filters.last().unwrap();
    assert_eq!(last.deflicker_strength, 60);
    assert_eq!(last.fade, None);
}

#[test]
fn test_exit_without_fade_blanks_immediately() {
    let config = PresentConfig { exit_fade: false, ..quiet_config() };
    let (mut p, hardware) = presenter(config);
    p.begin_exit();
    assert_eq!(
        p.take_transition_signal(),
        Some(TransitionSignal::FadeOutComplete(TerminalAction::Exit))
    );
    assert!(hardware.state().blanked);
}

// ============================================================================
// Retrace idempotence, watchdog, diagnostics
// ============================================================================

#[test]
fn test_duplicate_retrace_does_not_double_release() {
    let (mut p, hardware) = presenter(quiet_config());
    let slot = render(&mut p);
    p.submit_frame(slot).unwrap();
    let frame = hardware.fire_retrace();
    p.pump();

    // Same completion delivered again
    let latched = hardware.displayed()[0].handle;
    assert!(!p.signal.on_flip(frame, latched));
    assert!(!p.signal.on_retrace(frame));
    p.pump();

    assert_eq!(p.stats().displayed, 1);
    let chain = p.modes.chain().unwrap();
    chain.check_invariants().unwrap();
    assert_eq!(chain.visible(), slot);
}

/// Slot handles the chain considers free must not be on screen
fn assert_scanout_not_free(p: &FramePresenter, hardware: &MockHardware) {
    let scanout = hardware.state().scanout;
    let chain = p.modes.chain().unwrap();
    for slot in chain.slots() {
        if slot.state() == SlotState::Free {
            assert_ne!(Some(slot.handle()), scanout, "free slot is being scanned out");
        }
    }
}

#[test]
fn test_late_completion_behind_event_backlog_is_not_forced() {
    let (mut p, hardware) = manual_polled_presenter(non_blocking_config());

    let first = render(&mut p);
    p.submit_frame(first).unwrap();
    let second = render(&mut p);

    // Driver stalls for more retraces than one pump drains, then latches
    hardware.set_hold_flips(true);
    hardware.fire_retraces(MAX_POLLED_EVENTS as u32 + 2);
    hardware.set_hold_flips(false);
    hardware.fire_retrace();

    // The completion is still queued when this pump stops
    p.submit_frame(second).unwrap();
    p.pump();

    let stats = p.stats();
    assert_eq!(stats.forced_flips, 0);
    assert_eq!(stats.displayed, 1);
    assert_eq!(stats.dropped, 1);
    assert_eq!(hardware.displayed().len(), 1);

    let chain = p.modes.chain().unwrap();
    chain.check_invariants().unwrap();
    assert_eq!(chain.visible(), first);
    assert_scanout_not_free(&p, &hardware);
}

#[test]
fn test_completion_of_forced_flip_does_not_confirm_successor() {
    let (mut p, hardware) = manual_polled_presenter(non_blocking_config());

    let first = render(&mut p);
    p.submit_frame(first).unwrap();
    let first_handle = p.modes.chain().unwrap().handle(first).unwrap();

    hardware.set_hold_flips(true);
    hardware.fire_retraces(31);
    p.pump();
    assert_eq!(p.stats().forced_flips, 1);
    let second = render(&mut p);

    // The forced flip latches late, behind a backlog longer than one pump
    hardware.fire_retraces(MAX_POLLED_EVENTS as u32 + 6);
    hardware.set_hold_flips(false);
    hardware.fire_retrace();
    p.submit_frame(second).unwrap();
    let request = p.in_flight().unwrap();
    assert_eq!(request.slot, second);

    p.pump();
    assert_eq!(p.signal.stray_flips(), 1);
    assert_eq!(p.signal.last_stray(), Some(first_handle));
    assert_eq!(p.in_flight().map(|r| r.sequence), Some(request.sequence));
    assert_eq!(p.stats().displayed, 1);
    assert_eq!(hardware.state().scanout, Some(first_handle));

    hardware.fire_retrace();
    p.pump();
    assert!(p.in_flight().is_none());
    assert_eq!(p.stats().displayed, 2);
    assert_eq!(hardware.displayed().len(), 2);
    let chain = p.modes.chain().unwrap();
    chain.check_invariants().unwrap();
    assert_eq!(chain.visible(), second);
    assert_scanout_not_free(&p, &hardware);
}

#[test]
fn test_watchdog_forces_lost_confirmation_by_retrace_count() {
    let config = PresentConfig { watchdog_intervals: 3, ..non_blocking_config() };
    let (mut p, hardware) = presenter(config);
    hardware.set_drop_flip_events(true);

    let slot = render(&mut p);
    p.submit_frame(slot).unwrap();
    hardware.fire_retraces(3);
    p.pump();
    assert!(p.in_flight().is_some());

    hardware.fire_retrace();
    p.pump();
    assert!(p.in_flight().is_none());
    assert_eq!(p.stats().forced_flips, 1);
    assert_eq!(p.stats().displayed, 1);
}

#[test]
fn test_watchdog_bounds_blocking_wait() {
    let config = PresentConfig { watchdog_intervals: 2, ..quiet_config() };
    let (mut p, _hardware) = presenter(config);

    let slot = render(&mut p);
    p.submit_frame(slot).unwrap();
    let start = Instant::now();
    // No retrace ever arrives
    assert!(p.wait_for_flip(true));
    assert!(start.elapsed() >= p.frame_period());
    assert_eq!(p.stats().forced_flips, 1);
    assert!(p.in_flight().is_none());
}

#[test]
fn test_late_confirmation_after_force_is_ignored() {
    let config = PresentConfig { watchdog_intervals: 1, ..quiet_config() };
    let (mut p, hardware) = presenter(config);
    hardware.set_hold_flips(true);

    let slot = render(&mut p);
    p.submit_frame(slot).unwrap();
    p.wait_for_flip(true);
    assert_eq!(p.stats().forced_flips, 1);

    // Hardware finally latches the flip
    hardware.set_hold_flips(false);
    hardware.fire_retrace();
    p.pump();
    assert_eq!(p.stats().displayed, 1);
    p.modes.chain().unwrap().check_invariants().unwrap();
}

#[test]
fn test_missed_vblanks_counted() {
    let (mut p, hardware) = presenter(quiet_config());
    let slot = render(&mut p);
    p.submit_frame(slot).unwrap();

    hardware.set_hold_flips(true);
    hardware.fire_retraces(2);
    hardware.set_hold_flips(false);
    hardware.fire_retrace();
    p.pump();

    assert_eq!(p.stats().displayed, 1);
    assert_eq!(p.stats().missed_vblanks, 2);
}

#[test]
fn test_device_busy_drops_frame() {
    let (mut p, hardware) = presenter(quiet_config());
    hardware.set_reject_flips(Some(Error::FlipQueueFull));

    let slot = render(&mut p);
    p.submit_frame(slot).unwrap();
    assert_eq!(p.stats().device_busy, 1);
    assert!(p.in_flight().is_none());
    assert_eq!(p.modes.chain().unwrap().state(slot).unwrap(), SlotState::Free);

    hardware.set_reject_flips(Some(Error::DeviceBusy));
    let slot = render(&mut p);
    p.submit_frame(slot).unwrap();
    assert_eq!(p.stats().device_busy, 2);

    hardware.set_reject_flips(None);
    let slot = render(&mut p);
    p.submit_frame(slot).unwrap();
    assert!(p.in_flight().is_some());
}

#[test]
fn test_backend_flip_error_propagates() {
    let (mut p, hardware) = presenter(quiet_config());
    hardware.set_reject_flips(Some(Error::BackendError("bus fault".to_string())));
    let slot = render(&mut p);
    assert!(matches!(p.submit_frame(slot), Err(Error::BackendError(_))));
    p.modes.chain().unwrap().check_invariants().unwrap();
}

#[test]
fn test_submit_visible_slot_rejected() {
    let (mut p, _hardware) = presenter(quiet_config());
    let visible = p.modes.chain().unwrap().visible();
    assert!(matches!(p.submit_frame(visible), Err(Error::InvalidSlot(_))));
}

// ============================================================================
// Sync policy and pacing
// ============================================================================

#[test]
fn test_sync_precedence() {
    let (mut p, _hardware) = presenter(non_blocking_config());
    assert_eq!(p.sync_policy(), SyncPolicy::NonBlocking);
    p.set_ui_active(true);
    assert_eq!(p.sync_policy(), SyncPolicy::Blocking);
    p.set_ui_active(false);

    let config = PresentConfig { hard_sync: true, ..non_blocking_config() };
    let (p, _hardware) = presenter(config);
    assert_eq!(p.sync_policy(), SyncPolicy::Blocking);
}

#[test]
fn test_pace_skips_wait_after_pre_retrace() {
    let (mut p, hardware) = presenter(quiet_config());
    hardware.fire_retrace();

    let start = Instant::now();
    p.pace();
    assert!(start.elapsed() < p.frame_period() * 2);
    assert_eq!(p.paced_pre_frame, 1);
}

#[test]
fn test_pace_waits_for_next_pre_retrace() {
    let (mut p, hardware) = presenter(quiet_config());
    let isr = hardware.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(5));
        isr.fire_retrace();
    });

    p.pace();
    handle.join().unwrap();
    p.pump();
    assert_eq!(p.frame_counter(), 1);
}

// ============================================================================
// Shutdown
// ============================================================================

#[test]
fn test_shutdown_releases_everything() {
    let (mut p, hardware) = polled_presenter(quiet_config());
    let slot = render(&mut p);
    p.submit_frame(slot).unwrap();

    p.shutdown();
    assert_eq!(p.mode_state(), ModeState::Stopped);
    assert_eq!(hardware.registered_count(), 0);
    assert_eq!(hardware.state().freed_while_scanned, 0);
    assert_eq!(p.stats().displayed, 1);
    assert!(matches!(p.acquire(), Err(Error::InvalidState(_))));

    // Idempotent
    p.shutdown();
    assert!(matches!(p.request_mode(320, 240), Err(Error::InvalidState(_))));
}

#[test]
fn test_drop_detaches_signal() {
    let (p, hardware) = presenter(quiet_config());
    drop(p);
    assert!(hardware.state().signal.is_none());
    assert_eq!(hardware.registered_count(), 0);
}

// ============================================================================
// Randomised invariants
// ============================================================================

#[test]
fn test_random_schedule_keeps_ownership_invariants() {
    let (mut p, hardware) = presenter(non_blocking_config());
    let mut rng = Pcg32::seed_from_u64(0xf11b);
    let mut rendering: Vec<SlotId> = Vec::new();

    for _ in 0..1_500 {
        match rng.random_range(0..5) {
            0 | 1 => match p.acquire() {
                Ok(slot) => rendering.push(slot),
                Err(e) => assert!(matches!(e, Error::DeviceBusy | Error::ChainExhausted)),
            },
            2 => {
                if let Some(slot) = rendering.pop() {
                    p.submit_frame(slot).unwrap();
                }
            }
            3 => {
                hardware.fire_retrace();
            }
            _ => p.pump(),
        }

        let chain = p.modes.chain().unwrap();
        chain.check_invariants().unwrap();
        for slot in &rendering {
            assert_eq!(chain.state(*slot).unwrap(), SlotState::Rendering);
        }
        if p.in_flight().is_none() && hardware.pending_flip().is_none() {
            let visible = chain.handle(chain.visible()).unwrap();
            assert_eq!(hardware.state().scanout, Some(visible));
        }
    }

    let stats = p.stats();
    assert_eq!(stats.forced_flips, 0);
    assert_eq!(hardware.state().freed_while_scanned, 0);
    let in_flight = p.in_flight().map_or(0, |_| 1);
    assert_eq!(stats.submitted, stats.displayed + stats.dropped + in_flight);
}
