/// RetraceSignal - the only state shared with the retrace interrupt
///
/// The handler side (`on_retrace`, `on_flip`, `on_pre_retrace`, `deliver`)
/// only stores into word-sized atomics and wakes waiters. It never blocks,
/// allocates, logs or calls back into application code. The main loop
/// reads the same fields as a single-slot mailbox and blocks on the condition
/// variable instead of spinning.
///
/// A flip completion names the buffer the hardware latched. It confirms the
/// armed flip only when that buffer is the armed one, so the late completion
/// of a flip the watchdog already forced cannot retire its successor.
///
/// Every field has exactly one writer: the frame/pre-frame counters and the
/// confirmation pair are written by the handler (or by the watchdog on the
/// main loop when the handler is known to be dead), the armed sequence and
/// refresh period by the main loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use crate::display_device::{BufferHandle, RefreshDescriptor};

/// Upper bound on one condition-variable wait; covers a wake-up the handler
/// could not deliver because the wait lock was contended
const WAIT_SLICE: Duration = Duration::from_millis(2);

/// One hardware retrace as seen by the main loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetraceEvent {
    /// Hardware frame counter, strictly increasing
    pub frame: u64,
    /// Buffer latched at this retrace, if a flip completed
    pub flipped: Option<BufferHandle>,
}

impl RetraceEvent {
    pub fn retrace(frame: u64) -> Self {
        Self { frame, flipped: None }
    }

    pub fn flip(frame: u64, handle: BufferHandle) -> Self {
        Self { frame, flipped: Some(handle) }
    }

    pub fn is_flip(&self) -> bool {
        self.flipped.is_some()
    }
}

struct RetraceShared {
    frame: AtomicU64,
    pre_frame: AtomicU64,
    armed: AtomicU64,
    armed_handle: AtomicU64,
    confirmed: AtomicU64,
    stray_flips: AtomicU64,
    stray_handle: AtomicU64,
    confirmed_frame: AtomicU64,
    period_nanos: AtomicU64,
    wait_lock: Mutex<()>,
    cond: Condvar,
}

/// Cloneable handle to the interrupt-visible retrace state
#[derive(Clone)]
pub struct RetraceSignal {
    shared: Arc<RetraceShared>,
}

impl RetraceSignal {
    pub fn new(refresh: RefreshDescriptor) -> Self {
        Self {
            shared: Arc::new(RetraceShared {
                frame: AtomicU64::new(0),
                pre_frame: AtomicU64::new(0),
                armed: AtomicU64::new(0),
                armed_handle: AtomicU64::new(0),
                confirmed: AtomicU64::new(0),
                stray_flips: AtomicU64::new(0),
                stray_handle: AtomicU64::new(0),
                confirmed_frame: AtomicU64::new(0),
                period_nanos: AtomicU64::new(refresh.frame_period().as_nanos() as u64),
                wait_lock: Mutex::new(()),
                cond: Condvar::new(),
            }),
        }
    }

    // ===== HANDLER SIDE (interrupt context) =====

    /// Vertical retrace `frame_no` happened
    ///
    /// Returns `false` for a repeated or out-of-order frame number, which is
    /// ignored.
    pub fn on_retrace(&self, frame_no: u64) -> bool {
        let fresh = self.shared.frame.fetch_max(frame_no, Ordering::AcqRel) < frame_no;
        if fresh {
            self.wake();
        }
        fresh
    }

    /// `handle` became visible at retrace `frame_no`
    ///
    /// Confirms the armed flip if `handle` is its buffer. Returns `false`
    /// when nothing was armed, the armed flip was already confirmed (a
    /// repeated completion cannot release twice) or another buffer latched.
    /// The last case is counted in `stray_flips`.
    pub fn on_flip(&self, frame_no: u64, handle: BufferHandle) -> bool {
        self.shared.frame.fetch_max(frame_no, Ordering::AcqRel);

        let armed = self.shared.armed.load(Ordering::Acquire);
        let confirmed = self.shared.confirmed.load(Ordering::Acquire);
        let ours = self.shared.armed_handle.load(Ordering::Acquire) == handle.0;
        let fresh = ours && armed != 0 && armed > confirmed;
        if fresh {
            self.shared.confirmed_frame.store(frame_no, Ordering::Release);
            self.shared.confirmed.store(armed, Ordering::Release);
        } else if !ours {
            self.shared.stray_handle.store(handle.0, Ordering::Release);
            self.shared.stray_flips.fetch_add(1, Ordering::AcqRel);
        }
        self.wake();
        fresh
    }

    /// Pre-retrace notification for the upcoming retrace `frame_no`
    pub fn on_pre_retrace(&self, frame_no: u64) {
        if self.shared.pre_frame.fetch_max(frame_no, Ordering::AcqRel) < frame_no {
            self.wake();
        }
    }

    /// Dispatch a polled hardware event
    pub fn deliver(&self, event: RetraceEvent) -> bool {
        match event.flipped {
            Some(handle) => self.on_flip(event.frame, handle),
            None => self.on_retrace(event.frame),
        }
    }

    fn wake(&self) {
        // try_lock keeps the handler wait-free; a lost wake is bounded by WAIT_SLICE
        drop(self.shared.wait_lock.try_lock());
        self.shared.cond.notify_all();
    }

    // ===== MAIN LOOP SIDE =====

    /// Last retrace frame number seen
    pub fn frame(&self) -> u64 {
        self.shared.frame.load(Ordering::Acquire)
    }

    /// Last pre-retrace frame number seen
    pub fn pre_frame(&self) -> u64 {
        self.shared.pre_frame.load(Ordering::Acquire)
    }

    /// Arm flip `sequence` of `handle` before it is handed to the hardware
    pub fn arm(&self, sequence: u64, handle: BufferHandle) {
        debug_assert!(sequence > self.shared.confirmed.load(Ordering::Acquire));
        // Handle first: the handler reads the sequence, then the handle
        self.shared.armed_handle.store(handle.0, Ordering::Release);
        self.shared.armed.store(sequence, Ordering::Release);
    }

    /// Withdraw an armed flip the hardware refused
    pub fn disarm(&self) {
        let confirmed = self.shared.confirmed.load(Ordering::Acquire);
        self.shared.armed.store(confirmed, Ordering::Release);
    }

    /// Sequence number of the armed flip (0 = none yet)
    pub fn armed(&self) -> u64 {
        self.shared.armed.load(Ordering::Acquire)
    }

    /// Whether flip `sequence` has been confirmed
    pub fn is_confirmed(&self, sequence: u64) -> bool {
        self.shared.confirmed.load(Ordering::Acquire) >= sequence
    }

    /// Completions of buffers other than the armed one (late completions of
    /// forced flips)
    pub fn stray_flips(&self) -> u64 {
        self.shared.stray_flips.load(Ordering::Acquire)
    }

    /// Buffer named by the most recent stray completion
    pub fn last_stray(&self) -> Option<BufferHandle> {
        if self.stray_flips() == 0 {
            return None;
        }
        Some(BufferHandle(self.shared.stray_handle.load(Ordering::Acquire)))
    }

    /// Retrace frame at which the last confirmation latched
    pub fn confirmed_frame(&self) -> u64 {
        self.shared.confirmed_frame.load(Ordering::Acquire)
    }

    /// Synthesize the confirmation of `sequence` (watchdog only)
    pub fn force_confirm(&self, sequence: u64) {
        self.shared.confirmed_frame.store(self.frame(), Ordering::Release);
        self.shared.confirmed.fetch_max(sequence, Ordering::AcqRel);
        self.wake();
    }

    /// Update the refresh cadence after a mode switch
    pub fn set_refresh(&self, refresh: RefreshDescriptor) {
        self.shared.period_nanos.store(refresh.frame_period().as_nanos() as u64, Ordering::Release);
    }

    /// Current refresh interval
    pub fn frame_period(&self) -> Duration {
        Duration::from_nanos(self.shared.period_nanos.load(Ordering::Acquire))
    }

    /// Block until flip `sequence` is confirmed or `deadline` passes
    pub fn wait_confirmed(&self, sequence: u64, deadline: Instant) -> bool {
        self.wait_until(deadline, || self.is_confirmed(sequence))
    }

    /// Block until a retrace newer than `after` is seen or `deadline` passes
    pub fn wait_retrace(&self, after: u64, deadline: Instant) -> bool {
        self.wait_until(deadline, || self.frame() > after)
    }

    /// Block until a pre-retrace newer than `after` is seen or `deadline` passes
    pub fn wait_pre_retrace(&self, after: u64, deadline: Instant) -> bool {
        self.wait_until(deadline, || self.pre_frame() > after)
    }

    fn wait_until(&self, deadline: Instant, done: impl Fn() -> bool) -> bool {
        let mut guard = self.shared.wait_lock.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if done() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let slice = (deadline - now).min(WAIT_SLICE);
            guard = match self.shared.cond.wait_timeout(guard, slice) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "retrace_signal_tests.rs"]
mod tests;
