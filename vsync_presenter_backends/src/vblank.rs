/// Vblank clock - a thread standing in for the display timing generator
///
/// Both backends scan out through a simulated timing generator. The thread
/// ticks once per refresh interval, optionally announcing each retrace a
/// little ahead of time, and hands every tick to the backend callback. The
/// refresh period is re-read every tick so a mode set takes effect at the
/// next retrace, as it does on hardware.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use vsync_presenter::vsync::{Error, Result};
use vsync_presenter::vsync::render::RefreshDescriptor;

/// One tick of the timing generator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VblankPhase {
    /// Retrace `frame` is about to start
    PreRetrace(u64),
    /// Retrace `frame` started
    Retrace(u64),
}

/// Refresh interval shared between a backend and its clock thread
#[derive(Debug)]
pub(crate) struct VblankPeriod {
    nanos: AtomicU64,
}

impl VblankPeriod {
    pub(crate) fn new(refresh: RefreshDescriptor) -> Self {
        Self { nanos: AtomicU64::new(refresh.frame_period().as_nanos() as u64) }
    }

    pub(crate) fn set(&self, refresh: RefreshDescriptor) {
        self.nanos.store(refresh.frame_period().as_nanos() as u64, Ordering::Release);
    }

    pub(crate) fn get(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Acquire).max(1))
    }
}

/// Running clock thread; stopped and joined on drop
pub(crate) struct VblankClock {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl VblankClock {
    /// Start ticking
    ///
    /// `pre_lead` is how long before each retrace the `PreRetrace` tick
    /// fires; `None` disables it.
    pub(crate) fn spawn<F>(
        name: &str,
        period: Arc<VblankPeriod>,
        pre_lead: Option<Duration>,
        mut on_tick: F,
    ) -> Result<Self>
    where
        F: FnMut(VblankPhase) + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut frame = 0u64;
                let mut next_retrace = Instant::now() + period.get();
                while flag.load(Ordering::Acquire) {
                    let interval = period.get();
                    if let Some(lead) = pre_lead {
                        sleep_until(next_retrace - lead.min(interval / 2));
                        if !flag.load(Ordering::Acquire) {
                            break;
                        }
                        on_tick(VblankPhase::PreRetrace(frame + 1));
                    }

                    sleep_until(next_retrace);
                    if !flag.load(Ordering::Acquire) {
                        break;
                    }
                    frame += 1;
                    on_tick(VblankPhase::Retrace(frame));

                    next_retrace += interval;
                    // Scheduler stalls do not produce a burst of catch-up retraces
                    let now = Instant::now();
                    if next_retrace < now {
                        next_retrace = now + interval;
                    }
                }
            })
            .map_err(|e| {
                let error = Error::InitializationFailed(format!("vblank thread '{}': {}", name, e));
                vsync_presenter::present_error!("vsync::backends", "{}", error);
                error
            })?;

        Ok(Self { running, handle: Some(handle) })
    }

    pub(crate) fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for VblankClock {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn sleep_until(deadline: Instant) {
    let now = Instant::now();
    if deadline > now {
        thread::sleep(deadline - now);
    }
}
