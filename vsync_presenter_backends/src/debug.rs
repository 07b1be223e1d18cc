/// Backend diagnostics - hardware-side counters with a coloured report
///
/// The presenter counts what it asked for (`PresentStats`); these counters
/// record what the simulated hardware actually did, so the two can be
/// compared after a run.

use colored::*;
use std::sync::atomic::{AtomicU64, Ordering};
use vsync_presenter::vsync::PresentStats;

/// Thread-safe hardware counters, shared with the vblank thread
#[derive(Debug, Default)]
pub struct HardwareCounters {
    retraces: AtomicU64,
    flips_latched: AtomicU64,
    flips_refused: AtomicU64,
    mode_sets: AtomicU64,
    events_dropped: AtomicU64,
}

/// Snapshot of `HardwareCounters`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HardwareStats {
    pub retraces: u64,
    pub flips_latched: u64,
    pub flips_refused: u64,
    pub mode_sets: u64,
    /// Vblank events discarded because nobody drained the event queue
    pub events_dropped: u64,
}

impl HardwareCounters {
    pub(crate) fn retrace(&self) {
        self.retraces.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn flip_latched(&self) {
        self.flips_latched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn flip_refused(&self) {
        self.flips_refused.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn mode_set(&self) {
        self.mode_sets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HardwareStats {
        HardwareStats {
            retraces: self.retraces.load(Ordering::Relaxed),
            flips_latched: self.flips_latched.load(Ordering::Relaxed),
            flips_refused: self.flips_refused.load(Ordering::Relaxed),
            mode_sets: self.mode_sets.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Print presenter and hardware statistics side by side
pub fn print_present_report(device: &str, present: &PresentStats, hardware: Option<&HardwareStats>) {
    println!("\n{}", format!("=== Presentation Report ({}) ===", device).bright_blue().bold());

    println!("  {} {}", "Submitted:".white().bold(), present.submitted);
    println!("  {} {}", "Displayed:".green().bold(), present.displayed);
    if present.dropped > 0 {
        println!("  {} {}", "Dropped:".yellow(), present.dropped);
    }
    if present.device_busy > 0 {
        println!("  {} {}", "Device busy:".yellow(), present.device_busy);
    }
    if present.missed_vblanks > 0 {
        println!("  {} {}", "Missed vblanks:".cyan(), present.missed_vblanks);
    }
    if present.stale_frames > 0 {
        println!("  {} {}", "Stale frames:".bright_black(), present.stale_frames);
    }
    if present.held_frames > 0 {
        println!("  {} {}", "Held frames:".bright_black(), present.held_frames);
    }
    if present.forced_flips > 0 {
        println!("  {} {}", "Forced flips:".red().bold(), present.forced_flips);
    }

    if let Some(hw) = hardware {
        println!("  {} {} retraces, {} flips latched, {} refused, {} mode sets",
            "Hardware:".white().bold(), hw.retraces, hw.flips_latched, hw.flips_refused, hw.mode_sets);
        if hw.events_dropped > 0 {
            println!("  {} {} vblank event(s) dropped", "ℹ".cyan(), hw.events_dropped);
        }
    }

    println!("{}\n", "====================================".bright_blue().bold());
}
