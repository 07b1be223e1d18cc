/// Presenter configuration
///
/// Read-only to the presentation core. Parsing it from a file is the
/// frontend's business; the core only validates ranges.

use crate::presenter::SyncPolicy;

/// Behaviour around a content reset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResetFade {
    /// Cut straight to the reset
    #[default]
    Off,
    /// Fade out before the reset, come back without a ramp
    FadeOut,
    /// Fade out before the reset, fade back in afterwards
    FadeOutIn,
}

/// Presenter configuration
#[derive(Debug, Clone)]
pub struct PresentConfig {
    /// Wait for retrace confirmation before accepting the next frame
    pub vsync: bool,
    /// Always block for hardware confirmation, ignoring the non-blocking path
    pub hard_sync: bool,
    /// Three-slot swap chain instead of two
    pub triple_buffering: bool,
    /// Initial width in pixels (0 = device preferred)
    pub requested_width: u32,
    /// Initial height in lines (0 = device preferred)
    pub requested_height: u32,
    /// Preferred refresh rate when several modes share a geometry
    pub refresh_rate: Option<f32>,
    /// Deflicker blend, 0 (sharp) to 100 (full)
    pub deflicker_strength: u8,
    /// Brightness offset applied to the centre filter tap (-22..=22)
    pub brightness: i8,
    /// Fade in at power-on
    pub fade_in: bool,
    /// Retraces for a full fade-in
    pub fade_in_steps: u32,
    /// Fade out before exit
    pub exit_fade: bool,
    /// Fade behaviour around a content reset
    pub reset_fade: ResetFade,
    /// Retraces for a full fade-out
    pub fade_out_steps: u32,
    /// Stable ramp level
    pub fade_target: u32,
    /// Refresh intervals without a flip confirmation before the watchdog forces it
    pub watchdog_intervals: u32,
}

impl Default for PresentConfig {
    fn default() -> Self {
        Self {
            vsync: true,
            hard_sync: false,
            triple_buffering: true,
            requested_width: 0,
            requested_height: 0,
            refresh_rate: None,
            deflicker_strength: 0,
            brightness: 0,
            fade_in: true,
            fade_in_steps: 22,
            exit_fade: true,
            reset_fade: ResetFade::Off,
            fade_out_steps: 22,
            fade_target: 22,
            watchdog_intervals: 3,
        }
    }
}

impl PresentConfig {
    /// Swap chain depth implied by `triple_buffering`
    pub fn chain_depth(&self) -> usize {
        if self.triple_buffering { 3 } else { 2 }
    }

    /// Resolve the blocking policy
    ///
    /// Precedence, highest first: hard sync, active UI overlay, vsync.
    /// Anything else is non-blocking.
    pub fn sync_policy(&self, ui_active: bool) -> SyncPolicy {
        if self.hard_sync || ui_active || self.vsync {
            SyncPolicy::Blocking
        } else {
            SyncPolicy::NonBlocking
        }
    }

    /// Clamp out-of-range values, logging each correction
    pub fn validate(mut self) -> Self {
        if self.deflicker_strength > 100 {
            crate::present_warn!("vsync::PresentConfig",
                "deflicker_strength {} clamped to 100", self.deflicker_strength);
            self.deflicker_strength = 100;
        }
        let brightness = self.brightness.clamp(-22, 22);
        if brightness != self.brightness {
            crate::present_warn!("vsync::PresentConfig",
                "brightness {} clamped to {}", self.brightness, brightness);
            self.brightness = brightness;
        }
        if self.fade_target == 0 {
            crate::present_warn!("vsync::PresentConfig", "fade_target 0 raised to 1");
            self.fade_target = 1;
        }
        if self.fade_in_steps == 0 {
            crate::present_warn!("vsync::PresentConfig", "fade_in_steps 0 raised to 1");
            self.fade_in_steps = 1;
        }
        if self.fade_out_steps == 0 {
            crate::present_warn!("vsync::PresentConfig", "fade_out_steps 0 raised to 1");
            self.fade_out_steps = 1;
        }
        if self.watchdog_intervals == 0 {
            crate::present_warn!("vsync::PresentConfig", "watchdog_intervals 0 raised to 1");
            self.watchdog_intervals = 1;
        }
        if let Some(rate) = self.refresh_rate {
            if !rate.is_finite() || rate <= 0.0 {
                crate::present_warn!("vsync::PresentConfig", "refresh_rate {} ignored", rate);
                self.refresh_rate = None;
            }
        }
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
