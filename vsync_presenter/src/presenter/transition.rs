/// TransitionController - fade-in / fade-out ramp driven by retraces
///
/// The ramp advances one step per retrace, never per rendered frame or per
/// unit of wall-clock time, so a ramp of N steps always lasts N refresh
/// intervals. Only one ramp runs at a time.

use crate::config::{PresentConfig, ResetFade};
use crate::display_device::FadeLevel;

/// Ramp state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionState {
    Idle,
    FadingIn,
    FadingOut,
}

/// What a fade-out is clearing the screen for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalAction {
    /// Application exit; the display stays black afterwards
    Exit,
    /// Content reset
    Reset,
}

/// Completion notices produced by the ramp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionSignal {
    /// Fade-in reached the stable level; full-strength filtering may resume
    FadeInComplete,
    /// Fade-out reached zero; the terminal action may proceed
    FadeOutComplete(TerminalAction),
}

/// Fade state machine
#[derive(Debug, Clone)]
pub struct TransitionController {
    state: TransitionState,
    level: u32,
    target: u32,
    start_level: u32,
    step: u32,
    steps_total: u32,
    action: Option<TerminalAction>,
    fade_in_enabled: bool,
    fade_in_steps: u32,
    fade_out_steps: u32,
    exit_fade: bool,
    reset_fade: ResetFade,
}

impl TransitionController {
    /// Idle at the stable level
    pub fn new(config: &PresentConfig) -> Self {
        let target = config.fade_target.max(1);
        Self {
            state: TransitionState::Idle,
            level: target,
            target,
            start_level: target,
            step: 0,
            steps_total: 0,
            action: None,
            fade_in_enabled: config.fade_in,
            fade_in_steps: config.fade_in_steps.max(1),
            fade_out_steps: config.fade_out_steps.max(1),
            exit_fade: config.exit_fade,
            reset_fade: config.reset_fade,
        }
    }

    /// Start a fade-in from black
    ///
    /// Completes at once when fade-in is disabled. Ignored while a fade-out
    /// is running, since that ramp ends in a terminal action.
    pub fn begin_fade_in(&mut self) -> Option<TransitionSignal> {
        match self.state {
            TransitionState::FadingOut => {
                crate::present_debug!("vsync::TransitionController",
                    "Fade-in ignored, fade-out to {:?} in progress", self.action);
                None
            }
            TransitionState::FadingIn => None,
            TransitionState::Idle if !self.fade_in_enabled => {
                self.level = self.target;
                Some(TransitionSignal::FadeInComplete)
            }
            TransitionState::Idle => {
                self.start_ramp(TransitionState::FadingIn, 0, self.fade_in_steps);
                None
            }
        }
    }

    /// Start a fade-out ahead of `action`
    ///
    /// An active fade-in is abandoned and the fade-out starts from the
    /// current ramp value, taking proportionally fewer steps. Completes at
    /// once when the fade for `action` is disabled.
    pub fn begin_fade_out(&mut self, action: TerminalAction) -> Option<TransitionSignal> {
        if self.state == TransitionState::FadingOut {
            return None;
        }

        let enabled = match action {
            TerminalAction::Exit => self.exit_fade,
            TerminalAction::Reset => self.reset_fade != ResetFade::Off,
        };
        if !enabled || self.level == 0 {
            self.action = Some(action);
            return Some(self.finish_fade_out());
        }

        if self.state == TransitionState::FadingIn {
            crate::present_debug!("vsync::TransitionController",
                "Fade-in aborted at level {}/{}", self.level, self.target);
        }

        let steps = (self.fade_out_steps as u64 * self.level as u64).div_ceil(self.target as u64);
        self.action = Some(action);
        self.start_ramp(TransitionState::FadingOut, self.level, steps.max(1) as u32);
        None
    }

    fn start_ramp(&mut self, state: TransitionState, from: u32, steps: u32) {
        self.state = state;
        self.start_level = from;
        self.level = from;
        self.step = 0;
        self.steps_total = steps;
    }

    /// Advance one retrace
    pub fn step(&mut self) -> Option<TransitionSignal> {
        match self.state {
            TransitionState::Idle => None,
            TransitionState::FadingIn => {
                self.step += 1;
                let span = (self.target - self.start_level) as u64;
                self.level = self.start_level + (span * self.step as u64 / self.steps_total as u64) as u32;
                if self.step >= self.steps_total {
                    self.level = self.target;
                    self.state = TransitionState::Idle;
                    return Some(TransitionSignal::FadeInComplete);
                }
                None
            }
            TransitionState::FadingOut => {
                self.step += 1;
                let span = self.start_level as u64;
                self.level = self.start_level - (span * self.step as u64 / self.steps_total as u64) as u32;
                if self.step >= self.steps_total {
                    return Some(self.finish_fade_out());
                }
                None
            }
        }
    }

    fn finish_fade_out(&mut self) -> TransitionSignal {
        let action = self.action.take().unwrap_or(TerminalAction::Exit);
        self.state = TransitionState::Idle;
        self.level = 0;

        if action == TerminalAction::Reset {
            match self.reset_fade {
                ResetFade::FadeOutIn => self.start_ramp(TransitionState::FadingIn, 0, self.fade_in_steps),
                ResetFade::FadeOut | ResetFade::Off => self.level = self.target,
            }
        }
        TransitionSignal::FadeOutComplete(action)
    }

    pub fn state(&self) -> TransitionState {
        self.state
    }

    /// Current ramp value, 0 (black) to `target`
    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn target(&self) -> u32 {
        self.target
    }

    pub fn is_active(&self) -> bool {
        self.state != TransitionState::Idle
    }

    /// Terminal action of the running fade-out
    pub fn pending_action(&self) -> Option<TerminalAction> {
        self.action
    }

    /// Fade component of the display filter, `None` at the stable level
    pub fn fade_level(&self) -> Option<FadeLevel> {
        if self.state == TransitionState::Idle && self.level >= self.target {
            None
        } else {
            Some(FadeLevel { level: self.level, target: self.target })
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "transition_tests.rs"]
mod tests;
