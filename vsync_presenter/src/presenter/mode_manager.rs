/// DisplayModeManager - mode negotiation and safe swap chain reallocation
///
/// State machine: `Stopped -> Configuring -> Stable`, re-entering
/// `Configuring` from `Stable` on every effective mode change. The manager
/// owns the swap chain and the display filter. Callers must have drained
/// every outstanding flip before `configure`, because it frees the buffers
/// the hardware was reading.

use crate::config::PresentConfig;
use crate::display_device::{
    DisplayCapabilities, DisplayDevice, DisplayFeatures, DisplayFilter, DisplayMode,
    FadeLevel, ModeSetOutcome,
};
use crate::error::{Error, Result};
use crate::presenter::{RetraceSignal, SwapChain};

/// Mode negotiation state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeState {
    /// No mode programmed, no buffers
    Stopped,
    /// Mode set issued, waiting for the output to settle
    Configuring,
    /// Output stable, flips allowed
    Stable,
}

/// Collaborator notified when a new geometry becomes stable
pub trait ModeListener: Send {
    fn mode_changed(&mut self, mode: &DisplayMode);
}

/// Display mode manager
pub struct DisplayModeManager {
    state: ModeState,
    capabilities: DisplayCapabilities,
    current: Option<DisplayMode>,
    chain: Option<SwapChain>,
    chain_depth: usize,
    generation: u32,
    settle_remaining: u32,
    preferred_refresh: Option<f32>,
    deflicker_strength: u8,
    brightness: i8,
    fade: Option<FadeLevel>,
    full_strength: bool,
    exit_blanked: bool,
    listeners: Vec<Box<dyn ModeListener>>,
}

impl DisplayModeManager {
    pub fn new(capabilities: DisplayCapabilities, config: &PresentConfig) -> Self {
        let chain_depth = config.chain_depth().min(capabilities.max_chain_depth);
        Self {
            state: ModeState::Stopped,
            capabilities,
            current: None,
            chain: None,
            chain_depth,
            generation: 0,
            settle_remaining: 0,
            preferred_refresh: config.refresh_rate,
            deflicker_strength: config.deflicker_strength,
            brightness: config.brightness,
            fade: None,
            full_strength: false,
            exit_blanked: false,
            listeners: Vec::new(),
        }
    }

    // ===== RESOLUTION =====

    /// Map a requested geometry onto a mode the device can scan out
    ///
    /// A zero dimension selects the preferred mode. Anything else is clamped
    /// to the hardware maxima and rounded down to the alignment. Devices
    /// restricted to enumerated modes get the nearest one. Never fails;
    /// `configure` logs the substitution.
    pub fn resolve(&self, device: &dyn DisplayDevice, width: u32, height: u32) -> DisplayMode {
        let caps = &self.capabilities;
        if width == 0 || height == 0 {
            return caps.preferred;
        }

        let size = caps.limits.clamp_and_align(width, height);
        let geometry = if caps.has(DisplayFeatures::ARBITRARY_GEOMETRY) {
            DisplayMode::new(size.x, size.y, device.refresh_for(size.x, size.y), caps.preferred.format)
        } else {
            caps.modes.iter()
                .min_by_key(|m| m.width.abs_diff(size.x) + m.height.abs_diff(size.y))
                .copied()
                .unwrap_or(caps.preferred)
        };
        self.best_refresh(&geometry).unwrap_or(geometry)
    }

    /// Enumerated mode with this geometry whose refresh is closest to the
    /// configured rate (first listed when no rate is configured)
    fn best_refresh(&self, geometry: &DisplayMode) -> Option<DisplayMode> {
        let mut candidates = self.capabilities.modes.iter()
            .filter(|m| m.same_geometry(geometry));

        match self.preferred_refresh {
            Some(rate) => candidates
                .min_by(|a, b| (a.refresh.hz() - rate).abs().total_cmp(&(b.refresh.hz() - rate).abs()))
                .copied(),
            None => candidates.next().copied(),
        }
    }

    // ===== TRANSITIONS =====

    /// Program the mode for `(width, height)` and rebuild the swap chain
    ///
    /// Returns `Ok(false)` when the resolved mode is already current. The
    /// output is blanked for the switch and stays `Configuring` for the
    /// device's settle period; `on_retrace` completes it.
    ///
    /// # Errors
    ///
    /// `ModeNotSupported` if even the preferred mode is refused,
    /// `BufferAllocationFailed` if the new chain cannot be built.
    pub fn configure(
        &mut self,
        device: &mut dyn DisplayDevice,
        signal: &RetraceSignal,
        width: u32,
        height: u32,
    ) -> Result<bool> {
        let target = self.resolve(device, width, height);
        if self.state != ModeState::Stopped && self.current == Some(target) {
            crate::present_debug!("vsync::DisplayModeManager", "Mode {} already current", target);
            return Ok(false);
        }
        if width != 0 && height != 0 && (target.width != width || target.height != height) {
            crate::present_warn!("vsync::DisplayModeManager", "{}, using {}",
                Error::ModeNotSupported { width, height }, target);
        }

        self.state = ModeState::Configuring;
        self.set_blank(device, true);

        // The old chain is gone from here on: a failure leaves nothing to
        // present from
        let target = match self.rebuild(device, signal, target) {
            Ok(target) => target,
            Err(e) => {
                self.state = ModeState::Stopped;
                self.current = None;
                self.settle_remaining = 0;
                crate::present_error!("vsync::DisplayModeManager", "Mode set failed, output stopped: {}", e);
                return Err(e);
            }
        };

        crate::present_info!("vsync::DisplayModeManager", "Display mode set to {} ({} buffers)",
            target, self.chain_depth);

        self.settle_remaining = self.capabilities.settle_retraces;
        if self.settle_remaining == 0 {
            self.finish(device);
        }
        Ok(true)
    }

    /// Replace the chain with one for `target`, falling back to the
    /// preferred mode if the device refuses it
    fn rebuild(
        &mut self,
        device: &mut dyn DisplayDevice,
        signal: &RetraceSignal,
        mut target: DisplayMode,
    ) -> Result<DisplayMode> {
        if let Some(chain) = self.chain.take() {
            chain.teardown(device);
        }

        if device.mode_set(&target)? == ModeSetOutcome::Unsupported {
            let preferred = self.capabilities.preferred;
            crate::present_warn!("vsync::DisplayModeManager", "{} refused by {}, falling back to {}",
                target, device.name(), preferred);
            if device.mode_set(&preferred)? == ModeSetOutcome::Unsupported {
                return Err(Error::ModeNotSupported { width: preferred.width, height: preferred.height });
            }
            target = preferred;
        }

        self.generation = self.generation.wrapping_add(1);
        let chain = SwapChain::build(device, &target, &self.capabilities.limits, self.chain_depth, self.generation)?;
        if let Err(e) = chain.handle(chain.visible()).and_then(|handle| device.set_scanout(handle)) {
            chain.teardown(device);
            return Err(e);
        }
        self.chain = Some(chain);

        signal.set_refresh(target.refresh);
        self.current = Some(target);
        self.push_filter(device);
        Ok(target)
    }

    /// Count retraces toward the settle period
    ///
    /// Returns `true` when this call made the mode stable.
    pub fn on_retrace(&mut self, device: &mut dyn DisplayDevice, retraces: u64) -> bool {
        if self.state != ModeState::Configuring || self.chain.is_none() || retraces == 0 {
            return false;
        }
        let elapsed = retraces.min(u32::MAX as u64) as u32;
        self.settle_remaining = self.settle_remaining.saturating_sub(elapsed);
        if self.settle_remaining == 0 {
            self.finish(device);
            return true;
        }
        false
    }

    fn finish(&mut self, device: &mut dyn DisplayDevice) {
        self.state = ModeState::Stable;
        if !self.exit_blanked {
            self.set_blank(device, false);
        }
        if let Some(mode) = self.current {
            crate::present_debug!("vsync::DisplayModeManager", "Mode {} stable", mode);
            for listener in &mut self.listeners {
                listener.mode_changed(&mode);
            }
        }
    }

    /// Free the chain and return to `Stopped`
    pub fn shutdown(&mut self, device: &mut dyn DisplayDevice) {
        if let Some(chain) = self.chain.take() {
            self.set_blank(device, true);
            chain.teardown(device);
        }
        self.state = ModeState::Stopped;
        self.current = None;
        self.settle_remaining = 0;
    }

    fn set_blank(&self, device: &mut dyn DisplayDevice, blank: bool) {
        if self.capabilities.has(DisplayFeatures::BLANKING) {
            device.set_blank(blank);
        }
    }

    // ===== DISPLAY FILTER =====

    /// Filter as currently pushed to the device
    pub fn filter(&self) -> DisplayFilter {
        DisplayFilter {
            deflicker_strength: if self.full_strength { self.deflicker_strength } else { 0 },
            brightness: self.brightness,
            fade: self.fade,
        }
    }

    fn push_filter(&self, device: &mut dyn DisplayDevice) {
        if let Err(e) = device.set_display_filter(&self.filter()) {
            crate::present_warn!("vsync::DisplayModeManager", "Display filter not applied: {}", e);
        }
    }

    /// Track the fade ramp
    pub fn set_fade(&mut self, device: &mut dyn DisplayDevice, fade: Option<FadeLevel>) {
        if self.fade != fade {
            self.fade = fade;
            self.push_filter(device);
        }
    }

    /// Apply deflicker at full strength (fade-in finished)
    pub fn apply_full_strength(&mut self, device: &mut dyn DisplayDevice) {
        if !self.full_strength {
            self.full_strength = true;
            self.push_filter(device);
        }
    }

    pub fn set_deflicker_strength(&mut self, device: &mut dyn DisplayDevice, strength: u8) {
        self.deflicker_strength = strength.min(100);
        self.push_filter(device);
    }

    pub fn set_brightness(&mut self, device: &mut dyn DisplayDevice, brightness: i8) {
        self.brightness = brightness.clamp(-22, 22);
        self.push_filter(device);
    }

    /// Blank for good after the exit fade
    pub fn blank_for_exit(&mut self, device: &mut dyn DisplayDevice) {
        self.exit_blanked = true;
        self.set_blank(device, true);
    }

    // ===== ACCESSORS =====

    pub fn add_listener(&mut self, listener: Box<dyn ModeListener>) {
        self.listeners.push(listener);
    }

    pub fn state(&self) -> ModeState {
        self.state
    }

    pub fn current_mode(&self) -> Option<DisplayMode> {
        self.current
    }

    pub fn supported_modes(&self) -> &[DisplayMode] {
        &self.capabilities.modes
    }

    pub fn capabilities(&self) -> &DisplayCapabilities {
        &self.capabilities
    }

    pub fn chain(&self) -> Option<&SwapChain> {
        self.chain.as_ref()
    }

    pub fn chain_mut(&mut self) -> Option<&mut SwapChain> {
        self.chain.as_mut()
    }

    pub fn chain_depth(&self) -> usize {
        self.chain_depth
    }

    /// Retraces left before the current mode is stable
    pub fn settle_remaining(&self) -> u32 {
        self.settle_remaining
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "mode_manager_tests.rs"]
mod tests;
