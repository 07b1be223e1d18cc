/// Display filter - deflicker, brightness and fade ramp state pushed to the device
///
/// Console hardware applies it as a 7-tap vertical copy filter whose taps sum
/// to 64. Devices without a copy filter apply it as a gain.

/// Sharp (no deflicker) taps, centre tap carries brightness
const SHARP_TAPS: [i32; 7] = [0, 0, 21, 22, 21, 0, 0];

/// Full-strength deflicker taps, centre tap carries brightness
const DEFLICKER_TAPS: [i32; 7] = [8, 8, 10, 12, 10, 8, 8];

/// Fade taps saturate at the sharp values
const FADE_SCALE: u32 = 22;

/// Fade ramp position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FadeLevel {
    pub level: u32,
    pub target: u32,
}

/// Filter state for the display output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayFilter {
    /// 0 (sharp) to 100 (full deflicker), interlaced modes only
    pub deflicker_strength: u8,
    /// Added to the centre tap
    pub brightness: i8,
    /// Active fade ramp, `None` when idle
    pub fade: Option<FadeLevel>,
}

impl Default for DisplayFilter {
    fn default() -> Self {
        Self { deflicker_strength: 0, brightness: 0, fade: None }
    }
}

impl DisplayFilter {
    /// Copy filter taps for the console video interface
    pub fn copy_filter_taps(&self, interlaced: bool) -> [u8; 7] {
        if let Some(fade) = self.fade {
            let f = (fade.level * FADE_SCALE / fade.target.max(1)) as i32;
            let mut taps = [0u8; 7];
            for (tap, sharp) in taps.iter_mut().zip(SHARP_TAPS) {
                *tap = f.min(sharp) as u8;
            }
            return taps;
        }

        let strength = if interlaced { self.deflicker_strength.min(100) as i32 } else { 0 };
        let mut taps = [0u8; 7];
        for (i, tap) in taps.iter_mut().enumerate() {
            let blended = SHARP_TAPS[i] + (DEFLICKER_TAPS[i] - SHARP_TAPS[i]) * strength / 100;
            let value = if i == 3 { blended + self.brightness as i32 } else { blended };
            *tap = value.clamp(0, 63) as u8;
        }
        taps
    }

    /// Linear output gain for devices without a copy filter
    pub fn gain(&self) -> f32 {
        let fade = match self.fade {
            Some(fade) => fade.level.min(fade.target) as f32 / fade.target.max(1) as f32,
            None => 1.0,
        };
        (fade * (1.0 + self.brightness as f32 / 64.0)).max(0.0)
    }
}
