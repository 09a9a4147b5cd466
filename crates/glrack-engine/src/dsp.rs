//! Signal conventions and small building blocks shared by the modules.

/// Gates and triggers count as high above this voltage.
pub const GATE_THRESHOLD: f32 = 1.0;
/// Full-scale output of a "true" logic output.
pub const LOGIC_HIGH: f32 = 10.0;

/// Map a rendered pixel channel to a control voltage.
///
/// `[0, 1]` maps linearly onto `[-10, 10]` V; anything outside is clamped and
/// non-finite values give 0 V.
pub fn pixel_to_voltage(p: f32) -> f32 {
    if !p.is_finite() {
        return 0.0;
    }
    (p.clamp(0.0, 1.0) * 2.0 - 1.0) * 10.0
}

/// Clamp a shader-native audio value to `[-1, 1]`, non-finite to 0.
pub fn clamp_signal(x: f32) -> f32 {
    if !x.is_finite() {
        return 0.0;
    }
    x.clamp(-1.0, 1.0)
}

pub fn logic(v: bool) -> f32 {
    if v {
        LOGIC_HIGH
    } else {
        0.0
    }
}

/// Edge detector with hysteresis: goes high at 1 V, low again at 0.1 V.
#[derive(Debug, Default, Clone, Copy)]
pub struct SchmittTrigger {
    high: bool,
}

impl SchmittTrigger {
    const LOW: f32 = 0.1;
    const HIGH: f32 = 1.0;

    /// Returns true on the rising edge only.
    pub fn process(&mut self, v: f32) -> bool {
        if self.high {
            if v <= Self::LOW {
                self.high = false;
            }
            false
        } else if v >= Self::HIGH {
            self.high = true;
            true
        } else {
            false
        }
    }

    pub fn is_high(&self) -> bool {
        self.high
    }

    pub fn reset(&mut self) {
        self.high = false;
    }
}
