use serde::{Deserialize, Serialize};

/// Staircase exponential decay: `base * rate^floor(step / decay_steps)`.
///
/// Disabled (constant `base`) when `decay_steps` is 0 or `rate >= 1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LearningRateSchedule {
    pub base: f64,
    pub decay_steps: u64,
    pub decay_rate: f64,
}

impl LearningRateSchedule {
    pub fn rate(&self, global_step: u64) -> f64 {
        if self.decay_steps == 0 || self.decay_rate >= 1.0 {
            return self.base;
        }
        let exponent = (global_step / self.decay_steps) as i32;
        self.base * self.decay_rate.powi(exponent)
    }
}
