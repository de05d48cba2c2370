use serde::{Deserialize, Serialize};

/// Per-step training statistics emitted by `train_loop`.
///
/// When a `progress_tx` channel is configured in `TrainConfig`, the training
/// loop sends one `StepStats` value after every train step. The same record
/// is what the summary file stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepStats {
    /// 1-based iteration within this run.
    pub iteration: usize,
    pub total_iterations: usize,
    /// Optimizer steps taken over the life of the model, restores included.
    pub global_step: u64,
    pub learning_rate: f64,
    pub loss: f64,
    pub acc: f64,
    /// Exponential moving averages of `loss` and `acc`.
    pub loss_avg: f64,
    pub acc_avg: f64,
    /// Set on iterations that ran a test step.
    pub test_loss: Option<f64>,
    pub test_acc: Option<f64>,
    /// Wall-clock duration of this step in milliseconds.
    pub elapsed_ms: u64,
}

/// Exponential moving average seeded with its first sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovingAverage {
    decay: f64,
    value: Option<f64>,
}

impl MovingAverage {
    pub fn new(decay: f64) -> Self {
        MovingAverage { decay, value: None }
    }

    pub fn update(&mut self, sample: f64) -> f64 {
        let value = match self.value {
            Some(value) => self.decay * value + (1.0 - self.decay) * sample,
            None => sample,
        };
        self.value = Some(value);
        value
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

impl Default for MovingAverage {
    fn default() -> Self {
        MovingAverage::new(0.9)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn first_sample_seeds_the_average() {
        let mut avg = MovingAverage::new(0.5);
        assert_eq!(avg.value(), None);
        assert_abs_diff_eq!(avg.update(2.0), 2.0);
        assert_abs_diff_eq!(avg.update(4.0), 3.0);
    }
}
