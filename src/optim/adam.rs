use std::collections::HashMap;

use ndarray::{ArrayD, Zip};

use crate::error::{Error, Result};
use crate::network::params::{Gradients, LearningMode, Parameter};

struct Moments {
    first: ArrayD<f32>,
    second: ArrayD<f32>,
    steps: i32,
}

/// Adam with one effective learning rate per learning-mode group.
///
/// Bias correction is folded into the step size
/// (`lr * sqrt(1 - beta2^t) / (1 - beta1^t)`), and `epsilon` is added to
/// `sqrt(v)` outside the correction. Groups whose rate is 0 are skipped.
pub struct Adam {
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    moments: HashMap<String, Moments>,
}

impl Adam {
    pub fn new(epsilon: f64) -> Adam {
        Adam {
            beta1: 0.9,
            beta2: 0.999,
            epsilon,
            moments: HashMap::new(),
        }
    }

    /// Applies one update to every trainable parameter that has a gradient.
    /// `rate` maps a group to its learning rate for this step.
    pub fn step<'a>(
        &mut self,
        params: impl IntoIterator<Item = &'a mut Parameter>,
        grads: &Gradients,
        rate: impl Fn(LearningMode) -> f64,
    ) -> Result<usize> {
        let mut updated = 0;
        for param in params {
            if !param.trainable {
                continue;
            }
            let lr = rate(param.mode);
            if lr <= 0.0 {
                continue;
            }
            let grad = match grads.get(&param.name) {
                Some(grad) => grad,
                None => continue,
            };
            if grad.shape() != param.value.shape() {
                return Err(Error::contract(format!(
                    "gradient of `{}` has shape {:?}, expected {:?}",
                    param.name,
                    grad.shape(),
                    param.value.shape()
                )));
            }
            let moments = self.moments.entry(param.name.clone()).or_insert_with(|| Moments {
                first: ArrayD::zeros(param.value.raw_dim()),
                second: ArrayD::zeros(param.value.raw_dim()),
                steps: 0,
            });
            moments.steps += 1;
            let t = moments.steps;
            let step_size =
                (lr * (1.0 - self.beta2.powi(t)).sqrt() / (1.0 - self.beta1.powi(t))) as f32;
            let (b1, b2, eps) = (self.beta1 as f32, self.beta2 as f32, self.epsilon as f32);

            Zip::from(&mut param.value)
                .and(&mut moments.first)
                .and(&mut moments.second)
                .and(grad)
                .for_each(|w, m, v, &g| {
                    *m = b1 * *m + (1.0 - b1) * g;
                    *v = b2 * *v + (1.0 - b2) * g * g;
                    *w -= step_size * *m / (v.sqrt() + eps);
                });
            updated += 1;
        }
        Ok(updated)
    }
}
