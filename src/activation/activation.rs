use ndarray::{Array4, Zip};
use serde::{Deserialize, Serialize};

/// Element-wise activation applied after a convolution unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ActivationFunction {
    #[default]
    Identity,
    ReLU,
}

impl ActivationFunction {
    pub fn function(&self, x: f32) -> f32 {
        match self {
            ActivationFunction::Identity => x,
            ActivationFunction::ReLU => if x > 0.0 { x } else { 0.0 },
        }
    }

    /// Derivative evaluated at the pre-activation value `x`.
    pub fn derivative(&self, x: f32) -> f32 {
        match self {
            ActivationFunction::Identity => 1.0,
            ActivationFunction::ReLU => if x > 0.0 { 1.0 } else { 0.0 },
        }
    }

    pub fn forward(&self, pre: &Array4<f32>) -> Array4<f32> {
        match self {
            ActivationFunction::Identity => pre.clone(),
            _ => pre.mapv(|x| self.function(x)),
        }
    }

    /// Chains `grad` (gradient w.r.t. the output) through the activation.
    pub fn backward(&self, pre: &Array4<f32>, grad: Array4<f32>) -> Array4<f32> {
        match self {
            ActivationFunction::Identity => grad,
            _ => {
                let mut grad = grad;
                Zip::from(&mut grad)
                    .and(pre)
                    .for_each(|g, &x| *g *= self.derivative(x));
                grad
            }
        }
    }
}
