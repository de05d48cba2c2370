use std::any::Any;

use ndarray::{Array2, Array4};

use crate::error::Result;
use crate::network::params::{Gradients, Initializer, Parameter};

/// Outputs of one forward pass over a batch of crops.
#[derive(Debug, Clone)]
pub struct Forward {
    /// Pooled features, one row per crop.
    pub features: Array2<f32>,
    /// Unnormalised class scores, one row per crop.
    pub logits: Array2<f32>,
}

/// Whatever a backward pass needs from the forward pass that preceded it.
pub type Tape = Box<dyn Any + Send + Sync>;

/// What an architecture builder learns from the pipeline feeding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchitectureInput {
    pub in_channels: usize,
    pub num_classes: usize,
}

/// A trainable image network: NHWC crops in, features and logits out.
pub trait Architecture: Send + Sync {
    fn name(&self) -> &str;

    /// Width of a feature row.
    fn feature_dim(&self) -> usize;

    fn forward(&self, input: &Array4<f32>) -> Result<(Forward, Tape)>;

    /// Gradients of every trainable parameter given `d_logits`, the loss
    /// gradient with respect to the logits of the pass recorded in `tape`.
    fn backward(&self, tape: &Tape, d_logits: &Array2<f32>) -> Result<Gradients>;

    fn parameters(&self) -> Vec<&Parameter>;

    fn parameters_mut(&mut self) -> Vec<&mut Parameter>;
}

/// Builds the architecture once the input channels and class count are known.
pub type ArchitectureFn =
    Box<dyn FnOnce(&mut Initializer, &ArchitectureInput) -> Result<Box<dyn Architecture>> + Send>;
