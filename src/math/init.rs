use ndarray::{ArrayD, IxDyn};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

/// How a parameter is filled when neither a checkpoint nor a pretrained
/// archive provides it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DefaultInit {
    /// N(0, stddev) with draws beyond two standard deviations resampled.
    TruncatedNormal { stddev: f32 },
    Constant(f32),
}

impl DefaultInit {
    /// He-style truncated normal for a convolution kernel: the variance
    /// `2 / (in_channels * stride_h * stride_w)` follows the fan-in seen by
    /// each output unit.
    pub fn conv_weight(in_channels: usize, stride: (usize, usize)) -> Self {
        let fan_in = (in_channels * stride.0 * stride.1).max(1) as f32;
        DefaultInit::TruncatedNormal {
            stddev: (2.0 / fan_in).sqrt(),
        }
    }

    pub fn sample<R: Rng + ?Sized>(&self, shape: &[usize], rng: &mut R) -> ArrayD<f32> {
        match *self {
            DefaultInit::Constant(value) => ArrayD::from_elem(IxDyn(shape), value),
            DefaultInit::TruncatedNormal { stddev } => {
                ArrayD::from_shape_simple_fn(IxDyn(shape), || truncated_normal(rng) * stddev)
            }
        }
    }
}

/// One draw from N(0, 1) restricted to [-2, 2].
pub fn truncated_normal<R: Rng + ?Sized>(rng: &mut R) -> f32 {
    loop {
        let x: f32 = StandardNormal.sample(rng);
        if x.abs() <= 2.0 {
            return x;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn truncated_draws_stay_within_two_sigma() {
        let mut rng = StdRng::seed_from_u64(7);
        let init = DefaultInit::conv_weight(8, (2, 2));
        let stddev = (2.0f32 / 32.0).sqrt();
        let sample = init.sample(&[3, 3, 8, 4], &mut rng);
        assert_eq!(sample.shape(), &[3, 3, 8, 4]);
        assert!(sample.iter().all(|v| v.abs() <= 2.0 * stddev + 1e-6));
    }
}
