use ndarray::{Array1, Array4, ArrayD, Axis, Ix1, Zip};

use crate::error::{Error, Result};
use crate::network::params::Parameter;

/// Batch normalisation with frozen statistics followed by a learned
/// per-channel scale and offset:
/// `y = (x - mean) / sqrt(variance + epsilon) * scale + offset`.
#[derive(Debug, Clone)]
pub struct FrozenBatchNorm {
    pub mean: Parameter,
    pub variance: Parameter,
    pub scale: Parameter,
    pub offset: Parameter,
    pub epsilon: f32,
}

#[derive(Debug)]
pub struct NormCache {
    normalized: Array4<f32>,
}

pub const BN_EPSILON: f32 = 1e-5;

fn vector(param: &Parameter) -> Result<Array1<f32>> {
    Ok(param.value.view().into_dimensionality::<Ix1>()?.to_owned())
}

impl FrozenBatchNorm {
    pub fn new(mean: Parameter, variance: Parameter, scale: Parameter, offset: Parameter) -> Result<Self> {
        let channels = mean.value.len();
        for param in [&variance, &scale, &offset] {
            if param.value.shape() != [channels] {
                return Err(Error::contract(format!(
                    "`{}` must have {} entries, got shape {:?}",
                    param.name,
                    channels,
                    param.value.shape()
                )));
            }
        }
        Ok(FrozenBatchNorm {
            mean,
            variance,
            scale,
            offset,
            epsilon: BN_EPSILON,
        })
    }

    fn inv_std(&self) -> Result<Array1<f32>> {
        Ok(vector(&self.variance)?.mapv(|v| 1.0 / (v + self.epsilon).sqrt()))
    }

    pub fn forward(&self, x: &Array4<f32>) -> Result<(Array4<f32>, NormCache)> {
        let mean = vector(&self.mean)?;
        let inv_std = self.inv_std()?;
        let scale = vector(&self.scale)?;
        let offset = vector(&self.offset)?;
        if x.dim().3 != mean.len() {
            return Err(Error::contract(format!(
                "`{}` expects {} channels, got {}",
                self.mean.name,
                mean.len(),
                x.dim().3
            )));
        }

        let mut normalized = x.clone();
        for mut lane in normalized.lanes_mut(Axis(3)) {
            Zip::from(&mut lane)
                .and(&mean)
                .and(&inv_std)
                .for_each(|v, &m, &s| *v = (*v - m) * s);
        }
        let mut y = normalized.clone();
        for mut lane in y.lanes_mut(Axis(3)) {
            Zip::from(&mut lane)
                .and(&scale)
                .and(&offset)
                .for_each(|v, &g, &b| *v = *v * g + b);
        }
        Ok((y, NormCache { normalized }))
    }

    /// Returns `(d_input, d_scale, d_offset)`; the statistics get no gradient.
    pub fn backward(&self, cache: &NormCache, dy: &Array4<f32>) -> Result<(Array4<f32>, ArrayD<f32>, ArrayD<f32>)> {
        let d_offset = dy.sum_axis(Axis(0)).sum_axis(Axis(0)).sum_axis(Axis(0));
        let d_scale = (dy * &cache.normalized)
            .sum_axis(Axis(0))
            .sum_axis(Axis(0))
            .sum_axis(Axis(0));

        let factor = vector(&self.scale)? * self.inv_std()?;
        let mut dx = dy.clone();
        for mut lane in dx.lanes_mut(Axis(3)) {
            lane *= &factor;
        }
        Ok((dx, d_scale.into_dyn(), d_offset.into_dyn()))
    }
}
