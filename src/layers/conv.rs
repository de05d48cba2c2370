use ndarray::{Array2, Array4, ArrayD, Axis, Ix1};

use crate::error::{Error, Result};
use crate::network::params::Parameter;

/// 2-D convolution over NHWC input with `SAME` padding.
///
/// The kernel is stored HWIO (`[kh, kw, in, out]`), so it reshapes directly
/// into the `[kh * kw * in, out]` matrix the im2col product needs.
#[derive(Debug, Clone)]
pub struct Conv2d {
    pub weight: Parameter,
    pub bias: Option<Parameter>,
    pub stride: (usize, usize),
}

/// What the backward pass needs from the forward pass.
#[derive(Debug)]
pub struct ConvCache {
    input_dim: (usize, usize, usize, usize),
    output_hw: (usize, usize),
    pad: (usize, usize),
    cols: Array2<f32>,
}

/// `SAME` output size: `ceil(input / stride)`.
pub fn same_output(input: usize, stride: usize) -> usize {
    input.div_ceil(stride)
}

/// Leading padding for `SAME`; the odd remainder goes after.
pub fn same_pad_before(input: usize, kernel: usize, stride: usize) -> usize {
    let out = same_output(input, stride);
    let total = ((out.saturating_sub(1)) * stride + kernel).saturating_sub(input);
    total / 2
}

impl Conv2d {
    pub fn new(weight: Parameter, bias: Option<Parameter>, stride: (usize, usize)) -> Result<Self> {
        if weight.value.ndim() != 4 {
            return Err(Error::contract(format!(
                "`{}` must be a 4-D HWIO kernel, got shape {:?}",
                weight.name,
                weight.value.shape()
            )));
        }
        let out_channels = weight.value.shape()[3];
        if let Some(bias) = &bias {
            if bias.value.shape() != [out_channels] {
                return Err(Error::contract(format!(
                    "`{}` must have {} entries, got shape {:?}",
                    bias.name,
                    out_channels,
                    bias.value.shape()
                )));
            }
        }
        if stride.0 == 0 || stride.1 == 0 {
            return Err(Error::contract(format!("`{}` needs a positive stride", weight.name)));
        }
        Ok(Conv2d { weight, bias, stride })
    }

    pub fn kernel(&self) -> (usize, usize) {
        let shape = self.weight.value.shape();
        (shape[0], shape[1])
    }

    pub fn in_channels(&self) -> usize {
        self.weight.value.shape()[2]
    }

    pub fn out_channels(&self) -> usize {
        self.weight.value.shape()[3]
    }

    fn weight_matrix(&self) -> Result<Array2<f32>> {
        let (kh, kw) = self.kernel();
        let rows = kh * kw * self.in_channels();
        Ok(self
            .weight
            .value
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order((rows, self.out_channels()))?)
    }

    pub fn forward(&self, x: &Array4<f32>) -> Result<(Array4<f32>, ConvCache)> {
        let (n, h, w, c) = x.dim();
        if c != self.in_channels() {
            return Err(Error::contract(format!(
                "`{}` expects {} input channels, got {}",
                self.weight.name,
                self.in_channels(),
                c
            )));
        }
        let (kh, kw) = self.kernel();
        let (sh, sw) = self.stride;
        let (oh, ow) = (same_output(h, sh), same_output(w, sw));
        let pad = (same_pad_before(h, kh, sh), same_pad_before(w, kw, sw));

        let cols = im2col(x, (kh, kw), self.stride, pad, (oh, ow))?;
        let mut y = cols.dot(&self.weight_matrix()?);
        if let Some(bias) = &self.bias {
            let bias = bias.value.view().into_dimensionality::<Ix1>()?;
            y += &bias;
        }
        let y = y.into_shape_with_order((n, oh, ow, self.out_channels()))?;
        let cache = ConvCache {
            input_dim: (n, h, w, c),
            output_hw: (oh, ow),
            pad,
            cols,
        };
        Ok((y, cache))
    }

    /// Returns `(d_input, d_weight, d_bias)` for the gradient `dy` of the output.
    pub fn backward(
        &self,
        cache: &ConvCache,
        dy: &Array4<f32>,
    ) -> Result<(Array4<f32>, ArrayD<f32>, Option<ArrayD<f32>>)> {
        let (n, _, _, _) = cache.input_dim;
        let (oh, ow) = cache.output_hw;
        let out = self.out_channels();
        let dy = dy
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order((n * oh * ow, out))?;

        let (kh, kw) = self.kernel();
        let d_weight = cache
            .cols
            .t()
            .dot(&dy)
            .into_shape_with_order((kh, kw, self.in_channels(), out))?
            .into_dyn();
        let d_bias = self.bias.as_ref().map(|_| dy.sum_axis(Axis(0)).into_dyn());

        let d_cols = dy.dot(&self.weight_matrix()?.t());
        let dx = col2im(&d_cols, cache.input_dim, (kh, kw), self.stride, cache.pad, cache.output_hw)?;
        Ok((dx, d_weight, d_bias))
    }
}

// ---------------------------------------------------------------------------
// im2col / col2im
// ---------------------------------------------------------------------------

fn is_pointwise(kernel: (usize, usize), stride: (usize, usize)) -> bool {
    kernel == (1, 1) && stride == (1, 1)
}

/// Unfolds every receptive field into one row of `[kh * kw * c]` values,
/// ordered `(ky, kx, channel)`; padded positions stay zero.
fn im2col(
    x: &Array4<f32>,
    kernel: (usize, usize),
    stride: (usize, usize),
    pad: (usize, usize),
    out_hw: (usize, usize),
) -> Result<Array2<f32>> {
    let (n, h, w, c) = x.dim();
    let x = x.as_standard_layout();
    if is_pointwise(kernel, stride) {
        return Ok(x.into_owned().into_shape_with_order((n * h * w, c))?);
    }
    let src = x
        .as_slice()
        .ok_or_else(|| Error::contract("convolution input is not contiguous"))?;

    let (kh, kw) = kernel;
    let (oh, ow) = out_hw;
    let width = kh * kw * c;
    let mut cols = Array2::<f32>::zeros((n * oh * ow, width));
    let dst = cols
        .as_slice_mut()
        .ok_or_else(|| Error::contract("column buffer is not contiguous"))?;

    for b in 0..n {
        for oy in 0..oh {
            for ox in 0..ow {
                let row = ((b * oh + oy) * ow + ox) * width;
                for ky in 0..kh {
                    let iy = (oy * stride.0 + ky) as isize - pad.0 as isize;
                    if iy < 0 || iy >= h as isize {
                        continue;
                    }
                    for kx in 0..kw {
                        let ix = (ox * stride.1 + kx) as isize - pad.1 as isize;
                        if ix < 0 || ix >= w as isize {
                            continue;
                        }
                        let from = ((b * h + iy as usize) * w + ix as usize) * c;
                        let to = row + (ky * kw + kx) * c;
                        dst[to..to + c].copy_from_slice(&src[from..from + c]);
                    }
                }
            }
        }
    }
    Ok(cols)
}

/// Folds column gradients back onto the input, summing overlapping fields.
fn col2im(
    cols: &Array2<f32>,
    input_dim: (usize, usize, usize, usize),
    kernel: (usize, usize),
    stride: (usize, usize),
    pad: (usize, usize),
    out_hw: (usize, usize),
) -> Result<Array4<f32>> {
    let (n, h, w, c) = input_dim;
    if is_pointwise(kernel, stride) {
        return Ok(cols.to_owned().into_shape_with_order((n, h, w, c))?);
    }
    let cols = cols.as_standard_layout();
    let src = cols
        .as_slice()
        .ok_or_else(|| Error::contract("column gradient is not contiguous"))?;

    let (kh, kw) = kernel;
    let (oh, ow) = out_hw;
    let width = kh * kw * c;
    let mut dx = Array4::<f32>::zeros((n, h, w, c));
    let dst = dx
        .as_slice_mut()
        .ok_or_else(|| Error::contract("input gradient is not contiguous"))?;

    for b in 0..n {
        for oy in 0..oh {
            for ox in 0..ow {
                let row = ((b * oh + oy) * ow + ox) * width;
                for ky in 0..kh {
                    let iy = (oy * stride.0 + ky) as isize - pad.0 as isize;
                    if iy < 0 || iy >= h as isize {
                        continue;
                    }
                    for kx in 0..kw {
                        let ix = (ox * stride.1 + kx) as isize - pad.1 as isize;
                        if ix < 0 || ix >= w as isize {
                            continue;
                        }
                        let to = ((b * h + iy as usize) * w + ix as usize) * c;
                        let from = row + (ky * kw + kx) * c;
                        for k in 0..c {
                            dst[to + k] += src[from + k];
                        }
                    }
                }
            }
        }
    }
    Ok(dx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::params::LearningMode;

    fn param(name: &str, value: ArrayD<f32>) -> Parameter {
        Parameter {
            name: name.to_owned(),
            value,
            mode: LearningMode::Normal,
            trainable: true,
            decay: true,
        }
    }

    #[test]
    fn same_padding_matches_ceil_division() {
        assert_eq!(same_output(224, 2), 112);
        assert_eq!(same_output(7, 2), 4);
        assert_eq!(same_pad_before(224, 7, 2), 2);
        assert_eq!(same_pad_before(56, 1, 2), 0);
        assert_eq!(same_pad_before(8, 3, 1), 1);
    }

    #[test]
    fn identity_kernel_copies_input() {
        let mut kernel = ArrayD::zeros(ndarray::IxDyn(&[3, 3, 1, 1]));
        kernel[[1, 1, 0, 0]] = 1.0;
        let conv = Conv2d::new(param("id/weight", kernel), None, (1, 1)).unwrap();
        let x = Array4::from_shape_fn((1, 4, 4, 1), |(_, y, x, _)| (y * 4 + x) as f32);
        let (y, _) = conv.forward(&x).unwrap();
        assert_eq!(y, x);
    }
}
