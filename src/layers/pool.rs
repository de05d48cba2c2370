use ndarray::{Array2, Array4, Axis};

use crate::error::{Error, Result};
use crate::layers::conv::{same_output, same_pad_before};

/// Max pooling with `SAME` padding; padded positions never win.
#[derive(Debug, Clone, Copy)]
pub struct MaxPool {
    pub size: (usize, usize),
    pub stride: (usize, usize),
}

#[derive(Debug)]
pub struct MaxPoolCache {
    input_dim: (usize, usize, usize, usize),
    /// Flat input index of the winner of every output element.
    winners: Vec<usize>,
}

impl MaxPool {
    pub fn new(size: (usize, usize), stride: (usize, usize)) -> Self {
        MaxPool { size, stride }
    }

    pub fn forward(&self, x: &Array4<f32>) -> Result<(Array4<f32>, MaxPoolCache)> {
        let (n, h, w, c) = x.dim();
        let (oh, ow) = (same_output(h, self.stride.0), same_output(w, self.stride.1));
        let pad = (
            same_pad_before(h, self.size.0, self.stride.0),
            same_pad_before(w, self.size.1, self.stride.1),
        );
        let x = x.as_standard_layout();
        let src = x
            .as_slice()
            .ok_or_else(|| Error::contract("pooling input is not contiguous"))?;

        let mut y = Array4::<f32>::zeros((n, oh, ow, c));
        let mut winners = Vec::with_capacity(n * oh * ow * c);
        for b in 0..n {
            for oy in 0..oh {
                for ox in 0..ow {
                    for ch in 0..c {
                        let mut best = f32::NEG_INFINITY;
                        let mut best_index = None;
                        for ky in 0..self.size.0 {
                            let iy = (oy * self.stride.0 + ky) as isize - pad.0 as isize;
                            if iy < 0 || iy >= h as isize {
                                continue;
                            }
                            for kx in 0..self.size.1 {
                                let ix = (ox * self.stride.1 + kx) as isize - pad.1 as isize;
                                if ix < 0 || ix >= w as isize {
                                    continue;
                                }
                                let index = ((b * h + iy as usize) * w + ix as usize) * c + ch;
                                if best_index.is_none() || src[index] > best {
                                    best = src[index];
                                    best_index = Some(index);
                                }
                            }
                        }
                        let index = best_index.ok_or_else(|| Error::contract("pooling window lies entirely in padding"))?;
                        y[[b, oy, ox, ch]] = best;
                        winners.push(index);
                    }
                }
            }
        }
        Ok((
            y,
            MaxPoolCache {
                input_dim: (n, h, w, c),
                winners,
            },
        ))
    }

    pub fn backward(&self, cache: &MaxPoolCache, dy: &Array4<f32>) -> Result<Array4<f32>> {
        let mut dx = Array4::<f32>::zeros(cache.input_dim);
        let dst = dx
            .as_slice_mut()
            .ok_or_else(|| Error::contract("pooling gradient is not contiguous"))?;
        let dy = dy.as_standard_layout();
        let grads = dy
            .as_slice()
            .ok_or_else(|| Error::contract("pooling output gradient is not contiguous"))?;
        for (&index, &g) in cache.winners.iter().zip(grads.iter()) {
            dst[index] += g;
        }
        Ok(dx)
    }
}

/// Mean over the spatial axes: `(n, h, w, c) -> (n, c)`.
pub fn global_avg_pool(x: &Array4<f32>) -> Array2<f32> {
    let (_, h, w, _) = x.dim();
    let area = (h * w).max(1) as f32;
    x.sum_axis(Axis(1)).sum_axis(Axis(1)) / area
}

pub fn global_avg_pool_backward(input_dim: (usize, usize, usize, usize), dy: &Array2<f32>) -> Array4<f32> {
    let (n, h, w, c) = input_dim;
    let area = (h * w).max(1) as f32;
    Array4::from_shape_fn((n, h, w, c), |(b, _, _, ch)| dy[[b, ch]] / area)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_pool_routes_gradient_to_winner() {
        let x = Array4::from_shape_fn((1, 4, 4, 1), |(_, y, x, _)| (y * 4 + x) as f32);
        let pool = MaxPool::new((3, 3), (2, 2));
        let (y, cache) = pool.forward(&x).unwrap();
        assert_eq!(y.dim(), (1, 2, 2, 1));
        assert_eq!(y[[0, 1, 1, 0]], 15.0);

        let dx = pool.backward(&cache, &Array4::ones((1, 2, 2, 1))).unwrap();
        assert_eq!(dx[[0, 3, 3, 0]], 1.0);
        assert_eq!(dx.sum(), 4.0);
    }

    #[test]
    fn global_pool_averages_space() {
        let x = Array4::from_shape_fn((2, 2, 2, 3), |(b, _, _, c)| (b * 3 + c) as f32);
        let y = global_avg_pool(&x);
        assert_eq!(y.dim(), (2, 3));
        assert_eq!(y[[1, 2]], 5.0);
    }
}
