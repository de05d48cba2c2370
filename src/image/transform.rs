//! Geometric and photometric transforms on `(height, width, channels)` images.

use ndarray::{s, Array1, Array3, ArrayView3, Axis};
use rand::Rng;

use crate::error::{Error, Result};

/// Bilinear resize with corner-aligned sampling (`src = dst * in / out`).
pub fn resize_bilinear(image: ArrayView3<f32>, height: usize, width: usize) -> Array3<f32> {
    let (in_h, in_w, channels) = image.dim();
    let mut out = Array3::<f32>::zeros((height, width, channels));
    if in_h == 0 || in_w == 0 {
        return out;
    }
    let scale_y = in_h as f32 / height as f32;
    let scale_x = in_w as f32 / width as f32;

    for y in 0..height {
        let src_y = y as f32 * scale_y;
        let y0 = (src_y.floor() as usize).min(in_h - 1);
        let y1 = (y0 + 1).min(in_h - 1);
        let ly = src_y - y0 as f32;
        for x in 0..width {
            let src_x = x as f32 * scale_x;
            let x0 = (src_x.floor() as usize).min(in_w - 1);
            let x1 = (x0 + 1).min(in_w - 1);
            let lx = src_x - x0 as f32;
            for c in 0..channels {
                let top = image[[y0, x0, c]] + (image[[y0, x1, c]] - image[[y0, x0, c]]) * lx;
                let bottom = image[[y1, x0, c]] + (image[[y1, x1, c]] - image[[y1, x0, c]]) * lx;
                out[[y, x, c]] = top + (bottom - top) * ly;
            }
        }
    }
    out
}

/// Target `(height, width)` for a random resize.
///
/// The shorter side is drawn from `size_range`; the input aspect ratio is kept
/// and then distorted by `exp(u)`, `u ~ U(-max_log_aspect_ratio, +max_log_aspect_ratio)`.
pub fn random_resize_dims<R: Rng + ?Sized>(
    height: usize,
    width: usize,
    size_range: (f32, f32),
    max_log_aspect_ratio: f32,
    rng: &mut R,
) -> (usize, usize) {
    let distortion = if max_log_aspect_ratio > 0.0 {
        rng.gen_range(-max_log_aspect_ratio..max_log_aspect_ratio)
    } else {
        0.0
    };
    let aspect_ratio = (width as f32 / height.max(1) as f32) * distortion.exp();
    let shorter = if size_range.0 < size_range.1 {
        rng.gen_range(size_range.0..size_range.1)
    } else {
        size_range.0
    };
    let (new_h, new_w) = if aspect_ratio < 1.0 {
        (shorter / aspect_ratio, shorter)
    } else {
        (shorter, shorter * aspect_ratio)
    };
    ((new_h as usize).max(1), (new_w as usize).max(1))
}

pub fn random_resize<R: Rng + ?Sized>(
    image: ArrayView3<f32>,
    size_range: (f32, f32),
    max_log_aspect_ratio: f32,
    rng: &mut R,
) -> Array3<f32> {
    let (h, w, _) = image.dim();
    let (new_h, new_w) = random_resize_dims(h, w, size_range, max_log_aspect_ratio, rng);
    resize_bilinear(image, new_h, new_w)
}

fn check_crop(image: &ArrayView3<f32>, size: usize) -> Result<(usize, usize)> {
    let (h, w, _) = image.dim();
    if h < size || w < size {
        return Err(Error::contract(format!("cannot crop {size}x{size} out of a {h}x{w} image")));
    }
    Ok((h, w))
}

/// Square crop of side `size` at a uniformly random offset.
pub fn random_crop<R: Rng + ?Sized>(image: ArrayView3<f32>, size: usize, rng: &mut R) -> Result<Array3<f32>> {
    let (h, w) = check_crop(&image, size)?;
    let top = rng.gen_range(0..=h - size);
    let left = rng.gen_range(0..=w - size);
    Ok(image.slice(s![top..top + size, left..left + size, ..]).to_owned())
}

pub fn center_crop(image: ArrayView3<f32>, size: usize) -> Result<Array3<f32>> {
    let (h, w) = check_crop(&image, size)?;
    let (top, left) = ((h - size) / 2, (w - size) / 2);
    Ok(image.slice(s![top..top + size, left..left + size, ..]).to_owned())
}

pub fn flip_left_right(image: ArrayView3<f32>) -> Array3<f32> {
    image.slice(s![.., ..;-1, ..]).as_standard_layout().into_owned()
}

pub fn random_flip<R: Rng + ?Sized>(image: Array3<f32>, rng: &mut R) -> Array3<f32> {
    if rng.gen_bool(0.5) {
        flip_left_right(image.view())
    } else {
        image
    }
}

pub fn adjust_brightness(image: &mut Array3<f32>, delta: f32) {
    image.mapv_inplace(|v| v + delta);
}

/// Scales each channel's deviation from its own mean by `factor`.
pub fn adjust_contrast(image: &mut Array3<f32>, factor: f32) {
    let mean: Array1<f32> = match image.mean_axis(Axis(0)).and_then(|rows| rows.mean_axis(Axis(0))) {
        Some(mean) => mean,
        None => return,
    };
    for mut pixel in image.lanes_mut(Axis(2)) {
        pixel.zip_mut_with(&mean, |v, &m| *v = (*v - m) * factor + m);
    }
}

/// Random brightness shift in `[-max_delta, max_delta)` followed by a random
/// contrast factor in `contrast_range`.
pub fn random_adjust_rgb<R: Rng + ?Sized>(
    image: &mut Array3<f32>,
    max_delta: f32,
    contrast_range: (f32, f32),
    rng: &mut R,
) {
    if max_delta > 0.0 {
        adjust_brightness(image, rng.gen_range(-max_delta..max_delta));
    }
    if contrast_range.0 < contrast_range.1 {
        adjust_contrast(image, rng.gen_range(contrast_range.0..contrast_range.1));
    }
}
