//! Image decoding into network-ready tensors.
//!
//! Every decoder produces an `(height, width, 3)` tensor of `f32` RGB values
//! in `[0, 255]`; normalisation happens later in `Preprocess`.
use std::path::Path;

use ndarray::Array3;
use tracing::debug;

use crate::error::Result;
use crate::graph::Tensor;

/// Decodes image bytes (PNG/JPEG/BMP/GIF) into an HWC RGB tensor.
pub fn decode_bytes(bytes: &[u8]) -> Result<Tensor> {
    let img = image::load_from_memory(bytes)?;
    Ok(rgb_to_tensor(&img.to_rgb8()))
}

pub fn decode_file(path: impl AsRef<Path>) -> Result<Tensor> {
    let bytes = std::fs::read(path.as_ref())?;
    decode_bytes(&bytes)
}

/// Loads an image from an `http(s)://` URL or a local path.
///
/// A failed download fails the whole call; there is no retry.
pub fn load_source(source: &str) -> Result<Tensor> {
    if source.starts_with("http://") || source.starts_with("https://") {
        debug!(%source, "downloading image");
        let bytes = reqwest::blocking::get(source)?.error_for_status()?.bytes()?;
        decode_bytes(&bytes)
    } else {
        decode_file(source)
    }
}

/// True when the file decodes as an image.
pub fn is_readable(path: impl AsRef<Path>) -> bool {
    image::open(path.as_ref()).is_ok()
}

pub fn rgb_to_tensor(rgb: &image::RgbImage) -> Tensor {
    let (width, height) = rgb.dimensions();
    let mut tensor = Array3::<f32>::zeros((height as usize, width as usize, 3));
    for (x, y, pixel) in rgb.enumerate_pixels() {
        for c in 0..3 {
            tensor[[y as usize, x as usize, c]] = pixel.0[c] as f32;
        }
    }
    tensor.into_dyn()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixels_land_in_hwc_order() {
        let img = image::RgbImage::from_fn(3, 2, |x, y| image::Rgb([x as u8, y as u8, 7]));
        let tensor = rgb_to_tensor(&img);
        assert_eq!(tensor.shape(), &[2, 3, 3]);
        assert_eq!(tensor[[1, 2, 0]], 2.0);
        assert_eq!(tensor[[1, 2, 1]], 1.0);
        assert_eq!(tensor[[0, 0, 2]], 7.0);
    }
}
