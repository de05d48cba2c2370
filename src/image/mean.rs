use std::path::Path;

use ndarray::{Array3, ArrayD, IxDyn};

use crate::error::{Error, Result};
use crate::util::npz;

/// Archive entry holding the mean image.
pub const MEAN_KEY: &str = "mean";

/// Loads the mean image and broadcasts it to `(size, size, channels)`.
///
/// The archive may hold a full image, a `(1, 1, C)` pixel or a `(C,)` vector.
pub fn load_mean(path: impl AsRef<Path>, size: usize, channels: usize) -> Result<Array3<f32>> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(Error::missing(format!("mean archive {} does not exist", path.display())));
    }
    let mean = npz::read_one(path, MEAN_KEY)?
        .ok_or_else(|| Error::missing(format!("mean archive {} has no `{MEAN_KEY}` entry", path.display())))?;
    broadcast_mean(&mean, size, channels)
}

pub fn broadcast_mean(mean: &ArrayD<f32>, size: usize, channels: usize) -> Result<Array3<f32>> {
    let target = IxDyn(&[size, size, channels]);
    let view = mean.broadcast(target).ok_or_else(|| {
        Error::contract(format!(
            "mean of shape {:?} does not broadcast to {size}x{size}x{channels}",
            mean.shape()
        ))
    })?;
    Ok(view.to_owned().into_dimensionality()?)
}

pub fn save_mean(path: impl AsRef<Path>, mean: &ArrayD<f32>) -> Result<()> {
    npz::write_all(path, [(MEAN_KEY, mean)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn channel_vector_broadcasts_over_pixels() {
        let mean = broadcast_mean(&arr1(&[1.0f32, 2.0, 3.0]).into_dyn(), 2, 3).unwrap();
        assert_eq!(mean.dim(), (2, 2, 3));
        assert_eq!(mean[[1, 1, 2]], 3.0);
    }

    #[test]
    fn mismatched_channels_are_rejected() {
        assert!(broadcast_mean(&arr1(&[1.0f32, 2.0]).into_dyn(), 2, 3).is_err());
    }
}
