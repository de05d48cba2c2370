use std::path::PathBuf;
use std::sync::Arc;

use ndarray::{stack, Array3, Axis, Ix3};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::graph::{Node, Shape, Tensor};
use crate::image::{mean, transform};
use crate::pipeline::blob::Blob;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Crops taken from every test image.
    pub num_test_crops: usize,
    /// Range the shorter side is resized into during training.
    pub train_size_range: (f32, f32),
    pub test_size_range: (f32, f32),
    pub max_log_aspect_ratio: f32,
    /// Side of the square network input.
    pub net_size: usize,
    pub net_channels: usize,
    /// Mean image archive; `None` skips mean subtraction.
    pub mean_path: Option<PathBuf>,
    /// Brightness jitter bound, in pixel units.
    pub brightness_delta: f32,
    pub contrast_range: (f32, f32),
    /// When false, test crops are centred and never flipped.
    pub random_test_crops: bool,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        PreprocessConfig {
            num_test_crops: 4,
            train_size_range: (224.0, 320.0),
            test_size_range: (256.0, 256.0),
            max_log_aspect_ratio: 0.75,
            net_size: 224,
            net_channels: 3,
            mean_path: Some(PathBuf::from("archive/ResNet-mean.npz")),
            brightness_delta: 63.0,
            contrast_range: (0.5, 1.5),
            random_test_crops: true,
        }
    }
}

/// Per-image augmentation before batching.
#[derive(Debug, Clone)]
pub struct Preprocess {
    config: PreprocessConfig,
    mean: Option<Arc<Array3<f32>>>,
}

impl Preprocess {
    pub fn new(config: PreprocessConfig) -> Result<Self> {
        if config.num_test_crops == 0 {
            return Err(Error::contract("num_test_crops must be positive"));
        }
        let mean = match &config.mean_path {
            Some(path) => {
                let mean = mean::load_mean(path, config.net_size, config.net_channels)?;
                info!(path = %path.display(), "mean image loaded");
                Some(Arc::new(mean))
            }
            None => None,
        };
        Ok(Preprocess { config, mean })
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    pub fn num_test_crops(&self) -> usize {
        self.config.num_test_crops
    }

    /// Shape of one preprocessed crop.
    pub fn crop_shape(&self) -> [usize; 3] {
        [self.config.net_size, self.config.net_size, self.config.net_channels]
    }

    fn to_image(&self, image: &Tensor) -> Result<Array3<f32>> {
        let image = image.view().into_dimensionality::<Ix3>().map_err(|_| {
            Error::contract(format!("expected a (height, width, channels) image, got {:?}", image.shape()))
        })?;
        if image.dim().2 != self.config.net_channels {
            return Err(Error::contract(format!(
                "expected {} channels, got {}",
                self.config.net_channels,
                image.dim().2
            )));
        }
        Ok(image.to_owned())
    }

    fn subtract_mean(&self, mut crop: Array3<f32>) -> Array3<f32> {
        if let Some(mean) = &self.mean {
            crop -= mean.as_ref();
        }
        crop
    }

    /// Random resize, crop, flip and colour jitter, then mean subtraction.
    pub fn train_image<R: Rng + ?Sized>(&self, image: &Tensor, rng: &mut R) -> Result<Tensor> {
        let image = self.to_image(image)?;
        let config = &self.config;
        let resized = transform::random_resize(image.view(), config.train_size_range, config.max_log_aspect_ratio, rng);
        let crop = transform::random_crop(resized.view(), config.net_size, rng)?;
        let mut crop = transform::random_flip(crop, rng);
        transform::random_adjust_rgb(&mut crop, config.brightness_delta, config.contrast_range, rng);
        Ok(self.subtract_mean(crop).into_dyn())
    }

    /// `num_test_crops` crops of one image, shaped `(K, net, net, C)`.
    pub fn test_image<R: Rng + ?Sized>(&self, image: &Tensor, rng: &mut R) -> Result<Tensor> {
        let image = self.to_image(image)?;
        let config = &self.config;
        let crops = (0..config.num_test_crops)
            .map(|_| {
                let resized = transform::random_resize(image.view(), config.test_size_range, 0.0, rng);
                let crop = if config.random_test_crops {
                    let crop = transform::random_crop(resized.view(), config.net_size, rng)?;
                    transform::random_flip(crop, rng)
                } else {
                    transform::center_crop(resized.view(), config.net_size)?
                };
                Ok(self.subtract_mean(crop))
            })
            .collect::<Result<Vec<_>>>()?;
        let views: Vec<_> = crops.iter().map(|crop| crop.view()).collect();
        Ok(stack(Axis(0), &views)?.into_dyn())
    }

    fn map_images<F>(&self, blob: Blob, name: &str, shape: Shape, f: F) -> Result<Blob>
    where
        F: Fn(&Preprocess, &Tensor) -> Result<Tensor> + Send + Sync + Clone + 'static,
    {
        let pairs = blob.as_tuple_list()?;
        let (images, labels): (Vec<Node<Tensor>>, Vec<_>) = pairs
            .into_iter()
            .map(|(image, label)| {
                let this = self.clone();
                let f = f.clone();
                let image = image
                    .map(name, move |image| f(&this, &image))
                    .with_shape(shape.clone());
                (image, label)
            })
            .unzip();
        Blob::from_images_labels(images, labels)
    }

    /// Applies training augmentation to every image of the blob.
    pub fn train(&self, blob: Blob) -> Result<Blob> {
        let shape = self.crop_shape().iter().map(|&d| Some(d)).collect();
        self.map_images(blob, "preprocess_train", shape, |this, image| {
            this.train_image(image, &mut rand::thread_rng())
        })
    }

    /// Expands every image of the blob into its test crops.
    pub fn test(&self, blob: Blob) -> Result<Blob> {
        let mut shape: Shape = vec![Some(self.config.num_test_crops)];
        shape.extend(self.crop_shape().iter().map(|&d| Some(d)));
        self.map_images(blob, "preprocess_test", shape, |this, image| {
            this.test_image(image, &mut rand::thread_rng())
        })
    }
}
