#![allow(dead_code)]

use std::path::Path;

use ferrite_resnet::config::RunConfig;
use ferrite_resnet::network::{LearningMode, ResNetSpec, StageSpec};
use image::{Rgb, RgbImage};

/// Two single-unit stages on an 8x8 input: small enough for every test to
/// run the whole pipeline in milliseconds.
pub fn tiny_spec() -> ResNetSpec {
    let stage = |name: &str, subsample, mode| StageSpec {
        name: name.to_owned(),
        units: 1,
        out_channels: 2,
        subsample,
        mode,
    };
    ResNetSpec {
        name: "resnet-tiny".to_owned(),
        stem_channels: 4,
        stem_kernel: 3,
        stem_stride: 1,
        stem_mode: LearningMode::Slow,
        pool_size: 2,
        pool_stride: 2,
        stages: vec![stage("2", false, LearningMode::Slow), stage("3", true, LearningMode::Normal)],
        fc_mode: LearningMode::Normal,
    }
}

/// Batch of 4 crops (2 test images of 2 crops), no archives on disk.
pub fn tiny_config() -> RunConfig {
    let mut config = RunConfig::default().with_test_crops(2).with_batch_size(4);
    config.preprocess.net_size = 8;
    config.preprocess.train_size_range = (8.0, 12.0);
    config.preprocess.test_size_range = (10.0, 10.0);
    config.preprocess.mean_path = None;
    config.batch.train_capacity = 16;
    config.batch.train_min_after_dequeue = 2;
    config.batch.test_capacity = 8;
    config.consumer.capacity = 8;
    config.queue_producer.capacity = 16;
    config.file_producer.capacity = 8;
    config.file_producer.num_train_inputs = 2;
    config.file_producer.num_test_inputs = 1;
    config.file_producer.subsample_size = 4;
    config.file_producer.extension = "png".to_owned();
    config.net.pretrained_path = None;
    config.net.seed = Some(7);
    config.net.learning_rate = 0.01;
    config.train.iterations = 4;
    config.train.test_interval = 2;
    config.train.summary_interval = 1;
    config.train.save_per = 2;
    config.train.is_show = false;
    config.resnet = tiny_spec();
    config
}

/// Solid-colour RGB image as a `(height, width, 3)` tensor.
pub fn solid(height: usize, width: usize, rgb: [f32; 3]) -> ndarray::ArrayD<f32> {
    ndarray::Array3::from_shape_fn((height, width, 3), |(_, _, c)| rgb[c]).into_dyn()
}

/// Writes `count` small PNGs named `img_00.png`, `img_01.png`, ... into
/// `image_dir/<class>/` for every class.
pub fn write_dataset(image_dir: &Path, classes: &[&str], count: usize) {
    for (index, class) in classes.iter().enumerate() {
        let dir = image_dir.join(class);
        std::fs::create_dir_all(&dir).unwrap();
        for n in 0..count {
            let shade = (40 * index + 7 * n) as u8;
            let image = RgbImage::from_fn(12, 10, |x, y| Rgb([shade, (x * 20) as u8, (y * 20) as u8]));
            image.save(dir.join(format!("img_{n:02}.png"))).unwrap();
        }
    }
}
