use approx::assert_abs_diff_eq;
use ferrite_resnet::graph::{Fetch, Graph, Tensor};
use ferrite_resnet::pipeline::{Preprocess, PreprocessConfig, SimpleProducer};
use ferrite_resnet::Error;
use rand::rngs::StdRng;
use rand::SeedableRng;

#[path = "./helpers.rs"]
mod helpers;

fn deterministic() -> PreprocessConfig {
    PreprocessConfig {
        random_test_crops: false,
        ..helpers::tiny_config().preprocess
    }
}

#[test]
fn centred_test_crops_are_idempotent() {
    let preprocess = Preprocess::new(deterministic()).unwrap();
    let image = ndarray::Array3::from_shape_fn((16, 20, 3), |(y, x, c)| (y * 7 + x * 3 + c) as f32).into_dyn();

    let a = preprocess.test_image(&image, &mut StdRng::seed_from_u64(1)).unwrap();
    let b = preprocess.test_image(&image, &mut StdRng::seed_from_u64(2)).unwrap();
    assert_eq!(a.shape(), &[2, 8, 8, 3]);
    assert_eq!(a, b);
    // Every crop of a degenerate size range is the same centred crop.
    assert_eq!(a.index_axis(ndarray::Axis(0), 0), a.index_axis(ndarray::Axis(0), 1));
}

#[test]
fn a_constant_image_survives_resizing() {
    let preprocess = Preprocess::new(deterministic()).unwrap();
    let image = helpers::solid(13, 17, [10.0, 20.0, 30.0]);
    let crops = preprocess.test_image(&image, &mut StdRng::seed_from_u64(1)).unwrap();
    for (index, value) in crops.indexed_iter() {
        let expected = [10.0, 20.0, 30.0][index[3]];
        assert_abs_diff_eq!(*value, expected, epsilon = 1e-3);
    }
}

#[test]
fn training_crops_have_the_network_shape() {
    let preprocess = Preprocess::new(helpers::tiny_config().preprocess).unwrap();
    let mut rng = StdRng::seed_from_u64(5);
    for (h, w) in [(8, 8), (9, 40), (40, 9)] {
        let image = helpers::solid(h, w, [1.0, 2.0, 3.0]);
        let crop = preprocess.train_image(&image, &mut rng).unwrap();
        assert_eq!(crop.shape(), &[8, 8, 3]);
    }
}

#[test]
fn blob_stage_maps_every_image() {
    let preprocess = Preprocess::new(helpers::tiny_config().preprocess).unwrap();
    let mut producer = SimpleProducer::new();
    let blob = producer
        .blob("image", Some(vec![None, None, Some(3)]))
        .func(|blob| preprocess.test(blob))
        .unwrap();
    let (image, _) = blob.single_pair().unwrap();
    assert_eq!(image.shape(), Some(&vec![Some(2), Some(8), Some(8), Some(3)]));

    let graph = Graph::new();
    let request = producer
        .kwargs(helpers::solid(12, 12, [0.0, 0.0, 0.0]))
        .unwrap()
        .fetch(Fetch::named("crops", &image));
    let crops: Tensor = graph.run(request).unwrap().take("crops").unwrap();
    assert_eq!(crops.shape(), &[2, 8, 8, 3]);
}

#[test]
fn a_missing_mean_archive_fails_construction() {
    let config = PreprocessConfig {
        mean_path: Some("/nonexistent/mean.npz".into()),
        ..helpers::tiny_config().preprocess
    };
    assert!(Preprocess::new(config).is_err());
}

#[test]
fn greyscale_images_are_rejected() {
    let preprocess = Preprocess::new(helpers::tiny_config().preprocess).unwrap();
    let image = ndarray::ArrayD::<f32>::zeros(ndarray::IxDyn(&[12, 12]));
    let err = preprocess.train_image(&image, &mut StdRng::seed_from_u64(0)).unwrap_err();
    assert!(matches!(err, Error::Contract(_)));
}
