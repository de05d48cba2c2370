use std::sync::Arc;

use approx::assert_abs_diff_eq;
use ferrite_resnet::config::{MetaConfig, RunConfig};
use ferrite_resnet::serve::Classifier;
use ferrite_resnet::Error;

#[path = "./helpers.rs"]
mod helpers;

fn classifier(work: &std::path::Path, config: &RunConfig) -> Classifier {
    let meta = MetaConfig::new(work, vec!["bags".to_owned(), "hats".to_owned(), "shoes".to_owned()]);
    meta.save().unwrap();
    Classifier::new(Arc::new(meta), config).unwrap()
}

fn images(count: usize) -> Vec<ndarray::ArrayD<f32>> {
    (0..count)
        .map(|n| helpers::solid(10 + n % 3, 12, [n as f32 * 20.0, 100.0, 50.0]))
        .collect()
}

#[test]
fn every_image_gets_exactly_one_row() {
    let work = tempfile::tempdir().unwrap();
    let classifier = classifier(work.path(), &helpers::tiny_config());

    let probs = classifier.classify(images(5)).unwrap();
    assert_eq!(probs.dim(), (5, 3));
    for row in probs.rows() {
        assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-4);
        assert!(row.iter().all(|&p| p >= 0.0));
    }
}

#[test]
fn a_request_smaller_than_one_full_batch_drains_completely() {
    let work = tempfile::tempdir().unwrap();
    let config = helpers::tiny_config().with_batch_size(64).with_test_crops(4);
    let classifier = classifier(work.path(), &config);

    let probs = classifier.classify(images(5)).unwrap();
    assert_eq!(probs.dim(), (5, 3));
    assert_eq!(classifier.in_flight(), 0);
    assert_eq!(classifier.classify(Vec::new()).unwrap().nrows(), 0);
}

#[test]
fn requests_larger_than_every_queue_combined_complete() {
    let work = tempfile::tempdir().unwrap();
    let classifier = Arc::new(classifier(work.path(), &helpers::tiny_config()));

    // Producer, batch and consumer queues together hold well under 100 images.
    let (tx, rx) = std::sync::mpsc::channel();
    let worker = classifier.clone();
    std::thread::spawn(move || {
        tx.send(worker.classify(images(200)).map(|probs| probs.nrows())).unwrap();
    });
    let rows = rx
        .recv_timeout(std::time::Duration::from_secs(120))
        .expect("classification of 200 images did not finish")
        .unwrap();
    assert_eq!(rows, 200);
    assert_eq!(classifier.in_flight(), 0);
    // Later requests are not blocked behind it.
    assert_eq!(classifier.classify(images(3)).unwrap().nrows(), 3);
}

#[test]
fn an_empty_request_returns_no_rows() {
    let work = tempfile::tempdir().unwrap();
    let classifier = classifier(work.path(), &helpers::tiny_config());
    assert_eq!(classifier.classify(Vec::new()).unwrap().dim(), (0, 3));
    // The pipeline is still usable afterwards.
    assert_eq!(classifier.classify(images(1)).unwrap().nrows(), 1);
}

#[test]
fn consecutive_requests_of_any_size_drain_cleanly() {
    let work = tempfile::tempdir().unwrap();
    let classifier = classifier(work.path(), &helpers::tiny_config());
    // More images than any queue holds at once, then sizes around the test
    // batch size of two images.
    for count in [20, 1, 2, 3, 0, 4] {
        let probs = classifier.classify(images(count)).unwrap();
        assert_eq!(probs.nrows(), count);
    }
}

#[test]
fn centred_crops_give_the_same_answer_twice() {
    let work = tempfile::tempdir().unwrap();
    let mut config = helpers::tiny_config();
    config.preprocess.random_test_crops = false;
    let classifier = classifier(work.path(), &config);

    let first = classifier.classify(images(3)).unwrap();
    let second = classifier.classify(images(3)).unwrap();
    for (a, b) in first.iter().zip(second.iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
    }
}

#[test]
fn get_reports_top_classes_per_source() {
    let work = tempfile::tempdir().unwrap();
    let images = tempfile::tempdir().unwrap();
    helpers::write_dataset(images.path(), &["x"], 2);
    let mut config = helpers::tiny_config();
    config.serve.top_k = 2;
    let classifier = classifier(work.path(), &config);

    let sources: Vec<String> = ["img_00.png", "img_01.png"]
        .iter()
        .map(|name| images.path().join("x").join(name).to_string_lossy().into_owned())
        .collect();
    let predictions = classifier.get(&sources).unwrap();
    assert_eq!(predictions.len(), 2);
    for (prediction, source) in predictions.iter().zip(&sources) {
        assert_eq!(&prediction.source, source);
        assert_eq!(prediction.classes.len(), 2);
        assert!(prediction.classes[0].1 >= prediction.classes[1].1);
        let json = prediction.classes_json();
        let first = json.as_object().unwrap().keys().next().unwrap().clone();
        assert_eq!(first, prediction.classes[0].0);
    }
}

#[test]
fn a_missing_source_fails_the_whole_call() {
    let work = tempfile::tempdir().unwrap();
    let classifier = classifier(work.path(), &helpers::tiny_config());
    let err = classifier.get(&["/nonexistent/image.png".to_owned()]).unwrap_err();
    assert!(matches!(err, Error::Io(_) | Error::Image(_)));
}

#[test]
fn images_with_the_wrong_channel_count_are_rejected() {
    let work = tempfile::tempdir().unwrap();
    let classifier = classifier(work.path(), &helpers::tiny_config());
    let grey = ndarray::ArrayD::<f32>::zeros(ndarray::IxDyn(&[10, 10, 1]));
    assert!(matches!(classifier.classify(vec![grey]), Err(Error::Contract(_))));
}

#[test]
fn inconsistent_configs_are_rejected_before_building() {
    let work = tempfile::tempdir().unwrap();
    let mut config = helpers::tiny_config();
    config.consumer.num_test_crops = 3;
    let meta = MetaConfig::new(work.path(), vec!["a".to_owned()]);
    assert!(matches!(Classifier::new(Arc::new(meta), &config), Err(Error::Contract(_))));
}
