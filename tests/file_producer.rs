use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use ferrite_resnet::config::MetaConfig;
use ferrite_resnet::graph::{zip, Feeds, Graph};
use ferrite_resnet::pipeline::producer::{in_subsample, stable_hash};
use ferrite_resnet::pipeline::FileProducer;
use ferrite_resnet::Error;
use proptest::prelude::*;

#[path = "./helpers.rs"]
mod helpers;

fn producer() -> FileProducer {
    FileProducer::new(helpers::tiny_config().file_producer)
}

#[test]
fn splits_are_disjoint_and_cover_every_file() {
    let images = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    helpers::write_dataset(images.path(), &["a", "b"], 8);
    fs::write(images.path().join("a").join("notes.txt"), "skip me").unwrap();
    let meta = MetaConfig::train(images.path(), work.path()).unwrap();

    let producer = producer();
    let train = producer.list_files(&meta, images.path(), false).unwrap();
    let test = producer.list_files(&meta, images.path(), true).unwrap();

    // img_00 and img_04 hash into the test split for a subsample of 4.
    assert_eq!(test.len(), 4);
    assert_eq!(train.len(), 12);
    let train_paths: BTreeSet<PathBuf> = train.iter().map(|(path, _)| path.clone()).collect();
    assert!(test.iter().all(|(path, _)| !train_paths.contains(path)));
    assert!(test
        .iter()
        .all(|(path, _)| in_subsample(&path.file_name().unwrap().to_string_lossy(), 4)));

    // Class order, then path order.
    let labels: Vec<i64> = test.iter().map(|(_, label)| *label).collect();
    assert_eq!(labels, vec![0, 0, 1, 1]);
    assert!(test[0].0.ends_with("a/img_00.png"));
    assert!(test[1].0.ends_with("a/img_04.png"));
}

#[test]
fn nested_directories_are_walked() {
    let images = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    helpers::write_dataset(&images.path().join("a").join("deeper"), &["x"], 2);
    let meta = MetaConfig::new(work.path(), vec!["a".to_owned()]);

    let files = producer().list_files(&meta, images.path(), false).unwrap();
    assert_eq!(files.len(), 1);
    assert!(files[0].0.ends_with("deeper/x/img_01.png"));
}

#[test]
fn check_deletes_unreadable_files() {
    let images = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    helpers::write_dataset(images.path(), &["a"], 3);
    let corrupt = images.path().join("a").join("img_02.png");
    fs::write(&corrupt, b"definitely not a png").unwrap();
    let meta = MetaConfig::train(images.path(), work.path()).unwrap();

    let files = producer().list_files(&meta, images.path(), false).unwrap();
    assert_eq!(files.len(), 2);
    let kept = FileProducer::check(files);
    assert_eq!(kept.len(), 1);
    assert!(kept[0].0.ends_with("img_01.png"));
    assert!(!corrupt.exists());
}

#[test]
fn an_empty_split_is_a_missing_prerequisite() {
    let images = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    // img_01 never lands in the test split.
    helpers::write_dataset(images.path(), &["a"], 2);
    fs::remove_file(images.path().join("a").join("img_00.png")).unwrap();
    let meta = MetaConfig::train(images.path(), work.path()).unwrap();

    let graph = Graph::new();
    let err = producer().test_blob(&graph, &meta, images.path(), false).unwrap_err();
    assert!(matches!(err, Error::MissingPrerequisite(_)));
}

#[test]
fn test_lane_yields_decoded_images_with_labels() {
    let images = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    helpers::write_dataset(images.path(), &["a", "b"], 8);
    let meta = MetaConfig::train(images.path(), work.path()).unwrap();

    let graph = Graph::new();
    let blob = producer().test_blob(&graph, &meta, images.path(), false).unwrap();
    assert_eq!(blob.len(), 1);
    graph.start_queue_runners().unwrap();

    let (image, label) = blob.single_pair().unwrap();
    let mut seen = Vec::new();
    for _ in 0..4 {
        let pair = zip("pair", &image, &label);
        let (image, label) = graph.eval(&pair, Feeds::new()).unwrap();
        assert_eq!(image.shape(), &[10, 12, 3]);
        seen.push(label.iter().next().copied().unwrap());
    }
    assert_eq!(seen, vec![0, 0, 1, 1]);
}

#[test]
fn zero_subsample_size_is_rejected() {
    let mut config = helpers::tiny_config().file_producer;
    config.subsample_size = 0;
    let meta = MetaConfig::new("/tmp/unused", vec!["a".to_owned()]);
    let err = FileProducer::new(config).list_files(&meta, Path::new("/nonexistent"), true);
    assert!(matches!(err, Err(Error::Contract(_))));
}

#[test]
fn fnv_reference_values() {
    assert_eq!(stable_hash(""), 0xcbf2_9ce4_8422_2325);
    assert_eq!(stable_hash("a"), 0xaf63_dc4c_8601_ec8c);
}

proptest! {
    #[test]
    fn membership_depends_on_the_name_alone(name in "[a-z0-9_]{1,16}\\.jpg", size in 1u64..128) {
        prop_assert_eq!(in_subsample(&name, size), in_subsample(&name.clone(), size));
        prop_assert_eq!(in_subsample(&name, size), stable_hash(&name) % size == 0);
        prop_assert!(in_subsample(&name, 1));
    }
}
