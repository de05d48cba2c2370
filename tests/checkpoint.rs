use std::collections::BTreeMap;

use ferrite_resnet::network::{
    Architecture, ArchitectureInput, Checkpoint, InitSource, Initializer, LearningModes, PretrainedArchive, ResNet,
};
use ferrite_resnet::Error;
use ndarray::{ArrayD, IxDyn};

#[path = "./helpers.rs"]
mod helpers;

const INPUT: ArchitectureInput = ArchitectureInput {
    in_channels: 3,
    num_classes: 2,
};

fn build(source: InitSource, seed: u64) -> ResNet {
    let mut init = Initializer::with_seed(source, LearningModes::default(), seed);
    ResNet::build(helpers::tiny_spec(), &mut init, &INPUT).unwrap()
}

fn classes() -> Vec<String> {
    vec!["a".to_owned(), "b".to_owned()]
}

#[test]
fn restore_returns_saved_weights_and_step() {
    let work = tempfile::tempdir().unwrap();
    let checkpoint = Checkpoint::new(work.path());
    assert!(!checkpoint.exists());

    let saved = build(InitSource::Default, 1);
    checkpoint.save(saved.parameters(), 42, &classes()).unwrap();
    assert!(checkpoint.exists());
    assert_eq!(checkpoint.load_meta().unwrap().global_step, 42);

    let mut restored = build(InitSource::Restore, 2);
    let step = checkpoint.restore(restored.parameters_mut(), &classes()).unwrap();
    assert_eq!(step, 42);
    for (a, b) in saved.parameters().iter().zip(restored.parameters()) {
        assert_eq!(a.name, b.name);
        assert_eq!(a.value, b.value);
    }
}

#[test]
fn class_mismatch_is_a_contract_violation() {
    let work = tempfile::tempdir().unwrap();
    let checkpoint = Checkpoint::new(work.path());
    checkpoint.save(build(InitSource::Default, 1).parameters(), 1, &classes()).unwrap();

    let mut other = build(InitSource::Restore, 1);
    let err = checkpoint
        .restore(other.parameters_mut(), &["a".to_owned(), "c".to_owned()])
        .unwrap_err();
    assert!(matches!(err, Error::Contract(_)));
}

#[test]
fn shape_mismatch_is_a_contract_violation() {
    let work = tempfile::tempdir().unwrap();
    let checkpoint = Checkpoint::new(work.path());
    checkpoint.save(build(InitSource::Default, 1).parameters(), 1, &classes()).unwrap();

    let wider = ArchitectureInput {
        in_channels: 3,
        num_classes: 5,
    };
    let mut init = Initializer::with_seed(InitSource::Restore, LearningModes::default(), 1);
    let mut other = ResNet::build(helpers::tiny_spec(), &mut init, &wider).unwrap();
    let err = checkpoint.restore(other.parameters_mut(), &classes()).unwrap_err();
    assert!(matches!(err, Error::Contract(_)));
}

#[test]
fn pretrained_entries_seed_matching_layers() {
    let mut arrays = BTreeMap::new();
    let stem = ArrayD::from_elem(IxDyn(&[3, 3, 3, 4]), 0.25f32);
    arrays.insert(PretrainedArchive::key("conv1", 0), stem.clone());
    arrays.insert(PretrainedArchive::key("bn_conv1", 1), ArrayD::from_elem(IxDyn(&[4]), 2.0f32));
    let net = build(InitSource::Pretrained(PretrainedArchive::from_arrays(arrays)), 5);

    let find = |name: &str| net.parameters().into_iter().find(|p| p.name == name).unwrap().value.clone();
    assert_eq!(find("conv1/weight"), stem);
    assert_eq!(find("bn_conv1/variance"), ArrayD::from_elem(IxDyn(&[4]), 2.0f32));
    // Entries absent from the archive fall back to the defaults.
    assert_eq!(find("conv1/bias"), ArrayD::from_elem(IxDyn(&[4]), 0.1f32));
}

#[test]
fn pretrained_shape_mismatch_is_rejected() {
    let mut arrays = BTreeMap::new();
    arrays.insert(PretrainedArchive::key("conv1", 0), ArrayD::zeros(IxDyn(&[7, 7, 3, 64])));
    let mut init = Initializer::with_seed(
        InitSource::Pretrained(PretrainedArchive::from_arrays(arrays)),
        LearningModes::default(),
        1,
    );
    let result = ResNet::build(helpers::tiny_spec(), &mut init, &INPUT);
    assert!(matches!(result, Err(Error::Contract(_))));
}
