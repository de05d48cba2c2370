use std::fs;

use ferrite_resnet::config::MetaConfig;
use ferrite_resnet::Error;

#[test]
fn train_registers_sorted_class_directories() {
    let images = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    for class in ["shoes", "bags", ".cache", "hats"] {
        fs::create_dir(images.path().join(class)).unwrap();
    }
    fs::write(images.path().join("README.txt"), "not a class").unwrap();

    let meta = MetaConfig::train(images.path(), work.path().join("run")).unwrap();
    assert_eq!(meta.class_names(), &["bags", "hats", "shoes"]);
    assert_eq!(meta.label_of("hats"), Some(1));
    assert_eq!(meta.label_of("socks"), None);

    let text = fs::read_to_string(meta.class_names_path()).unwrap();
    assert_eq!(text, "bags\nhats\nshoes\n");
}

#[test]
fn test_reloads_what_train_saved() {
    let images = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    for class in ["b", "a"] {
        fs::create_dir(images.path().join(class)).unwrap();
    }
    let trained = MetaConfig::train(images.path(), work.path()).unwrap();
    let loaded = MetaConfig::test(work.path()).unwrap();
    assert_eq!(trained, loaded);
    assert_eq!(loaded.num_classes(), 2);
}

#[test]
fn comma_separated_class_names_are_accepted() {
    let work = tempfile::tempdir().unwrap();
    fs::write(work.path().join(MetaConfig::CLASS_NAMES_FILENAME), "cups,plates, forks\n").unwrap();
    let meta = MetaConfig::test(work.path()).unwrap();
    assert_eq!(meta.class_names(), &["cups", "plates", "forks"]);
}

#[test]
fn missing_class_names_file_is_reported() {
    let work = tempfile::tempdir().unwrap();
    let err = MetaConfig::test(work.path()).unwrap_err();
    assert!(matches!(err, Error::MissingPrerequisite(_)));
}

#[test]
fn an_empty_registry_cannot_build_a_network() {
    let meta = MetaConfig::new("/tmp/unused", Vec::new());
    assert!(matches!(meta.require_classes(), Err(Error::MissingPrerequisite(_))));
}

#[test]
fn class_names_that_would_not_read_back_are_rejected() {
    for bad in ["shoes,boots", " hats", "bags "] {
        let images = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        fs::create_dir(images.path().join("socks")).unwrap();
        fs::create_dir(images.path().join(bad)).unwrap();
        let err = MetaConfig::train(images.path(), work.path()).unwrap_err();
        assert!(matches!(err, Error::Contract(_)), "{bad:?} gave {err}");
    }
}

#[test]
fn saved_names_read_back_unchanged() {
    let images = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    for class in ["mugs & cups", "t-shirts", "hats"] {
        fs::create_dir(images.path().join(class)).unwrap();
    }
    let trained = MetaConfig::train(images.path(), work.path()).unwrap();
    assert_eq!(MetaConfig::test(work.path()).unwrap().class_names(), trained.class_names());
}
