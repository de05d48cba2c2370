use std::sync::Arc;

use ferrite_resnet::config::MetaConfig;
use ferrite_resnet::graph::{Fetch, Labels, Phase, Placeholder, Request, Tensor};
use ferrite_resnet::network::{
    Architecture, ArchitectureInput, InitSource, Initializer, LearningModes, Net, ResNet, TrainReport,
};
use ferrite_resnet::pipeline::{Blob, SimpleProducer};
use ferrite_resnet::Error;
use ndarray::{Array1, Array2, Array4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[path = "./helpers.rs"]
mod helpers;

fn all_trainable() -> ResNet {
    let modes = LearningModes { normal: 1.0, slow: 1.0 };
    let mut init = Initializer::with_seed(InitSource::Default, modes, 11);
    let input = ArchitectureInput {
        in_channels: 3,
        num_classes: 3,
    };
    ResNet::build(helpers::tiny_spec(), &mut init, &input).unwrap()
}

fn random_input(rng: &mut StdRng) -> Array4<f32> {
    Array4::from_shape_fn((2, 8, 8, 3), |_| rng.gen_range(-1.0..1.0))
}

// Scalar objective `sum(logits * weights)`, so `d_logits = weights`.
fn objective(net: &ResNet, x: &Array4<f32>, weights: &Array2<f32>) -> f64 {
    let (out, _) = net.forward(x).unwrap();
    (&out.logits * weights).iter().map(|&v| v as f64).sum()
}

fn perturb(net: &mut ResNet, name: &str, index: usize, delta: f32) {
    let param = net
        .parameters_mut()
        .into_iter()
        .find(|p| p.name == name)
        .unwrap();
    *param.value.iter_mut().nth(index).unwrap() += delta;
}

#[test]
fn backward_matches_finite_differences() {
    let mut rng = StdRng::seed_from_u64(3);
    let mut net = all_trainable();
    let x = random_input(&mut rng);
    let weights = Array2::from_shape_fn((2, 3), |_| rng.gen_range(-1.0..1.0));

    let (_, tape) = net.forward(&x).unwrap();
    let grads = net.backward(&tape, &weights).unwrap();

    let eps = 1e-3f32;
    for name in ["fc/weight", "fc/bias", "res3a_branch2c/weight", "scale2a_branch2b/scale", "conv1/weight"] {
        let grad = grads.get(name).unwrap_or_else(|| panic!("no gradient for {name}"));
        for index in [0, grad.len() / 2, grad.len() - 1] {
            perturb(&mut net, name, index, eps);
            let plus = objective(&net, &x, &weights);
            perturb(&mut net, name, index, -2.0 * eps);
            let minus = objective(&net, &x, &weights);
            perturb(&mut net, name, index, eps);

            let numeric = (plus - minus) / (2.0 * eps as f64);
            let analytic = *grad.iter().nth(index).unwrap() as f64;
            let tolerance = 2e-2 + 5e-2 * numeric.abs().max(analytic.abs());
            assert!(
                (numeric - analytic).abs() <= tolerance,
                "{name}[{index}]: numeric {numeric} vs analytic {analytic}"
            );
        }
    }
}

#[test]
fn statistics_never_get_gradients() {
    let mut rng = StdRng::seed_from_u64(4);
    let net = all_trainable();
    let x = random_input(&mut rng);
    let (_, tape) = net.forward(&x).unwrap();
    let grads = net.backward(&tape, &Array2::ones((2, 3))).unwrap();
    assert!(grads.keys().all(|name| !name.ends_with("/mean") && !name.ends_with("/variance")));
    for param in net.parameters() {
        assert_eq!(grads.contains_key(&param.name), param.trainable, "{}", param.name);
    }
}

/// A training net fed directly with a batch of crops and their labels.
struct Fed {
    net: Net,
    producer: SimpleProducer,
    labels: Placeholder<Labels>,
    _work: tempfile::TempDir,
}

fn fed_net() -> Fed {
    let work = tempfile::tempdir().unwrap();
    let meta = MetaConfig::new(work.path(), vec!["a".to_owned(), "b".to_owned(), "c".to_owned()]);
    let mut config = helpers::tiny_config().net;
    config.adam_epsilon = 1e-8;
    let mut net = Net::new(Arc::new(meta), config, helpers::tiny_spec().architecture(), true).unwrap();

    let mut producer = SimpleProducer::new();
    let images = producer.blob("crops", Some(vec![None, Some(8), Some(8), Some(3)]));
    let labels = Placeholder::<Labels>::new("labels");
    let blob = Blob::from_images_labels(images.images().unwrap().to_vec(), labels.node()).unwrap();
    net.build(blob).unwrap();
    net.set_phase(Phase::Train);
    Fed {
        net,
        producer,
        labels,
        _work: work,
    }
}

impl Fed {
    fn train_step(&self, images: Tensor, labels: &[i64]) -> Result<TrainReport, Error> {
        let outputs = self.net.outputs()?;
        let request = self
            .producer
            .kwargs(images)?
            .feed_entry(self.labels.feed(Array1::from(labels.to_vec()).into_dyn())?)
            .fetch(Fetch::named("train", outputs.train_op.as_ref().unwrap()));
        self.net.online(request)?.record("train")
    }

    fn snapshot(&self, name: &str) -> ndarray::ArrayD<f32> {
        let model = self.net.model().unwrap().read();
        model.arch.parameters().into_iter().find(|p| p.name == name).unwrap().value.clone()
    }
}

fn batch(rng: &mut StdRng) -> Tensor {
    Array4::from_shape_fn((4, 8, 8, 3), |(n, _, _, c)| (n * 3 + c) as f32 * 0.1 + rng.gen_range(0.0..0.05)).into_dyn()
}

#[test]
fn a_train_step_moves_normal_parameters_only() {
    let mut rng = StdRng::seed_from_u64(9);
    let fed = fed_net();
    let slow_before = fed.snapshot("res2a_branch2a/weight");
    let stem_before = fed.snapshot("conv1/weight");
    let fc_before = fed.snapshot("fc/weight");

    let report = fed.train_step(batch(&mut rng), &[0, 1, 2, 0]).unwrap();
    assert_eq!(report.global_step, 1);
    assert!(report.loss.is_finite());
    assert_eq!(fed.net.global_step().unwrap(), 1);

    assert_eq!(fed.snapshot("res2a_branch2a/weight"), slow_before);
    assert_eq!(fed.snapshot("conv1/weight"), stem_before);
    assert_ne!(fed.snapshot("fc/weight"), fc_before);
}

#[test]
fn repeated_steps_fit_a_fixed_batch() {
    let mut rng = StdRng::seed_from_u64(10);
    let fed = fed_net();
    let images = batch(&mut rng);
    let labels = [0, 1, 2, 1];

    let first = fed.train_step(images.clone(), &labels).unwrap();
    let mut last = first.clone();
    for _ in 0..40 {
        last = fed.train_step(images.clone(), &labels).unwrap();
    }
    assert_eq!(last.global_step, 41);
    assert!(last.loss < first.loss, "loss went from {} to {}", first.loss, last.loss);
}

#[test]
fn an_empty_training_batch_is_rejected() {
    let fed = fed_net();
    let empty = ndarray::ArrayD::<f32>::zeros(ndarray::IxDyn(&[0, 8, 8, 3]));
    let err = fed.train_step(empty, &[]).unwrap_err();
    assert!(matches!(err, Error::Contract(_)));
    assert_eq!(fed.net.global_step().unwrap(), 0);
}

#[test]
fn mismatched_label_count_is_rejected() {
    let mut rng = StdRng::seed_from_u64(12);
    let fed = fed_net();
    let err = fed.train_step(batch(&mut rng), &[0, 1]).unwrap_err();
    assert!(matches!(err, Error::Contract(_)));
}

#[test]
fn build_runs_only_once() {
    let mut fed = fed_net();
    let mut producer = SimpleProducer::new();
    let blob = producer.blob("again", Some(vec![None, Some(8), Some(8), Some(3)]));
    assert!(matches!(fed.net.build(blob), Err(Error::Contract(_))));
}
