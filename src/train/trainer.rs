use std::path::Path;
use std::sync::Arc;

use crate::config::meta::MetaConfig;
use crate::config::run_config::RunConfig;
use crate::error::Result;
use crate::graph::Phase;
use crate::network::architecture::ArchitectureFn;
use crate::network::net::Net;
use crate::pipeline::{Batch, FileProducer, Preprocess};
use crate::train::loop_fn::train_loop;
use crate::train::step_stats::StepStats;
use crate::train::train_config::TrainConfig;
use crate::util::Timer;

/// Wires the training graph: file readers for both splits, train and test
/// preprocessing, shuffled and in-order batching, and a network that
/// switches between the two branches with the phase register.
pub fn build_training_net(
    meta: Arc<MetaConfig>,
    image_dir: &Path,
    config: &RunConfig,
    arch: ArchitectureFn,
) -> Result<Net> {
    config.validate()?;
    let _timer = Timer::start("Building training pipeline");

    let mut net = Net::new(meta.clone(), config.net.clone(), arch, true)?;
    let producer = FileProducer::new(config.file_producer.clone());
    let preprocess = Preprocess::new(config.preprocess.clone())?;
    let mut batch = Batch::new(config.batch.clone());
    let check = config.train.check_images;

    let graph = net.graph();
    let train_blob = producer
        .train_blob(graph, &meta, image_dir, check)?
        .func(|blob| preprocess.train(blob))?
        .func(|blob| batch.train(graph, blob))?;
    let test_blob = producer
        .test_blob(graph, &meta, image_dir, check)?
        .func(|blob| preprocess.test(blob))?
        .func(|blob| batch.test(graph, blob))?;

    let blob = net.case_blob(vec![(Phase::Train, train_blob), (Phase::Test, test_blob)])?;
    net.build(blob)?;
    Ok(net)
}

/// Builds the training net, fills its queues and runs the training loop.
///
/// `configure` can attach a progress channel or a stop flag before the loop
/// starts.
pub fn train_network(
    meta: Arc<MetaConfig>,
    image_dir: &Path,
    config: &RunConfig,
    arch: ArchitectureFn,
    configure: impl FnOnce(&mut TrainConfig),
) -> Result<Option<StepStats>> {
    let net = build_training_net(meta, image_dir, config, arch)?;
    net.start(Phase::Train)?;
    let mut train_config = TrainConfig::from(&config.train);
    configure(&mut train_config);
    train_loop(&net, &train_config)
}
