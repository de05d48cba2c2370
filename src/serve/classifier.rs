use std::sync::Arc;
use std::thread;

use ndarray::{Array2, ArrayView1, Ix2};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use tracing::{debug, info};

use crate::config::meta::MetaConfig;
use crate::config::run_config::RunConfig;
use crate::error::{Error, Result};
use crate::graph::{Fetch, Node, Phase, Request, Tensor};
use crate::image::decode;
use crate::math::tensor::{concat_rows, top_k};
use crate::network::architecture::ArchitectureFn;
use crate::network::net::Net;
use crate::pipeline::{Batch, Consumer, Postprocess, Preprocess, QueueProducer};
use crate::util::Timer;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    /// Classes reported per image.
    pub top_k: usize,
    /// Decimal places probabilities are rounded to.
    pub decimals: u32,
}

impl Default for ServeConfig {
    fn default() -> Self {
        ServeConfig { top_k: 6, decimals: 4 }
    }
}

/// Top classes of one image, most probable first.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub source: String,
    pub classes: Vec<(String, f64)>,
}

impl Prediction {
    /// `{class: probability}` in descending order of probability.
    pub fn classes_json(&self) -> Json {
        let map: Map<String, Json> = self
            .classes
            .iter()
            .map(|(name, prob)| (name.clone(), Json::from(*prob)))
            .collect();
        Json::Object(map)
    }
}

struct Pipeline {
    net: Net,
    producer: QueueProducer,
    batch: Batch,
    consumer: Consumer,
    prob: Node<Tensor>,
}

const PROB_KEY: &str = "prob";

/// Fetches probability chunks until the consumer hands back an empty one.
fn drain_chunks(net: &Net, drain: &Request) -> Result<Vec<Tensor>> {
    let mut chunks = Vec::new();
    loop {
        let chunk: Tensor = net.online(drain.clone())?.take(PROB_KEY)?;
        if chunk.shape().first().copied().unwrap_or(0) == 0 {
            return Ok(chunks);
        }
        debug!(rows = chunk.shape()[0], "drained");
        chunks.push(chunk);
    }
}

/// Long-lived serving pipeline: queue producer, test preprocessing,
/// in-order batching, the network in test phase and a consumer draining
/// one probability row per submitted image.
///
/// Requests are serialised: the sizing counters of the batch and consumer
/// stages belong to one request at a time.
pub struct Classifier {
    meta: Arc<MetaConfig>,
    config: ServeConfig,
    channels: usize,
    pipeline: Mutex<Pipeline>,
}

impl Classifier {
    /// ResNet described by `config.resnet`, restored from the working directory.
    pub fn new(meta: Arc<MetaConfig>, config: &RunConfig) -> Result<Self> {
        Self::with_architecture(meta, config, config.resnet.clone().architecture())
    }

    pub fn with_architecture(meta: Arc<MetaConfig>, config: &RunConfig, arch: ArchitectureFn) -> Result<Self> {
        config.validate()?;
        let _timer = Timer::start("Building serving pipeline");

        let mut net = Net::new(meta.clone(), config.net.clone(), arch, false)?;
        let mut producer = QueueProducer::new(config.queue_producer.clone());
        let preprocess = Preprocess::new(config.preprocess.clone())?;
        let mut batch = Batch::new(config.batch.clone());
        let mut consumer = Consumer::new(config.consumer.clone());

        let image_shape = vec![None, None, Some(config.preprocess.net_channels)];
        let blob = {
            let graph = net.graph();
            producer
                .blob(graph, "image", Some(image_shape))?
                .func(|blob| preprocess.test(blob))?
                .func(|blob| batch.test(graph, blob))?
        };
        let outputs = net.build(blob)?;
        let values = consumer.build(net.graph(), Postprocess::blob(vec![outputs.prob])?)?;
        let prob = values.values()?[0].clone();

        // Park every runner until the first request seeds a total.
        net.run(
            Phase::Test,
            batch.kwargs(0, Phase::Test)?.merge(consumer.kwargs(0)?),
        )?;
        net.start(Phase::Test)?;

        Ok(Classifier {
            meta,
            config: config.serve.clone(),
            channels: config.preprocess.net_channels,
            pipeline: Mutex::new(Pipeline {
                net,
                producer,
                batch,
                consumer,
                prob,
            }),
        })
    }

    pub fn meta(&self) -> &MetaConfig {
        &self.meta
    }

    /// Images waiting in the producer plus result chunks not yet drained.
    /// Zero between requests.
    pub fn in_flight(&self) -> usize {
        let pipeline = self.pipeline.lock();
        pipeline.producer.pending() + pipeline.consumer.pending()
    }

    /// Class probabilities of every image, one row per image in input order.
    pub fn classify(&self, images: Vec<Tensor>) -> Result<Array2<f32>> {
        let num_classes = self.meta.num_classes();
        let total = images.len();
        for image in &images {
            let shape = image.shape();
            if shape.len() != 3 || shape[2] != self.channels || shape[0] == 0 || shape[1] == 0 {
                return Err(Error::contract(format!(
                    "expected a non-empty (height, width, {}) image, got {:?}",
                    self.channels, shape
                )));
            }
        }
        let pipeline = self.pipeline.lock();
        let Pipeline {
            net,
            producer,
            batch,
            consumer,
            prob,
        } = &*pipeline;

        let pushes = images
            .into_iter()
            .map(|image| producer.kwargs(image))
            .collect::<Result<Vec<_>>>()?;
        net.online(batch.kwargs(total, Phase::Test)?.merge(consumer.kwargs(total)?))?;

        // Every stage downstream of the producer is bounded, so images are
        // pushed from a second thread while this one drains the consumer.
        let graph = net.graph();
        let drain = Request::new().fetch(Fetch::named(PROB_KEY, prob));
        let (pushed, drained) = thread::scope(|scope| {
            let pusher = scope.spawn(move || {
                let pushed = pushes.into_iter().try_for_each(|request| graph.run(request).map(drop));
                if pushed.is_err() {
                    graph.close();
                }
                pushed
            });
            let drained = drain_chunks(net, &drain);
            if drained.is_err() {
                // Unblocks a pusher stuck on a full queue.
                graph.close();
            }
            let pushed = pusher
                .join()
                .unwrap_or_else(|_| Err(Error::RunnerFailed("image pusher panicked".to_owned())));
            (pushed, drained)
        });
        pushed?;
        let chunks = drained?;
        let probs = concat_rows(&chunks, &[num_classes])?.into_dimensionality::<Ix2>()?;
        if probs.nrows() != total {
            return Err(Error::contract(format!(
                "drained {} rows for {} images",
                probs.nrows(),
                total
            )));
        }
        Ok(probs)
    }

    /// The `top_k` most probable classes of one probability row, rounded.
    pub fn top_classes(&self, prob: ArrayView1<f32>) -> Vec<(String, f64)> {
        let scale = 10f64.powi(self.config.decimals as i32);
        let values: Vec<f32> = prob.to_vec();
        top_k(&values, self.config.top_k)
            .into_iter()
            .filter_map(|index| {
                let name = self.meta.class_names().get(index)?;
                Some((name.clone(), (values[index] as f64 * scale).round() / scale))
            })
            .collect()
    }

    /// Loads every URL or path, classifies them together and returns their
    /// top classes in input order. Any failed load fails the whole call.
    pub fn get(&self, sources: &[String]) -> Result<Vec<Prediction>> {
        let _timer = Timer::start(format!("Classifying {} images", sources.len()));
        let images = sources
            .iter()
            .map(|source| decode::load_source(source))
            .collect::<Result<Vec<_>>>()?;
        let probs = self.classify(images)?;
        let predictions = sources
            .iter()
            .zip(probs.rows())
            .map(|(source, row)| Prediction {
                source: source.clone(),
                classes: self.top_classes(row),
            })
            .collect::<Vec<_>>();
        info!(images = predictions.len(), "classified");
        Ok(predictions)
    }
}
