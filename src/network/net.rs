use std::path::PathBuf;
use std::sync::Arc;

use ndarray::{Array1, Array2, Array3, Axis, Ix4};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::meta::MetaConfig;
use crate::error::{Error, Result};
use crate::graph::{self, Fetched, Graph, Labels, Node, Phase, Request, Tensor};
use crate::loss::cross_entropy::CrossEntropyLoss;
use crate::math::tensor::{one_hot, softmax_rows};
use crate::network::architecture::{Architecture, ArchitectureFn, ArchitectureInput, Tape};
use crate::network::checkpoint::Checkpoint;
use crate::network::params::{InitSource, Initializer, LearningModes, PretrainedArchive};
use crate::network::stats::{make_stat, Stats, TrainReport};
use crate::optim::{Adam, LearningRateSchedule};
use crate::pipeline::blob::Blob;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    pub learning_rate: f64,
    pub learning_modes: LearningModes,
    /// Staircase decay period in steps; 0 disables decay.
    pub decay_steps: u64,
    pub decay_rate: f64,
    /// L2 coefficient on convolution weights; 0 disables it.
    pub weight_decay: f64,
    pub adam_epsilon: f64,
    /// Crops per image in the test phase.
    pub num_test_crops: usize,
    /// Used when the input node carries no channel hint.
    pub in_channels: usize,
    /// Pretrained parameter archive; `None` starts from the default initialisers.
    pub pretrained_path: Option<PathBuf>,
    /// Fixed seed for the default initialisers.
    pub seed: Option<u64>,
}

impl Default for NetConfig {
    fn default() -> Self {
        NetConfig {
            learning_rate: 0.1,
            learning_modes: LearningModes::default(),
            decay_steps: 0,
            decay_rate: 1.0,
            weight_decay: 0.0,
            adam_epsilon: 1.0,
            num_test_crops: 4,
            in_channels: 3,
            pretrained_path: Some(PathBuf::from("archive/ResNet-50-params.npz")),
            seed: None,
        }
    }
}

impl NetConfig {
    pub fn schedule(&self) -> LearningRateSchedule {
        LearningRateSchedule {
            base: self.learning_rate,
            decay_steps: self.decay_steps,
            decay_rate: self.decay_rate,
        }
    }
}

/// Weights, optimizer state and step counter, shared by every node that
/// reads or trains the network.
pub struct Model {
    pub arch: Box<dyn Architecture>,
    pub optimizer: Adam,
    pub global_step: u64,
}

pub type SharedModel = Arc<RwLock<Model>>;

/// One forward pass with its crops folded back into per-image rows.
pub struct ForwardPass {
    /// Per-crop softmax, `(images, crops, classes)`.
    pub crop_probs: Array3<f32>,
    /// Crop-averaged probabilities, `(images, classes)`.
    pub prob: Array2<f32>,
    /// Crop-averaged pooled features, `(images, features)`.
    pub feat: Array2<f32>,
    /// `exp(-mean_k H(prob, prob_k))` per image; 1 when all crops agree.
    pub consistency: Array1<f32>,
    pub labels: Array1<i64>,
    tape: Option<Tape>,
}

impl ForwardPass {
    fn empty(num_classes: usize, feature_dim: usize, crops: usize) -> Self {
        ForwardPass {
            crop_probs: Array3::zeros((0, crops, num_classes)),
            prob: Array2::zeros((0, num_classes)),
            feat: Array2::zeros((0, feature_dim)),
            consistency: Array1::zeros(0),
            labels: Array1::zeros(0),
            tape: None,
        }
    }

    pub fn rows(&self) -> usize {
        self.prob.nrows()
    }
}

/// Nodes produced by [`Net::build`].
#[derive(Clone)]
pub struct NetOutputs {
    pub image: Node<Tensor>,
    pub label: Node<Labels>,
    pub forward: Node<Arc<ForwardPass>>,
    pub prob: Node<Tensor>,
    pub feat: Node<Tensor>,
    pub consistency: Node<Tensor>,
    pub stats: Node<Stats>,
    pub learning_rate: Node<f64>,
    /// Present when the net was created for training.
    pub train_op: Option<Node<TrainReport>>,
}

/// The network runtime: owns the execution graph and its phase register,
/// builds an injected architecture on top of one image/label pair, and
/// funnels every execution through [`Net::online`].
pub struct Net {
    meta: Arc<MetaConfig>,
    config: NetConfig,
    is_train: bool,
    arch_fn: Option<ArchitectureFn>,
    model: Option<SharedModel>,
    outputs: Option<NetOutputs>,
    graph: Graph,
}

fn labels_1d(labels: Labels) -> Result<Array1<i64>> {
    match labels.ndim() {
        0 | 1 => Ok(Array1::from_iter(labels.iter().copied())),
        n => Err(Error::contract(format!("labels must be a scalar or a vector, got rank {n}"))),
    }
}

/// Folds `(images * crops, width)` rows into their per-image mean.
fn rebatch_mean(rows: &Array2<f32>, crops: usize) -> Result<(Array3<f32>, Array2<f32>)> {
    let (n, width) = rows.dim();
    if n % crops != 0 {
        return Err(Error::contract(format!("{n} rows do not split into groups of {crops} crops")));
    }
    let grouped = rows
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order((n / crops, crops, width))?;
    let mean = grouped
        .mean_axis(Axis(1))
        .unwrap_or_else(|| Array2::zeros((0, width)));
    Ok((grouped, mean))
}

fn consistency(crop_probs: &Array3<f32>, prob: &Array2<f32>) -> Array1<f32> {
    let (images, crops, _) = crop_probs.dim();
    Array1::from_iter((0..images).map(|i| {
        let mean_entropy: f32 = crop_probs
            .index_axis(Axis(0), i)
            .outer_iter()
            .map(|crop| {
                -prob
                    .row(i)
                    .iter()
                    .zip(crop.iter())
                    .map(|(&p, &q)| p * q.max(f32::MIN_POSITIVE).ln())
                    .sum::<f32>()
            })
            .sum::<f32>()
            / crops.max(1) as f32;
        (-mean_entropy).exp()
    }))
}

impl Net {
    pub fn new(meta: Arc<MetaConfig>, config: NetConfig, arch_fn: ArchitectureFn, is_train: bool) -> Result<Net> {
        meta.require_classes()?;
        if config.num_test_crops == 0 {
            return Err(Error::contract("num_test_crops must be positive"));
        }
        Ok(Net {
            meta,
            config,
            is_train,
            arch_fn: Some(arch_fn),
            model: None,
            outputs: None,
            graph: Graph::new(),
        })
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn meta(&self) -> &MetaConfig {
        &self.meta
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    pub fn is_train(&self) -> bool {
        self.is_train
    }

    pub fn phase(&self) -> Phase {
        self.graph.phase()
    }

    pub fn set_phase(&self, phase: Phase) {
        self.graph.set_phase(phase);
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint::new(self.meta.working_dir())
    }

    pub fn model(&self) -> Result<&SharedModel> {
        self.model
            .as_ref()
            .ok_or_else(|| Error::missing("Net::build must be called first"))
    }

    pub fn outputs(&self) -> Result<&NetOutputs> {
        self.outputs
            .as_ref()
            .ok_or_else(|| Error::missing("Net::build must be called first"))
    }

    pub fn global_step(&self) -> Result<u64> {
        Ok(self.model()?.read().global_step)
    }

    /// Phase-dispatching node over `branches`; the first pair is the default.
    pub fn case<T>(&self, name: &str, branches: Vec<(Phase, Node<T>)>) -> Result<Node<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        graph::case(name, branches)
    }

    /// Position-wise [`case`](Self::case) over equally shaped blobs.
    pub fn case_blob(&self, branches: Vec<(Phase, Blob)>) -> Result<Blob> {
        let (_, first) = branches
            .first()
            .ok_or_else(|| Error::contract("case_blob needs at least one branch"))?;
        let len = first.len();
        let content = first.content();
        if branches.iter().any(|(_, blob)| blob.len() != len || blob.content() != content) {
            return Err(Error::contract("case_blob branches must carry the same kind and number of nodes"));
        }
        match first {
            Blob::ImageLabel { .. } => {
                let mut images = Vec::with_capacity(len);
                let mut labels = Vec::with_capacity(len);
                for position in 0..len {
                    let mut image_branches = Vec::with_capacity(branches.len());
                    let mut label_branches = Vec::with_capacity(branches.len());
                    for (phase, blob) in &branches {
                        image_branches.push((*phase, blob.images()?[position].clone()));
                        label_branches.push((*phase, blob.labels()?[position].clone()));
                    }
                    images.push(self.case(&format!("case_image_{position}"), image_branches)?);
                    labels.push(self.case(&format!("case_label_{position}"), label_branches)?);
                }
                Blob::from_images_labels(images, labels)
            }
            Blob::Value { .. } => {
                let mut values = Vec::with_capacity(len);
                for position in 0..len {
                    let value_branches = branches
                        .iter()
                        .map(|(phase, blob)| Ok((*phase, blob.values()?[position].clone())))
                        .collect::<Result<Vec<_>>>()?;
                    values.push(self.case(&format!("case_value_{position}"), value_branches)?);
                }
                Ok(Blob::from_values(values))
            }
        }
    }

    fn init_source(&self, checkpoint: &Checkpoint) -> Result<InitSource> {
        if checkpoint.exists() {
            return Ok(InitSource::Restore);
        }
        match &self.config.pretrained_path {
            Some(path) => Ok(InitSource::Pretrained(PretrainedArchive::open(path)?)),
            None => Ok(InitSource::Default),
        }
    }

    /// Builds the network on the blob's single image/label pair.
    ///
    /// Parameters come from the working directory's checkpoint when one
    /// exists, else from the pretrained archive, else from the defaults.
    pub fn build(&mut self, blob: Blob) -> Result<NetOutputs> {
        if self.outputs.is_some() {
            return Err(Error::contract("Net::build may only be called once"));
        }
        let (image, label) = blob.single_pair()?;
        let arch_fn = self
            .arch_fn
            .take()
            .ok_or_else(|| Error::contract("network architecture was already consumed"))?;

        let num_classes = self.meta.num_classes();
        let in_channels = image
            .shape()
            .and_then(|shape| shape.last().copied().flatten())
            .unwrap_or(self.config.in_channels);
        let input = ArchitectureInput {
            in_channels,
            num_classes,
        };

        let checkpoint = self.checkpoint();
        let source = self.init_source(&checkpoint)?;
        let modes = self.config.learning_modes.clone();
        let mut init = match self.config.seed {
            Some(seed) => Initializer::with_seed(source, modes.clone(), seed),
            None => Initializer::new(source, modes.clone()),
        };
        let mut arch = arch_fn(&mut init, &input)?;
        let global_step = if init.is_restoring() {
            checkpoint.restore(arch.parameters_mut(), self.meta.class_names())?
        } else {
            0
        };
        let feature_dim = arch.feature_dim();
        let model: SharedModel = Arc::new(RwLock::new(Model {
            arch,
            optimizer: Adam::new(self.config.adam_epsilon),
            global_step,
        }));

        let crops = self.case(
            "num_crops",
            vec![
                (Phase::Train, Node::constant("train_crops", 1usize)),
                (Phase::Test, Node::constant("test_crops", self.config.num_test_crops)),
            ],
        )?;

        let forward = {
            let (model, image, label, crops) = (model.clone(), image.clone(), label.clone(), crops.clone());
            let keep_tape = self.is_train;
            Node::new("forward", move |step| {
                let crops = crops.eval(step)?;
                let x = image
                    .eval(step)?
                    .into_dimensionality::<Ix4>()
                    .map_err(|_| Error::contract("network input must be (batch, height, width, channels)"))?;
                let labels = labels_1d(label.eval(step)?)?;
                if x.dim().0 == 0 {
                    return Ok(Arc::new(ForwardPass::empty(num_classes, feature_dim, crops)));
                }

                let (out, tape) = model.read().arch.forward(&x)?;
                let (crop_probs, prob) = rebatch_mean(&softmax_rows(out.logits.view()), crops)?;
                let (_, feat) = rebatch_mean(&out.features, crops)?;
                if labels.len() != prob.nrows() {
                    return Err(Error::contract(format!(
                        "{} labels for {} images",
                        labels.len(),
                        prob.nrows()
                    )));
                }
                debug!(images = prob.nrows(), crops, "forward pass");
                Ok(Arc::new(ForwardPass {
                    consistency: consistency(&crop_probs, &prob),
                    crop_probs,
                    prob,
                    feat,
                    labels,
                    tape: keep_tape.then_some(tape),
                }))
            })
        };

        let prob = forward
            .map("prob", |pass| Ok(pass.prob.clone().into_dyn()))
            .with_shape(vec![None, Some(num_classes)]);
        let feat = forward
            .map("feat", |pass| Ok(pass.feat.clone().into_dyn()))
            .with_shape(vec![None, Some(feature_dim)]);
        let consistency = forward
            .map("consistency", |pass| Ok(pass.consistency.clone().into_dyn()))
            .with_shape(vec![None]);
        let label_out = forward
            .map("label", |pass| Ok(pass.labels.clone().into_dyn()))
            .with_shape(vec![None]);

        let weight_decay = self.config.weight_decay;
        let stats = {
            let model = model.clone();
            forward.map("stats", move |pass| {
                let regularization = if weight_decay > 0.0 {
                    let guard = model.read();
                    let sum: f64 = guard
                        .arch
                        .parameters()
                        .iter()
                        .filter(|p| p.decay)
                        .map(|p| p.value.iter().map(|&w| (w as f64) * (w as f64)).sum::<f64>())
                        .sum();
                    weight_decay / 2.0 * sum
                } else {
                    0.0
                };
                Ok(make_stat(&pass.prob, &pass.labels, regularization))
            })
        };

        let schedule = self.config.schedule();
        let learning_rate = {
            let model = model.clone();
            Node::new("learning_rate", move |_| Ok(schedule.rate(model.read().global_step)))
        };

        let train_op = if self.is_train {
            let (model, forward, stats) = (model.clone(), forward.clone(), stats.clone());
            Some(Node::new("train_op", move |step| {
                let pass = forward.eval(step)?;
                let stats = stats.eval(step)?;
                if pass.rows() == 0 {
                    return Err(Error::contract("cannot train on an empty batch"));
                }
                let tape = pass
                    .tape
                    .as_ref()
                    .ok_or_else(|| Error::contract("forward pass kept no tape"))?;
                let target = one_hot(&pass.labels, num_classes);
                let d_logits = CrossEntropyLoss::derivative(&pass.crop_probs, &pass.prob, &target);

                let mut guard = model.write();
                let model = &mut *guard;
                let mut grads = model.arch.backward(tape, &d_logits)?;
                if weight_decay > 0.0 {
                    for param in model.arch.parameters() {
                        if param.decay && param.trainable {
                            if let Some(grad) = grads.get_mut(&param.name) {
                                grad.scaled_add(weight_decay as f32, &param.value);
                            }
                        }
                    }
                }
                let lr = schedule.rate(model.global_step);
                model
                    .optimizer
                    .step(model.arch.parameters_mut(), &grads, |mode| lr * modes.rate(mode))?;
                model.global_step += 1;
                Ok(TrainReport {
                    loss: stats.loss,
                    acc: stats.acc,
                    learning_rate: lr,
                    global_step: model.global_step,
                })
            }))
        } else {
            None
        };

        let outputs = NetOutputs {
            image,
            label: label_out,
            forward,
            prob,
            feat,
            consistency,
            stats,
            learning_rate,
            train_op,
        };
        self.model = Some(model);
        self.outputs = Some(outputs.clone());
        Ok(outputs)
    }

    /// Sets the phase and starts every queue runner registered so far.
    pub fn start(&self, phase: Phase) -> Result<usize> {
        self.set_phase(phase);
        info!("Filling queues...");
        self.graph.start_queue_runners()
    }

    /// The single execution primitive: one step with the current phase.
    pub fn online(&self, request: Request) -> Result<Fetched> {
        self.graph.run(request)
    }

    /// Switches to `phase`, then executes one step.
    pub fn run(&self, phase: Phase, request: Request) -> Result<Fetched> {
        self.set_phase(phase);
        self.online(request)
    }

    /// Writes the checkpoint into the working directory.
    pub fn save(&self) -> Result<()> {
        let model = self.model()?.read();
        self.checkpoint()
            .save(model.arch.parameters(), model.global_step, self.meta.class_names())
    }
}
