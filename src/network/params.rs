use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use ndarray::{ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::math::init::DefaultInit;
use crate::util::npz;

// ---------------------------------------------------------------------------
// Learning modes
// ---------------------------------------------------------------------------

/// Learning-rate group a trainable parameter belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LearningMode {
    Normal,
    /// Pretrained layers fine-tuned at a reduced rate (or frozen at 0).
    Slow,
}

impl LearningMode {
    pub const ALL: [LearningMode; 2] = [LearningMode::Normal, LearningMode::Slow];

    pub fn name(self) -> &'static str {
        match self {
            LearningMode::Normal => "normal",
            LearningMode::Slow => "slow",
        }
    }
}

/// Relative learning rate of every group; a rate of 0 freezes the group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningModes {
    pub normal: f64,
    pub slow: f64,
}

impl Default for LearningModes {
    fn default() -> Self {
        LearningModes { normal: 1.0, slow: 0.0 }
    }
}

impl LearningModes {
    pub fn rate(&self, mode: LearningMode) -> f64 {
        match mode {
            LearningMode::Normal => self.normal,
            LearningMode::Slow => self.slow,
        }
    }

    pub fn is_trainable(&self, mode: LearningMode) -> bool {
        self.rate(mode) > 0.0
    }
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// A named network tensor, e.g. `res2a_branch2a/weight` or `bn_conv1/mean`.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub value: ArrayD<f32>,
    pub mode: LearningMode,
    /// False for statistics and for groups whose rate is 0.
    pub trainable: bool,
    /// Included in the L2 weight-decay term.
    pub decay: bool,
}

impl Parameter {
    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

/// Gradients keyed by parameter name.
pub type Gradients = HashMap<String, ArrayD<f32>>;

// ---------------------------------------------------------------------------
// Initialisation
// ---------------------------------------------------------------------------

/// Pretrained parameters keyed `<layer>/<index>`: convolution weight at 0
/// (HWIO) and bias at 1; `bn*` mean at 0 and variance at 1; `scale*` scale at
/// 0 and offset at 1.
#[derive(Debug, Clone)]
pub struct PretrainedArchive {
    path: PathBuf,
    arrays: BTreeMap<String, ArrayD<f32>>,
}

impl PretrainedArchive {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::missing(format!(
                "pretrained archive {} does not exist",
                path.display()
            )));
        }
        let arrays = npz::read_all(path)?;
        info!(path = %path.display(), entries = arrays.len(), "pretrained archive loaded");
        Ok(PretrainedArchive {
            path: path.to_owned(),
            arrays,
        })
    }

    pub fn from_arrays(arrays: BTreeMap<String, ArrayD<f32>>) -> Self {
        PretrainedArchive {
            path: PathBuf::new(),
            arrays,
        }
    }

    pub fn key(layer: &str, index: usize) -> String {
        format!("{layer}/{index}")
    }

    pub fn get(&self, layer: &str, index: usize) -> Option<&ArrayD<f32>> {
        self.arrays.get(&Self::key(layer, index))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Where initial parameter values come from.
#[derive(Debug, Clone)]
pub enum InitSource {
    /// A checkpoint will overwrite everything; allocate zeros.
    Restore,
    /// Seed from the archive when it has the entry, else use the default.
    Pretrained(PretrainedArchive),
    Default,
}

/// Creates parameters through the checkpoint / pretrained / default chain.
pub struct Initializer {
    source: InitSource,
    modes: LearningModes,
    rng: StdRng,
}

impl Initializer {
    pub fn new(source: InitSource, modes: LearningModes) -> Self {
        Initializer {
            source,
            modes,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(source: InitSource, modes: LearningModes, seed: u64) -> Self {
        Initializer {
            source,
            modes,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn modes(&self) -> &LearningModes {
        &self.modes
    }

    pub fn is_restoring(&self) -> bool {
        matches!(self.source, InitSource::Restore)
    }

    /// Initial value of entry `index` of `layer`.
    pub fn value(&mut self, layer: &str, index: usize, shape: &[usize], default: DefaultInit) -> Result<ArrayD<f32>> {
        match &self.source {
            InitSource::Restore => Ok(ArrayD::zeros(IxDyn(shape))),
            InitSource::Pretrained(archive) => match archive.get(layer, index) {
                Some(value) => {
                    let expected: usize = shape.iter().product();
                    if value.len() != expected {
                        return Err(Error::contract(format!(
                            "pretrained `{}` has shape {:?}, expected {:?}",
                            PretrainedArchive::key(layer, index),
                            value.shape(),
                            shape
                        )));
                    }
                    info!("{layer}/{index} initialized from pretrained archive");
                    let value = value.as_standard_layout().into_owned();
                    Ok(value.into_shape_with_order(IxDyn(shape))?)
                }
                None => Ok(default.sample(shape, &mut self.rng)),
            },
            InitSource::Default => Ok(default.sample(shape, &mut self.rng)),
        }
    }

    /// Builds `<layer>/<field>`; `mode = None` marks a non-trainable statistic.
    #[allow(clippy::too_many_arguments)]
    pub fn parameter(
        &mut self,
        layer: &str,
        field: &str,
        index: usize,
        shape: &[usize],
        default: DefaultInit,
        mode: Option<LearningMode>,
        decay: bool,
    ) -> Result<Parameter> {
        let value = self.value(layer, index, shape, default)?;
        let trainable = mode.map(|m| self.modes.is_trainable(m)).unwrap_or(false);
        let name = format!("{layer}/{field}");
        debug!(%name, ?shape, trainable, "parameter created");
        Ok(Parameter {
            name,
            value,
            mode: mode.unwrap_or(LearningMode::Normal),
            trainable,
            decay,
        })
    }
}
