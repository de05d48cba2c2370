use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use ndarray::{Array2, Array4};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::activation::activation::ActivationFunction;
use crate::error::{Error, Result};
use crate::layers::{
    global_avg_pool, global_avg_pool_backward, Conv2d, ConvCache, FrozenBatchNorm, MaxPool, MaxPoolCache,
    NormCache,
};
use crate::math::init::DefaultInit;
use crate::network::architecture::{Architecture, ArchitectureFn, ArchitectureInput, Forward, Tape};
use crate::network::params::{Gradients, Initializer, LearningMode, Parameter};

// ---------------------------------------------------------------------------
// Architecture description
// ---------------------------------------------------------------------------

/// One stage of bottleneck units sharing an output width.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    /// Stage prefix in parameter names, e.g. `"3"` for `res3a_branch2a`.
    pub name: String,
    pub units: usize,
    /// Bottleneck width; the stage emits `4 * out_channels` channels.
    pub out_channels: usize,
    /// Halve the spatial resolution in the first unit.
    pub subsample: bool,
    pub mode: LearningMode,
}

/// A serializable description of a bottleneck ResNet.
///
/// Like the weights, it can be saved to / loaded from JSON so a run can be
/// reproduced with a different depth or width.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResNetSpec {
    pub name: String,
    pub stem_channels: usize,
    pub stem_kernel: usize,
    pub stem_stride: usize,
    pub stem_mode: LearningMode,
    pub pool_size: usize,
    pub pool_stride: usize,
    pub stages: Vec<StageSpec>,
    pub fc_mode: LearningMode,
}

impl ResNetSpec {
    /// Channels reaching the global pool.
    pub fn feature_dim(&self) -> usize {
        self.stages
            .last()
            .map(|stage| 4 * stage.out_channels)
            .unwrap_or(self.stem_channels)
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<ResNetSpec> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Deferred builder handed to [`Net`](crate::network::net::Net).
    pub fn architecture(self) -> ArchitectureFn {
        Box::new(move |init: &mut Initializer, input: &ArchitectureInput| {
            let net: Box<dyn Architecture> = Box::new(ResNet::build(self, init, input)?);
            Ok(net)
        })
    }
}

// ---------------------------------------------------------------------------
// Convolution units
// ---------------------------------------------------------------------------

/// How to build one convolution (+ optional batch norm + activation).
#[derive(Debug, Clone)]
pub struct ConvSpec {
    pub conv_name: String,
    pub in_channels: usize,
    pub out_channels: usize,
    pub size: (usize, usize),
    pub stride: (usize, usize),
    pub biased: bool,
    /// Suffix of the `bn*` / `scale*` parameter layers; `None` means no norm.
    pub norm_name: Option<String>,
    pub activation: ActivationFunction,
    pub mode: LearningMode,
}

impl ConvSpec {
    pub fn new(conv_name: &str, in_channels: usize, out_channels: usize) -> Self {
        ConvSpec {
            conv_name: conv_name.to_owned(),
            in_channels,
            out_channels,
            size: (1, 1),
            stride: (1, 1),
            biased: false,
            norm_name: None,
            activation: ActivationFunction::Identity,
            mode: LearningMode::Normal,
        }
    }

    pub fn size(mut self, size: usize) -> Self {
        self.size = (size, size);
        self
    }

    pub fn stride(mut self, stride: usize) -> Self {
        self.stride = (stride, stride);
        self
    }

    pub fn biased(mut self) -> Self {
        self.biased = true;
        self
    }

    pub fn norm(mut self, norm_name: &str) -> Self {
        self.norm_name = Some(norm_name.to_owned());
        self
    }

    pub fn relu(mut self) -> Self {
        self.activation = ActivationFunction::ReLU;
        self
    }

    pub fn mode(mut self, mode: LearningMode) -> Self {
        self.mode = mode;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ConvUnit {
    pub name: String,
    pub conv: Conv2d,
    pub norm: Option<FrozenBatchNorm>,
    pub activation: ActivationFunction,
}

#[derive(Debug)]
pub struct ConvUnitCache {
    conv: ConvCache,
    norm: Option<NormCache>,
    /// Pre-activation values; absent for the identity.
    pre: Option<Array4<f32>>,
}

fn record(grads: &mut Gradients, param: &Parameter, grad: ndarray::ArrayD<f32>) {
    if param.trainable {
        grads.insert(param.name.clone(), grad);
    }
}

impl ConvUnit {
    pub fn forward(&self, x: &Array4<f32>) -> Result<(Array4<f32>, ConvUnitCache)> {
        let (mut v, conv) = self.conv.forward(x)?;
        let norm = match &self.norm {
            Some(norm) => {
                let (y, cache) = norm.forward(&v)?;
                v = y;
                Some(cache)
            }
            None => None,
        };
        let (out, pre) = match self.activation {
            ActivationFunction::Identity => (v, None),
            activation => (activation.forward(&v), Some(v)),
        };
        Ok((out, ConvUnitCache { conv, norm, pre }))
    }

    pub fn backward(&self, cache: &ConvUnitCache, dy: Array4<f32>, grads: &mut Gradients) -> Result<Array4<f32>> {
        let mut d = match &cache.pre {
            Some(pre) => self.activation.backward(pre, dy),
            None => dy,
        };
        if let (Some(norm), Some(norm_cache)) = (&self.norm, &cache.norm) {
            let (dx, d_scale, d_offset) = norm.backward(norm_cache, &d)?;
            record(grads, &norm.scale, d_scale);
            record(grads, &norm.offset, d_offset);
            d = dx;
        }
        let (dx, d_weight, d_bias) = self.conv.backward(&cache.conv, &d)?;
        record(grads, &self.conv.weight, d_weight);
        if let (Some(bias), Some(d_bias)) = (&self.conv.bias, d_bias) {
            record(grads, bias, d_bias);
        }
        Ok(dx)
    }

    pub fn parameters(&self) -> Vec<&Parameter> {
        let mut params = vec![&self.conv.weight];
        params.extend(self.conv.bias.as_ref());
        if let Some(norm) = &self.norm {
            params.extend([&norm.mean, &norm.variance, &norm.scale, &norm.offset]);
        }
        params
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        let mut params = vec![&mut self.conv.weight];
        params.extend(self.conv.bias.as_mut());
        if let Some(norm) = &mut self.norm {
            params.extend([&mut norm.mean, &mut norm.variance, &mut norm.scale, &mut norm.offset]);
        }
        params
    }
}

/// Residual unit: `relu(shortcut(x) + 2c(2b(2a(x))))`.
#[derive(Debug, Clone)]
pub struct Bottleneck {
    pub name: String,
    /// Projection shortcut; `None` passes the input through.
    pub shortcut: Option<ConvUnit>,
    pub branch2a: ConvUnit,
    pub branch2b: ConvUnit,
    pub branch2c: ConvUnit,
}

#[derive(Debug)]
pub struct BottleneckCache {
    shortcut: Option<ConvUnitCache>,
    branch2a: ConvUnitCache,
    branch2b: ConvUnitCache,
    branch2c: ConvUnitCache,
    sum: Array4<f32>,
}

impl Bottleneck {
    pub fn forward(&self, x: &Array4<f32>) -> Result<(Array4<f32>, BottleneckCache)> {
        let (a, branch2a) = self.branch2a.forward(x)?;
        let (b, branch2b) = self.branch2b.forward(&a)?;
        let (c, branch2c) = self.branch2c.forward(&b)?;
        let (sum, shortcut) = match &self.shortcut {
            Some(unit) => {
                let (s, cache) = unit.forward(x)?;
                (s + &c, Some(cache))
            }
            None => {
                if x.dim() != c.dim() {
                    return Err(Error::contract(format!(
                        "unit `{}` cannot add {:?} to {:?} without a projection",
                        self.name,
                        x.dim(),
                        c.dim()
                    )));
                }
                (x + &c, None)
            }
        };
        let out = ActivationFunction::ReLU.forward(&sum);
        Ok((
            out,
            BottleneckCache {
                shortcut,
                branch2a,
                branch2b,
                branch2c,
                sum,
            },
        ))
    }

    pub fn backward(&self, cache: &BottleneckCache, dy: Array4<f32>, grads: &mut Gradients) -> Result<Array4<f32>> {
        let d = ActivationFunction::ReLU.backward(&cache.sum, dy);
        let dc = self.branch2c.backward(&cache.branch2c, d.clone(), grads)?;
        let db = self.branch2b.backward(&cache.branch2b, dc, grads)?;
        let dx = self.branch2a.backward(&cache.branch2a, db, grads)?;
        let ds = match (&self.shortcut, &cache.shortcut) {
            (Some(unit), Some(unit_cache)) => unit.backward(unit_cache, d, grads)?,
            _ => d,
        };
        Ok(dx + &ds)
    }

    pub fn parameters(&self) -> Vec<&Parameter> {
        let mut params = Vec::new();
        if let Some(unit) = &self.shortcut {
            params.extend(unit.parameters());
        }
        for unit in [&self.branch2a, &self.branch2b, &self.branch2c] {
            params.extend(unit.parameters());
        }
        params
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        let mut params = Vec::new();
        if let Some(unit) = &mut self.shortcut {
            params.extend(unit.parameters_mut());
        }
        for unit in [&mut self.branch2a, &mut self.branch2b, &mut self.branch2c] {
            params.extend(unit.parameters_mut());
        }
        params
    }
}

/// Builders for the convolution units, stages and units of a ResNet.
pub struct ResNetBlocks<'a> {
    init: &'a mut Initializer,
}

fn unit_letter(index: usize) -> String {
    if index < 26 {
        ((b'a' + index as u8) as char).to_string()
    } else {
        format!("b{index}")
    }
}

impl<'a> ResNetBlocks<'a> {
    pub fn new(init: &'a mut Initializer) -> Self {
        ResNetBlocks { init }
    }

    /// Convolution with HWIO weights (decayed) and optional bias, batch
    /// norm and activation.
    pub fn conv(&mut self, spec: ConvSpec) -> Result<ConvUnit> {
        let ConvSpec {
            conv_name,
            in_channels,
            out_channels,
            size,
            stride,
            biased,
            norm_name,
            activation,
            mode,
        } = spec;
        let weight = self.init.parameter(
            &conv_name,
            "weight",
            0,
            &[size.0, size.1, in_channels, out_channels],
            DefaultInit::conv_weight(in_channels, stride),
            Some(mode),
            true,
        )?;
        let bias = if biased {
            Some(self.init.parameter(
                &conv_name,
                "bias",
                1,
                &[out_channels],
                DefaultInit::Constant(0.1),
                Some(mode),
                false,
            )?)
        } else {
            None
        };
        let conv = Conv2d::new(weight, bias, stride)?;

        let norm = match &norm_name {
            Some(norm_name) => {
                let bn = format!("bn{norm_name}");
                let scale = format!("scale{norm_name}");
                let channels = [out_channels];
                Some(FrozenBatchNorm::new(
                    self.init.parameter(&bn, "mean", 0, &channels, DefaultInit::Constant(0.0), None, false)?,
                    self.init.parameter(&bn, "variance", 1, &channels, DefaultInit::Constant(1.0), None, false)?,
                    self.init.parameter(&scale, "scale", 0, &channels, DefaultInit::Constant(1.0), Some(mode), false)?,
                    self.init.parameter(&scale, "offset", 1, &channels, DefaultInit::Constant(0.0), Some(mode), false)?,
                )?)
            }
            None => None,
        };
        debug!(
            layer = %conv_name,
            in_channels,
            out_channels,
            ?size,
            ?stride,
            norm = norm_name.is_some(),
            ?activation,
            mode = mode.name(),
            "conv unit"
        );
        Ok(ConvUnit {
            name: conv_name,
            conv,
            norm,
            activation,
        })
    }

    /// Bottleneck unit `name` (e.g. `"2a"`); returns it with its output width.
    pub fn unit(
        &mut self,
        name: &str,
        in_channels: usize,
        subsample: bool,
        out_channels: usize,
        mode: LearningMode,
    ) -> Result<(Bottleneck, usize)> {
        let stride = if subsample { 2 } else { 1 };
        let expanded = 4 * out_channels;
        let shortcut = if subsample || in_channels != expanded {
            Some(self.conv(
                ConvSpec::new(&format!("res{name}_branch1"), in_channels, expanded)
                    .stride(stride)
                    .norm(&format!("{name}_branch1"))
                    .mode(mode),
            )?)
        } else {
            None
        };
        let branch2a = self.conv(
            ConvSpec::new(&format!("res{name}_branch2a"), in_channels, out_channels)
                .stride(stride)
                .norm(&format!("{name}_branch2a"))
                .relu()
                .mode(mode),
        )?;
        let branch2b = self.conv(
            ConvSpec::new(&format!("res{name}_branch2b"), out_channels, out_channels)
                .size(3)
                .norm(&format!("{name}_branch2b"))
                .relu()
                .mode(mode),
        )?;
        let branch2c = self.conv(
            ConvSpec::new(&format!("res{name}_branch2c"), out_channels, expanded)
                .norm(&format!("{name}_branch2c"))
                .mode(mode),
        )?;
        Ok((
            Bottleneck {
                name: name.to_owned(),
                shortcut,
                branch2a,
                branch2b,
                branch2c,
            },
            expanded,
        ))
    }

    /// A stage of `num_units` units; only the first may subsample.
    pub fn block(
        &mut self,
        name: &str,
        in_channels: usize,
        num_units: usize,
        subsample: bool,
        out_channels: usize,
        mode: LearningMode,
    ) -> Result<(Vec<Bottleneck>, usize)> {
        if num_units == 0 {
            return Err(Error::contract(format!("stage `{name}` needs at least one unit")));
        }
        let mut channels = in_channels;
        let mut units = Vec::with_capacity(num_units);
        for index in 0..num_units {
            let unit_name = format!("{name}{}", unit_letter(index));
            let (unit, out) = self.unit(&unit_name, channels, subsample && index == 0, out_channels, mode)?;
            units.push(unit);
            channels = out;
        }
        Ok((units, channels))
    }
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

/// Bottleneck ResNet: stem conv, max pool, residual stages, global average
/// pool and a 1x1 classifier.
#[derive(Debug, Clone)]
pub struct ResNet {
    spec: ResNetSpec,
    stem: ConvUnit,
    pool: MaxPool,
    stages: Vec<Vec<Bottleneck>>,
    fc: ConvUnit,
}

struct ResNetTape {
    stem: ConvUnitCache,
    pool: MaxPoolCache,
    stages: Vec<Vec<BottleneckCache>>,
    pooled_input: (usize, usize, usize, usize),
    fc: ConvUnitCache,
}

impl ResNet {
    pub fn build(spec: ResNetSpec, init: &mut Initializer, input: &ArchitectureInput) -> Result<Self> {
        let mut blocks = ResNetBlocks::new(init);
        let stem = blocks.conv(
            ConvSpec::new("conv1", input.in_channels, spec.stem_channels)
                .size(spec.stem_kernel)
                .stride(spec.stem_stride)
                .biased()
                .norm("_conv1")
                .relu()
                .mode(spec.stem_mode),
        )?;
        let pool = MaxPool::new((spec.pool_size, spec.pool_size), (spec.pool_stride, spec.pool_stride));

        let mut channels = spec.stem_channels;
        let mut stages = Vec::with_capacity(spec.stages.len());
        for stage in &spec.stages {
            let (units, out) = blocks.block(
                &stage.name,
                channels,
                stage.units,
                stage.subsample,
                stage.out_channels,
                stage.mode,
            )?;
            stages.push(units);
            channels = out;
        }
        let fc = blocks.conv(ConvSpec::new("fc", channels, input.num_classes).biased().mode(spec.fc_mode))?;

        let net = ResNet {
            spec,
            stem,
            pool,
            stages,
            fc,
        };
        info!(
            name = %net.spec.name,
            parameters = net.parameters().iter().map(|p| p.len()).sum::<usize>(),
            classes = input.num_classes,
            "network built"
        );
        Ok(net)
    }

    pub fn spec(&self) -> &ResNetSpec {
        &self.spec
    }
}

impl Architecture for ResNet {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn feature_dim(&self) -> usize {
        self.fc.conv.in_channels()
    }

    fn forward(&self, input: &Array4<f32>) -> Result<(Forward, Tape)> {
        let (v, stem) = self.stem.forward(input)?;
        let (mut v, pool) = self.pool.forward(&v)?;
        let mut stage_caches = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            let mut caches = Vec::with_capacity(stage.len());
            for unit in stage {
                let (out, cache) = unit.forward(&v)?;
                caches.push(cache);
                v = out;
            }
            stage_caches.push(caches);
        }
        let pooled_input = v.dim();
        let features = global_avg_pool(&v);
        let (n, f) = features.dim();
        let (logits, fc) = self.fc.forward(&features.clone().into_shape_with_order((n, 1, 1, f))?)?;
        let logits = logits.into_shape_with_order((n, self.fc.conv.out_channels()))?;
        let tape: Tape = Box::new(ResNetTape {
            stem,
            pool,
            stages: stage_caches,
            pooled_input,
            fc,
        });
        Ok((Forward { features, logits }, tape))
    }

    fn backward(&self, tape: &Tape, d_logits: &Array2<f32>) -> Result<Gradients> {
        let tape = tape
            .downcast_ref::<ResNetTape>()
            .ok_or_else(|| Error::contract("tape was not recorded by a ResNet forward pass"))?;
        let mut grads = Gradients::new();
        let (n, classes) = d_logits.dim();
        let d = d_logits.as_standard_layout().into_owned().into_shape_with_order((n, 1, 1, classes))?;
        let d_features = self.fc.backward(&tape.fc, d, &mut grads)?;
        let f = d_features.dim().3;
        let d_features = d_features.as_standard_layout().into_owned().into_shape_with_order((n, f))?;
        let mut d = global_avg_pool_backward(tape.pooled_input, &d_features);
        for (stage, caches) in self.stages.iter().zip(&tape.stages).rev() {
            for (unit, cache) in stage.iter().zip(caches).rev() {
                d = unit.backward(cache, d, &mut grads)?;
            }
        }
        let d = self.pool.backward(&tape.pool, &d)?;
        self.stem.backward(&tape.stem, d, &mut grads)?;
        Ok(grads)
    }

    fn parameters(&self) -> Vec<&Parameter> {
        let mut params = self.stem.parameters();
        for unit in self.stages.iter().flatten() {
            params.extend(unit.parameters());
        }
        params.extend(self.fc.parameters());
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Parameter> {
        let mut params = self.stem.parameters_mut();
        for unit in self.stages.iter_mut().flatten() {
            params.extend(unit.parameters_mut());
        }
        params.extend(self.fc.parameters_mut());
        params
    }
}
