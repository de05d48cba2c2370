use std::sync::Arc;

use crate::config::meta::MetaConfig;
use crate::error::Result;
use crate::network::architecture::ArchitectureFn;
use crate::network::net::{Net, NetConfig};
use crate::network::params::LearningMode;
use crate::network::resnet::{ResNetSpec, StageSpec};

/// The 50-layer preset: a 7x7 stem and stages of 3, 4, 6 and 3 bottleneck
/// units. The stem and the first two stages learn in the `slow` group so a
/// pretrained backbone can be fine-tuned gently or frozen.
pub struct ResNet50;

impl ResNet50 {
    pub fn spec() -> ResNetSpec {
        let stage = |name: &str, units, out_channels, subsample, mode| StageSpec {
            name: name.to_owned(),
            units,
            out_channels,
            subsample,
            mode,
        };
        ResNetSpec {
            name: "resnet-50".to_owned(),
            stem_channels: 64,
            stem_kernel: 7,
            stem_stride: 2,
            stem_mode: LearningMode::Slow,
            pool_size: 3,
            pool_stride: 2,
            stages: vec![
                stage("2", 3, 64, false, LearningMode::Slow),
                stage("3", 4, 128, true, LearningMode::Slow),
                stage("4", 6, 256, true, LearningMode::Normal),
                stage("5", 3, 512, true, LearningMode::Normal),
            ],
            fc_mode: LearningMode::Normal,
        }
    }

    pub fn architecture() -> ArchitectureFn {
        Self::spec().architecture()
    }

    /// A [`Net`] wired for ResNet-50.
    pub fn net(meta: Arc<MetaConfig>, config: NetConfig, is_train: bool) -> Result<Net> {
        Net::new(meta, config, Self::architecture(), is_train)
    }
}

impl ResNetSpec {
    /// The production topology.
    pub fn resnet50() -> ResNetSpec {
        ResNet50::spec()
    }
}

impl Default for ResNetSpec {
    fn default() -> Self {
        ResNet50::spec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_sixteen_units_and_2048_features() {
        let spec = ResNet50::spec();
        assert_eq!(spec.stages.iter().map(|s| s.units).sum::<usize>(), 16);
        assert_eq!(spec.feature_dim(), 2048);
    }
}
