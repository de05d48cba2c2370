pub mod architecture;
pub mod checkpoint;
pub mod net;
pub mod params;
pub mod resnet;
pub mod resnet50;
pub mod stats;

pub use architecture::{Architecture, ArchitectureFn, ArchitectureInput, Forward, Tape};
pub use checkpoint::Checkpoint;
pub use net::{ForwardPass, Model, Net, NetConfig, NetOutputs, SharedModel};
pub use params::{Gradients, InitSource, Initializer, LearningMode, LearningModes, Parameter, PretrainedArchive};
pub use resnet::{Bottleneck, ConvSpec, ConvUnit, ResNet, ResNetBlocks, ResNetSpec, StageSpec};
pub use resnet50::ResNet50;
pub use stats::{make_stat, Stats, TrainReport};
