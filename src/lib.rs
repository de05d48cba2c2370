pub mod error;
pub mod graph;
pub mod config;
pub mod pipeline;
pub mod image;
pub mod math;
pub mod activation;
pub mod layers;
pub mod network;
pub mod loss;
pub mod optim;
pub mod train;
pub mod serve;
pub mod util;

// Convenience re-exports
pub use error::{Error, Result};
pub use config::{MetaConfig, RunConfig};
pub use graph::{Graph, Phase};
pub use pipeline::{Batch, Blob, Consumer, FileProducer, Preprocess, QueueProducer, SimpleProducer};
pub use network::{Net, NetConfig, ResNet50, ResNetSpec};
pub use serve::{Classifier, Prediction};
pub use train::{train_network, StepStats, TrainConfig};
