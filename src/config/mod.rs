pub mod meta;
pub mod run_config;

pub use meta::MetaConfig;
pub use run_config::{RunConfig, TrainSettings};
