pub mod loop_fn;
pub mod step_stats;
pub mod summary;
pub mod train_config;
pub mod trainer;

pub use loop_fn::train_loop;
pub use step_stats::{MovingAverage, StepStats};
pub use summary::SummaryWriter;
pub use train_config::TrainConfig;
pub use trainer::{build_training_net, train_network};
