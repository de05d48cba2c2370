pub mod conv;
pub mod norm;
pub mod pool;

pub use conv::{Conv2d, ConvCache};
pub use norm::{FrozenBatchNorm, NormCache};
pub use pool::{global_avg_pool, global_avg_pool_backward, MaxPool, MaxPoolCache};
