pub mod batch;
pub mod blob;
pub mod consumer;
pub mod preprocess;
pub mod producer;

pub use batch::{Batch, BatchConfig};
pub use blob::{Blob, Content, NO_LABEL};
pub use consumer::{Consumer, ConsumerConfig, Postprocess};
pub use preprocess::{Preprocess, PreprocessConfig};
pub use producer::{FileProducer, FileProducerConfig, QueueProducer, QueueProducerConfig, SimpleProducer};
