pub mod classifier;

pub use classifier::{Classifier, Prediction, ServeConfig};
