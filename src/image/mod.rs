pub mod decode;
pub mod mean;
pub mod transform;
