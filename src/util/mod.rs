pub mod npz;
pub mod timer;

pub use timer::Timer;
