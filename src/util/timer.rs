use std::time::Instant;

use tracing::info;

/// Logs `message` when created and the elapsed wall-clock time when dropped.
pub struct Timer {
    message: String,
    start: Instant,
}

impl Timer {
    pub fn start(message: impl Into<String>) -> Self {
        let message = message.into();
        info!("{message}...");
        Timer {
            message,
            start: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        info!("{} done in {:.3} s", self.message, self.elapsed_secs());
    }
}
