use std::sync::mpsc;
use std::sync::{atomic::AtomicBool, Arc};

use crate::config::run_config::TrainSettings;
use crate::train::step_stats::StepStats;

/// Configuration for a `train_loop` run.
///
/// # Fields
/// - `iterations`       : number of train steps to run
/// - `test_interval`    : a test step runs every this many iterations (0 disables)
/// - `summary_interval` : a summary line is written every this many iterations
///                        (0 disables)
/// - `save_per`         : checkpoint cadence in iterations; a final checkpoint
///                        is always written when the loop ends
/// - `is_show`          : log every step's raw and averaged loss/accuracy
/// - `progress_tx`      : optional channel sender; one `StepStats` is sent per
///                        step.  If the receiver is dropped the loop
///                        terminates early (clean shutdown).
/// - `stop_flag`        : optional atomic flag; when set to `true` from another
///                        thread the loop terminates after the current step.
pub struct TrainConfig {
    pub iterations: usize,
    pub test_interval: usize,
    pub summary_interval: usize,
    pub save_per: Option<usize>,
    pub is_show: bool,
    pub progress_tx: Option<mpsc::Sender<StepStats>>,
    pub stop_flag: Option<Arc<AtomicBool>>,
}

impl TrainConfig {
    /// Creates a `TrainConfig` with the default cadences, no progress channel
    /// and no stop flag.
    pub fn new(iterations: usize) -> Self {
        TrainConfig {
            iterations,
            test_interval: 5,
            summary_interval: 5,
            save_per: None,
            is_show: false,
            progress_tx: None,
            stop_flag: None,
        }
    }
}

impl From<&TrainSettings> for TrainConfig {
    fn from(settings: &TrainSettings) -> Self {
        TrainConfig {
            iterations: settings.iterations,
            test_interval: settings.test_interval,
            summary_interval: settings.summary_interval,
            save_per: (settings.save_per > 0).then_some(settings.save_per),
            is_show: settings.is_show,
            progress_tx: None,
            stop_flag: None,
        }
    }
}
