use std::sync::atomic::Ordering;
use std::time::Instant;

use tracing::info;

use crate::error::{Error, Result};
use crate::graph::{Fetch, Phase, Request};
use crate::network::net::Net;
use crate::network::stats::{Stats, TrainReport};
use crate::train::step_stats::{MovingAverage, StepStats};
use crate::train::summary::SummaryWriter;
use crate::train::train_config::TrainConfig;

const TRAIN_KEY: &str = "train";
const STATS_KEY: &str = "stats";

// ---------------------------------------------------------------------------
// Public entry point
// ---------------------------------------------------------------------------

/// Runs `config.iterations` train steps on a built, started `net` and returns
/// the statistics of the **last completed step**.
///
/// Every `test_interval` iterations one test-phase step evaluates the test
/// split; every `summary_interval` iterations the step record is appended to
/// the summary file; every `save_per` iterations, and once at the end, the
/// checkpoint is written.
///
/// # Early termination
/// The loop breaks early if:
/// - the `progress_tx` receiver has been dropped, **or**
/// - `config.stop_flag` is set to `true`.
pub fn train_loop(net: &Net, config: &TrainConfig) -> Result<Option<StepStats>> {
    let outputs = net.outputs()?;
    let train_op = outputs
        .train_op
        .as_ref()
        .ok_or_else(|| Error::missing("the network was not built for training"))?;
    let train_request = Request::new().fetch(Fetch::named(TRAIN_KEY, train_op));
    let test_request = Request::new().fetch(Fetch::named(STATS_KEY, &outputs.stats));

    let mut summary = if config.summary_interval > 0 {
        Some(SummaryWriter::create(net.meta().working_dir())?)
    } else {
        None
    };
    let mut loss_avg = MovingAverage::default();
    let mut acc_avg = MovingAverage::default();
    let mut last = None;

    for iteration in 1..=config.iterations {
        if stop_requested(config) {
            break;
        }
        let t_start = Instant::now();

        // ── Train step ────────────────────────────────────────────────────
        let report: TrainReport = net.run(Phase::Train, train_request.clone())?.record(TRAIN_KEY)?;

        // ── Periodic test step ────────────────────────────────────────────
        let (test_loss, test_acc) = if is_due(iteration, config.test_interval) {
            let stats: Stats = net.run(Phase::Test, test_request.clone())?.record(STATS_KEY)?;
            info!(
                "[Test] Iteration {}: loss = {:.4}, accuracy = {:.4}",
                iteration, stats.loss, stats.acc
            );
            (Some(stats.loss), Some(stats.acc))
        } else {
            (None, None)
        };

        let stats = StepStats {
            iteration,
            total_iterations: config.iterations,
            global_step: report.global_step,
            learning_rate: report.learning_rate,
            loss: report.loss,
            acc: report.acc,
            loss_avg: loss_avg.update(report.loss),
            acc_avg: acc_avg.update(report.acc),
            test_loss,
            test_acc,
            elapsed_ms: t_start.elapsed().as_millis() as u64,
        };

        if config.is_show {
            info!(
                "[Train] Iteration {} (step {}): loss = {:.4} ({:.4}), accuracy = {:.4} ({:.4}), lr = {:.3e}, {} ms",
                stats.iteration,
                stats.global_step,
                stats.loss,
                stats.loss_avg,
                stats.acc,
                stats.acc_avg,
                stats.learning_rate,
                stats.elapsed_ms
            );
        }

        // ── Bookkeeping ───────────────────────────────────────────────────
        if let Some(writer) = summary.as_mut() {
            if is_due(iteration, config.summary_interval) {
                writer.write(&stats)?;
            }
        }
        if let Some(save_per) = config.save_per {
            if is_due(iteration, save_per) {
                net.save()?;
            }
        }

        // ── Emit progress ─────────────────────────────────────────────────
        let disconnected = match &config.progress_tx {
            Some(tx) => tx.send(stats.clone()).is_err(),
            None => false,
        };
        last = Some(stats);
        if disconnected {
            break;
        }
    }

    net.save()?;
    Ok(last)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn stop_requested(config: &TrainConfig) -> bool {
    config
        .stop_flag
        .as_ref()
        .map(|flag| flag.load(Ordering::Relaxed))
        .unwrap_or(false)
}

fn is_due(iteration: usize, interval: usize) -> bool {
    interval > 0 && iteration % interval == 0
}
