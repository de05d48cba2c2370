use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use ferrite_resnet::{train_network, MetaConfig};
use tracing::info;

/// Train a classifier on a directory holding one sub-directory per class.
#[derive(Parser, Debug)]
#[clap()]
pub(crate) struct Args {
    /// Directory of class folders.
    image_dir: PathBuf,

    /// Where class names, checkpoints and summaries go. Defaults to a fresh
    /// directory under /tmp.
    #[clap(short, long)]
    working_dir: Option<PathBuf>,

    /// JSON run configuration.
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Overrides the configured number of train steps.
    #[clap(short, long)]
    iterations: Option<usize>,

    /// Check every image decodes and delete the ones that do not.
    #[clap(long)]
    check_images: bool,
}

pub(super) fn train(args: Args) -> Result<()> {
    let mut config = super::load_run_config(args.config.as_deref())?;
    if let Some(iterations) = args.iterations {
        config.train.iterations = iterations;
    }
    config.train.check_images |= args.check_images;

    let working_dir = args.working_dir.unwrap_or_else(MetaConfig::default_working_dir);
    let meta = MetaConfig::train(&args.image_dir, &working_dir)
        .with_context(|| format!("failed to scan {}", args.image_dir.display()))?;
    config.save_json(working_dir.join("run_config.json"))?;

    let arch = config.resnet.clone().architecture();
    let last = train_network(Arc::new(meta), &args.image_dir, &config, arch, |_| {})?;
    match last {
        Some(stats) => info!(
            global_step = stats.global_step,
            loss = stats.loss_avg,
            acc = stats.acc_avg,
            working_dir = %working_dir.display(),
            "training finished"
        ),
        None => info!("no training step ran"),
    }
    Ok(())
}
