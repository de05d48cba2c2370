use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use ferrite_resnet::{Classifier, MetaConfig};
use serde_json::{Map, Value};

/// Classify every URL or path listed in a file and print the top classes as JSON.
#[derive(Parser, Debug)]
#[clap()]
pub(crate) struct Args {
    /// Newline separated URLs or image paths.
    sources: PathBuf,

    /// Working directory of a finished training run.
    working_dir: PathBuf,

    /// JSON run configuration.
    #[clap(short, long)]
    config: Option<PathBuf>,
}

pub(super) fn online(args: Args) -> Result<()> {
    let config = super::load_run_config(args.config.as_deref())?;
    let meta = MetaConfig::test(&args.working_dir)
        .with_context(|| format!("{} holds no trained model", args.working_dir.display()))?;
    let classifier = Classifier::new(Arc::new(meta), &config)?;

    let text = fs::read_to_string(&args.sources)
        .with_context(|| format!("failed to read {}", args.sources.display()))?;
    let sources: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect();

    let predictions = classifier.get(&sources)?;
    let output: Map<String, Value> = predictions
        .iter()
        .map(|prediction| (prediction.source.clone(), prediction.classes_json()))
        .collect();
    println!("{}", serde_json::to_string_pretty(&Value::Object(output))?);
    Ok(())
}
