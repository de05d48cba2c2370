use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use ferrite_resnet::RunConfig;

mod online;
mod train;

/// The command to run.
#[derive(Parser, Debug)]
pub(crate) enum Command {
    Train(train::Args),
    Online(online::Args),
}

pub(crate) fn run(command: Command) -> Result<()> {
    match command {
        Command::Train(config) => train::train(config),
        Command::Online(config) => online::online(config),
    }
}

/// `--config` file when given, defaults otherwise.
pub(crate) fn load_run_config(path: Option<&Path>) -> Result<RunConfig> {
    match path {
        Some(path) => RunConfig::load_json(path)
            .with_context(|| format!("failed to load run configuration {}", path.display())),
        None => Ok(RunConfig::default()),
    }
}
