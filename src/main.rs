/*!
Command line tools for ferrite-resnet: train a product classifier on a
directory of class folders, or classify a list of images with a trained one.
*/

mod commands;

use anyhow::Result;
use clap::Parser;
use commands::Command;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct FerriteResnet {
    #[clap(subcommand)]
    command: Command,
}

fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .try_init();

    let args = FerriteResnet::parse();
    commands::run(args.command)
}
