/// ferrite-resnet classification server
///
/// Loads a trained run from its working directory and answers
/// `POST /classify` with the top classes of every submitted image.
/// Served by a synchronous tiny_http server.
///
/// Run with:
///   cargo run --bin server --release -- <working_dir>
/// Then:
///   curl -X POST http://127.0.0.1:8000/classify -d '{"images": ["a.jpg"]}'

mod handlers;
mod routes;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use ferrite_resnet::{Classifier, MetaConfig, RunConfig};
use tiny_http::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

use state::ServerState;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Working directory of a finished training run.
    working_dir: PathBuf,

    /// JSON run configuration.
    #[clap(short, long)]
    config: Option<PathBuf>,

    #[clap(short, long, default_value = "127.0.0.1:8000")]
    addr: String,
}

fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .try_init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => RunConfig::load_json(path)
            .with_context(|| format!("failed to load run configuration {}", path.display()))?,
        None => RunConfig::default(),
    };
    let meta = MetaConfig::test(&args.working_dir)
        .with_context(|| format!("{} holds no trained model", args.working_dir.display()))?;
    let classifier = Classifier::new(Arc::new(meta), &config)?;

    let server = Server::http(&args.addr).map_err(|e| anyhow!("failed to bind {}: {}", args.addr, e))?;
    let shared_state = Arc::new(ServerState::new(classifier));
    info!(addr = %args.addr, "listening");

    // One thread per request; the classifier serialises pipeline access.
    for request in server.incoming_requests() {
        let state_clone = shared_state.clone();
        std::thread::spawn(move || {
            routes::dispatch(request, state_clone);
        });
    }
    Ok(())
}
