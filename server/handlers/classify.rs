use std::io::{Cursor, Read};

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use tiny_http::{Request, Response};
use tracing::error;

use crate::routes::{json_response, server_error};
use crate::state::ServerState;

#[derive(Debug, Deserialize)]
struct ClassifyRequest {
    #[serde(default, alias = "url")]
    images: Vec<String>,
}

/// `POST /classify`
///
/// Body: `{"images": [url or path, ...]}` (`url` is accepted too).
/// Answers `{"results": [{"status": "ok", "classes": {class: prob}}]}` in
/// input order; any failure answers 500 with the error text.
pub fn handle(request: &mut Request, state: &ServerState) -> Response<Cursor<Vec<u8>>> {
    match classify(request, state) {
        Ok(body) => json_response(body.to_string()),
        Err(e) => {
            error!("classify failed: {:#}", e);
            server_error(format!("{:#}", e))
        }
    }
}

fn classify(request: &mut Request, state: &ServerState) -> Result<Value> {
    let mut body = String::new();
    request
        .as_reader()
        .read_to_string(&mut body)
        .context("failed to read request body")?;
    let parsed: ClassifyRequest = serde_json::from_str(&body).context("malformed request body")?;
    let predictions = state.classifier.get(&parsed.images)?;
    let results: Vec<Value> = predictions
        .iter()
        .map(|prediction| json!({ "status": "ok", "classes": prediction.classes_json() }))
        .collect();
    Ok(json!({ "results": results }))
}
