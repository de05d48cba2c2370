use std::io::Cursor;
use tiny_http::{Header, Method, Request, Response, StatusCode};

use crate::handlers;
use crate::state::SharedState;

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

fn response(status: u16, content_type: &[u8], body: Vec<u8>) -> Response<Cursor<Vec<u8>>> {
    let len = body.len();
    let headers = Header::from_bytes(&b"Content-Type"[..], content_type)
        .into_iter()
        .collect();
    Response::new(StatusCode(status), headers, Cursor::new(body), Some(len), None)
}

pub fn json_response(body: String) -> Response<Cursor<Vec<u8>>> {
    response(200, b"application/json", body.into_bytes())
}

pub fn server_error(message: String) -> Response<Cursor<Vec<u8>>> {
    response(500, b"text/plain; charset=utf-8", message.into_bytes())
}

pub fn not_found() -> Response<Cursor<Vec<u8>>> {
    response(404, b"text/plain", b"404 Not Found".to_vec())
}

// ---------------------------------------------------------------------------
// Request dispatcher
// ---------------------------------------------------------------------------

/// Dispatches incoming requests to the appropriate handler.
pub fn dispatch(mut request: Request, state: SharedState) {
    let method = request.method().clone();
    let url = request.url().to_owned();
    let path = url.split('?').next().unwrap_or("").to_owned();

    let response = match (method, path.as_str()) {
        (Method::Post, "/classify") => handlers::classify::handle(&mut request, &state),
        _ => not_found(),
    };

    let _ = request.respond(response);
}
