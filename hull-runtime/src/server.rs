//! The single-threaded HTTP event loop (spec.md §5): accept one connection
//! at a time, dispatch it to completion, write the response, move on. No
//! worker pool — the cooperative concurrency model means one slow request
//! blocks the next, which is the accepted tradeoff for a local-first,
//! single-user process.

use crate::interpreter::{reset_gas, HostState};
use crate::request::RawRequest;
use hull_capability::Database;
use hull_core::HullError;
use mlua::Lua;
use std::io::Read;
use std::rc::Rc;
use tiny_http::{Header, Response as TinyResponse, Server};
use tracing::{info, warn};

pub fn serve(lua: &Lua, db: &Database, bind_addr: &str, port: u16, max_body_bytes: u64) -> Result<(), HullError> {
    let address = format!("{bind_addr}:{port}");
    let server = Server::http(&address).map_err(|e| HullError::IoError(e.to_string()))?;
    info!(address, "listening");

    for mut request in server.incoming_requests() {
        let raw = match read_raw_request(&mut request, max_body_bytes) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "failed to read request body");
                let response = TinyResponse::from_string("bad request").with_status_code(400);
                let _ = request.respond(response);
                continue;
            }
        };

        reset_gas(lua);
        let host: Option<Rc<HostState>> = lua.app_data_ref::<Rc<HostState>>().map(|guard| guard.clone());
        let response = match host {
            Some(host) => {
                let dispatcher = host.dispatcher.borrow();
                dispatcher.dispatch(lua, db, &raw)
            }
            None => crate::request::RawResponse {
                status: 500,
                headers: Vec::new(),
                body: b"interpreter not initialized".to_vec(),
            },
        };

        let mut tiny_response = TinyResponse::from_data(response.body).with_status_code(response.status);
        for (name, value) in &response.headers {
            if let Ok(header) = Header::from_bytes(name.as_bytes(), value.as_bytes()) {
                tiny_response = tiny_response.with_header(header);
            }
        }
        if let Err(e) = request.respond(tiny_response) {
            warn!(error = %e, "failed to write response");
        }
    }

    Ok(())
}

/// Reads the body up to `max_body_bytes`, rejecting anything larger
/// without allocating the excess (spec.md §2/§8): a declared
/// `Content-Length` over the cap is rejected before any read; a body with
/// no declared length is read one byte past the cap (enough to prove it's
/// oversized, not enough to buffer an unbounded stream) and rejected if
/// that extra byte was present.
fn read_raw_request(request: &mut tiny_http::Request, max_body_bytes: u64) -> Result<RawRequest, HullError> {
    let method = request.method().to_string();
    let url = request.url().to_string();
    let (path, query) = match url.split_once('?') {
        Some((p, q)) => (p.to_string(), Some(q.to_string())),
        None => (url, None),
    };

    let headers: Vec<(String, String)> = request
        .headers()
        .iter()
        .map(|h| (h.field.to_string(), h.value.to_string()))
        .collect();

    let content_length = request.body_length().unwrap_or(0) as u64;
    if content_length > max_body_bytes {
        return Err(HullError::invalid_argument("request body too large"));
    }

    let read_cap = max_body_bytes.saturating_add(1);
    let mut body = Vec::with_capacity(content_length.min(max_body_bytes) as usize);
    request
        .as_reader()
        .take(read_cap)
        .read_to_end(&mut body)
        .map_err(|e| HullError::IoError(e.to_string()))?;
    if body.len() as u64 > max_body_bytes {
        return Err(HullError::invalid_argument("request body too large"));
    }

    Ok(RawRequest { method, path, query, headers, body })
}
