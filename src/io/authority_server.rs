//! HTTP front for an in-memory authority
//!
//! Serves `POST {base}/validate` and `GET {base}/lookup/{code}` with the same
//! JSON shapes the scanner consumes. Backs the `mock-authority` binary and
//! end-to-end tests of `HttpAuthority`.

use crate::domain::types::DeviceId;
use crate::io::authority::ValidationResponse;
use crate::io::memory_authority::InMemoryAuthority;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use percent_encoding::percent_decode_str;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidateBody {
    code: String,
    device_id: String,
}

struct ServerState {
    authority: Arc<InMemoryAuthority>,
    base_path: String,
}

fn json_response(status: StatusCode, body: &ValidationResponse) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(body).unwrap_or_default();
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .expect("static response should not fail")
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body)))
        .expect("static response should not fail")
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<ServerState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    // Offline and delay switches of the in-memory authority apply here too
    if state.authority.simulate_network().await.is_err() {
        return Ok(text_response(StatusCode::SERVICE_UNAVAILABLE, "authority offline"));
    }

    let Some(route) = path.strip_prefix(state.base_path.as_str()) else {
        return Ok(text_response(StatusCode::NOT_FOUND, "Not Found"));
    };

    match (&method, route) {
        (&Method::POST, "/validate") => {
            let body = match req.into_body().collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    warn!(error = %e, "validate_body_read_failed");
                    return Ok(text_response(StatusCode::BAD_REQUEST, "unreadable body"));
                }
            };
            let Ok(body) = serde_json::from_slice::<ValidateBody>(&body) else {
                return Ok(text_response(StatusCode::BAD_REQUEST, "expected {code, deviceId}"));
            };

            let resp = state.authority.apply_validate(body.code.trim(), &DeviceId::new(body.device_id));
            debug!(code = %body.code, status = %resp.status, "validate_served");
            Ok(json_response(StatusCode::OK, &resp))
        }
        (&Method::GET, lookup) if lookup.starts_with("/lookup/") => {
            let raw = &lookup["/lookup/".len()..];
            let code = percent_decode_str(raw).decode_utf8_lossy();
            let resp = state.authority.apply_lookup(code.trim());
            debug!(code = %code, status = %resp.status, "lookup_served");
            Ok(json_response(StatusCode::OK, &resp))
        }
        _ => Ok(text_response(StatusCode::NOT_FOUND, "Not Found")),
    }
}

/// Serve `authority` under `base_path` (e.g. `/api/tickets`) until shutdown
pub async fn serve_authority(
    listener: TcpListener,
    authority: Arc<InMemoryAuthority>,
    base_path: &str,
    mut shutdown: watch::Receiver<bool>,
) {
    let base_path = base_path.trim_end_matches('/').to_string();
    let state = Arc::new(ServerState { authority, base_path });

    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, base_path = %state.base_path, "authority_server_started");
    }

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| handle_request(req, state.clone()));
                            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                error!(error = %e, "authority_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "authority_accept_error");
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("authority_server_shutdown");
                    return;
                }
            }
        }
    }
}
