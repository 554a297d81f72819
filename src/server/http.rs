//! Front-door HTTP server.
//!
//! Raw `hyper` 1.x on a `TcpListener::accept` loop, one `http1::Builder`
//! connection per socket — the transport shape copied directly from the
//! teacher's `server/http.rs`, which is this codebase's idiomatic way of
//! standing up an HTTP front door without pulling in axum or tower.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cli::Args;
use crate::dispatch::{check_csrf, RequestDispatcher};
use crate::error::{AppHostError, AppHostErrorBody};
use crate::pool::WorkerPool;
use crate::worker::ipc::WorkerHttpRequest;

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared application state handed to every connection.
pub struct AppState {
    pub args: Args,
    pub dispatcher: RequestDispatcher,
    pub pool: Arc<WorkerPool>,
    pub started_at: Instant,
}

pub async fn run(state: Arc<AppState>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;
    info!(addr = %state.args.listen, "apphost listening");

    if state.args.stage.is_development() {
        warn!("development stage: CSRF/origin checks behave the same, but logs are pretty-printed and more verbose");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .preserve_header_case(true)
                        .title_case_headers(true)
                        .serve_connection(io, service)
                        .await
                    {
                        debug!(%addr, error = %err, "connection closed with error");
                    }
                });
            }
            Err(e) => {
                error!(error = %e, "error accepting connection");
            }
        }
    }
}

async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<BoxBody>, hyper::Error> {
    // Step 1: assign or echo a correlation id.
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!(%addr, %method, %path, %request_id, "incoming request");

    match dispatch(&state, req, &path, &request_id).await {
        Ok(resp) => Ok(stamp_request_id(resp, &request_id)),
        Err(err) => Ok(stamp_request_id(error_response(&err, &request_id), &request_id)),
    }
}

async fn dispatch(
    state: &Arc<AppState>,
    req: Request<Incoming>,
    path: &str,
    request_id: &str,
) -> Result<Response<BoxBody>, AppHostError> {
    if let Some(resp) = handle_builtin_route(state, path) {
        return Ok(resp);
    }

    let method = req.method().as_str().to_string();
    let headers = collect_headers(&req);

    // Step 2: CSRF/origin check for state-changing methods.
    check_csrf(&method, &headers)?;

    // Step 3: resolve the target app and its config.
    let resolved = state.dispatcher.resolve(path).await?;

    // Step 4: body-size enforcement, capped at the app's own limit.
    let body = read_body_capped(req, resolved.config.max_body_size_bytes).await?;

    let worker_req = WorkerHttpRequest {
        method,
        url: path.to_string(),
        headers,
        body,
    };

    // Steps 5-7: plugin onRequest, pool.fetch, plugin onResponse.
    let worker_resp = state.dispatcher.dispatch(&resolved, worker_req).await?;

    let mut builder = Response::builder().status(
        StatusCode::from_u16(worker_resp.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
    );
    for (name, value) in &worker_resp.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    let response = builder
        .body(to_boxed(Full::new(worker_resp.body)))
        .map_err(|e| AppHostError::Internal(format!("failed to build response: {e}")))?;

    Ok(response)
}

/// Ambient operator endpoints: a liveness probe and the pool's observability
/// surface. Not part of the per-app routing space.
fn handle_builtin_route(state: &Arc<AppState>, path: &str) -> Option<Response<BoxBody>> {
    match path {
        "/health" | "/healthz" => Some(
            Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "application/json")
                .body(to_boxed(Full::new(Bytes::from(
                    serde_json::json!({
                        "status": "ok",
                        "uptimeMs": state.started_at.elapsed().as_millis() as u64,
                        "commit": option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
                        "buildTime": option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
                    })
                    .to_string(),
                ))))
                .ok()?,
        ),
        "/metrics" => {
            let metrics = state.pool.get_metrics();
            let body = serde_json::to_string(&metrics).ok()?;
            Some(
                Response::builder()
                    .status(StatusCode::OK)
                    .header("content-type", "application/json")
                    .body(to_boxed(Full::new(Bytes::from(body))))
                    .ok()?,
            )
        }
        "/worker-stats" => {
            let stats = state.pool.get_worker_stats();
            let body = serde_json::to_string(&stats).ok()?;
            Some(
                Response::builder()
                    .status(StatusCode::OK)
                    .header("content-type", "application/json")
                    .body(to_boxed(Full::new(Bytes::from(body))))
                    .ok()?,
            )
        }
        _ => None,
    }
}

fn collect_headers(req: &Request<Incoming>) -> std::collections::HashMap<String, String> {
    req.headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

/// Reads the body up to `limit` bytes. One byte over is a `413`, matching
/// boundary behavior B1: exactly `limit` bytes is accepted.
async fn read_body_capped(
    req: Request<Incoming>,
    limit: u64,
) -> Result<Bytes, AppHostError> {
    if let Some(len) = req
        .headers()
        .get(hyper::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
    {
        if len > limit {
            return Err(AppHostError::PayloadTooLarge {
                actual: len,
                limit,
            });
        }
    }

    let mut collected = Vec::new();
    let mut body = req.into_body();
    while let Some(frame_result) = body.frame().await {
        let frame = frame_result
            .map_err(|e| AppHostError::Internal(format!("error reading body: {e}")))?;
        if let Ok(data) = frame.into_data() {
            if collected.len() as u64 + data.len() as u64 > limit {
                return Err(AppHostError::PayloadTooLarge {
                    actual: collected.len() as u64 + data.len() as u64,
                    limit,
                });
            }
            collected.extend_from_slice(&data);
        }
    }
    Ok(Bytes::from(collected))
}

fn error_response(err: &AppHostError, request_id: &str) -> Response<BoxBody> {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!(%request_id, error = %err, "request failed");
    } else {
        debug!(%request_id, error = %err, "request rejected");
    }
    let body = AppHostErrorBody::new(err, request_id);
    let json = serde_json::to_string(&body).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(to_boxed(Full::new(Bytes::from(json))))
        .unwrap_or_else(|_| {
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(to_boxed(Full::new(Bytes::new())))
                .expect("static response always builds")
        })
}

fn stamp_request_id(mut resp: Response<BoxBody>, request_id: &str) -> Response<BoxBody> {
    if let Ok(value) = hyper::header::HeaderValue::from_str(request_id) {
        resp.headers_mut()
            .insert("x-request-id", value);
    }
    resp
}

fn to_boxed(body: Full<Bytes>) -> BoxBody {
    body.map_err(|never: std::convert::Infallible| match never {})
        .boxed()
}
