//! Typed error taxonomy for apphost.
//!
//! Every layer below the dispatcher (`pool`, `worker`, `worker::config`)
//! returns `Result<_, AppHostError>` and never constructs an HTTP response;
//! mapping to a status code happens exactly once, at the dispatcher
//! boundary (`dispatch::status_code`).

use std::fmt;

pub type Result<T> = std::result::Result<T, AppHostError>;

/// Unified error type for the pool, worker, config loader, and dispatcher.
#[derive(thiserror::Error, Debug, Clone)]
pub enum AppHostError {
    /// Config loader rejected a manifest (aggregated, single message).
    #[error("invalid worker config: {0}")]
    Validation(String),

    /// No deployed app matches the request path.
    #[error("no app found for path {path}")]
    ResolutionFailure { path: String },

    /// Request body exceeded the app's configured cap.
    #[error("request body of {actual} bytes exceeds the {limit} byte cap")]
    PayloadTooLarge { actual: u64, limit: u64 },

    /// CSRF/origin check failed for a state-changing request.
    #[error("rejected by origin check: {0}")]
    CsrfRejected(String),

    /// The child process could not be spawned.
    #[error("failed to spawn worker for {app_key}: {message}")]
    SpawnFailure { app_key: String, message: String },

    /// The worker did not respond within its deadline.
    #[error("worker timed out after {0}ms")]
    Timeout(u64),

    /// The child process exited before completing the in-flight request.
    #[error("worker crashed: {0}")]
    WorkerCrashed(String),

    /// The instance is retiring or terminated and cannot accept new work.
    #[error("worker unavailable: {0}")]
    WorkerUnavailable(String),

    /// Two directories resolved to the same AppKey.
    #[error("key collision for {key}: already serving {existing_dir}, got {new_dir}")]
    KeyCollision {
        key: String,
        existing_dir: String,
        new_dir: String,
    },

    /// Anything else — logged with the correlation id, never shown raw to callers.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppHostError {
    /// Machine-readable code used in error response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AppHostError::Validation(_) => "validation",
            AppHostError::ResolutionFailure { .. } => "resolution_failure",
            AppHostError::PayloadTooLarge { .. } => "payload_too_large",
            AppHostError::CsrfRejected(_) => "csrf_rejected",
            AppHostError::SpawnFailure { .. } => "spawn_failure",
            AppHostError::Timeout(_) => "timeout",
            AppHostError::WorkerCrashed(_) => "worker_crashed",
            AppHostError::WorkerUnavailable(_) => "worker_unavailable",
            AppHostError::KeyCollision { .. } => "key_collision",
            AppHostError::Internal(_) => "internal",
        }
    }

    /// HTTP status this error maps to at the dispatcher boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            AppHostError::Validation(_) => 500,
            AppHostError::ResolutionFailure { .. } => 404,
            AppHostError::PayloadTooLarge { .. } => 413,
            AppHostError::CsrfRejected(_) => 403,
            AppHostError::SpawnFailure { .. } => 502,
            AppHostError::Timeout(_) => 504,
            AppHostError::WorkerCrashed(_) => 502,
            AppHostError::WorkerUnavailable(_) => 503,
            AppHostError::KeyCollision { .. } => 500,
            AppHostError::Internal(_) => 500,
        }
    }
}

impl fmt::Display for AppHostErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// JSON-serializable error body returned to callers.
#[derive(serde::Serialize, Debug, Clone)]
pub struct AppHostErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(rename = "requestId")]
    pub request_id: String,
}

impl AppHostErrorBody {
    pub fn new(err: &AppHostError, request_id: impl Into<String>) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            request_id: request_id.into(),
        }
    }
}
