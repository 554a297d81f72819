//! Logging infrastructure for apphost.
//!
//! Structured logging via `tracing` + `tracing-subscriber`: an `EnvFilter`
//! layered with either a pretty formatter (development) or a JSON formatter
//! (staging/production), since every error response is keyed by a
//! correlation id that must be greppable in aggregated logs.

use crate::cli::Stage;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global tracing subscriber. Call once at process startup.
pub fn init(log_level: &str, stage: Stage) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("apphost={log_level},info").into());

    let registry = tracing_subscriber::registry().with(filter);

    if stage.is_development() {
        registry.with(tracing_subscriber::fmt::layer().pretty()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    }
}
