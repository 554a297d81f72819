//! Process-wide configuration for apphost.
//!
//! CLI arguments and environment variable handling using clap, following
//! the same `#[arg(long, env = "...")]` convention the teacher's
//! `config::Args` uses. This is distinct from the per-app `WorkerConfig`
//! that `worker::config::ConfigLoader` produces — `Args` governs the
//! front-door process itself.

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;

/// apphost — multi-tenant application runtime front door
#[derive(Parser, Debug, Clone)]
#[command(name = "apphost")]
#[command(about = "Front-door HTTP server with a bounded pool of warm worker processes")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Directory containing one subdirectory per deployed app
    #[arg(long, env = "DEPLOY_ROOT", default_value = "./apps")]
    pub deploy_root: PathBuf,

    /// Maximum number of warm worker instances kept in the pool
    #[arg(long, env = "POOL_MAX_SIZE", default_value = "32")]
    pub pool_max_size: usize,

    /// Hard ceiling on request body size, regardless of per-app config
    #[arg(long, env = "RUNTIME_MAX_BODY_BYTES", default_value = "104857600")]
    pub runtime_max_body_bytes: u64,

    /// Number of samples kept in the response-time circular buffer
    #[arg(long, env = "METRICS_WINDOW", default_value = "100")]
    pub metrics_window: usize,

    /// Deployment stage — gates log formatting and CSRF strictness
    #[arg(long, env = "STAGE", value_enum, default_value = "production")]
    pub stage: Stage,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
#[value(rename_all = "lowercase")]
pub enum Stage {
    Development,
    Staging,
    Production,
}

impl Stage {
    pub fn is_development(&self) -> bool {
        matches!(self, Stage::Development)
    }
}

impl Args {
    /// Validate configuration that clap's own parsing can't express.
    pub fn validate(&self) -> Result<(), String> {
        if self.pool_max_size == 0 {
            return Err("POOL_MAX_SIZE must be greater than zero".to_string());
        }
        if self.runtime_max_body_bytes == 0 {
            return Err("RUNTIME_MAX_BODY_BYTES must be greater than zero".to_string());
        }
        Ok(())
    }
}
