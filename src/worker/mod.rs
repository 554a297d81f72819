//! Worker module — per-app configuration loading, the child-process worker
//! instance, and its IPC framing.

pub mod config;
pub mod instance;
pub mod ipc;

pub use config::{ConfigLoader, PublicRoutes, WorkerConfig};
pub use instance::{WorkerInstance, WorkerStats, WorkerStatus};
pub use ipc::{WorkerHttpRequest, WorkerHttpResponse};
