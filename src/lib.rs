//! apphost — multi-tenant application runtime.
//!
//! A front-door HTTP server routes each request to an isolated child-process
//! worker selected by the request path, keeping a bounded pool of warm
//! workers between requests to amortize process startup cost.

pub mod app_key;
pub mod cli;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod pool;
pub mod server;
pub mod worker;

pub use app_key::AppKey;
pub use error::{AppHostError, Result};
pub use pool::WorkerPool;
