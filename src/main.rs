//! apphost — multi-tenant application runtime front door.

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tracing::{error, info};

use apphost::cli::Args;
use apphost::dispatch::RequestDispatcher;
use apphost::pool::WorkerPool;
use apphost::server::http::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    apphost::logging::init(&args.log_level, args.stage);

    if let Err(e) = args.validate() {
        error!("configuration error: {e}");
        std::process::exit(1);
    }

    info!(
        listen = %args.listen,
        deploy_root = %args.deploy_root.display(),
        pool_max_size = args.pool_max_size,
        stage = ?args.stage,
        "starting apphost"
    );

    let pool = WorkerPool::new(args.pool_max_size, args.metrics_window);
    let dispatcher = RequestDispatcher::new(
        args.deploy_root.clone(),
        Arc::clone(&pool),
        args.runtime_max_body_bytes,
    );

    let state = Arc::new(AppState {
        args,
        dispatcher,
        pool: Arc::clone(&pool),
        started_at: Instant::now(),
    });

    let server_state = Arc::clone(&state);
    let server = tokio::spawn(async move { http::run(server_state).await });

    tokio::select! {
        result = server => {
            if let Ok(Err(e)) = result {
                error!("server loop exited with error: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, retiring warm workers");
        }
    }

    pool.shutdown().await;
    info!("apphost shut down cleanly");
    Ok(())
}
