//! End-to-end `WorkerPool` scenarios against a fake worker process, mirroring
//! the concrete scenarios seeded in spec.md §8.

mod common;

use std::collections::HashMap;
use std::time::Duration;

use apphost::worker::config::{ConfigLoader, WorkerConfig};
use apphost::worker::ipc::WorkerHttpRequest;
use apphost::AppKey;

fn get_request() -> WorkerHttpRequest {
    WorkerHttpRequest {
        method: "GET".to_string(),
        url: "/".to_string(),
        headers: HashMap::new(),
        body: bytes::Bytes::new(),
    }
}

async fn load_config(app_dir: &std::path::Path) -> WorkerConfig {
    ConfigLoader::new(100 * 1024 * 1024)
        .load(app_dir)
        .await
        .expect("config loads")
}

/// Scenario 1: warm cache reuse. Two sequential requests to the same app
/// produce one miss, one hit, and exactly one spawned worker.
#[tokio::test]
async fn warm_cache_reuse() {
    common::install_fake_node();
    let deploy_root = tempfile::tempdir().unwrap();
    let app_dir = common::deploy_app(deploy_root.path(), "a", "ttl: 300\n");
    let config = load_config(&app_dir).await;
    let app_key = AppKey::new("a", "1.0.0");

    let pool = apphost::pool::WorkerPool::new(5, 100);

    let resp1 = pool
        .fetch(&app_dir, app_key.clone(), config.clone(), get_request())
        .await
        .unwrap();
    let resp2 = pool
        .fetch(&app_dir, app_key.clone(), config, get_request())
        .await
        .unwrap();

    assert_eq!(resp1.status, 200);
    assert_eq!(resp1.body, resp2.body);

    let metrics = pool.get_metrics();
    assert_eq!(metrics.misses, 1);
    assert_eq!(metrics.hits, 1);
    assert_eq!(metrics.total_workers_created, 1);

    pool.shutdown().await;
}

/// Scenario 2: ephemeral workers (`ttlMs == 0`) never touch the LRU and are
/// torn down immediately after serving their one request.
#[tokio::test]
async fn ephemeral_worker_never_caches() {
    common::install_fake_node();
    let deploy_root = tempfile::tempdir().unwrap();
    let app_dir = common::deploy_app(deploy_root.path(), "a", "");
    let config = load_config(&app_dir).await;
    assert!(config.is_ephemeral());
    let app_key = AppKey::new("a", "0.0.0");

    let pool = apphost::pool::WorkerPool::new(5, 100);
    let resp = pool
        .fetch(&app_dir, app_key, config, get_request())
        .await
        .unwrap();
    assert_eq!(resp.status, 200);

    let metrics = pool.get_metrics();
    assert_eq!(metrics.active_workers, 0, "ephemeral worker must not enter the LRU");
    assert_eq!(metrics.misses, 1);
    assert_eq!(metrics.hits, 0);

    pool.shutdown().await;
}

/// Scenario 3: with `maxSize == 2`, serving three distinct apps evicts the
/// least-recently-used one and records exactly one eviction.
#[tokio::test]
async fn lru_eviction_on_third_distinct_app() {
    common::install_fake_node();
    let deploy_root = tempfile::tempdir().unwrap();
    let dir_a = common::deploy_app(deploy_root.path(), "a", "ttl: 300\n");
    let dir_b = common::deploy_app(deploy_root.path(), "b", "ttl: 300\n");
    let dir_c = common::deploy_app(deploy_root.path(), "c", "ttl: 300\n");

    let cfg_a = load_config(&dir_a).await;
    let cfg_b = load_config(&dir_b).await;
    let cfg_c = load_config(&dir_c).await;

    let pool = apphost::pool::WorkerPool::new(2, 100);

    pool.fetch(&dir_a, AppKey::new("a", "1.0.0"), cfg_a, get_request())
        .await
        .unwrap();
    pool.fetch(&dir_b, AppKey::new("b", "1.0.0"), cfg_b, get_request())
        .await
        .unwrap();
    pool.fetch(&dir_c, AppKey::new("c", "1.0.0"), cfg_c, get_request())
        .await
        .unwrap();

    let metrics = pool.get_metrics();
    assert_eq!(metrics.evictions, 1);
    assert_eq!(metrics.total_workers_created, 3);
    assert_eq!(metrics.active_workers, 2);

    pool.shutdown().await;
}

/// Scenario 4: two directories resolving to the same AppKey is a deployment
/// error, not silently served from whichever directory got there first.
#[tokio::test]
async fn key_collision_between_distinct_directories() {
    common::install_fake_node();
    let deploy_root = tempfile::tempdir().unwrap();
    let dir_a = common::deploy_app(deploy_root.path(), "a", "ttl: 300\n");
    let dir_a_dup = common::deploy_app(deploy_root.path(), "a-dup", "ttl: 300\n");

    let cfg = load_config(&dir_a).await;
    let key = AppKey::new("shared", "1.0.0");

    let pool = apphost::pool::WorkerPool::new(5, 100);
    pool.fetch(&dir_a, key.clone(), cfg.clone(), get_request())
        .await
        .unwrap();

    let err = pool
        .fetch(&dir_a_dup, key, cfg, get_request())
        .await
        .unwrap_err();
    assert!(matches!(err, apphost::AppHostError::KeyCollision { .. }));

    pool.shutdown().await;
}

/// B4: a worker that sleeps past its timeout yields exactly one `Timeout`
/// error and, being ephemeral, is retired rather than reused.
#[tokio::test]
async fn slow_worker_times_out() {
    common::install_fake_node();
    let deploy_root = tempfile::tempdir().unwrap();
    let app_dir = common::deploy_app(
        deploy_root.path(),
        "slow",
        "ttl: 0\ntimeout: \"1\"\nenv:\n  FAKE_WORKER_MODE: sleep\n",
    );
    let config = load_config(&app_dir).await;
    assert_eq!(config.timeout, Duration::from_secs(1));

    let pool = apphost::pool::WorkerPool::new(5, 100);
    let err = pool
        .fetch(
            &app_dir,
            AppKey::new("slow", "0.0.0"),
            config,
            get_request(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, apphost::AppHostError::Timeout(_)));
    pool.shutdown().await;
}

/// P6: `getWorkerStats[k].requestCount` is non-decreasing across
/// retirements — a fresh instance for a key that already retired once
/// continues the running total rather than resetting it.
#[tokio::test]
async fn historical_stats_accumulate_across_retirement() {
    common::install_fake_node();
    let deploy_root = tempfile::tempdir().unwrap();
    let app_dir = common::deploy_app(deploy_root.path(), "a", "ttl: \"1\"\ntimeout: \"1\"\n");
    let app_key = AppKey::new("a", "1.0.0");

    let pool = apphost::pool::WorkerPool::new(5, 100);

    // First instance: one request, then let its ttl naturally expire.
    let config = load_config(&app_dir).await;
    pool.fetch(&app_dir, app_key.clone(), config, get_request())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;

    // The cached instance is now unhealthy (ttl exceeded); this fetch finds
    // it stale, retires it (folding its stats into `historicalStats`), and
    // spawns a fresh instance for the same key.
    let config = load_config(&app_dir).await;
    pool.fetch(&app_dir, app_key.clone(), config, get_request())
        .await
        .unwrap();

    let stats = pool.get_worker_stats();
    let entry = stats
        .get(app_key.as_str())
        .expect("app_key present in worker stats");
    assert_eq!(
        entry.request_count, 2,
        "request_count must accumulate the retired instance's count plus the fresh one's"
    );
    assert!(
        entry.total_latency_ms > 0,
        "total_latency_ms must also carry over from the retired instance"
    );
    // The live instance is the fresh one, not retiring.
    assert!(entry.status.is_some());

    pool.shutdown().await;
}
