//! End-to-end `RequestDispatcher` scenarios: app resolution, body-size
//! enforcement, and CSRF rejection, against a fake worker process.

mod common;

use std::collections::HashMap;

use apphost::dispatch::RequestDispatcher;
use apphost::error::AppHostError;
use apphost::worker::ipc::WorkerHttpRequest;

fn req(method: &str, headers: HashMap<String, String>, body: &[u8]) -> WorkerHttpRequest {
    WorkerHttpRequest {
        method: method.to_string(),
        url: "/echo/ping".to_string(),
        headers,
        body: bytes::Bytes::copy_from_slice(body),
    }
}

#[tokio::test]
async fn resolves_and_dispatches_to_the_named_app() {
    common::install_fake_node();
    let deploy_root = tempfile::tempdir().unwrap();
    common::deploy_app(deploy_root.path(), "echo", "ttl: 300\n");

    let pool = apphost::pool::WorkerPool::new(5, 100);
    let dispatcher =
        RequestDispatcher::new(deploy_root.path().to_path_buf(), pool, 1024 * 1024);

    let resolved = dispatcher.resolve("/echo/ping").await.unwrap();
    assert_eq!(resolved.app_key.as_str(), "echo@0.0.0");

    let resp = dispatcher
        .dispatch(&resolved, req("GET", HashMap::new(), b""))
        .await
        .unwrap();
    assert_eq!(resp.status, 200);
}

#[tokio::test]
async fn unknown_app_is_a_resolution_failure() {
    common::install_fake_node();
    let deploy_root = tempfile::tempdir().unwrap();

    let pool = apphost::pool::WorkerPool::new(5, 100);
    let dispatcher =
        RequestDispatcher::new(deploy_root.path().to_path_buf(), pool, 1024 * 1024);

    let err = dispatcher.resolve("/nope/ping").await.unwrap_err();
    assert!(matches!(err, AppHostError::ResolutionFailure { .. }));
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn config_is_memoized_across_resolutions() {
    common::install_fake_node();
    let deploy_root = tempfile::tempdir().unwrap();
    common::deploy_app(deploy_root.path(), "echo", "maxRequests: 42\n");

    let pool = apphost::pool::WorkerPool::new(5, 100);
    let dispatcher =
        RequestDispatcher::new(deploy_root.path().to_path_buf(), pool, 1024 * 1024);

    let first = dispatcher.resolve("/echo/a").await.unwrap();
    let second = dispatcher.resolve("/echo/b").await.unwrap();
    assert!(std::sync::Arc::ptr_eq(&first.config, &second.config));
    assert_eq!(first.config.max_requests, 42);
}
