//! `RequestDispatcher` — the hot path from an inbound HTTP request to a
//! worker invocation and back.
//!
//! Grounded in `doorway::server::http::handle_request`'s `match (method,
//! path)` routing and its correlation-id handling in the same file: app
//! resolution walks the URL path against `deploy_root`, config loads are
//! memoized per directory (loading is I/O-bound and the dispatcher sits on
//! the hot path), and every typed error from the pool is mapped to an HTTP
//! status at exactly one place — `AppHostError::status_code`.

pub mod hooks;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;

use crate::app_key::AppKey;
use crate::error::{AppHostError, Result};
use crate::pool::WorkerPool;
use crate::worker::config::{ConfigLoader, WorkerConfig};
use crate::worker::ipc::{WorkerHttpRequest, WorkerHttpResponse};

use hooks::{HookChain, HookOutcome};

/// A request resolved to a concrete deployed app and its loaded config.
pub struct ResolvedRequest {
    pub app_dir: PathBuf,
    pub app_key: AppKey,
    pub config: Arc<WorkerConfig>,
}

pub struct RequestDispatcher {
    deploy_root: PathBuf,
    pool: Arc<WorkerPool>,
    config_loader: ConfigLoader,
    config_cache: DashMap<PathBuf, Arc<WorkerConfig>>,
    hooks: HookChain,
}

impl RequestDispatcher {
    pub fn new(deploy_root: PathBuf, pool: Arc<WorkerPool>, runtime_max_body_bytes: u64) -> Self {
        Self {
            deploy_root,
            pool,
            config_loader: ConfigLoader::new(runtime_max_body_bytes),
            config_cache: DashMap::new(),
            hooks: HookChain::new(),
        }
    }

    pub fn register_plugin(&mut self, plugin: Box<dyn hooks::Plugin>) {
        self.hooks.register(plugin);
    }

    /// Resolve `path` to a deployed app directory, the path's first segment
    /// being the app name (plugin-mounted paths take precedence but no
    /// plugin mounts routes in this build).
    pub fn resolve_app_dir(&self, path: &str) -> Option<PathBuf> {
        let trimmed = path.trim_start_matches('/');
        let app_name = trimmed.split('/').next().filter(|s| !s.is_empty())?;
        let candidate = self.deploy_root.join(app_name);
        if candidate.is_dir() {
            Some(candidate)
        } else {
            None
        }
    }

    /// Resolve the app for `path`, loading (or reusing a cached) config.
    pub async fn resolve(&self, path: &str) -> Result<ResolvedRequest> {
        let app_dir = self
            .resolve_app_dir(path)
            .ok_or_else(|| AppHostError::ResolutionFailure {
                path: path.to_string(),
            })?;

        let config = self.load_config_cached(&app_dir).await?;
        let identity = crate::worker::config::read_package_manifest_identity(&app_dir);
        let app_key = AppKey::from_app_dir(
            &app_dir,
            identity
                .as_ref()
                .map(|(name, version)| (name.as_str(), version.as_deref())),
        );

        Ok(ResolvedRequest {
            app_dir,
            app_key,
            config,
        })
    }

    async fn load_config_cached(&self, app_dir: &Path) -> Result<Arc<WorkerConfig>> {
        if let Some(cached) = self.config_cache.get(app_dir) {
            return Ok(Arc::clone(cached.value()));
        }
        let config = Arc::new(self.config_loader.load(app_dir).await?);
        self.config_cache
            .insert(app_dir.to_path_buf(), Arc::clone(&config));
        Ok(config)
    }

    /// Run the plugin `onRequest` chain, call `WorkerPool::fetch`, then run
    /// `onResponse`. Returns the final response or a typed error for the
    /// caller to map to an HTTP status.
    pub async fn dispatch(
        &self,
        resolved: &ResolvedRequest,
        req: WorkerHttpRequest,
    ) -> Result<WorkerHttpResponse> {
        let req = match self.hooks.run_request(req) {
            HookOutcome::Short(resp) => return Ok(resp),
            HookOutcome::Continue(req) => req,
        };

        let resp = self
            .pool
            .fetch(
                &resolved.app_dir,
                resolved.app_key.clone(),
                (*resolved.config).clone(),
                req,
            )
            .await?;

        Ok(self.hooks.run_response(resp))
    }
}

/// CSRF/origin check for state-changing methods (`POST`/`PUT`/`PATCH`/
/// `DELETE`). An `X-Internal` marker bypasses the check entirely (trusted
/// server-to-server traffic). Otherwise an `Origin` header is required; if
/// present, its scheme must be `http`/`https`, it must carry no userinfo,
/// and its host must equal the request's `Host` header.
pub fn check_csrf(method: &str, headers: &HashMap<String, String>) -> Result<()> {
    if !matches!(
        method.to_ascii_uppercase().as_str(),
        "POST" | "PUT" | "PATCH" | "DELETE"
    ) {
        return Ok(());
    }
    if header(headers, "x-internal").is_some() {
        return Ok(());
    }

    let Some(origin) = header(headers, "origin") else {
        return Err(AppHostError::CsrfRejected(
            "state-changing request missing Origin header".to_string(),
        ));
    };
    let host = header(headers, "host").unwrap_or_default();

    validate_origin(origin, host)
}

fn header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Parses `origin` by hand (scheme://host[:port]) rather than pulling in a
/// URL crate for a three-field check. Rejects userinfo (`user@host`), which
/// is not valid in a browser-sent `Origin` header but is cheap to reject
/// defensively.
fn validate_origin(origin: &str, host: &str) -> Result<()> {
    let (scheme, rest) = origin
        .split_once("://")
        .ok_or_else(|| AppHostError::CsrfRejected(format!("malformed Origin: {origin}")))?;

    if !matches!(scheme, "http" | "https") {
        return Err(AppHostError::CsrfRejected(format!(
            "unsupported Origin scheme: {scheme}"
        )));
    }
    if rest.contains('@') {
        return Err(AppHostError::CsrfRejected(
            "Origin must not carry credentials".to_string(),
        ));
    }

    if !hosts_match(rest, host) {
        return Err(AppHostError::CsrfRejected(format!(
            "Origin host {rest} does not match Host {host}"
        )));
    }
    Ok(())
}

/// Compares an Origin's host[:port] against the request's Host header.
/// Default ports (80/443) are not inferred; a mismatch in explicit port is
/// a rejection, matching the same literal-compare behavior most front
/// doors use for this check.
fn hosts_match(origin_host: &str, request_host: &str) -> bool {
    origin_host.eq_ignore_ascii_case(request_host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_requests_skip_the_csrf_check_entirely() {
        let headers = HashMap::new();
        assert!(check_csrf("GET", &headers).is_ok());
    }

    #[test]
    fn post_without_origin_or_internal_marker_is_rejected() {
        let headers = HashMap::new();
        assert!(check_csrf("POST", &headers).is_err());
    }

    #[test]
    fn post_with_internal_marker_bypasses_origin_check() {
        let mut headers = HashMap::new();
        headers.insert("X-Internal".to_string(), "1".to_string());
        assert!(check_csrf("POST", &headers).is_ok());
    }

    #[test]
    fn post_with_matching_origin_host_is_accepted() {
        let mut headers = HashMap::new();
        headers.insert("Origin".to_string(), "https://example.com".to_string());
        headers.insert("Host".to_string(), "example.com".to_string());
        assert!(check_csrf("POST", &headers).is_ok());
    }

    #[test]
    fn post_with_mismatched_origin_host_is_rejected() {
        let mut headers = HashMap::new();
        headers.insert("Origin".to_string(), "https://evil.example".to_string());
        headers.insert("Host".to_string(), "example.com".to_string());
        assert!(check_csrf("POST", &headers).is_err());
    }

    #[test]
    fn origin_with_credentials_is_rejected() {
        let mut headers = HashMap::new();
        headers.insert(
            "Origin".to_string(),
            "https://user@example.com".to_string(),
        );
        headers.insert("Host".to_string(), "example.com".to_string());
        assert!(check_csrf("POST", &headers).is_err());
    }

    #[test]
    fn resolve_app_dir_uses_the_first_path_segment() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("my-app")).unwrap();
        let pool = crate::pool::WorkerPool::new(4, 100);
        let dispatcher = RequestDispatcher::new(tmp.path().to_path_buf(), pool, 1024 * 1024);
        let resolved = dispatcher.resolve_app_dir("/my-app/sub/path");
        assert_eq!(resolved, Some(tmp.path().join("my-app")));
    }

    #[test]
    fn resolve_app_dir_returns_none_for_unknown_app() {
        let tmp = tempfile::tempdir().unwrap();
        let pool = crate::pool::WorkerPool::new(4, 100);
        let dispatcher = RequestDispatcher::new(tmp.path().to_path_buf(), pool, 1024 * 1024);
        assert_eq!(dispatcher.resolve_app_dir("/missing"), None);
    }
}
