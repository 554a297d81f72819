//! Per-application configuration loader.
//!
//! `ConfigLoader` resolves a `manifest.yaml`, a per-tool block embedded in
//! `package.json`, and built-in defaults into one validated `WorkerConfig`,
//! using `figment` for the layered merge the same way `golem-common`'s
//! config loaders stack a `Figment` of providers before a single
//! `extract()`. A `.env` file, if present, is merged separately afterward
//! because its values must win over the manifest's `env:` block specifically
//! — not over the whole merged structure — which a figment provider can't
//! express directly.

pub mod duration;

use self::duration::{millis_to_duration, parse_duration_ms, parse_size_bytes, RawDuration, RawSize};
use crate::error::{AppHostError, Result};
use figment::providers::{Format, Json, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: i64 = 30;
const DEFAULT_IDLE_TIMEOUT_SECS: i64 = 60;
const DEFAULT_TTL_SECS: i64 = 0;
const DEFAULT_MAX_REQUESTS: u64 = 1000;

const ENTRYPOINT_CANDIDATES: &[&str] = &[
    "index.js", "main.js", "server.js", "app.js", "index.mjs", "index.ts", "main.ts",
];

/// Paths exempt from the auth layer this crate treats as an external
/// collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicRoutes {
    None,
    All(Vec<String>),
    ByMethod(HashMap<String, Vec<String>>),
}

impl Default for PublicRoutes {
    fn default() -> Self {
        PublicRoutes::None
    }
}

/// Fully-resolved, validated per-app worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub entrypoint: PathBuf,
    pub timeout: Duration,
    pub idle_timeout: Duration,
    /// Zero means ephemeral: no pool caching, one-shot worker.
    pub ttl: Duration,
    pub max_requests: u64,
    pub max_body_size_bytes: u64,
    pub low_memory: bool,
    pub auto_install: bool,
    pub public_routes: PublicRoutes,
    pub env: HashMap<String, String>,
    pub inject_base: bool,
}

impl WorkerConfig {
    pub fn is_ephemeral(&self) -> bool {
        self.ttl == Duration::ZERO
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
struct RawManifest {
    entrypoint: Option<String>,
    timeout: Option<RawDuration>,
    #[serde(rename = "idleTimeout")]
    idle_timeout: Option<RawDuration>,
    ttl: Option<RawDuration>,
    #[serde(rename = "maxRequests")]
    max_requests: Option<u64>,
    #[serde(rename = "lowMemory")]
    low_memory: Option<bool>,
    #[serde(rename = "autoInstall")]
    auto_install: Option<bool>,
    #[serde(rename = "maxBodySize")]
    max_body_size: Option<RawSize>,
    #[serde(rename = "publicRoutes")]
    public_routes: Option<PublicRoutesRaw>,
    #[serde(rename = "injectBase")]
    inject_base: Option<bool>,
    env: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(untagged)]
enum PublicRoutesRaw {
    List(Vec<String>),
    ByMethod(HashMap<String, Vec<String>>),
}

#[derive(Serialize, Debug, Clone)]
struct RawDefaults {
    timeout: i64,
    #[serde(rename = "idleTimeout")]
    idle_timeout: i64,
    ttl: i64,
    #[serde(rename = "maxRequests")]
    max_requests: u64,
    #[serde(rename = "lowMemory")]
    low_memory: bool,
    #[serde(rename = "autoInstall")]
    auto_install: bool,
    #[serde(rename = "injectBase")]
    inject_base: bool,
}

impl Default for RawDefaults {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT_SECS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT_SECS,
            ttl: DEFAULT_TTL_SECS,
            max_requests: DEFAULT_MAX_REQUESTS,
            low_memory: false,
            auto_install: false,
            inject_base: false,
        }
    }
}

/// Resolves one app directory's `WorkerConfig`. Stateless apart from the
/// runtime-wide body-size ceiling, so a single instance is shared across
/// every `load` call.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    runtime_max_body_bytes: u64,
}

impl ConfigLoader {
    pub fn new(runtime_max_body_bytes: u64) -> Self {
        Self {
            runtime_max_body_bytes,
        }
    }

    /// Load and validate the `WorkerConfig` for `app_dir`.
    pub async fn load(&self, app_dir: &Path) -> Result<WorkerConfig> {
        let app_dir = app_dir.to_path_buf();
        let runtime_max_body_bytes = self.runtime_max_body_bytes;
        tokio::task::spawn_blocking(move || Self::load_sync(&app_dir, runtime_max_body_bytes))
            .await
            .map_err(|e| AppHostError::Internal(format!("config loader task panicked: {e}")))?
    }

    fn load_sync(app_dir: &Path, runtime_max_body_bytes: u64) -> Result<WorkerConfig> {
        let mut figment = Figment::new().merge(Serialized::defaults(RawDefaults::default()));

        if let Some(tool_block) = read_package_manifest_tool_block(app_dir) {
            figment = figment.merge(Json::string(&tool_block));
        }

        let manifest_path = app_dir.join("manifest.yaml");
        if manifest_path.is_file() {
            figment = figment.merge(Yaml::file(&manifest_path));
        }

        let raw: RawManifest = figment
            .extract()
            .map_err(|e| AppHostError::Validation(format!("failed to parse manifest: {e}")))?;

        let mut errors: Vec<String> = Vec::new();

        let timeout_ms = match raw.timeout.as_ref().map(parse_duration_ms).transpose() {
            Ok(v) => v.unwrap_or(DEFAULT_TIMEOUT_SECS * 1000),
            Err(e) => {
                errors.push(e);
                DEFAULT_TIMEOUT_SECS * 1000
            }
        };
        let mut idle_timeout_ms = match raw.idle_timeout.as_ref().map(parse_duration_ms).transpose() {
            Ok(v) => v.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS * 1000),
            Err(e) => {
                errors.push(e);
                DEFAULT_IDLE_TIMEOUT_SECS * 1000
            }
        };
        let ttl_ms = match raw.ttl.as_ref().map(parse_duration_ms).transpose() {
            Ok(v) => v.unwrap_or(DEFAULT_TTL_SECS),
            Err(e) => {
                errors.push(e);
                DEFAULT_TTL_SECS
            }
        };

        if timeout_ms <= 0 {
            errors.push(format!("timeout must be > 0 (got {timeout_ms}ms)"));
        }
        if idle_timeout_ms <= 0 {
            errors.push(format!("idleTimeout must be > 0 (got {idle_timeout_ms}ms)"));
        }
        if ttl_ms < 0 {
            errors.push(format!("ttl must be >= 0 (got {ttl_ms}ms)"));
        }
        if ttl_ms > 0 {
            if idle_timeout_ms > ttl_ms {
                idle_timeout_ms = ttl_ms;
            }
            if ttl_ms < timeout_ms {
                errors.push(format!(
                    "ttl must be >= timeout ({ttl_ms}ms < {timeout_ms}ms)"
                ));
            }
            if idle_timeout_ms < timeout_ms {
                errors.push(format!(
                    "idleTimeout must be >= timeout ({idle_timeout_ms}ms < {timeout_ms}ms)"
                ));
            }
        }

        let entrypoint = raw
            .entrypoint
            .map(PathBuf::from)
            .or_else(|| discover_entrypoint(app_dir));
        let entrypoint = match entrypoint {
            Some(p) => p,
            None => {
                errors.push(format!(
                    "no entrypoint found in {} (looked for {})",
                    app_dir.display(),
                    ENTRYPOINT_CANDIDATES.join(", ")
                ));
                PathBuf::new()
            }
        };

        let max_body_size_bytes = match raw.max_body_size.as_ref().map(parse_size_bytes).transpose() {
            Ok(v) => v.unwrap_or(runtime_max_body_bytes).min(runtime_max_body_bytes),
            Err(e) => {
                errors.push(e);
                runtime_max_body_bytes
            }
        };

        let public_routes = match raw.public_routes {
            None => PublicRoutes::None,
            Some(PublicRoutesRaw::List(list)) => PublicRoutes::All(list),
            Some(PublicRoutesRaw::ByMethod(map)) => PublicRoutes::ByMethod(map),
        };

        let mut env: HashMap<String, String> = raw
            .env
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, coerce_json_to_string(v)))
            .collect();
        merge_dotenv_file(app_dir, &mut env);

        if !errors.is_empty() {
            return Err(AppHostError::Validation(errors.join("; ")));
        }

        Ok(WorkerConfig {
            entrypoint,
            timeout: millis_to_duration(timeout_ms),
            idle_timeout: millis_to_duration(idle_timeout_ms),
            ttl: millis_to_duration(ttl_ms),
            max_requests: raw.max_requests.unwrap_or(DEFAULT_MAX_REQUESTS),
            max_body_size_bytes,
            low_memory: raw.low_memory.unwrap_or(false),
            auto_install: raw.auto_install.unwrap_or(false),
            public_routes,
            env,
            inject_base: raw.inject_base.unwrap_or(false),
        })
    }
}

/// Read `package.json`'s `name`/`version` identity fields, if present. Shared
/// with `AppKey::from_app_dir` callers so the file is parsed once per
/// resolution rather than independently by both the config loader and the
/// app-key deriver.
pub fn read_package_manifest_identity(app_dir: &Path) -> Option<(String, Option<String>)> {
    let value = read_package_json(app_dir)?;
    let name = value.get("name")?.as_str()?.to_string();
    let version = value
        .get("version")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    Some((name, version))
}

fn read_package_manifest_tool_block(app_dir: &Path) -> Option<String> {
    let value = read_package_json(app_dir)?;
    let block = value.get("apphost")?;
    serde_json::to_string(block).ok()
}

fn read_package_json(app_dir: &Path) -> Option<serde_json::Value> {
    let path = app_dir.join("package.json");
    let contents = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

fn discover_entrypoint(app_dir: &Path) -> Option<PathBuf> {
    ENTRYPOINT_CANDIDATES
        .iter()
        .map(|name| app_dir.join(name))
        .find(|path| path.is_file())
}

fn coerce_json_to_string(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Merge a `.env` file in `app_dir`, if present, into `env` with `.env`
/// entries winning key-by-key over the manifest's own `env:` block.
fn merge_dotenv_file(app_dir: &Path, env: &mut HashMap<String, String>) {
    let path = app_dir.join(".env");
    let Ok(contents) = std::fs::read_to_string(path) else {
        return;
    };
    for (key, value) in parse_dotenv(&contents) {
        env.insert(key, value);
    }
}

/// Hand-rolled `.env` parser: `KEY=VALUE` lines, `#` comments,
/// optional `'...'`/`"..."` quoting with quotes stripped, unquoted values
/// kept verbatim to end-of-line.
fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for line in contents.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some((key, value)) = trimmed.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = strip_dotenv_quotes(value.trim());
        out.push((key.to_string(), value));
    }
    out
}

fn strip_dotenv_quotes(value: &str) -> String {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'\'' && last == b'\'') || (first == b'"' && last == b'"') {
            return value[1..value.len() - 1].to_string();
        }
    }
    value.to_string()
}
