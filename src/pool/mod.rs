//! `WorkerPool` — the bounded LRU coordinator that sits between the
//! dispatcher and the warm `WorkerInstance`s it keeps alive.
//!
//! Grounded in `doorway::worker::pool::WorkerPool`: atomic hit/miss/error
//! counters and a `metrics()` snapshot carry over directly. What's new here
//! is the LRU eviction policy and per-appKey historical stats accumulation,
//! since the teacher's pool is a single fixed-size connection set with no
//! per-key identity or eviction to speak of.

pub mod lru;
pub mod metrics;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tracing::{info, warn};

use crate::app_key::AppKey;
use crate::error::{AppHostError, Result};
use crate::worker::config::WorkerConfig;
use crate::worker::ipc::{WorkerHttpRequest, WorkerHttpResponse};
use crate::worker::instance::{WorkerInstance, WorkerStatus};

use lru::LruMap;
use metrics::{MetricsRecorder, PoolMetrics};

/// Floor and ceiling on the background cleanup scheduler's tick, so an
/// empty pool or a pool of very long-lived apps doesn't busy-loop or stall
/// forever waiting for the next natural tick.
const CLEANUP_TICK_FLOOR: Duration = Duration::from_millis(500);
const CLEANUP_TICK_DEFAULT: Duration = Duration::from_secs(30);

struct PoolEntry {
    instance: Arc<WorkerInstance>,
    app_dir: PathBuf,
}

#[derive(Debug, Clone, Default)]
struct HistoricalStats {
    request_count: u64,
    total_latency_ms: u64,
}

/// Merged view of a worker's live and historical counters, returned by
/// `get_worker_stats`. `status`/`age_ms`/`idle_ms` are `None` once an app's
/// last instance has retired and nothing has replaced it yet; the request
/// count and latency total keep accumulating regardless.
#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkerStatsEntry {
    pub status: Option<WorkerStatus>,
    pub age_ms: Option<u64>,
    pub idle_ms: Option<u64>,
    pub request_count: u64,
    pub total_latency_ms: u64,
}

/// Bounded LRU of warm `WorkerInstance`s keyed by `AppKey`, plus the
/// bookkeeping that survives individual workers: historical stats, creation
/// coalescing locks, and the background cleanup scheduler.
pub struct WorkerPool {
    lru: SyncMutex<LruMap<AppKey, PoolEntry>>,
    ephemeral: DashMap<AppKey, Arc<WorkerInstance>>,
    historical_stats: DashMap<AppKey, HistoricalStats>,
    creation_locks: DashMap<AppKey, Arc<AsyncMutex<()>>>,
    metrics: MetricsRecorder,
    next_id: AtomicU64,
    started_at: Instant,
    shutdown: Notify,
    shutting_down: std::sync::atomic::AtomicBool,
}

impl WorkerPool {
    pub fn new(max_size: usize, metrics_window: usize) -> Arc<Self> {
        let pool = Arc::new(Self {
            lru: SyncMutex::new(LruMap::new(max_size.max(1))),
            ephemeral: DashMap::new(),
            historical_stats: DashMap::new(),
            creation_locks: DashMap::new(),
            metrics: MetricsRecorder::new(metrics_window),
            next_id: AtomicU64::new(1),
            started_at: Instant::now(),
            shutdown: Notify::new(),
            shutting_down: std::sync::atomic::AtomicBool::new(false),
        });

        let cleanup_pool = Arc::clone(&pool);
        tokio::spawn(async move { cleanup_pool.cleanup_loop().await });

        pool
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Serve `req` against the app at `app_dir`, identified by `app_key`,
    /// under `config`. Ephemeral configs (`ttlMs == 0`) never touch the LRU.
    pub async fn fetch(
        self: &Arc<Self>,
        app_dir: &Path,
        app_key: AppKey,
        config: WorkerConfig,
        req: WorkerHttpRequest,
    ) -> Result<WorkerHttpResponse> {
        if config.is_ephemeral() {
            return self.fetch_ephemeral(app_dir, app_key, config, req).await;
        }

        if let Some(instance) = self.probe(&app_key, app_dir)? {
            return self.serve(instance, req).await;
        }

        let lock = self.creation_lock(&app_key);
        let _guard = lock.lock().await;

        // Double-checked: a concurrent waiter may have created the instance
        // while we were waiting for the creation lock.
        if let Some(instance) = self.probe(&app_key, app_dir)? {
            return self.serve(instance, req).await;
        }

        self.metrics.record_miss();
        let instance = self.create_and_insert(app_dir, &app_key, config).await?;
        self.serve(instance, req).await
    }

    async fn fetch_ephemeral(
        self: &Arc<Self>,
        app_dir: &Path,
        app_key: AppKey,
        config: WorkerConfig,
        req: WorkerHttpRequest,
    ) -> Result<WorkerHttpResponse> {
        self.metrics.record_miss();
        let id = self.next_id();
        let instance = match WorkerInstance::spawn(id, app_dir, config).await {
            Ok(instance) => instance,
            Err(e) => {
                self.metrics.record_worker_failed();
                return Err(e);
            }
        };
        self.metrics.record_worker_created();
        self.ephemeral.insert(app_key.clone(), Arc::clone(&instance));

        let started = Instant::now();
        let result = instance.fetch(req).await;
        self.metrics
            .record_response_time_ms(started.elapsed().as_millis() as u64);

        self.ephemeral.remove(&app_key);
        self.fold_into_historical(&app_key, &instance);
        tokio::spawn(async move { instance.terminate().await });

        result
    }

    async fn serve(
        &self,
        instance: Arc<WorkerInstance>,
        req: WorkerHttpRequest,
    ) -> Result<WorkerHttpResponse> {
        let started = Instant::now();
        let result = instance.fetch(req).await;
        self.metrics
            .record_response_time_ms(started.elapsed().as_millis() as u64);
        result
    }

    /// Look up a cached, healthy instance for `app_key`, bound to `app_dir`.
    /// Returns `Err(KeyCollision)` if the key is already bound to a
    /// different directory. A cache hit touches recency and records the
    /// `hits` counter; a stale entry is retired in the background and the
    /// call is treated as a miss for the purposes of this lookup (the
    /// caller proceeds to create a fresh instance).
    fn probe(&self, app_key: &AppKey, app_dir: &Path) -> Result<Option<Arc<WorkerInstance>>> {
        let mut lru = self.lru.lock();
        let Some(entry) = lru.get(app_key) else {
            return Ok(None);
        };
        if entry.app_dir.as_path() != app_dir {
            return Err(AppHostError::KeyCollision {
                key: app_key.as_str().to_string(),
                existing_dir: entry.app_dir.display().to_string(),
                new_dir: app_dir.display().to_string(),
            });
        }
        if entry.instance.is_healthy() {
            let instance = Arc::clone(&entry.instance);
            lru.touch(app_key);
            drop(lru);
            self.metrics.record_hit();
            return Ok(Some(instance));
        }
        drop(lru);
        self.retire_stale(app_key);
        Ok(None)
    }

    fn retire_stale(&self, app_key: &AppKey) {
        let entry = self.lru.lock().remove(app_key);
        if let Some(entry) = entry {
            self.fold_into_historical(app_key, &entry.instance);
            tokio::spawn(async move { entry.instance.terminate().await });
        }
    }

    async fn create_and_insert(
        &self,
        app_dir: &Path,
        app_key: &AppKey,
        config: WorkerConfig,
    ) -> Result<Arc<WorkerInstance>> {
        let id = self.next_id();
        let instance = match WorkerInstance::spawn(id, app_dir, config).await {
            Ok(instance) => instance,
            Err(e) => {
                self.metrics.record_worker_failed();
                return Err(e);
            }
        };
        self.metrics.record_worker_created();

        let evicted = self.lru.lock().insert(
            app_key.clone(),
            PoolEntry {
                instance: Arc::clone(&instance),
                app_dir: app_dir.to_path_buf(),
            },
        );

        if let Some((victim_key, victim_entry)) = evicted {
            self.metrics.record_eviction();
            self.fold_into_historical(&victim_key, &victim_entry.instance);
            info!(app_key = %victim_key, "evicting least-recently-used worker");
            tokio::spawn(async move { victim_entry.instance.terminate().await });
        }

        Ok(instance)
    }

    fn creation_lock(&self, app_key: &AppKey) -> Arc<AsyncMutex<()>> {
        Arc::clone(
            self.creation_locks
                .entry(app_key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .value(),
        )
    }

    fn fold_into_historical(&self, app_key: &AppKey, instance: &Arc<WorkerInstance>) {
        let mut stats = self.historical_stats.entry(app_key.clone()).or_default();
        stats.request_count += instance.request_count();
        stats.total_latency_ms += instance.total_latency_ms();
    }

    pub fn get_metrics(&self) -> PoolMetrics {
        let active_workers = self.lru.lock().len();
        self.metrics.snapshot(active_workers)
    }

    pub fn get_worker_stats(&self) -> HashMap<String, WorkerStatsEntry> {
        let mut out = HashMap::new();

        for item in self.historical_stats.iter() {
            out.insert(
                item.key().as_str().to_string(),
                WorkerStatsEntry {
                    status: None,
                    age_ms: None,
                    idle_ms: None,
                    request_count: item.value().request_count,
                    total_latency_ms: item.value().total_latency_ms,
                },
            );
        }

        for item in self.ephemeral.iter() {
            let live = item.value().get_stats();
            out.insert(
                item.key().as_str().to_string(),
                WorkerStatsEntry {
                    status: Some(live.status),
                    age_ms: Some(live.age_ms),
                    idle_ms: Some(live.idle_ms),
                    request_count: live.request_count,
                    total_latency_ms: item.value().total_latency_ms(),
                },
            );
        }

        let lru = self.lru.lock();
        for (key, entry) in lru.iter() {
            let live = entry.instance.get_stats();
            let historical = self
                .historical_stats
                .get(key)
                .map(|r| r.value().clone())
                .unwrap_or_default();
            out.insert(
                key.as_str().to_string(),
                WorkerStatsEntry {
                    status: Some(live.status),
                    age_ms: Some(live.age_ms),
                    idle_ms: Some(live.idle_ms),
                    request_count: historical.request_count + live.request_count,
                    total_latency_ms: historical.total_latency_ms + entry.instance.total_latency_ms(),
                },
            );
        }

        out
    }

    /// Retire every cached instance and stop the cleanup scheduler. Resolves
    /// once every child has exited or been force-killed.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();

        let entries: Vec<(AppKey, PoolEntry)> = {
            let mut lru = self.lru.lock();
            let keys: Vec<AppKey> = lru.keys().cloned().collect();
            keys.into_iter()
                .filter_map(|k| lru.remove(&k).map(|entry| (k, entry)))
                .collect()
        };

        let mut terminations = Vec::with_capacity(entries.len());
        for (key, entry) in entries {
            self.fold_into_historical(&key, &entry.instance);
            terminations.push(async move { entry.instance.terminate().await });
        }
        futures::future::join_all(terminations).await;
    }

    /// Interval at which the background cleanup pass runs: half the
    /// shortest `min(idleTimeoutMs, ttlMs)` among currently cached entries,
    /// so no entry can go more than one tick past its own deadline.
    fn cleanup_tick_interval(&self) -> Duration {
        let lru = self.lru.lock();
        let shortest = lru
            .iter()
            .map(|(_, entry)| {
                let cfg = entry.instance.config();
                let bound = if cfg.ttl.is_zero() {
                    cfg.idle_timeout
                } else {
                    cfg.idle_timeout.min(cfg.ttl)
                };
                bound / 2
            })
            .min();
        shortest
            .unwrap_or(CLEANUP_TICK_DEFAULT)
            .max(CLEANUP_TICK_FLOOR)
    }

    async fn cleanup_loop(self: Arc<Self>) {
        loop {
            let tick = self.cleanup_tick_interval();
            tokio::select! {
                _ = tokio::time::sleep(tick) => {
                    if self.shutting_down.load(Ordering::SeqCst) {
                        break;
                    }
                    self.run_cleanup_pass();
                }
                _ = self.shutdown.notified() => {
                    break;
                }
            }
        }
    }

    fn run_cleanup_pass(&self) {
        let stale: Vec<(AppKey, Arc<WorkerInstance>)> = {
            let lru = self.lru.lock();
            lru.iter()
                .filter(|(_, entry)| !entry.instance.is_healthy())
                .map(|(key, entry)| (key.clone(), Arc::clone(&entry.instance)))
                .collect()
        };
        for (key, instance) in stale {
            warn!(app_key = %key, "cleanup scheduler retiring unhealthy worker");
            if instance.idle_expired() {
                let instance = Arc::clone(&instance);
                tokio::spawn(async move { instance.notify_idle().await });
            }
            self.retire_stale(&key);
        }
    }
}
