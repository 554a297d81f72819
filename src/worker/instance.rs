//! `WorkerInstance` — owns one child process, its IPC channel, and its
//! lifecycle timers.
//!
//! Grounded in `doorway::worker::conductor::ConductorConnection`: a
//! connection (here, a spawned child process with piped stdio instead of a
//! WebSocket) is owned by a background task that multiplexes request/response
//! frames by correlation id through a `pending: HashMap<Uuid, oneshot::Sender<..>>`
//! map, exactly as the teacher's `handle_messages` does with `reqId`/`id`.
//! Unlike the teacher's conductor connection, a dead worker is never
//! reconnected — the pool simply spawns a fresh instance — so there is no
//! backoff loop here.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex as SyncMutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex as AsyncMutex, Notify};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::error::{AppHostError, Result};
use crate::worker::config::WorkerConfig;
use crate::worker::ipc::{decode_body, ChildFrame, ParentFrame, WorkerHttpRequest, WorkerHttpResponse};

/// Grace delay between a graceful `TERMINATE` and a forceful kill.
const TERMINATE_GRACE: Duration = Duration::from_millis(50);

/// Lifecycle states from the finite state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleState {
    Starting,
    Ready,
    Serving,
    Retiring,
    Terminated,
}

/// Status reported by `getStats()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WorkerStatus {
    Active,
    Idle,
    Ephemeral,
    Retiring,
}

/// Snapshot returned by `getStats()`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkerStats {
    pub age_ms: u64,
    pub idle_ms: u64,
    pub request_count: u64,
    pub status: WorkerStatus,
}

type PendingMap = Arc<AsyncMutex<HashMap<Uuid, oneshot::Sender<PendingOutcome>>>>;

enum PendingOutcome {
    Response(WorkerHttpResponse),
    ChildError(String),
}

pub struct WorkerInstance {
    pub id: u64,
    config: WorkerConfig,
    created_at: Instant,
    last_used_at: SyncMutex<Instant>,
    request_count: AtomicU64,
    total_latency_ms: AtomicU64,
    state: SyncMutex<LifecycleState>,
    in_flight: AtomicU64,
    ready: Arc<Notify>,
    ready_signaled: Arc<std::sync::atomic::AtomicBool>,
    pending: PendingMap,
    stdin: AsyncMutex<tokio::process::ChildStdin>,
    child: AsyncMutex<Option<Child>>,
}

impl WorkerInstance {
    /// Spawn a child process for `app_dir` using `config.entrypoint`. The
    /// returned instance does not block on readiness — the
    /// first `fetch` awaits it.
    pub async fn spawn(id: u64, app_dir: &Path, config: WorkerConfig) -> Result<Arc<Self>> {
        let entry_path = app_dir.join(&config.entrypoint);

        let mut command = Command::new("node");
        command
            .arg(&entry_path)
            .current_dir(app_dir)
            .env("APP_DIR", app_dir)
            .env("ENTRYPOINT", &entry_path)
            .env("INSTANCE_ID", id.to_string())
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| AppHostError::SpawnFailure {
            app_key: id.to_string(),
            message: e.to_string(),
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppHostError::SpawnFailure {
                app_key: id.to_string(),
                message: "child has no stdin pipe".to_string(),
            })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppHostError::SpawnFailure {
                app_key: id.to_string(),
                message: "child has no stdout pipe".to_string(),
            })?;

        let pending: PendingMap = Arc::new(AsyncMutex::new(HashMap::new()));
        let ready = Arc::new(Notify::new());
        let ready_signaled = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let instance = Arc::new(Self {
            id,
            config,
            created_at: Instant::now(),
            last_used_at: SyncMutex::new(Instant::now()),
            request_count: AtomicU64::new(0),
            total_latency_ms: AtomicU64::new(0),
            state: SyncMutex::new(LifecycleState::Starting),
            in_flight: AtomicU64::new(0),
            ready: Arc::clone(&ready),
            ready_signaled: Arc::clone(&ready_signaled),
            pending: Arc::clone(&pending),
            stdin: AsyncMutex::new(stdin),
            child: AsyncMutex::new(Some(child)),
        });

        let reader_instance = Arc::clone(&instance);
        tokio::spawn(async move {
            reader_loop(stdout, pending, ready, ready_signaled).await;
            reader_instance.on_child_exit().await;
        });

        Ok(instance)
    }

    /// Dispatch one request through this instance, multiplexed by `reqId`.
    ///
    /// Timeout accounting intentionally includes the initial `READY` wait,
    /// for predictable tail latency on the first request to a fresh
    /// instance (see `DESIGN.md`).
    pub async fn fetch(self: &Arc<Self>, req: WorkerHttpRequest) -> Result<WorkerHttpResponse> {
        {
            let state = *self.state.lock();
            if matches!(state, LifecycleState::Retiring | LifecycleState::Terminated) {
                return Err(AppHostError::WorkerUnavailable(format!(
                    "instance {} is {:?}",
                    self.id, state
                )));
            }
        }

        let deadline = self.config.timeout;
        let started_at = Instant::now();
        let req_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(req_id, tx);

        self.set_serving();

        // The whole operation — the READY wait, the write to the child's
        // stdin, and the response wait — shares one `timeoutMs` deadline, so
        // a hung or never-ready worker fails with `Timeout` instead of
        // hanging forever (spec.md §8 P7).
        let outcome = tokio::time::timeout(deadline, async move {
            // Create the `Notified` future before checking the flag: if it
            // were created after, a READY that lands between the load and
            // the `.await` would call `notify_waiters()` on zero waiters and
            // this future would never wake.
            let notified = self.ready.notified();
            if !self.ready_signaled.load(Ordering::SeqCst) {
                notified.await;
            }

            let frame = ParentFrame::request(req_id, &req);
            let line = frame
                .to_line()
                .map_err(|e| AppHostError::Internal(format!("failed to encode request: {e}")))?;
            {
                let mut stdin = self.stdin.lock().await;
                stdin
                    .write_all(line.as_bytes())
                    .await
                    .map_err(|e| AppHostError::WorkerCrashed(format!("write to worker failed: {e}")))?;
                stdin
                    .flush()
                    .await
                    .map_err(|e| AppHostError::WorkerCrashed(format!("flush to worker failed: {e}")))?;
            }

            match rx.await {
                Ok(PendingOutcome::Response(resp)) => Ok(resp),
                Ok(PendingOutcome::ChildError(message)) => Err(AppHostError::Internal(message)),
                Err(_recv_dropped) => Err(AppHostError::WorkerCrashed(format!(
                    "instance {} exited before responding",
                    self.id
                ))),
            }
        })
        .await;

        let result = match outcome {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(e)) => {
                self.pending.lock().await.remove(&req_id);
                Err(e)
            }
            Err(_elapsed) => {
                self.pending.lock().await.remove(&req_id);
                Err(AppHostError::Timeout(deadline.as_millis() as u64))
            }
        };

        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms
            .fetch_add(started_at.elapsed().as_millis() as u64, Ordering::Relaxed);
        self.touch();
        let remaining = self.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 {
            let mut state = self.state.lock();
            if *state == LifecycleState::Serving {
                *state = LifecycleState::Ready;
            }
        }

        if result.is_err() && self.config.is_ephemeral() {
            *self.state.lock() = LifecycleState::Retiring;
        }

        result
    }

    fn set_serving(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if matches!(*state, LifecycleState::Starting | LifecycleState::Ready) {
            *state = LifecycleState::Serving;
        }
    }

    pub fn touch(&self) {
        *self.last_used_at.lock() = Instant::now();
    }

    /// True iff the instance is eligible for reuse.
    pub fn is_healthy(&self) -> bool {
        let state = *self.state.lock();
        if matches!(state, LifecycleState::Retiring | LifecycleState::Terminated) {
            return false;
        }
        let now = Instant::now();
        if !self.config.ttl.is_zero() && now.duration_since(self.created_at) >= self.config.ttl {
            return false;
        }
        let idle = now.duration_since(*self.last_used_at.lock());
        if idle >= self.config.idle_timeout {
            return false;
        }
        if self.request_count.load(Ordering::Relaxed) >= self.config.max_requests {
            return false;
        }
        true
    }

    /// True iff this instance has gone unhealthy specifically by idling past
    /// `idleTimeoutMs`, as opposed to exhausting its ttl or request count.
    /// Used by the pool's cleanup pass to decide whether the advisory `IDLE`
    /// message is applicable before retiring.
    pub fn idle_expired(&self) -> bool {
        let now = Instant::now();
        now.duration_since(*self.last_used_at.lock()) >= self.config.idle_timeout
    }

    pub fn get_stats(&self) -> WorkerStats {
        let now = Instant::now();
        let age = now.duration_since(self.created_at);
        let idle = now.duration_since(*self.last_used_at.lock());
        let state = *self.state.lock();
        let status = if matches!(state, LifecycleState::Retiring | LifecycleState::Terminated) {
            WorkerStatus::Retiring
        } else if self.config.is_ephemeral() {
            WorkerStatus::Ephemeral
        } else if self.in_flight.load(Ordering::Relaxed) > 0 {
            WorkerStatus::Active
        } else {
            WorkerStatus::Idle
        };
        WorkerStats {
            age_ms: age.as_millis() as u64,
            idle_ms: idle.as_millis() as u64,
            request_count: self.request_count.load(Ordering::Relaxed),
            status,
        }
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Cumulative response latency this instance has spent serving requests,
    /// folded into `historicalStats[appKey].totalLatencyMs` on retirement.
    pub fn total_latency_ms(&self) -> u64 {
        self.total_latency_ms.load(Ordering::Relaxed)
    }

    /// Send a graceful shutdown message, wait a bounded delay, then force-kill.
    pub async fn terminate(&self) {
        *self.state.lock() = LifecycleState::Retiring;

        {
            if let Ok(line) = ParentFrame::Terminate.to_line() {
                let mut stdin = self.stdin.lock().await;
                let _ = stdin.write_all(line.as_bytes()).await;
                let _ = stdin.flush().await;
            }
        }

        let mut guard = self.child.lock().await;
        if let Some(child) = guard.as_mut() {
            match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
                Ok(Ok(_)) => {
                    debug!(instance = self.id, "worker exited gracefully");
                }
                _ => {
                    warn!(instance = self.id, "worker did not exit in time, killing");
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
            }
        }
        *self.state.lock() = LifecycleState::Terminated;
        self.fail_all_pending("instance terminated").await;
    }

    /// Advisory `IDLE` notification sent once when `idleTimeoutMs` elapses.
    /// Best-effort; failures are ignored since the cleanup scheduler will
    /// retire the instance regardless.
    pub async fn notify_idle(&self) {
        if let Ok(line) = ParentFrame::Idle.to_line() {
            let mut stdin = self.stdin.lock().await;
            let _ = stdin.write_all(line.as_bytes()).await;
            let _ = stdin.flush().await;
        }
    }

    async fn fail_all_pending(&self, reason: &str) {
        let mut pending = self.pending.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(PendingOutcome::ChildError(format!(
                "worker crashed: {reason}"
            )));
        }
    }

    async fn on_child_exit(self: Arc<Self>) {
        let had_pending = {
            let pending = self.pending.lock().await;
            !pending.is_empty()
        };
        if had_pending {
            self.fail_all_pending("child process exited").await;
        }
        *self.state.lock() = LifecycleState::Terminated;
    }
}

/// Reads newline-delimited JSON frames from the child's stdout and routes
/// them to the waiting caller by `reqId`, the same "map guarded by a mutex,
/// reader task pops entries on arrival" shape as
/// `doorway::worker::conductor::handle_messages`.
async fn reader_loop(
    stdout: tokio::process::ChildStdout,
    pending: PendingMap,
    ready: Arc<Notify>,
    ready_signaled: Arc<std::sync::atomic::AtomicBool>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let Some(frame) = ChildFrame::parse_line(&line) else {
                    warn!(%line, "worker sent an unparseable frame, dropping");
                    continue;
                };
                match frame {
                    ChildFrame::Ready => {
                        if !ready_signaled.swap(true, Ordering::SeqCst) {
                            ready.notify_waiters();
                        }
                        // A repeated READY mid-life is ignored.
                    }
                    ChildFrame::Response {
                        req_id,
                        status,
                        headers,
                        body,
                    } => {
                        let maybe_tx = pending.lock().await.remove(&req_id);
                        if let Some(tx) = maybe_tx {
                            let _ = tx.send(PendingOutcome::Response(WorkerHttpResponse {
                                status,
                                headers,
                                body: decode_body(&body),
                            }));
                        } else {
                            trace!(%req_id, "response arrived after caller gave up, dropping");
                        }
                    }
                    ChildFrame::Error { req_id, message } => {
                        let maybe_tx = pending.lock().await.remove(&req_id);
                        if let Some(tx) = maybe_tx {
                            let _ = tx.send(PendingOutcome::ChildError(message));
                        }
                    }
                    ChildFrame::Unknown => {
                        debug!("ignoring unknown frame type from worker");
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "error reading from worker stdout");
                break;
            }
        }
    }
}
