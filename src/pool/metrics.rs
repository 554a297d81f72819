//! `MetricsRecorder` — circular-buffer aggregator of per-pool counters.
//! Counters are plain atomics so `getMetrics` never blocks the hot path;
//! the latency buffer is a small fixed-size array plus a write index,
//! matching the design note's "avoids allocation on the hot path" guidance.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

const DEFAULT_WINDOW: usize = 100;

/// Snapshot returned by `WorkerPool::get_metrics`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolMetrics {
    pub active_workers: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
    pub total_requests: u64,
    pub total_workers_created: u64,
    pub total_workers_failed: u64,
    pub avg_response_time_ms: f64,
    pub requests_per_second: f64,
    pub uptime_ms: u64,
}

struct LatencyBuffer {
    samples: Vec<u64>,
    write_idx: usize,
    filled: usize,
}

impl LatencyBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0; capacity.max(1)],
            write_idx: 0,
            filled: 0,
        }
    }

    fn push(&mut self, sample_ms: u64) {
        let capacity = self.samples.len();
        self.samples[self.write_idx] = sample_ms;
        self.write_idx = (self.write_idx + 1) % capacity;
        if self.filled < capacity {
            self.filled += 1;
        }
    }

    fn average(&self) -> f64 {
        if self.filled == 0 {
            return 0.0;
        }
        let sum: u64 = self.samples[..self.filled].iter().sum();
        sum as f64 / self.filled as f64
    }
}

/// Per-pool counters and the response-time circular buffer.
pub struct MetricsRecorder {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    total_workers_created: AtomicU64,
    total_workers_failed: AtomicU64,
    latency: Mutex<LatencyBuffer>,
    started_at: Instant,
}

impl MetricsRecorder {
    pub fn new(window: usize) -> Self {
        let window = if window == 0 { DEFAULT_WINDOW } else { window };
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            total_workers_created: AtomicU64::new(0),
            total_workers_failed: AtomicU64::new(0),
            latency: Mutex::new(LatencyBuffer::new(window)),
            started_at: Instant::now(),
        }
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_worker_created(&self) {
        self.total_workers_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_worker_failed(&self) {
        self.total_workers_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_response_time_ms(&self, sample_ms: u64) {
        self.latency.lock().push(sample_ms);
    }

    /// Snapshot all counters. Fields are read independently (each atomic
    /// load is consistent by itself) so a concurrent writer may skew the
    /// relationship between two fields slightly, but never yields a torn
    /// individual value.
    pub fn snapshot(&self, active_workers: usize) -> PoolMetrics {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total_requests = hits + misses;
        let uptime = self.started_at.elapsed();
        let uptime_ms = uptime.as_millis() as u64;
        let requests_per_second = if uptime.as_secs_f64() > 0.0 {
            total_requests as f64 / uptime.as_secs_f64()
        } else {
            0.0
        };

        PoolMetrics {
            active_workers,
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate: if total_requests > 0 {
                hits as f64 / total_requests as f64
            } else {
                0.0
            },
            total_requests,
            total_workers_created: self.total_workers_created.load(Ordering::Relaxed),
            total_workers_failed: self.total_workers_failed.load(Ordering::Relaxed),
            avg_response_time_ms: self.latency.lock().average(),
            requests_per_second,
            uptime_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_rate_and_total_requests() {
        let m = MetricsRecorder::new(10);
        m.record_hit();
        m.record_hit();
        m.record_miss();
        let snap = m.snapshot(1);
        assert_eq!(snap.hits + snap.misses, snap.total_requests);
        assert!((snap.hit_rate - (2.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn latency_buffer_wraps_and_averages_only_written_samples() {
        let buf_window = 3;
        let m = MetricsRecorder::new(buf_window);
        m.record_response_time_ms(10);
        m.record_response_time_ms(20);
        let snap = m.snapshot(0);
        assert!((snap.avg_response_time_ms - 15.0).abs() < 1e-9);

        m.record_response_time_ms(30);
        m.record_response_time_ms(100); // wraps, overwrites the 10
        let snap = m.snapshot(0);
        assert!((snap.avg_response_time_ms - 50.0).abs() < 1e-9);
    }

    #[test]
    fn empty_metrics_snapshot_has_zero_rates_not_nan() {
        let m = MetricsRecorder::new(10);
        let snap = m.snapshot(0);
        assert_eq!(snap.hit_rate, 0.0);
        assert_eq!(snap.avg_response_time_ms, 0.0);
    }
}
