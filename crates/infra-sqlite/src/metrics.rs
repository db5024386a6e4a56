// Process-wide pool & query counters

use notevault_core::domain::MetricsSnapshot;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
struct LatencyAverage {
    samples: u64,
    avg_ms: f64,
}

/// Counters mutated by the pool and executor, read by the health reporter
#[derive(Debug, Default)]
pub struct Metrics {
    total_queries: AtomicU64,
    connections_created: AtomicU64,
    connections_closed: AtomicU64,
    slow_queries: AtomicU64,
    errors: AtomicU64,
    timeouts: AtomicU64,
    latency: Mutex<LatencyAverage>,
    last_health_check: Mutex<Option<i64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one executed statement into the counters
    pub fn record_query(&self, elapsed: Duration, succeeded: bool, slow: bool) {
        self.total_queries.fetch_add(1, Ordering::Relaxed);
        if !succeeded {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        if slow {
            self.slow_queries.fetch_add(1, Ordering::Relaxed);
        }

        // Running mean over every sample since process start
        let ms = elapsed.as_secs_f64() * 1000.0;
        let mut latency = self.latency.lock();
        latency.samples += 1;
        latency.avg_ms += (ms - latency.avg_ms) / latency.samples as f64;
    }

    pub fn record_connection_created(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connections_closed(&self, count: u64) {
        self.connections_closed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_health_check(&self, at_millis: i64) {
        *self.last_health_check.lock() = Some(at_millis);
    }

    /// Snapshot; occupancy figures come from the pool at the same instant
    pub fn snapshot(&self, active: u32, queued: u32) -> MetricsSnapshot {
        MetricsSnapshot {
            total_queries: self.total_queries.load(Ordering::Relaxed),
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            active_connections: active as u64,
            queue_length: queued as u64,
            avg_query_ms: self.latency.lock().avg_ms,
            slow_queries: self.slow_queries.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            last_health_check: *self.last_health_check.lock(),
        }
    }
}
