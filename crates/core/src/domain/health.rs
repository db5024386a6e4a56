// Health & Metrics Domain Model

use serde::{Deserialize, Serialize};

/// Pool lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolState {
    Uninitialized,
    Running,
    /// Quiescing before a restore; new acquisitions are rejected
    Draining,
    Closed,
}

impl std::fmt::Display for PoolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolState::Uninitialized => write!(f, "uninitialized"),
            PoolState::Running => write!(f, "running"),
            PoolState::Draining => write!(f, "draining"),
            PoolState::Closed => write!(f, "closed"),
        }
    }
}

/// Pool occupancy at one instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    pub state: PoolState,
    pub max_connections: u32,
    /// Open (or opening) connections
    pub total: u32,
    pub active: u32,
    pub idle: u32,
    pub queued: u32,
}

/// Counter snapshot shared by the pool and query executor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_queries: u64,
    pub connections_created: u64,
    pub connections_closed: u64,
    pub active_connections: u64,
    pub queue_length: u64,
    pub avg_query_ms: f64,
    pub slow_queries: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub last_health_check: Option<i64>, // epoch ms
}

impl MetricsSnapshot {
    /// Failed queries over executed queries (0.0 when idle)
    pub fn error_rate(&self) -> f64 {
        if self.total_queries == 0 {
            0.0
        } else {
            self.errors as f64 / self.total_queries as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Thresholds for the synthetic health verdict
#[derive(Debug, Clone)]
pub struct HealthThresholds {
    pub degraded_error_rate: f64,
    pub unhealthy_error_rate: f64,
    pub degraded_avg_latency_ms: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            degraded_error_rate: 0.05,
            unhealthy_error_rate: 0.25,
            degraded_avg_latency_ms: 1000.0,
        }
    }
}

impl HealthThresholds {
    /// Derive a verdict plus the reasons behind it
    ///
    /// `reachable` is the outcome of a real round-trip query; a pool that
    /// merely believes it is initialized is not enough.
    pub fn evaluate(
        &self,
        pool: &PoolStatus,
        metrics: &MetricsSnapshot,
        reachable: bool,
    ) -> (HealthStatus, Vec<String>) {
        let mut reasons = Vec::new();

        if !reachable {
            reasons.push("database round-trip failed".to_string());
        }
        if pool.state != PoolState::Running {
            reasons.push(format!("pool is {}", pool.state));
        }

        let error_rate = metrics.error_rate();
        if error_rate >= self.unhealthy_error_rate {
            reasons.push(format!("error rate {:.1}%", error_rate * 100.0));
        }
        if !reasons.is_empty() {
            return (HealthStatus::Unhealthy, reasons);
        }

        if pool.max_connections > 0 && pool.queued >= pool.max_connections {
            reasons.push(format!(
                "{} callers queued for {} connections",
                pool.queued, pool.max_connections
            ));
        }
        if error_rate >= self.degraded_error_rate {
            reasons.push(format!("error rate {:.1}%", error_rate * 100.0));
        }
        if metrics.avg_query_ms >= self.degraded_avg_latency_ms {
            reasons.push(format!("average query latency {:.0}ms", metrics.avg_query_ms));
        }

        if reasons.is_empty() {
            (HealthStatus::Healthy, reasons)
        } else {
            (HealthStatus::Degraded, reasons)
        }
    }
}

/// Result of `health_check()`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub reasons: Vec<String>,
    pub pool: PoolStatus,
    pub metrics: MetricsSnapshot,
    pub round_trip_ms: Option<f64>,
    pub checked_at: i64, // epoch ms
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_pool(queued: u32) -> PoolStatus {
        PoolStatus {
            state: PoolState::Running,
            max_connections: 4,
            total: 4,
            active: 4,
            idle: 0,
            queued,
        }
    }

    fn metrics(total: u64, errors: u64, avg_ms: f64) -> MetricsSnapshot {
        MetricsSnapshot {
            total_queries: total,
            errors,
            avg_query_ms: avg_ms,
            ..Default::default()
        }
    }

    #[test]
    fn test_healthy_when_quiet() {
        let (status, reasons) =
            HealthThresholds::default().evaluate(&running_pool(0), &metrics(0, 0, 0.0), true);
        assert_eq!(status, HealthStatus::Healthy);
        assert!(reasons.is_empty());
    }

    #[test]
    fn test_degraded_on_queue_or_latency() {
        let thresholds = HealthThresholds::default();

        let (status, _) = thresholds.evaluate(&running_pool(4), &metrics(100, 0, 2.0), true);
        assert_eq!(status, HealthStatus::Degraded);

        let (status, reasons) =
            thresholds.evaluate(&running_pool(0), &metrics(100, 0, 1500.0), true);
        assert_eq!(status, HealthStatus::Degraded);
        assert!(reasons[0].contains("latency"));

        let (status, _) = thresholds.evaluate(&running_pool(0), &metrics(100, 10, 2.0), true);
        assert_eq!(status, HealthStatus::Degraded);
    }

    #[test]
    fn test_unhealthy_on_unreachable_or_error_storm() {
        let thresholds = HealthThresholds::default();

        let (status, _) = thresholds.evaluate(&running_pool(0), &metrics(0, 0, 0.0), false);
        assert_eq!(status, HealthStatus::Unhealthy);

        let (status, _) = thresholds.evaluate(&running_pool(0), &metrics(100, 30, 1.0), true);
        assert_eq!(status, HealthStatus::Unhealthy);

        let mut draining = running_pool(0);
        draining.state = PoolState::Draining;
        let (status, reasons) = thresholds.evaluate(&draining, &metrics(1, 0, 1.0), true);
        assert_eq!(status, HealthStatus::Unhealthy);
        assert_eq!(reasons, vec!["pool is draining".to_string()]);
    }
}
