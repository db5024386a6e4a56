// Maintenance Service
// Scheduled optimize / checkpoint / VACUUM against the live database

use crate::application::ShutdownToken;
use crate::error::Result;
use crate::port::{Maintenance, MaintenanceConfig, MaintenanceStats};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant};
use tracing::{error, info};

/// Maintenance scheduler
///
/// Runs periodic maintenance operations in the background
pub struct MaintenanceScheduler {
    maintenance: Arc<dyn Maintenance>,
    config: MaintenanceConfig,
    period: Duration,
}

impl MaintenanceScheduler {
    /// Create a new maintenance scheduler
    ///
    /// # Arguments
    /// * `maintenance` - Maintenance implementation
    /// * `config` - Maintenance configuration
    /// * `period` - How often to run maintenance
    pub fn new(
        maintenance: Arc<dyn Maintenance>,
        config: MaintenanceConfig,
        period: Duration,
    ) -> Self {
        Self {
            maintenance,
            config,
            period,
        }
    }

    /// Run maintenance loop (background task)
    ///
    /// First run happens one period after start. Should be spawned in tokio::spawn
    pub async fn run(self, mut shutdown: ShutdownToken) {
        info!(
            period_secs = self.period.as_secs(),
            "Maintenance scheduler started"
        );

        let mut tick = interval_at(Instant::now() + self.period, self.period);

        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = shutdown.wait() => break,
            }

            info!("Running scheduled maintenance...");

            match self.maintenance.run_full_maintenance(&self.config).await {
                Ok(stats) => {
                    info!(
                        db_size_mb = stats.db_size_mb,
                        fragmentation_percent = stats.fragmentation_percent,
                        "Scheduled maintenance completed successfully"
                    );
                }
                Err(e) => {
                    error!(error = ?e, "Scheduled maintenance failed");
                }
            }
        }

        info!("Maintenance scheduler stopped");
    }

    /// Run maintenance immediately (for manual trigger)
    pub async fn run_now(&self) -> Result<MaintenanceStats> {
        info!("Running manual maintenance...");

        let stats = self.maintenance.run_full_maintenance(&self.config).await?;

        info!(db_size_mb = stats.db_size_mb, "Manual maintenance completed");

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::shutdown_channel;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingMaintenance {
        vacuums: AtomicUsize,
        optimizes: AtomicUsize,
        fragmentation: f64,
    }

    #[async_trait]
    impl Maintenance for CountingMaintenance {
        async fn vacuum(&self) -> Result<f64> {
            self.vacuums.fetch_add(1, Ordering::SeqCst);
            Ok(0.5)
        }

        async fn optimize(&self) -> Result<()> {
            self.optimizes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn checkpoint(&self) -> Result<i64> {
            Ok(0)
        }

        async fn get_stats(&self) -> Result<MaintenanceStats> {
            Ok(MaintenanceStats {
                fragmentation_percent: self.fragmentation,
                ..Default::default()
            })
        }
    }

    fn counting(fragmentation: f64) -> Arc<CountingMaintenance> {
        Arc::new(CountingMaintenance {
            vacuums: AtomicUsize::new(0),
            optimizes: AtomicUsize::new(0),
            fragmentation,
        })
    }

    #[tokio::test]
    async fn test_vacuum_only_when_fragmented() {
        let quiet = counting(5.0);
        let scheduler = MaintenanceScheduler::new(
            quiet.clone(),
            MaintenanceConfig::default(),
            Duration::from_secs(3600),
        );
        scheduler.run_now().await.unwrap();
        assert_eq!(quiet.optimizes.load(Ordering::SeqCst), 1);
        assert_eq!(quiet.vacuums.load(Ordering::SeqCst), 0);

        let fragmented = counting(50.0);
        let scheduler = MaintenanceScheduler::new(
            fragmented.clone(),
            MaintenanceConfig::default(),
            Duration::from_secs(3600),
        );
        scheduler.run_now().await.unwrap();
        assert_eq!(fragmented.vacuums.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_runs_each_period_and_stops_on_shutdown() {
        let maintenance = counting(0.0);
        let scheduler = MaintenanceScheduler::new(
            maintenance.clone(),
            MaintenanceConfig::default(),
            Duration::from_secs(60),
        );
        let (tx, token) = shutdown_channel();
        let handle = tokio::spawn(scheduler.run(token));

        tokio::time::sleep(Duration::from_secs(125)).await;
        assert_eq!(maintenance.optimizes.load(Ordering::SeqCst), 2);

        tx.shutdown();
        handle.await.unwrap();
    }
}
