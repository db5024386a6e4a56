// DB Maintenance port
use crate::error::Result;
use async_trait::async_trait;

/// Database maintenance statistics
#[derive(Debug, Clone, Default)]
pub struct MaintenanceStats {
    pub db_size_mb: f64,
    pub db_size_bytes: i64,
    pub page_count: i64,
    pub freelist_pages: i64,
    /// Share of pages on the freelist
    pub fragmentation_percent: f64,
}

/// Maintenance configuration
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Run VACUUM once this share of pages is free (percent)
    pub vacuum_fragmentation_percent: f64,

    /// Always VACUUM, regardless of fragmentation
    pub force_vacuum: bool,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            vacuum_fragmentation_percent: 20.0,
            force_vacuum: false,
        }
    }
}

/// Database maintenance operations
#[async_trait]
pub trait Maintenance: Send + Sync {
    /// Run VACUUM to reclaim space and defragment
    ///
    /// # Returns
    /// Space reclaimed in MB
    async fn vacuum(&self) -> Result<f64>;

    /// Refresh query planner statistics (PRAGMA optimize)
    async fn optimize(&self) -> Result<()>;

    /// Flush the write-ahead log into the main database file
    ///
    /// # Returns
    /// Number of WAL frames checkpointed
    async fn checkpoint(&self) -> Result<i64>;

    /// Get maintenance statistics
    async fn get_stats(&self) -> Result<MaintenanceStats>;

    /// Run full maintenance (optimize + checkpoint + VACUUM when fragmented)
    async fn run_full_maintenance(&self, config: &MaintenanceConfig) -> Result<MaintenanceStats> {
        // 1. Get pre-maintenance stats
        let stats_before = self.get_stats().await?;

        // 2. Planner statistics
        self.optimize().await?;

        // 3. Keep the WAL short
        let checkpointed = self.checkpoint().await?;

        // 4. VACUUM if fragmented
        let reclaimed_mb = if config.force_vacuum
            || stats_before.fragmentation_percent >= config.vacuum_fragmentation_percent
        {
            self.vacuum().await?
        } else {
            0.0
        };

        // 5. Get post-maintenance stats
        let stats_after = self.get_stats().await?;

        tracing::info!(
            checkpointed_frames = checkpointed,
            reclaimed_mb = reclaimed_mb,
            db_size_mb = stats_after.db_size_mb,
            fragmentation_percent = stats_after.fragmentation_percent,
            "Maintenance completed"
        );

        Ok(stats_after)
    }
}
