// SQLite Maintenance Implementation
use crate::error::map_sqlx_error;
use crate::pool::Pool;
use async_trait::async_trait;
use notevault_core::error::Result;
use notevault_core::port::{Maintenance, MaintenanceConfig, MaintenanceStats};
use sqlx::SqliteConnection;
use std::sync::Arc;
use tracing::info;

/// Maintenance over pooled connections; a full pass borrows exactly one
pub struct SqliteMaintenance {
    pool: Arc<Pool>,
}

impl SqliteMaintenance {
    pub fn new(pool: Arc<Pool>) -> Self {
        Self { pool }
    }
}

async fn pragma_i64(conn: &mut SqliteConnection, pragma: &'static str) -> Result<i64> {
    sqlx::query_scalar(pragma)
        .fetch_one(conn)
        .await
        .map_err(|e| map_sqlx_error("maintenance", pragma, e))
}

async fn stats(conn: &mut SqliteConnection) -> Result<MaintenanceStats> {
    let page_count = pragma_i64(conn, "PRAGMA page_count").await?;
    let page_size = pragma_i64(conn, "PRAGMA page_size").await?;
    let freelist_pages = pragma_i64(conn, "PRAGMA freelist_count").await?;

    let db_size_bytes = page_count * page_size;
    let fragmentation_percent = if page_count > 0 {
        freelist_pages as f64 / page_count as f64 * 100.0
    } else {
        0.0
    };

    Ok(MaintenanceStats {
        db_size_mb: to_mb(db_size_bytes),
        db_size_bytes,
        page_count,
        freelist_pages,
        fragmentation_percent,
    })
}

async fn vacuum(conn: &mut SqliteConnection) -> Result<f64> {
    info!("Running VACUUM to optimize database...");

    let size_before = stats(conn).await?.db_size_bytes;
    sqlx::query("VACUUM")
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("maintenance", "VACUUM", e))?;
    let size_after = stats(conn).await?.db_size_bytes;
    let reclaimed = to_mb((size_before - size_after).max(0));

    info!(
        size_before_mb = to_mb(size_before),
        size_after_mb = to_mb(size_after),
        reclaimed_mb = reclaimed,
        "VACUUM completed"
    );

    Ok(reclaimed)
}

async fn optimize(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query("PRAGMA optimize")
        .execute(conn)
        .await
        .map_err(|e| map_sqlx_error("maintenance", "PRAGMA optimize", e))?;
    Ok(())
}

async fn checkpoint(conn: &mut SqliteConnection) -> Result<i64> {
    // (busy, wal frames, frames checkpointed)
    let (_busy, _log, checkpointed): (i64, i64, i64) =
        sqlx::query_as("PRAGMA wal_checkpoint(TRUNCATE)")
            .fetch_one(conn)
            .await
            .map_err(|e| map_sqlx_error("maintenance", "PRAGMA wal_checkpoint(TRUNCATE)", e))?;
    Ok(checkpointed)
}

fn to_mb(bytes: i64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

#[async_trait]
impl Maintenance for SqliteMaintenance {
    async fn vacuum(&self) -> Result<f64> {
        let mut conn = self.pool.acquire().await?;
        vacuum(&mut conn).await
    }

    async fn optimize(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        optimize(&mut conn).await
    }

    async fn checkpoint(&self) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        checkpoint(&mut conn).await
    }

    async fn get_stats(&self) -> Result<MaintenanceStats> {
        let mut conn = self.pool.acquire().await?;
        stats(&mut conn).await
    }

    async fn run_full_maintenance(&self, config: &MaintenanceConfig) -> Result<MaintenanceStats> {
        // Held for the whole pass; no other caller interleaves between steps
        let mut conn = self.pool.acquire().await?;

        let stats_before = stats(&mut conn).await?;
        optimize(&mut conn).await?;
        let checkpointed = checkpoint(&mut conn).await?;

        let reclaimed_mb = if config.force_vacuum
            || stats_before.fragmentation_percent >= config.vacuum_fragmentation_percent
        {
            vacuum(&mut conn).await?
        } else {
            0.0
        };

        let stats_after = stats(&mut conn).await?;

        info!(
            checkpointed_frames = checkpointed,
            reclaimed_mb = reclaimed_mb,
            db_size_mb = stats_after.db_size_mb,
            fragmentation_percent = stats_after.fragmentation_percent,
            "Maintenance completed"
        );

        Ok(stats_after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use notevault_core::config::PoolConfig;
    use std::time::Duration;

    async fn maintained_pool(dir: &tempfile::TempDir) -> Arc<Pool> {
        let pool = Pool::new(PoolConfig::new(dir.path().join("maint.db")));
        pool.initialize().await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_maintenance_stats() {
        let dir = tempfile::tempdir().unwrap();
        let maintenance = SqliteMaintenance::new(maintained_pool(&dir).await);

        let stats = maintenance.get_stats().await.unwrap();
        assert!(stats.db_size_mb > 0.0);
        assert!(stats.page_count > 0);
        assert!(stats.fragmentation_percent < 100.0);
    }

    #[tokio::test]
    async fn test_vacuum_reclaims_freed_pages() {
        let dir = tempfile::tempdir().unwrap();
        let pool = maintained_pool(&dir).await;
        let db = Database::new(pool.clone());
        let maintenance = SqliteMaintenance::new(pool);

        let blob = "x".repeat(4096);
        for _ in 0..64 {
            db.run(
                "INSERT INTO audit_logs (action, details, created_at) VALUES ('bulk', ?, 0)",
                &[blob.clone().into()],
            )
            .await
            .unwrap();
        }
        db.run("DELETE FROM audit_logs", &[]).await.unwrap();
        maintenance.checkpoint().await.unwrap();

        let before = maintenance.get_stats().await.unwrap();
        assert!(before.freelist_pages > 0);

        let reclaimed = maintenance.vacuum().await.unwrap();
        assert!(reclaimed > 0.0);
        assert_eq!(maintenance.get_stats().await.unwrap().freelist_pages, 0);
    }

    #[tokio::test]
    async fn test_full_maintenance_runs_clean() {
        let dir = tempfile::tempdir().unwrap();
        let maintenance = SqliteMaintenance::new(maintained_pool(&dir).await);

        let stats = maintenance
            .run_full_maintenance(&MaintenanceConfig {
                force_vacuum: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(stats.freelist_pages, 0);
    }

    #[tokio::test]
    async fn test_full_maintenance_holds_one_connection_throughout() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::new(PoolConfig {
            max_connections: 1,
            initial_connections: 1,
            min_idle: 0,
            acquire_timeout: Duration::from_secs(2),
            ..PoolConfig::new(dir.path().join("maint.db"))
        });
        pool.initialize().await.unwrap();
        let maintenance = SqliteMaintenance::new(pool.clone());

        let config = MaintenanceConfig {
            force_vacuum: true,
            ..Default::default()
        };
        let mut run = Box::pin(maintenance.run_full_maintenance(&config));
        while pool.status().active == 0 {
            assert!(futures::poll!(&mut run).is_pending());
            tokio::task::yield_now().await;
        }

        // Queued behind the pass; must not be handed the connection mid-run
        let mut other = Box::pin(pool.acquire());
        assert!(futures::poll!(&mut other).is_pending());
        assert_eq!(pool.status().queued, 1);

        let stats = run.await.unwrap();
        assert_eq!(stats.freelist_pages, 0);

        let conn = other.await.unwrap();
        drop(conn);
        assert_eq!(pool.metrics_snapshot().connections_created, 1);
    }
}
