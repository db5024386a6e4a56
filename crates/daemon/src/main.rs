//! NoteVault Storage Daemon - Main Entry Point
//!
//! Opens the pool, runs the idle reaper, maintenance and backup schedulers,
//! and closes everything on Ctrl+C.

mod logging;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use notevault_core::application::{
    shutdown_channel, BackupSchedule, BackupScheduler, IdleReaper, MaintenanceScheduler,
};
use notevault_core::port::{MaintenanceConfig, SystemTimeProvider, UuidProvider};
use notevault_core::NotevaultConfig;
use notevault_infra_sqlite::{
    backup_config_from, BackupManager, Database, Pool, SqliteMaintenance,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration
    let config = NotevaultConfig::from_env().context("Invalid configuration")?;

    // 2. Initialize logging
    let _log_guard = logging::init(&config.log_format, config.log_dir.as_deref())?;

    info!("NoteVault storage daemon v{} starting...", VERSION);

    let pool_config = config.pool_config();
    let backup_config = backup_config_from(&config).context("Invalid backup configuration")?;

    // 3. Initialize database
    info!(db_path = %pool_config.db_path.display(), "Initializing database...");
    let pool = Pool::new(pool_config.clone());
    pool.initialize()
        .await
        .context("Database initialization failed")?;

    let warnings = pool.setup_warnings();
    if !warnings.is_empty() {
        warn!(count = warnings.len(), "Schema setup finished with warnings");
    }

    let db = Database::new(pool.clone());
    let health = db.health_check().await;
    info!(status = %health.status, reasons = ?health.reasons, "Initial health check");

    // 4. Setup dependencies (DI wiring)
    let backups = Arc::new(
        BackupManager::open(
            pool.clone(),
            backup_config.clone(),
            Arc::new(SystemTimeProvider),
            Arc::new(UuidProvider),
        )
        .await
        .context("Backup manager initialization failed")?,
    );
    let maintenance = Arc::new(SqliteMaintenance::new(pool.clone()));

    // 5. Start background jobs
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let mut tasks = Vec::new();

    info!("Starting idle reaper...");
    let reaper = IdleReaper::new(pool.clone(), pool_config.reap_interval);
    tasks.push(tokio::spawn(reaper.run(shutdown_rx.clone())));

    info!("Starting maintenance scheduler...");
    let maintenance_scheduler = MaintenanceScheduler::new(
        maintenance,
        MaintenanceConfig::default(),
        pool_config.maintenance_interval,
    );
    tasks.push(tokio::spawn(maintenance_scheduler.run(shutdown_rx.clone())));

    let schedule = BackupSchedule {
        enabled: backup_config.schedule_enabled,
        interval: backup_config.schedule_interval,
        compress: backup_config.compress_by_default,
        encrypt: backup_config.encryption_key.is_some(),
    };
    info!(
        enabled = schedule.enabled,
        interval_secs = schedule.interval.as_secs(),
        "Starting backup scheduler..."
    );
    let (backup_scheduler, _schedule_handle) = BackupScheduler::new(backups, schedule);
    tasks.push(tokio::spawn(backup_scheduler.run(shutdown_rx)));

    info!("System ready. Press Ctrl+C to shutdown");

    // 6. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received. Exiting gracefully...");

    // 7. Graceful shutdown
    shutdown_tx.shutdown();
    for task in tasks {
        if tokio::time::timeout(TASK_STOP_TIMEOUT, task).await.is_err() {
            warn!("Background task did not stop in time");
        }
    }
    pool.close().await;

    let metrics = db.get_metrics();
    info!(
        total_queries = metrics.total_queries,
        errors = metrics.errors,
        timeouts = metrics.timeouts,
        "Shutdown complete."
    );

    Ok(())
}
