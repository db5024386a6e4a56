// Scheduled Backups
//
// The schedule lives in a watch channel so operators can enable, disable or
// re-time it while the daemon runs; a change restarts the countdown.

use crate::application::constants::{MIN_BACKUP_INTERVAL, SCHEDULER_IDENTITY};
use crate::application::ShutdownToken;
use crate::domain::{BackupOptions, BackupType};
use crate::error::{AppError, Result};
use crate::port::BackupService;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info};

/// Runtime-adjustable backup schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupSchedule {
    pub enabled: bool,
    pub interval: Duration,
    pub compress: bool,
    pub encrypt: bool,
}

impl Default for BackupSchedule {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: crate::application::constants::DEFAULT_BACKUP_INTERVAL,
            compress: true,
            encrypt: false,
        }
    }
}

/// Control side of a running `BackupScheduler`
#[derive(Clone)]
pub struct BackupScheduleHandle {
    tx: Arc<watch::Sender<BackupSchedule>>,
}

impl BackupScheduleHandle {
    pub fn current(&self) -> BackupSchedule {
        *self.tx.borrow()
    }

    pub fn enable(&self) {
        self.tx.send_modify(|s| s.enabled = true);
    }

    pub fn disable(&self) {
        self.tx.send_modify(|s| s.enabled = false);
    }

    pub fn set_interval(&self, interval: Duration) -> Result<()> {
        if interval < MIN_BACKUP_INTERVAL {
            return Err(AppError::Validation(format!(
                "backup interval must be at least {}s",
                MIN_BACKUP_INTERVAL.as_secs()
            )));
        }
        self.tx.send_modify(|s| s.interval = interval);
        Ok(())
    }
}

pub struct BackupScheduler {
    service: Arc<dyn BackupService>,
    rx: watch::Receiver<BackupSchedule>,
    // Keeps the channel open even if every handle is dropped
    _tx: Arc<watch::Sender<BackupSchedule>>,
}

impl BackupScheduler {
    pub fn new(
        service: Arc<dyn BackupService>,
        schedule: BackupSchedule,
    ) -> (Self, BackupScheduleHandle) {
        let (tx, rx) = watch::channel(schedule);
        let tx = Arc::new(tx);
        let handle = BackupScheduleHandle { tx: tx.clone() };
        (
            Self {
                service,
                rx,
                _tx: tx,
            },
            handle,
        )
    }

    /// Run the schedule until shutdown (background task)
    pub async fn run(mut self, mut shutdown: ShutdownToken) {
        info!("Backup scheduler started");

        loop {
            let schedule = *self.rx.borrow_and_update();

            if !schedule.enabled {
                tokio::select! {
                    _ = self.rx.changed() => continue,
                    _ = shutdown.wait() => break,
                }
            }

            tokio::select! {
                _ = sleep(schedule.interval) => self.run_once(&schedule).await,
                _ = self.rx.changed() => {
                    info!("Backup schedule changed; restarting countdown");
                }
                _ = shutdown.wait() => break,
            }
        }

        info!("Backup scheduler stopped");
    }

    /// One scheduled cycle: snapshot, then retention
    async fn run_once(&self, schedule: &BackupSchedule) {
        let options = BackupOptions {
            backup_type: BackupType::Scheduled,
            compress: schedule.compress,
            encrypt: schedule.encrypt,
            requested_by: Some(SCHEDULER_IDENTITY.to_string()),
        };

        match self.service.create_backup(options).await {
            Ok(record) => info!(
                backup_id = %record.id,
                size_bytes = record.size_bytes,
                "Scheduled backup completed"
            ),
            Err(e) => {
                error!(error = %e, "Scheduled backup failed");
                return;
            }
        }

        match self.service.cleanup_old_backups().await {
            Ok(report) => info!(
                removed = report.removed.len(),
                retained = report.retained,
                "Backup retention applied"
            ),
            Err(e) => error!(error = %e, "Backup retention failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::shutdown_channel;
    use crate::domain::{BackupRecord, CleanupReport};
    use crate::port::backup::MockBackupService;

    fn record(options: &BackupOptions) -> BackupRecord {
        let mut r = BackupRecord::requested(
            "id".into(),
            options.backup_type,
            "file.db".into(),
            options.compress,
            options.encrypt,
            0,
            options.requested_by.clone(),
        );
        r.start().unwrap();
        r.complete(1, "x".into()).unwrap();
        r
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_schedule_takes_no_backups_until_enabled() {
        let mut mock = MockBackupService::new();
        mock.expect_create_backup()
            .withf(|o| o.backup_type == BackupType::Scheduled)
            .times(2)
            .returning(|o| Ok(record(&o)));
        mock.expect_cleanup_old_backups()
            .times(2)
            .returning(|| Ok(CleanupReport::default()));

        let (scheduler, handle) = BackupScheduler::new(
            Arc::new(mock),
            BackupSchedule {
                enabled: false,
                interval: Duration::from_secs(60),
                ..Default::default()
            },
        );
        let (tx, token) = shutdown_channel();
        let task = tokio::spawn(scheduler.run(token));

        // Nothing happens while disabled
        tokio::time::sleep(Duration::from_secs(600)).await;

        handle.enable();
        tokio::time::sleep(Duration::from_secs(125)).await;

        handle.disable();
        tokio::time::sleep(Duration::from_secs(600)).await;

        tx.shutdown();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_backup_skips_retention() {
        let mut mock = MockBackupService::new();
        mock.expect_create_backup()
            .times(1)
            .returning(|_| Err(AppError::Backup("disk full".into())));
        mock.expect_cleanup_old_backups().never();

        let (scheduler, _handle) = BackupScheduler::new(
            Arc::new(mock),
            BackupSchedule {
                enabled: true,
                interval: Duration::from_secs(60),
                ..Default::default()
            },
        );
        let (tx, token) = shutdown_channel();
        let task = tokio::spawn(scheduler.run(token));

        tokio::time::sleep(Duration::from_secs(90)).await;
        tx.shutdown();
        task.await.unwrap();
    }

    #[test]
    fn test_interval_validation() {
        let mock = MockBackupService::new();
        let (_scheduler, handle) = BackupScheduler::new(Arc::new(mock), BackupSchedule::default());
        assert!(handle.set_interval(Duration::from_millis(10)).is_err());
        tokio_test::assert_ok!(handle.set_interval(Duration::from_secs(3600)));
        assert_eq!(handle.current().interval, Duration::from_secs(3600));
    }
}
