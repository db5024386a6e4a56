// Backup port - consumed by the backup scheduler

use crate::domain::{BackupOptions, BackupRecord, CleanupReport};
use crate::error::Result;
use async_trait::async_trait;

/// Snapshot creation and retention
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackupService: Send + Sync {
    /// Take a snapshot of the live database
    async fn create_backup(&self, options: BackupOptions) -> Result<BackupRecord>;

    /// Delete snapshots outside the retention policy
    async fn cleanup_old_backups(&self) -> Result<CleanupReport>;
}
