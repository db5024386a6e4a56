// Background job constants (No magic values)
use std::time::Duration;

/// Default idle-connection sweep period (5 minutes)
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default maintenance period (1 hour)
pub const DEFAULT_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Default scheduled backup period (24 hours)
pub const DEFAULT_BACKUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Smallest accepted backup interval
pub const MIN_BACKUP_INTERVAL: Duration = Duration::from_secs(1);

/// Identity recorded on backups taken by the scheduler
pub const SCHEDULER_IDENTITY: &str = "scheduler";
