// Application Layer - Background jobs around the storage engine

pub mod backup_schedule;
pub mod constants;
pub mod maintenance;
pub mod reaper;
mod shutdown;

// Re-exports
pub use backup_schedule::{BackupSchedule, BackupScheduleHandle, BackupScheduler};
pub use maintenance::MaintenanceScheduler;
pub use reaper::IdleReaper;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
