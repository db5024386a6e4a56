// Domain Layer - Pure storage-engine entities and rules

pub mod backup;
pub mod error;
pub mod health;

// Re-exports
pub use backup::{
    BackupId, BackupOptions, BackupRecord, BackupStatus, BackupType, CleanupReport,
    RestoreOptions, RestoreResult, RetentionPolicy, VerificationResult,
};
pub use error::DomainError;
pub use health::{
    HealthReport, HealthStatus, HealthThresholds, MetricsSnapshot, PoolState, PoolStatus,
};
