// Port Layer - Interfaces for infrastructure adapters

pub mod backup;
pub mod connection_reaper;
pub mod id_provider; // For deterministic testing
pub mod maintenance;
pub mod time_provider;

// Re-exports
pub use backup::BackupService;
pub use connection_reaper::ConnectionReaper;
pub use id_provider::{IdProvider, UuidProvider};
pub use maintenance::{Maintenance, MaintenanceConfig, MaintenanceStats};
pub use time_provider::{SystemTimeProvider, TimeProvider};
