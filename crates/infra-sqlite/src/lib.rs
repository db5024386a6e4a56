// NoteVault Infrastructure - SQLite Adapter
// Implements: connection pool, query executor, schema setup, backups,
// ConnectionReaper, BackupService and Maintenance ports

mod backup;
mod connection;
mod database;
mod error;
mod maintenance_impl;
mod metrics;
mod pool;
mod schema;

pub use backup::codec::{generate_key, parse_key, CodecError};
pub use backup::{backup_config_from, BackupManager};
pub use connection::{connect_options, open_connection};
pub use database::{Database, RunResult, SqlParam, TransactionScope};
pub use error::{map_sqlx_error, statement_preview};
pub use maintenance_impl::SqliteMaintenance;
pub use metrics::Metrics;
pub use pool::{Pool, PoolConnection};
pub use schema::{IndexSpec, SchemaReport, SetupWarning, INDEX_SET, INDEX_SET_VERSION};

// Row access for callers of `Database::query` / `get`
pub use sqlx::sqlite::SqliteRow;
pub use sqlx::Row;
