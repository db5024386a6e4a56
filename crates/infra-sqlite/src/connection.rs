// SQLite Connection Setup

use notevault_core::config::PoolConfig;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqliteSynchronous,
};
use sqlx::ConnectOptions;
use std::path::Path;

/// Connect options with WAL mode and performance pragmas
pub fn connect_options(config: &PoolConfig) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(&config.db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(config.busy_timeout)
        .foreign_keys(true)
        .pragma("cache_size", config.cache_size.to_string())
        .pragma("mmap_size", config.mmap_size.to_string())
}

/// Open one connection to the live database
pub async fn open_connection(config: &PoolConfig) -> Result<SqliteConnection, sqlx::Error> {
    connect_options(config).connect().await
}

/// Open an existing database file without creating it (used on staged restores)
pub async fn open_existing(path: &Path) -> Result<SqliteConnection, sqlx::Error> {
    SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(false)
        .connect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Connection;

    #[tokio::test]
    async fn test_open_connection_applies_pragmas() {
        let dir = tempfile::tempdir().unwrap();
        let config = PoolConfig::new(dir.path().join("pragmas.db"));

        let mut conn = open_connection(&config).await.unwrap();

        let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(&mut conn)
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");

        let fk: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(&mut conn)
            .await
            .unwrap();
        assert_eq!(fk, 1);

        let cache: i64 = sqlx::query_scalar("PRAGMA cache_size")
            .fetch_one(&mut conn)
            .await
            .unwrap();
        assert_eq!(cache, config.cache_size);

        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_existing_refuses_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(open_existing(&dir.path().join("absent.db")).await.is_err());
    }
}
