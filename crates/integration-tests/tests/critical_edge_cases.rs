//! Critical Edge Cases
//!
//! Pool pressure, shutdown ordering and backup catalog recovery.

use std::sync::Arc;
use std::time::Duration;

use notevault_core::domain::{BackupOptions, PoolState};
use notevault_core::port::{SystemTimeProvider, UuidProvider};
use notevault_core::{AppError, BackupConfig, PoolConfig};
use notevault_infra_sqlite::{BackupManager, Database, Pool, Row};

/// Edge Case 1: twenty callers through a single connection all complete
#[tokio::test]
async fn test_single_connection_serves_burst_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let pool = Pool::new(PoolConfig {
        max_connections: 1,
        initial_connections: 1,
        acquire_timeout: Duration::from_secs(10),
        ..PoolConfig::new(dir.path().join("burst.db"))
    });
    pool.initialize().await.unwrap();
    let db = Database::new(pool.clone());

    db.run("CREATE TABLE hits (n INTEGER NOT NULL)", &[]).await.unwrap();

    let mut handles = Vec::new();
    for n in 0..20i64 {
        let db = db.clone();
        handles.push(tokio::spawn(async move {
            db.run("INSERT INTO hits (n) VALUES (?)", &[n.into()]).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let count = db
        .get("SELECT COUNT(*) AS c FROM hits", &[])
        .await
        .unwrap()
        .map(|r| r.get::<i64, _>("c"));
    assert_eq!(count, Some(20));

    let status = pool.status();
    assert_eq!(status.total, 1);
    assert_eq!(status.queued, 0);
    assert_eq!(db.get_metrics().timeouts, 0);

    println!("✅ Edge Case 1: waiters are served by the single connection");
}

/// Edge Case 2: a closed pool rejects work and drops late returns
#[tokio::test]
async fn test_close_with_checked_out_connection() {
    let dir = tempfile::tempdir().unwrap();
    let pool = Pool::new(PoolConfig {
        max_connections: 2,
        initial_connections: 2,
        ..PoolConfig::new(dir.path().join("close.db"))
    });
    pool.initialize().await.unwrap();

    let held = pool.acquire().await.unwrap();

    let closer = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.close().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(held);
    closer.await.unwrap();

    assert_eq!(pool.state(), PoolState::Closed);
    assert_eq!(pool.status().total, 0);
    assert!(matches!(
        pool.acquire().await,
        Err(AppError::PoolUnavailable(_))
    ));

    println!("✅ Edge Case 2: close waits for checkouts then rejects new work");
}

/// Edge Case 3: a backup taken under concurrent writes is consistent
#[tokio::test]
async fn test_backup_during_writes_is_consistent() {
    let dir = tempfile::tempdir().unwrap();
    let pool = Pool::new(PoolConfig::new(dir.path().join("busy.db")));
    pool.initialize().await.unwrap();
    let db = Database::new(pool.clone());
    db.run("CREATE TABLE ticks (n INTEGER NOT NULL)", &[])
        .await
        .unwrap();

    let manager = BackupManager::open(
        pool,
        BackupConfig::new(dir.path().join("backups")),
        Arc::new(SystemTimeProvider),
        Arc::new(UuidProvider),
    )
    .await
    .unwrap();

    let writer = {
        let db = db.clone();
        tokio::spawn(async move {
            for n in 0..200i64 {
                db.run("INSERT INTO ticks (n) VALUES (?)", &[n.into()])
                    .await
                    .unwrap();
            }
        })
    };

    let record = manager.create_backup(BackupOptions::default()).await.unwrap();
    writer.await.unwrap();

    assert!(manager.verify_backup(&record.id).await.unwrap().valid);
    let dry = manager
        .restore_backup(
            &record.id,
            notevault_core::domain::RestoreOptions {
                dry_run: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(dry.staged_bytes > 0);

    println!("✅ Edge Case 3: snapshot under load passes integrity check");
}

/// Edge Case 4: the catalog is rebuilt after a restart; missing files fail verification
#[tokio::test]
async fn test_catalog_recovery_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let backups = dir.path().join("backups");
    let pool = Pool::new(PoolConfig::new(dir.path().join("restart.db")));
    pool.initialize().await.unwrap();

    let open = |pool: Arc<Pool>| {
        let backups = backups.clone();
        async move {
            BackupManager::open(
                pool,
                BackupConfig::new(backups),
                Arc::new(SystemTimeProvider),
                Arc::new(UuidProvider),
            )
            .await
            .unwrap()
        }
    };

    let first = open(pool.clone()).await;
    let kept = first.create_backup(BackupOptions::default()).await.unwrap();
    let lost = first.create_backup(BackupOptions::default()).await.unwrap();
    drop(first);

    std::fs::remove_file(backups.join(&lost.filename)).unwrap();

    let second = open(pool).await;
    assert_eq!(second.list_backups().len(), 2);
    assert!(second.verify_backup(&kept.id).await.unwrap().valid);

    let result = second.verify_backup(&lost.id).await.unwrap();
    assert!(!result.valid);
    assert!(result.actual_checksum.is_none());

    assert!(matches!(
        second.get_backup("does-not-exist"),
        Err(AppError::NotFound(_))
    ));

    println!("✅ Edge Case 4: catalog reloads from metadata sidecars");
}
