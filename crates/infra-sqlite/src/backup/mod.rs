// Backup Manager
//
// Snapshots are taken with `VACUUM INTO` on a pooled connection, so writers
// keep going while a backup runs. Restores stage and validate the image next
// to the live file before the pool is drained; the rename over the live file
// is the only step that touches live data.

pub mod catalog;
pub mod codec;

use crate::connection::open_existing;
use crate::error::map_sqlx_error;
use crate::pool::Pool;
use async_trait::async_trait;
use codec::CodecError;
use notevault_core::config::{BackupConfig, NotevaultConfig};
use notevault_core::domain::{
    BackupOptions, BackupRecord, BackupStatus, BackupType, CleanupReport,
    RestoreOptions, RestoreResult, VerificationResult,
};
use notevault_core::error::{AppError, Result};
use notevault_core::port::{BackupService, IdProvider, TimeProvider};
use parking_lot::RwLock;
use sqlx::Connection;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Backup settings with the base64 encryption key decoded
pub fn backup_config_from(config: &NotevaultConfig) -> std::result::Result<BackupConfig, CodecError> {
    let mut backup = config.backup_config();
    backup.encryption_key = config
        .backup_encryption_key
        .as_deref()
        .map(codec::parse_key)
        .transpose()?;
    Ok(backup)
}

pub struct BackupManager {
    pool: Arc<Pool>,
    config: BackupConfig,
    /// Newest first
    catalog: RwLock<Vec<BackupRecord>>,
    time: Arc<dyn TimeProvider>,
    ids: Arc<dyn IdProvider>,
    restoring: tokio::sync::Mutex<()>,
}

impl BackupManager {
    /// Create the backup directory if needed and load the catalog from disk
    pub async fn open(
        pool: Arc<Pool>,
        config: BackupConfig,
        time: Arc<dyn TimeProvider>,
        ids: Arc<dyn IdProvider>,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(&config.backup_dir).await.map_err(|e| {
            AppError::Backup(format!(
                "cannot create backup directory {}: {}",
                config.backup_dir.display(),
                e
            ))
        })?;
        let records = catalog::load(&config.backup_dir).await?;
        info!(
            backup_dir = %config.backup_dir.display(),
            backups = records.len(),
            "Backup catalog loaded"
        );

        Ok(Self {
            pool,
            config,
            catalog: RwLock::new(records),
            time,
            ids,
            restoring: tokio::sync::Mutex::new(()),
        })
    }

    pub fn backup_dir(&self) -> &Path {
        &self.config.backup_dir
    }

    /// Snapshot the live database into the backup directory
    pub async fn create_backup(&self, options: BackupOptions) -> Result<BackupRecord> {
        let key = if options.encrypt {
            Some(self.config.encryption_key.ok_or_else(|| {
                AppError::Backup(CodecError::MissingKey.to_string())
            })?)
        } else {
            None
        };

        let id = self.ids.generate_id();
        let created_at = self.time.now_millis();
        let filename = catalog::backup_filename(
            options.backup_type,
            created_at,
            &id,
            options.compress,
            options.encrypt,
        );
        let mut record = BackupRecord::requested(
            id.clone(),
            options.backup_type,
            filename.clone(),
            options.compress,
            options.encrypt,
            created_at,
            options.requested_by.clone(),
        );
        record.start()?;

        info!(
            backup_id = %id,
            backup_type = %options.backup_type,
            compress = options.compress,
            encrypt = options.encrypt,
            "Creating backup..."
        );

        let dir = &self.config.backup_dir;
        let snapshot = dir.join(format!(".{}.snapshot", id));
        let partial = dir.join(format!(".{}.partial", id));
        let final_path = dir.join(&filename);

        let written = self
            .write_backup(&snapshot, &partial, &final_path, options.compress, key)
            .await;
        let _ = catalog::remove_if_exists(&snapshot).await;

        let outcome = match written {
            Ok((size, checksum)) => {
                record.complete(size, checksum)?;
                catalog::write_metadata(dir, &record).await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                info!(
                    backup_id = %id,
                    filename = %filename,
                    size_bytes = record.size_bytes,
                    "Backup completed"
                );
                self.insert(record.clone());
                Ok(record)
            }
            Err(e) => {
                let _ = catalog::remove_if_exists(&partial).await;
                let _ = catalog::remove_if_exists(&final_path).await;
                let _ = catalog::remove_metadata(dir, &filename).await;

                if record.status == BackupStatus::InProgress {
                    record.fail()?;
                } else {
                    // Metadata write failed after the record completed
                    record.status = BackupStatus::Failed;
                }
                error!(backup_id = %id, error = %e, "Backup failed");
                self.insert(record);
                Err(AppError::Backup(format!("backup {} failed: {}", id, e)))
            }
        }
    }

    async fn write_backup(
        &self,
        snapshot: &Path,
        partial: &Path,
        final_path: &Path,
        compress: bool,
        key: Option<[u8; 32]>,
    ) -> Result<(u64, String)> {
        {
            let mut conn = self.pool.acquire().await?;
            sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
                .execute(&mut *conn)
                .await
                .map_err(|e| map_sqlx_error("checkpoint", "PRAGMA wal_checkpoint(TRUNCATE)", e))?;
            sqlx::query("VACUUM INTO ?")
                .bind(snapshot.to_string_lossy().into_owned())
                .execute(&mut *conn)
                .await
                .map_err(|e| map_sqlx_error("backup", "VACUUM INTO ?", e))?;
        }

        let image = tokio::fs::read(snapshot).await?;
        let (stored, checksum) = tokio::task::spawn_blocking(move || {
            codec::encode(image, compress, key.as_ref()).map(|stored| {
                let checksum = codec::sha256_hex(&stored);
                (stored, checksum)
            })
        })
        .await
        .map_err(|e| AppError::Internal(format!("backup encoder panicked: {}", e)))?
        .map_err(|e| AppError::Backup(e.to_string()))?;

        tokio::fs::write(partial, &stored).await?;
        tokio::fs::rename(partial, final_path).await?;

        Ok((stored.len() as u64, checksum))
    }

    pub fn list_backups(&self) -> Vec<BackupRecord> {
        self.catalog.read().clone()
    }

    pub fn get_backup(&self, id: &str) -> Result<BackupRecord> {
        self.catalog
            .read()
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("backup {}", id)))
    }

    /// Recompute the stored file's checksum and record the outcome
    pub async fn verify_backup(&self, id: &str) -> Result<VerificationResult> {
        let mut record = self.get_backup(id)?;

        if !record.status.is_complete() {
            return Ok(VerificationResult {
                backup_id: record.id,
                valid: false,
                expected_checksum: record.checksum,
                actual_checksum: None,
                details: format!("backup is {}; nothing to verify", record.status),
            });
        }

        let path = self.config.backup_dir.join(&record.filename);
        let (valid, actual, details) = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let actual = tokio::task::spawn_blocking(move || codec::sha256_hex(&bytes))
                    .await
                    .map_err(|e| AppError::Internal(format!("checksum task panicked: {}", e)))?;
                if actual == record.checksum {
                    (true, Some(actual), "checksum matches".to_string())
                } else {
                    (false, Some(actual), "checksum mismatch".to_string())
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                (false, None, format!("backup file {} is missing", record.filename))
            }
            Err(e) => return Err(e.into()),
        };

        record.mark_verification(valid, self.time.now_millis())?;
        if let Err(e) = catalog::write_metadata(&self.config.backup_dir, &record).await {
            warn!(backup_id = %id, error = %e, "Could not persist verification status");
        }
        self.insert(record.clone());

        if valid {
            info!(backup_id = %id, "Backup verified");
        } else {
            warn!(backup_id = %id, details = %details, "Backup failed verification");
        }

        Ok(VerificationResult {
            backup_id: record.id,
            valid,
            expected_checksum: record.checksum,
            actual_checksum: actual,
            details,
        })
    }

    /// Replace the live database with a backup
    ///
    /// Verification, decoding and `PRAGMA integrity_check` all happen on a
    /// staging copy before the pool is touched; any failure up to the final
    /// rename leaves the live database as it was.
    pub async fn restore_backup(&self, id: &str, options: RestoreOptions) -> Result<RestoreResult> {
        let _restoring = self
            .restoring
            .try_lock()
            .map_err(|_| AppError::Restore("another restore is in progress".into()))?;
        let started = Instant::now();

        let record = self.get_backup(id)?;
        record
            .ensure_restorable()
            .map_err(|e| AppError::Restore(e.to_string()))?;

        let verification = self.verify_backup(id).await?;
        if !verification.valid {
            return Err(AppError::Restore(format!(
                "backup {} failed verification: {}",
                id, verification.details
            )));
        }

        let live = self.pool.db_path().to_path_buf();
        let staging = sibling(&live, &format!("restore-{}", short(id)));

        let staged_bytes = match self.stage_restore(&record, &staging).await {
            Ok(bytes) => bytes,
            Err(e) => {
                remove_with_sidecars(&staging).await;
                return Err(AppError::Restore(format!(
                    "backup {} could not be staged: {}",
                    id, e
                )));
            }
        };

        if options.dry_run {
            remove_with_sidecars(&staging).await;
            info!(
                backup_id = %id,
                requested_by = ?options.requested_by,
                "Dry-run restore validated"
            );
            return Ok(RestoreResult {
                backup_id: record.id,
                dry_run: true,
                restored: false,
                live_path: live.display().to_string(),
                staged_bytes,
                safety_backup_id: None,
                duration_ms: started.elapsed().as_millis() as u64,
                details: format!(
                    "backup passed verification and integrity check; {} would be replaced",
                    live.display()
                ),
            });
        }

        let safety_backup_id = if options.safety_backup {
            let snapshot = self
                .create_backup(BackupOptions {
                    backup_type: BackupType::PreRestore,
                    compress: true,
                    encrypt: self.config.encryption_key.is_some(),
                    requested_by: options.requested_by.clone(),
                })
                .await;
            match snapshot {
                Ok(safety) => Some(safety.id),
                Err(e) => {
                    remove_with_sidecars(&staging).await;
                    return Err(AppError::Restore(format!(
                        "could not snapshot the live database first: {}",
                        e
                    )));
                }
            }
        } else {
            None
        };

        info!(backup_id = %id, requested_by = ?options.requested_by, "Restoring backup...");

        if let Err(e) = self.pool.drain(self.config.drain_timeout).await {
            remove_with_sidecars(&staging).await;
            return Err(AppError::Restore(format!("could not quiesce the pool: {}", e)));
        }

        let swapped = swap_into_place(&live, &staging).await;
        let reopened = self.pool.initialize().await;

        match (swapped, reopened) {
            (Ok(()), Ok(())) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                info!(backup_id = %id, duration_ms = duration_ms, "Backup restored");
                Ok(RestoreResult {
                    backup_id: record.id,
                    dry_run: false,
                    restored: true,
                    live_path: live.display().to_string(),
                    staged_bytes,
                    safety_backup_id,
                    duration_ms,
                    details: format!("{} replaced with backup {}", live.display(), record.filename),
                })
            }
            (Err(e), reopened) => {
                remove_with_sidecars(&staging).await;
                if let Err(reopen) = reopened {
                    error!(error = %reopen, "Pool failed to restart after aborted restore");
                }
                Err(AppError::Restore(format!(
                    "swap failed, live database left in place: {}",
                    e
                )))
            }
            (Ok(()), Err(e)) => {
                error!(backup_id = %id, error = %e, "Restored database could not be opened");
                Err(AppError::Restore(format!(
                    "database replaced but the pool failed to restart: {}",
                    e
                )))
            }
        }
    }

    /// Decode the backup beside the live file and run an integrity check on it
    async fn stage_restore(&self, record: &BackupRecord, staging: &Path) -> Result<u64> {
        let stored = tokio::fs::read(self.config.backup_dir.join(&record.filename)).await?;
        let (compressed, encrypted, key) =
            (record.compressed, record.encrypted, self.config.encryption_key);

        let image = tokio::task::spawn_blocking(move || {
            codec::decode(stored, compressed, encrypted, key.as_ref())
        })
        .await
        .map_err(|e| AppError::Internal(format!("backup decoder panicked: {}", e)))?
        .map_err(|e| AppError::Restore(e.to_string()))?;

        let staged_bytes = image.len() as u64;
        tokio::fs::write(staging, &image).await?;

        let mut conn = open_existing(staging)
            .await
            .map_err(|e| map_sqlx_error("integrity_check", "open", e))?;
        let verdicts: std::result::Result<Vec<String>, sqlx::Error> =
            sqlx::query_scalar("PRAGMA integrity_check")
                .fetch_all(&mut conn)
                .await;
        if let Err(e) = conn.close().await {
            warn!(error = %e, "Error closing staged database");
        }
        let verdicts =
            verdicts.map_err(|e| map_sqlx_error("integrity_check", "PRAGMA integrity_check", e))?;

        if verdicts.len() == 1 && verdicts[0] == "ok" {
            Ok(staged_bytes)
        } else {
            Err(AppError::Restore(format!(
                "integrity check failed: {}",
                verdicts.join("; ")
            )))
        }
    }

    /// Apply the retention policy to completed backups; failed attempts are
    /// dropped from the catalog.
    pub async fn cleanup_old_backups(&self) -> Result<CleanupReport> {
        let now = self.time.now_millis();
        let (expired, completed): (Vec<BackupRecord>, usize) = {
            let records = self.catalog.read();
            let complete: Vec<BackupRecord> = records
                .iter()
                .filter(|r| r.status.is_complete())
                .cloned()
                .collect();
            let expired_ids = self.config.retention.select_expired(&complete, now);
            let expired = complete
                .iter()
                .filter(|r| expired_ids.contains(&r.id))
                .cloned()
                .collect();
            (expired, complete.len())
        };

        let mut report = CleanupReport::default();
        for record in &expired {
            let path = self.config.backup_dir.join(&record.filename);
            let removed = match catalog::remove_if_exists(&path).await {
                Ok(()) => catalog::remove_metadata(&self.config.backup_dir, &record.filename).await,
                Err(e) => Err(e),
            };
            match removed {
                Ok(()) => {
                    report.freed_bytes += record.size_bytes;
                    report.removed.push(record.id.clone());
                }
                Err(e) => warn!(backup_id = %record.id, error = %e, "Could not remove expired backup"),
            }
        }
        report.retained = completed - report.removed.len();

        self.catalog.write().retain(|r| {
            r.status != BackupStatus::Failed && !report.removed.contains(&r.id)
        });

        info!(
            removed = report.removed.len(),
            retained = report.retained,
            freed_bytes = report.freed_bytes,
            "Backup cleanup finished"
        );
        Ok(report)
    }

    fn insert(&self, record: BackupRecord) {
        let mut records = self.catalog.write();
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        catalog::sort_newest_first(&mut records);
    }
}

#[async_trait]
impl BackupService for BackupManager {
    async fn create_backup(&self, options: BackupOptions) -> Result<BackupRecord> {
        BackupManager::create_backup(self, options).await
    }

    async fn cleanup_old_backups(&self) -> Result<CleanupReport> {
        BackupManager::cleanup_old_backups(self).await
    }
}

fn short(id: &str) -> String {
    id.chars().filter(|c| *c != '-').take(8).collect()
}

/// `<file>.<suffix>` in the same directory (same filesystem for rename)
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

const SIDECARS: [&str; 2] = ["wal", "shm"];

async fn remove_with_sidecars(path: &Path) {
    let _ = catalog::remove_if_exists(path).await;
    for ext in SIDECARS {
        let _ = catalog::remove_if_exists(&sibling_raw(path, ext)).await;
    }
}

/// `<file>-wal` / `<file>-shm`
fn sibling_raw(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push("-");
    name.push(ext);
    path.with_file_name(name)
}

/// Move the old database's WAL/SHM aside, then rename the staged image over
/// the live file. Any failure puts every parked sidecar back.
async fn swap_into_place(live: &Path, staging: &Path) -> std::io::Result<()> {
    let mut set_aside = Vec::new();
    let swapped = park_and_swap(live, staging, &mut set_aside).await;

    match swapped {
        Ok(()) => {
            for (_, parked) in set_aside {
                let _ = tokio::fs::remove_file(&parked).await;
            }
            Ok(())
        }
        Err(e) => {
            for (sidecar, parked) in set_aside.into_iter().rev() {
                if let Err(undo) = tokio::fs::rename(&parked, &sidecar).await {
                    error!(
                        sidecar = %sidecar.display(),
                        error = %undo,
                        "Failed to restore parked sidecar"
                    );
                }
            }
            Err(e)
        }
    }
}

async fn park_and_swap(
    live: &Path,
    staging: &Path,
    set_aside: &mut Vec<(PathBuf, PathBuf)>,
) -> std::io::Result<()> {
    for ext in SIDECARS {
        let sidecar = sibling_raw(live, ext);
        if tokio::fs::try_exists(&sidecar).await? {
            let parked = sibling(&sidecar, "pre-restore");
            tokio::fs::rename(&sidecar, &parked).await?;
            set_aside.push((sidecar, parked));
        }
    }
    tokio::fs::rename(staging, live).await
}
