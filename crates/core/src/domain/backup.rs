// Backup Domain Model

use super::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backup ID (UUID v4)
pub type BackupId = String;

/// Why a backup was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupType {
    Manual,
    Scheduled,
    /// Safety snapshot of the live database taken right before a restore
    PreRestore,
}

impl std::fmt::Display for BackupType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupType::Manual => write!(f, "manual"),
            BackupType::Scheduled => write!(f, "scheduled"),
            BackupType::PreRestore => write!(f, "pre_restore"),
        }
    }
}

/// Backup lifecycle
///
/// ```text
/// requested -> in_progress -> completed -> verified | verification_failed
///                          \-> failed
/// ```
/// A verified (or failed-verification) backup may be checked again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Requested,
    InProgress,
    Completed,
    Failed,
    Verified,
    VerificationFailed,
}

impl std::fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupStatus::Requested => write!(f, "requested"),
            BackupStatus::InProgress => write!(f, "in_progress"),
            BackupStatus::Completed => write!(f, "completed"),
            BackupStatus::Failed => write!(f, "failed"),
            BackupStatus::Verified => write!(f, "verified"),
            BackupStatus::VerificationFailed => write!(f, "verification_failed"),
        }
    }
}

impl BackupStatus {
    pub fn can_transition_to(self, next: BackupStatus) -> bool {
        use BackupStatus::*;
        matches!(
            (self, next),
            (Requested, InProgress)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (Completed | Verified | VerificationFailed, Verified | VerificationFailed)
        )
    }

    pub fn transition(self, next: BackupStatus) -> Result<BackupStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(DomainError::InvalidStateTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }

    /// Snapshot file exists and finished writing
    pub fn is_complete(self) -> bool {
        matches!(
            self,
            BackupStatus::Completed | BackupStatus::Verified | BackupStatus::VerificationFailed
        )
    }
}

/// One snapshot attempt and its outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: BackupId,
    pub backup_type: BackupType,
    pub filename: String,
    pub compressed: bool,
    pub encrypted: bool,
    pub created_at: i64, // epoch ms
    pub size_bytes: u64,
    /// SHA-256 (hex) of the stored file
    pub checksum: String,
    pub status: BackupStatus,
    pub verified_at: Option<i64>,
    pub requested_by: Option<String>,
}

impl BackupRecord {
    /// New record in the `requested` state
    pub fn requested(
        id: BackupId,
        backup_type: BackupType,
        filename: String,
        compressed: bool,
        encrypted: bool,
        created_at: i64,
        requested_by: Option<String>,
    ) -> Self {
        Self {
            id,
            backup_type,
            filename,
            compressed,
            encrypted,
            created_at,
            size_bytes: 0,
            checksum: String::new(),
            status: BackupStatus::Requested,
            verified_at: None,
            requested_by,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        self.status = self.status.transition(BackupStatus::InProgress)?;
        Ok(())
    }

    pub fn complete(&mut self, size_bytes: u64, checksum: String) -> Result<()> {
        self.status = self.status.transition(BackupStatus::Completed)?;
        self.size_bytes = size_bytes;
        self.checksum = checksum;
        Ok(())
    }

    pub fn fail(&mut self) -> Result<()> {
        self.status = self.status.transition(BackupStatus::Failed)?;
        Ok(())
    }

    /// Record the outcome of an integrity check
    pub fn mark_verification(&mut self, valid: bool, at: i64) -> Result<()> {
        let next = if valid {
            BackupStatus::Verified
        } else {
            BackupStatus::VerificationFailed
        };
        self.status = self.status.transition(next)?;
        self.verified_at = Some(at);
        Ok(())
    }

    pub fn ensure_restorable(&self) -> Result<()> {
        match self.status {
            BackupStatus::Completed | BackupStatus::Verified => Ok(()),
            status => Err(DomainError::NotRestorable {
                id: self.id.clone(),
                status: status.to_string(),
            }),
        }
    }
}

/// Options for `create_backup`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupOptions {
    pub backup_type: BackupType,
    pub compress: bool,
    pub encrypt: bool,
    pub requested_by: Option<String>,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            backup_type: BackupType::Manual,
            compress: true,
            encrypt: false,
            requested_by: None,
        }
    }
}

/// Options for `restore_backup`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreOptions {
    /// Validate and stage only; the live database is never touched
    pub dry_run: bool,
    pub requested_by: Option<String>,
    /// Snapshot the live database before swapping it out
    pub safety_backup: bool,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            requested_by: None,
            safety_backup: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreResult {
    pub backup_id: BackupId,
    pub dry_run: bool,
    /// True only when the live database was replaced
    pub restored: bool,
    pub live_path: String,
    /// Size of the decoded database image
    pub staged_bytes: u64,
    pub safety_backup_id: Option<BackupId>,
    pub duration_ms: u64,
    pub details: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub backup_id: BackupId,
    pub valid: bool,
    pub expected_checksum: String,
    pub actual_checksum: Option<String>,
    pub details: String,
}

/// Which backups survive `cleanup_old_backups`
///
/// A backup is removed when it falls outside `keep_last` most recent OR is
/// older than `max_age`. `None` disables that rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub keep_last: Option<usize>,
    pub max_age: Option<Duration>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_last: Some(10),
            max_age: Some(Duration::from_secs(30 * 24 * 60 * 60)),
        }
    }
}

impl RetentionPolicy {
    /// IDs of records the policy expires, given the current time in epoch ms
    pub fn select_expired(&self, records: &[BackupRecord], now_ms: i64) -> Vec<BackupId> {
        let mut ordered: Vec<&BackupRecord> = records.iter().collect();
        // Newest first; ties broken by id for a stable outcome
        ordered.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        let max_age_ms = self.max_age.map(|age| age.as_millis() as i64);

        ordered
            .into_iter()
            .enumerate()
            .filter(|(rank, record)| {
                let over_count = self.keep_last.is_some_and(|keep| *rank >= keep);
                let too_old = max_age_ms.is_some_and(|age| now_ms - record.created_at > age);
                over_count || too_old
            })
            .map(|(_, record)| record.id.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanupReport {
    pub removed: Vec<BackupId>,
    pub retained: usize,
    pub freed_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR_MS: i64 = 60 * 60 * 1000;

    fn record(id: &str, created_at: i64) -> BackupRecord {
        let mut r = BackupRecord::requested(
            id.to_string(),
            BackupType::Scheduled,
            format!("{}.db", id),
            false,
            false,
            created_at,
            None,
        );
        r.start().unwrap();
        r.complete(1024, "abc".into()).unwrap();
        r
    }

    #[test]
    fn test_lifecycle_happy_path() {
        let mut r = BackupRecord::requested(
            "b1".into(),
            BackupType::Manual,
            "b1.db".into(),
            true,
            false,
            0,
            Some("admin".into()),
        );
        assert_eq!(r.status, BackupStatus::Requested);
        r.start().unwrap();
        r.complete(42, "deadbeef".into()).unwrap();
        assert!(r.ensure_restorable().is_ok());

        r.mark_verification(false, 10).unwrap();
        assert_eq!(r.status, BackupStatus::VerificationFailed);
        assert!(matches!(
            r.ensure_restorable(),
            Err(DomainError::NotRestorable { .. })
        ));

        // Re-verification after a repair is allowed
        r.mark_verification(true, 20).unwrap();
        assert_eq!(r.status, BackupStatus::Verified);
        assert_eq!(r.verified_at, Some(20));
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        assert!(BackupStatus::Requested
            .transition(BackupStatus::Completed)
            .is_err());
        assert!(matches!(
            BackupStatus::Failed.transition(BackupStatus::Verified),
            Err(DomainError::InvalidStateTransition { .. })
        ));
        assert!(BackupStatus::Completed
            .transition(BackupStatus::InProgress)
            .is_err());

        let mut r = record("b2", 0);
        assert!(r.fail().is_err());
    }

    #[test]
    fn test_retention_keep_last() {
        let records: Vec<_> = (0..5).map(|i| record(&format!("b{}", i), i * HOUR_MS)).collect();
        let policy = RetentionPolicy {
            keep_last: Some(2),
            max_age: None,
        };

        let mut expired = policy.select_expired(&records, 10 * HOUR_MS);
        expired.sort();
        assert_eq!(expired, vec!["b0", "b1", "b2"]);
    }

    #[test]
    fn test_retention_max_age() {
        let now = 100 * HOUR_MS;
        let records = vec![
            record("fresh", now - HOUR_MS),
            record("edge", now - 24 * HOUR_MS),
            record("stale", now - 25 * HOUR_MS),
        ];
        let policy = RetentionPolicy {
            keep_last: None,
            max_age: Some(Duration::from_secs(24 * 60 * 60)),
        };

        assert_eq!(policy.select_expired(&records, now), vec!["stale"]);
    }

    #[test]
    fn test_retention_disabled_keeps_everything() {
        let records = vec![record("a", 0), record("b", 1)];
        let policy = RetentionPolicy {
            keep_last: None,
            max_age: None,
        };
        assert!(policy.select_expired(&records, i64::MAX / 2).is_empty());
    }
}
