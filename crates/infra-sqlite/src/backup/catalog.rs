// Backup catalog persistence: one `<file>.meta.json` sidecar per backup

use notevault_core::domain::{BackupRecord, BackupType};
use notevault_core::error::Result;
use std::path::{Path, PathBuf};
use tracing::warn;

const METADATA_SUFFIX: &str = ".meta.json";

pub fn metadata_path(dir: &Path, filename: &str) -> PathBuf {
    dir.join(format!("{}{}", filename, METADATA_SUFFIX))
}

/// `notevault-<type>-<YYYYmmdd-HHMMSSmmm>-<id8>.db[.gz][.enc]`
pub fn backup_filename(
    backup_type: BackupType,
    created_at: i64,
    id: &str,
    compressed: bool,
    encrypted: bool,
) -> String {
    let stamp = chrono::DateTime::from_timestamp_millis(created_at)
        .map(|t| t.format("%Y%m%d-%H%M%S%3f").to_string())
        .unwrap_or_else(|| created_at.to_string());
    let short_id: String = id.chars().filter(|c| *c != '-').take(8).collect();

    let mut name = format!("notevault-{}-{}-{}.db", backup_type, stamp, short_id);
    if compressed {
        name.push_str(".gz");
    }
    if encrypted {
        name.push_str(".enc");
    }
    name
}

/// Write the sidecar atomically (temp file + rename)
pub async fn write_metadata(dir: &Path, record: &BackupRecord) -> Result<()> {
    let path = metadata_path(dir, &record.filename);
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_vec_pretty(record)?;
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, &path).await?;
    Ok(())
}

pub async fn remove_metadata(dir: &Path, filename: &str) -> std::io::Result<()> {
    remove_if_exists(&metadata_path(dir, filename)).await
}

/// Rebuild the catalog from the sidecars in `dir`, newest first
pub async fn load(dir: &Path) -> Result<Vec<BackupRecord>> {
    let mut records = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.ends_with(METADATA_SUFFIX) {
            continue;
        }

        let parsed = tokio::fs::read(entry.path())
            .await
            .map_err(|e| e.to_string())
            .and_then(|bytes| {
                serde_json::from_slice::<BackupRecord>(&bytes).map_err(|e| e.to_string())
            });
        match parsed {
            Ok(record) => records.push(record),
            Err(e) => warn!(file = name, error = %e, "Ignoring unreadable backup metadata"),
        }
    }

    sort_newest_first(&mut records);
    Ok(records)
}

pub fn sort_newest_first(records: &mut [BackupRecord]) {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
}

pub async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
