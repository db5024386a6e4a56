// Table and JSON rendering

use anyhow::Result;
use notevault_core::domain::BackupRecord;
use serde::Serialize;
use tabled::{Table, Tabled};

#[derive(Tabled)]
pub struct BackupRow {
    id: String,
    #[tabled(rename = "type")]
    backup_type: String,
    created: String,
    size: String,
    status: String,
    file: String,
}

impl From<&BackupRecord> for BackupRow {
    fn from(record: &BackupRecord) -> Self {
        let created = chrono::DateTime::from_timestamp_millis(record.created_at)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| record.created_at.to_string());

        Self {
            id: record.id.clone(),
            backup_type: record.backup_type.to_string(),
            created,
            size: human_size(record.size_bytes),
            status: record.status.to_string(),
            file: record.filename.clone(),
        }
    }
}

pub fn print_backups(rows: Vec<BackupRow>) {
    println!("{}", Table::new(rows));
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn human_size(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    let b = bytes as f64;
    if b >= KIB * KIB {
        format!("{:.2} MB", b / (KIB * KIB))
    } else if b >= KIB {
        format!("{:.1} KB", b / KIB)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(2048), "2.0 KB");
        assert_eq!(human_size(3 * 1024 * 1024), "3.00 MB");
    }
}
