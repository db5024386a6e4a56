// Schema & Index Initializer
//
// Tables come from versioned migration files; indexes come from a declarative
// set that is re-applied on every startup.

use crate::error::map_sqlx_error;
use notevault_core::error::Result;
use serde::{Deserialize, Serialize};
use sqlx::{Connection, SqliteConnection};
use tracing::{debug, info, warn};

/// Bumped whenever `INDEX_SET` changes
pub const INDEX_SET_VERSION: u32 = 1;

/// One named index on a table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: &'static str,
    pub table: &'static str,
    pub columns: &'static str,
}

impl IndexSpec {
    pub const fn new(name: &'static str, table: &'static str, columns: &'static str) -> Self {
        Self {
            name,
            table,
            columns,
        }
    }

    fn create_statement(&self) -> String {
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            self.name, self.table, self.columns
        )
    }
}

/// Lookup indexes on identifiers, foreign keys, timestamps and flags
pub const INDEX_SET: &[IndexSpec] = &[
    // users / sessions
    IndexSpec::new("idx_users_email", "users", "email"),
    IndexSpec::new("idx_users_active", "users", "is_active"),
    IndexSpec::new("idx_users_created", "users", "created_at"),
    IndexSpec::new("idx_sessions_user", "sessions", "user_id"),
    IndexSpec::new("idx_sessions_expires", "sessions", "expires_at"),
    // workspaces
    IndexSpec::new("idx_workspaces_owner", "workspaces", "owner_id"),
    IndexSpec::new("idx_workspace_members_user", "workspace_members", "user_id"),
    // notes
    IndexSpec::new("idx_notes_workspace", "notes", "workspace_id"),
    IndexSpec::new("idx_notes_author", "notes", "author_id"),
    IndexSpec::new("idx_notes_updated", "notes", "updated_at"),
    IndexSpec::new("idx_notes_workspace_archived", "notes", "workspace_id, is_archived"),
    IndexSpec::new("idx_note_versions_note", "note_versions", "note_id, created_at"),
    // chat
    IndexSpec::new("idx_channels_workspace", "channels", "workspace_id"),
    IndexSpec::new("idx_channel_members_user", "channel_members", "user_id"),
    IndexSpec::new("idx_messages_channel_created", "messages", "channel_id, created_at"),
    IndexSpec::new("idx_messages_author", "messages", "author_id"),
    // files
    IndexSpec::new("idx_files_workspace", "files", "workspace_id"),
    IndexSpec::new("idx_files_note", "files", "note_id"),
    IndexSpec::new("idx_files_uploader", "files", "uploader_id"),
    // administration
    IndexSpec::new("idx_announcements_active", "announcements", "is_active, starts_at"),
    IndexSpec::new("idx_audit_logs_actor", "audit_logs", "actor_id"),
    IndexSpec::new("idx_audit_logs_created", "audit_logs", "created_at"),
    IndexSpec::new("idx_audit_logs_target", "audit_logs", "target_type, target_id"),
    IndexSpec::new("idx_integrations_workspace", "integrations", "workspace_id"),
    IndexSpec::new("idx_webhooks_workspace_active", "webhooks", "workspace_id, is_active"),
    IndexSpec::new("idx_backups_created", "backups", "created_at"),
    IndexSpec::new("idx_backups_status", "backups", "status"),
];

/// An index that could not be created; setup continues without it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupWarning {
    pub index: String,
    pub table: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaReport {
    pub schema_version: i64,
    pub index_set_version: u32,
    pub indexes_ensured: usize,
    pub warnings: Vec<SetupWarning>,
}

/// Apply pending migrations, then the index set
pub async fn initialize_schema(conn: &mut SqliteConnection) -> Result<SchemaReport> {
    let schema_version = run_migrations(conn).await?;
    let (indexes_ensured, warnings) = ensure_indexes(conn, INDEX_SET).await;

    Ok(SchemaReport {
        schema_version,
        index_set_version: INDEX_SET_VERSION,
        indexes_ensured,
        warnings,
    })
}

/// Run database migrations; returns the resulting schema version
pub async fn run_migrations(conn: &mut SqliteConnection) -> Result<i64> {
    let table_exists: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
    )
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("migrate", "SELECT COUNT(*) FROM sqlite_master", e))?;

    let current_version: i64 = if table_exists > 0 {
        sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("migrate", "SELECT MAX(version)", e))
            .map(|v: Option<i64>| v.unwrap_or(0))?
    } else {
        0
    };

    debug!(current_version = current_version, "Checked schema version");

    if current_version < 1 {
        info!("Applying migration 001: Initial schema");
        apply_migration(conn, include_str!("../migrations/001_initial_schema.sql")).await?;
    }

    Ok(current_version.max(1))
}

/// Apply a single migration SQL file in one transaction
async fn apply_migration(conn: &mut SqliteConnection, sql: &str) -> Result<()> {
    let mut tx = conn
        .begin()
        .await
        .map_err(|e| map_sqlx_error("migrate", "BEGIN", e))?;

    for statement in sql.split(';') {
        let clean_statement: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string();

        if !clean_statement.is_empty() {
            sqlx::query(&clean_statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("migrate", &clean_statement, e))?;
        }
    }

    tx.commit()
        .await
        .map_err(|e| map_sqlx_error("migrate", "COMMIT", e))
}

/// Create each index independently; a failure is a warning, not an abort
pub async fn ensure_indexes(
    conn: &mut SqliteConnection,
    specs: &[IndexSpec],
) -> (usize, Vec<SetupWarning>) {
    let mut ensured = 0;
    let mut warnings = Vec::new();

    for spec in specs {
        match sqlx::query(&spec.create_statement()).execute(&mut *conn).await {
            Ok(_) => ensured += 1,
            Err(e) => {
                warn!(
                    index = spec.name,
                    table = spec.table,
                    error = %e,
                    "Skipping index that could not be created"
                );
                warnings.push(SetupWarning {
                    index: spec.name.to_string(),
                    table: spec.table.to_string(),
                    message: e.to_string(),
                });
            }
        }
    }

    debug!(ensured = ensured, skipped = warnings.len(), "Index set applied");
    (ensured, warnings)
}
