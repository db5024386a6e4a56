// sqlx::Error -> AppError mapping
// (orphan rules: cannot implement From<sqlx::Error> for AppError here)

use notevault_core::error::AppError;

/// Longest statement excerpt that may appear in logs or errors
pub const STATEMENT_PREVIEW_LEN: usize = 100;

/// Single-line, truncated statement text. Bound parameter values are never
/// part of the SQL text, so the preview cannot leak them.
pub fn statement_preview(sql: &str) -> String {
    let collapsed = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= STATEMENT_PREVIEW_LEN {
        return collapsed;
    }
    let mut preview: String = collapsed.chars().take(STATEMENT_PREVIEW_LEN).collect();
    preview.push_str("...");
    preview
}

/// Convert sqlx::Error to AppError::Query with structured information
pub fn map_sqlx_error(operation: &'static str, sql: &str, err: sqlx::Error) -> AppError {
    let message = match &err {
        sqlx::Error::Database(db_err) => {
            // SQLite error codes: https://www.sqlite.org/rescode.html
            match db_err.code().as_deref() {
                Some(code @ ("2067" | "1555")) => {
                    format!("Unique constraint violation: {} ({})", db_err.message(), code)
                }
                Some(code @ ("787" | "3850")) => {
                    format!("Foreign key constraint violation: {} ({})", db_err.message(), code)
                }
                Some("5") => format!("Database locked (SQLITE_BUSY): {}", db_err.message()),
                Some("13") => format!("Database full: {}", db_err.message()),
                Some(code) => format!("Database error [{}]: {}", code, db_err.message()),
                None => format!("Database error: {}", db_err.message()),
            }
        }
        sqlx::Error::RowNotFound => "Row not found".to_string(),
        sqlx::Error::ColumnNotFound(col) => format!("Column not found: {}", col),
        // Connection, protocol and decode errors
        other => other.to_string(),
    };

    AppError::Query {
        operation,
        statement: statement_preview(sql),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_collapses_and_truncates() {
        assert_eq!(
            statement_preview("SELECT *\n   FROM notes\tWHERE id = ?"),
            "SELECT * FROM notes WHERE id = ?"
        );

        let long = format!("SELECT {} FROM t", "a, ".repeat(100));
        let preview = statement_preview(&long);
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), STATEMENT_PREVIEW_LEN + 3);
    }

    #[test]
    fn test_map_row_not_found() {
        let err = map_sqlx_error("get", "SELECT 1", sqlx::Error::RowNotFound);
        match err {
            AppError::Query {
                operation,
                statement,
                message,
            } => {
                assert_eq!(operation, "get");
                assert_eq!(statement, "SELECT 1");
                assert_eq!(message, "Row not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
