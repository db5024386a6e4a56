// Query Executor
//
// Every statement runs on a connection borrowed from the pool for the
// duration of that one call. Transactions pin a single connection for the
// whole callback.

use crate::error::{map_sqlx_error, statement_preview};
use crate::metrics::Metrics;
use crate::pool::Pool;
use futures::future::BoxFuture;
use notevault_core::domain::{HealthReport, HealthThresholds, MetricsSnapshot};
use notevault_core::error::{AppError, Result};
use sqlx::query::{Query, QueryAs};
use sqlx::sqlite::{SqliteArguments, SqliteQueryResult, SqliteRow};
use sqlx::{Connection, FromRow, Sqlite, SqliteConnection};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Positional statement parameter
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        SqlParam::Integer(v)
    }
}

impl From<i32> for SqlParam {
    fn from(v: i32) -> Self {
        SqlParam::Integer(v as i64)
    }
}

impl From<bool> for SqlParam {
    fn from(v: bool) -> Self {
        SqlParam::Integer(v as i64)
    }
}

impl From<f64> for SqlParam {
    fn from(v: f64) -> Self {
        SqlParam::Real(v)
    }
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        SqlParam::Text(v.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(v: String) -> Self {
        SqlParam::Text(v)
    }
}

impl From<Vec<u8>> for SqlParam {
    fn from(v: Vec<u8>) -> Self {
        SqlParam::Blob(v)
    }
}

impl<T: Into<SqlParam>> From<Option<T>> for SqlParam {
    fn from(v: Option<T>) -> Self {
        v.map_or(SqlParam::Null, Into::into)
    }
}

/// Outcome of a data-modifying statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunResult {
    pub changes: u64,
    pub last_insert_id: i64,
}

impl From<SqliteQueryResult> for RunResult {
    fn from(result: SqliteQueryResult) -> Self {
        Self {
            changes: result.rows_affected(),
            last_insert_id: result.last_insert_rowid(),
        }
    }
}

fn bind_params<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &'q [SqlParam],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            SqlParam::Null => query.bind(None::<i64>),
            SqlParam::Integer(v) => query.bind(*v),
            SqlParam::Real(v) => query.bind(*v),
            SqlParam::Text(v) => query.bind(v.as_str()),
            SqlParam::Blob(v) => query.bind(v.as_slice()),
        };
    }
    query
}

fn bind_params_as<'q, O>(
    mut query: QueryAs<'q, Sqlite, O, SqliteArguments<'q>>,
    params: &'q [SqlParam],
) -> QueryAs<'q, Sqlite, O, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            SqlParam::Null => query.bind(None::<i64>),
            SqlParam::Integer(v) => query.bind(*v),
            SqlParam::Real(v) => query.bind(*v),
            SqlParam::Text(v) => query.bind(v.as_str()),
            SqlParam::Blob(v) => query.bind(v.as_slice()),
        };
    }
    query
}

/// Timing and counters around one statement
#[derive(Clone)]
struct Instrumentation {
    metrics: Arc<Metrics>,
    slow_threshold: Duration,
}

impl Instrumentation {
    fn observe(&self, operation: &'static str, sql: &str, started: Instant, succeeded: bool) {
        let elapsed = started.elapsed();
        let slow = elapsed >= self.slow_threshold;
        self.metrics.record_query(elapsed, succeeded, slow);

        if slow {
            warn!(
                operation = operation,
                elapsed_ms = elapsed.as_millis() as u64,
                statement = %statement_preview(sql),
                "Slow query"
            );
        }
    }

    async fn query(
        &self,
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<Vec<SqliteRow>> {
        let started = Instant::now();
        let result = bind_params(sqlx::query(sql), params).fetch_all(conn).await;
        self.observe("query", sql, started, result.is_ok());
        result.map_err(|e| map_sqlx_error("query", sql, e))
    }

    async fn get(
        &self,
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<Option<SqliteRow>> {
        let started = Instant::now();
        let result = bind_params(sqlx::query(sql), params)
            .fetch_optional(conn)
            .await;
        self.observe("get", sql, started, result.is_ok());
        result.map_err(|e| map_sqlx_error("get", sql, e))
    }

    async fn run(
        &self,
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<RunResult> {
        let started = Instant::now();
        let result = bind_params(sqlx::query(sql), params).execute(conn).await;
        self.observe("run", sql, started, result.is_ok());
        result
            .map(RunResult::from)
            .map_err(|e| map_sqlx_error("run", sql, e))
    }

    async fn query_as<T>(
        &self,
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<Vec<T>>
    where
        T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    {
        let started = Instant::now();
        let result = bind_params_as(sqlx::query_as::<_, T>(sql), params)
            .fetch_all(conn)
            .await;
        self.observe("query", sql, started, result.is_ok());
        result.map_err(|e| map_sqlx_error("query", sql, e))
    }

    async fn get_as<T>(
        &self,
        conn: &mut SqliteConnection,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<Option<T>>
    where
        T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    {
        let started = Instant::now();
        let result = bind_params_as(sqlx::query_as::<_, T>(sql), params)
            .fetch_optional(conn)
            .await;
        self.observe("get", sql, started, result.is_ok());
        result.map_err(|e| map_sqlx_error("get", sql, e))
    }
}

/// Query executor over the connection pool
#[derive(Clone)]
pub struct Database {
    pool: Arc<Pool>,
    instrumentation: Instrumentation,
    thresholds: HealthThresholds,
}

impl Database {
    pub fn new(pool: Arc<Pool>) -> Self {
        let instrumentation = Instrumentation {
            metrics: pool.metrics().clone(),
            slow_threshold: pool.config().slow_query_threshold,
        };
        Self {
            pool,
            instrumentation,
            thresholds: HealthThresholds::default(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: HealthThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    /// All rows
    pub async fn query(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<SqliteRow>> {
        let mut conn = self.pool.acquire().await?;
        self.instrumentation.query(&mut conn, sql, params).await
    }

    /// First row, if any
    pub async fn get(&self, sql: &str, params: &[SqlParam]) -> Result<Option<SqliteRow>> {
        let mut conn = self.pool.acquire().await?;
        self.instrumentation.get(&mut conn, sql, params).await
    }

    /// Execute a data-modifying statement
    pub async fn run(&self, sql: &str, params: &[SqlParam]) -> Result<RunResult> {
        let mut conn = self.pool.acquire().await?;
        self.instrumentation.run(&mut conn, sql, params).await
    }

    pub async fn query_as<T>(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<T>>
    where
        T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    {
        let mut conn = self.pool.acquire().await?;
        self.instrumentation.query_as(&mut conn, sql, params).await
    }

    pub async fn get_as<T>(&self, sql: &str, params: &[SqlParam]) -> Result<Option<T>>
    where
        T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    {
        let mut conn = self.pool.acquire().await?;
        self.instrumentation.get_as(&mut conn, sql, params).await
    }

    /// Run `callback` inside one atomic unit on one connection
    ///
    /// Commits when the callback returns `Ok`. On `Err` the unit is rolled
    /// back and the original error is returned; if the rollback itself fails
    /// the result is `AppError::Transaction` carrying both. Dropping the
    /// returned future mid-flight also rolls back.
    ///
    /// ```ignore
    /// let id = db.transaction(|tx| Box::pin(async move {
    ///     let note = tx.run("INSERT INTO notes ...", &params).await?;
    ///     tx.run("INSERT INTO note_versions ...", &more).await?;
    ///     Ok(note.last_insert_id)
    /// })).await?;
    /// ```
    pub async fn transaction<T, F>(&self, callback: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c mut TransactionScope<'_>) -> BoxFuture<'c, Result<T>> + Send,
        T: Send,
    {
        let mut conn = self.pool.acquire().await?;
        let tx = conn
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", "BEGIN", e))?;

        let mut scope = TransactionScope {
            tx,
            instrumentation: self.instrumentation.clone(),
        };

        match callback(&mut scope).await {
            Ok(value) => {
                scope
                    .tx
                    .commit()
                    .await
                    .map_err(|e| map_sqlx_error("commit", "COMMIT", e))?;
                Ok(value)
            }
            Err(cause) => match scope.tx.rollback().await {
                Ok(()) => {
                    debug!(error = %cause, "Transaction rolled back");
                    Err(cause)
                }
                Err(rollback_err) => {
                    error!(
                        error = %cause,
                        rollback_error = %rollback_err,
                        "Rollback failed after transaction error"
                    );
                    Err(AppError::Transaction {
                        cause: Box::new(cause),
                        rollback_error: rollback_err.to_string(),
                    })
                }
            },
        }
    }

    /// Round-trip `SELECT 1` and fold pool/metrics state into a verdict
    pub async fn health_check(&self) -> HealthReport {
        let started = Instant::now();
        let reachable = match self.get("SELECT 1", &[]).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Health check query failed");
                false
            }
        };
        let round_trip_ms = reachable.then(|| started.elapsed().as_secs_f64() * 1000.0);

        let checked_at = chrono::Utc::now().timestamp_millis();
        self.pool.metrics().record_health_check(checked_at);

        let pool = self.pool.status();
        let metrics = self.get_metrics();
        let (status, reasons) = self.thresholds.evaluate(&pool, &metrics, reachable);

        HealthReport {
            status,
            reasons,
            pool,
            metrics,
            round_trip_ms,
            checked_at,
        }
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.pool.metrics_snapshot()
    }
}

/// Statements issued inside `Database::transaction`
pub struct TransactionScope<'c> {
    tx: sqlx::Transaction<'c, Sqlite>,
    instrumentation: Instrumentation,
}

impl TransactionScope<'_> {
    pub async fn query(&mut self, sql: &str, params: &[SqlParam]) -> Result<Vec<SqliteRow>> {
        self.instrumentation.query(&mut self.tx, sql, params).await
    }

    pub async fn get(&mut self, sql: &str, params: &[SqlParam]) -> Result<Option<SqliteRow>> {
        self.instrumentation.get(&mut self.tx, sql, params).await
    }

    pub async fn run(&mut self, sql: &str, params: &[SqlParam]) -> Result<RunResult> {
        self.instrumentation.run(&mut self.tx, sql, params).await
    }

    pub async fn query_as<T>(&mut self, sql: &str, params: &[SqlParam]) -> Result<Vec<T>>
    where
        T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    {
        self.instrumentation.query_as(&mut self.tx, sql, params).await
    }

    pub async fn get_as<T>(&mut self, sql: &str, params: &[SqlParam]) -> Result<Option<T>>
    where
        T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    {
        self.instrumentation.get_as(&mut self.tx, sql, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notevault_core::config::PoolConfig;
    use notevault_core::domain::HealthStatus;
    use sqlx::Row;

    async fn database(dir: &tempfile::TempDir, config: impl FnOnce(&mut PoolConfig)) -> Database {
        let mut pool_config = PoolConfig::new(dir.path().join("exec.db"));
        config(&mut pool_config);
        let pool = Pool::new(pool_config);
        pool.initialize().await.unwrap();
        let db = Database::new(pool);
        db.run(
            "CREATE TABLE kv (k TEXT PRIMARY KEY, v INTEGER NOT NULL, note TEXT)",
            &[],
        )
        .await
        .unwrap();
        db
    }

    #[derive(Debug, sqlx::FromRow, PartialEq)]
    struct Kv {
        k: String,
        v: i64,
        note: Option<String>,
    }

    #[tokio::test]
    async fn test_run_query_get() {
        let dir = tempfile::tempdir().unwrap();
        let db = database(&dir, |_| {}).await;

        let inserted = db
            .run(
                "INSERT INTO kv (k, v, note) VALUES (?, ?, ?)",
                &["a".into(), 1.into(), SqlParam::from(None::<String>)],
            )
            .await
            .unwrap();
        assert_eq!(inserted.changes, 1);
        assert!(inserted.last_insert_id > 0);

        db.run(
            "INSERT INTO kv (k, v, note) VALUES (?, ?, ?)",
            &["b".into(), 2.into(), "two".into()],
        )
        .await
        .unwrap();

        let rows = db.query("SELECT k, v FROM kv ORDER BY k", &[]).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get::<String, _>("k"), "b");

        let missing = db.get("SELECT * FROM kv WHERE k = ?", &["zz".into()]).await.unwrap();
        assert!(missing.is_none());

        let typed: Option<Kv> = db
            .get_as("SELECT k, v, note FROM kv WHERE k = ?", &["b".into()])
            .await
            .unwrap();
        assert_eq!(
            typed,
            Some(Kv {
                k: "b".into(),
                v: 2,
                note: Some("two".into())
            })
        );

        let metrics = db.get_metrics();
        assert_eq!(metrics.errors, 0);
        assert!(metrics.total_queries >= 5);
    }

    #[tokio::test]
    async fn test_query_error_is_counted_and_carries_statement() {
        let dir = tempfile::tempdir().unwrap();
        let db = database(&dir, |_| {}).await;

        let err = db.query("SELECT nope FROM kv", &[]).await.err().unwrap();
        match err {
            AppError::Query {
                operation,
                statement,
                ..
            } => {
                assert_eq!(operation, "query");
                assert_eq!(statement, "SELECT nope FROM kv");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(db.get_metrics().errors, 1);
    }

    #[tokio::test]
    async fn test_transaction_commits_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let db = database(&dir, |_| {}).await;

        let total = db
            .transaction(|tx| {
                Box::pin(async move {
                    tx.run("INSERT INTO kv (k, v) VALUES ('x', 10)", &[]).await?;
                    tx.run("INSERT INTO kv (k, v) VALUES ('y', 20)", &[]).await?;
                    let row = tx.get("SELECT SUM(v) AS s FROM kv", &[]).await?;
                    Ok(row.map(|r| r.get::<i64, _>("s")).unwrap_or(0))
                })
            })
            .await
            .unwrap();
        assert_eq!(total, 30);

        let rows = db.query("SELECT * FROM kv", &[]).await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_transaction_rolls_back_and_returns_original_error() {
        let dir = tempfile::tempdir().unwrap();
        let db = database(&dir, |_| {}).await;

        let result: Result<()> = db
            .transaction(|tx| {
                Box::pin(async move {
                    tx.run("INSERT INTO kv (k, v) VALUES ('x', 1)", &[]).await?;
                    tx.run("INSERT INTO kv (k, v) VALUES ('y', 2)", &[]).await?;
                    Err(AppError::Validation("abort".into()))
                })
            })
            .await;

        assert!(matches!(result, Err(AppError::Validation(ref m)) if m == "abort"));
        assert!(db.query("SELECT * FROM kv", &[]).await.unwrap().is_empty());

        // The connection went back to the pool
        assert_eq!(db.pool().status().active, 0);
    }

    #[tokio::test]
    async fn test_constraint_violation_inside_transaction_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let db = database(&dir, |_| {}).await;

        let result: Result<()> = db
            .transaction(|tx| {
                Box::pin(async move {
                    tx.run("INSERT INTO kv (k, v) VALUES ('dup', 1)", &[]).await?;
                    tx.run("INSERT INTO kv (k, v) VALUES ('dup', 2)", &[]).await?;
                    Ok(())
                })
            })
            .await;

        match result {
            Err(AppError::Query { message, .. }) => assert!(message.contains("Unique")),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(db.query("SELECT * FROM kv", &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_slow_queries_are_counted() {
        let dir = tempfile::tempdir().unwrap();
        let db = database(&dir, |c| c.slow_query_threshold = Duration::ZERO).await;

        db.get("SELECT 1", &[]).await.unwrap();
        let metrics = db.get_metrics();
        assert_eq!(metrics.slow_queries, metrics.total_queries);
    }

    #[tokio::test]
    async fn test_health_check_stamps_time_and_reports_healthy() {
        let dir = tempfile::tempdir().unwrap();
        let db = database(&dir, |_| {}).await;

        let report = db.health_check().await;
        assert_eq!(report.status, HealthStatus::Healthy, "{:?}", report.reasons);
        assert!(report.round_trip_ms.is_some());
        assert_eq!(report.metrics.last_health_check, Some(report.checked_at));
    }

    #[tokio::test]
    async fn test_health_check_on_closed_pool_is_unhealthy() {
        let dir = tempfile::tempdir().unwrap();
        let db = database(&dir, |_| {}).await;
        db.pool().close().await;

        let report = db.health_check().await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(report.round_trip_ms.is_none());
    }
}
