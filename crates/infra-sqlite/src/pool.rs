// Bounded SQLite Connection Pool
//
// Bookkeeping lives under one parking_lot mutex that is never held across an
// await. Callers beyond `max_connections` wait in a FIFO queue of oneshot
// senders; a released connection goes straight to the head of the queue.
//
// Every connection carries the generation of the `initialize()` call that
// counted it. Connections that come back from an earlier generation are
// closed instead of pooled.

use crate::connection::open_connection;
use crate::error::map_sqlx_error;
use crate::metrics::Metrics;
use crate::schema::{self, SchemaReport, SetupWarning};
use async_trait::async_trait;
use notevault_core::config::PoolConfig;
use notevault_core::domain::{MetricsSnapshot, PoolState, PoolStatus};
use notevault_core::error::{AppError, Result};
use notevault_core::port::ConnectionReaper;
use parking_lot::Mutex;
use sqlx::{Connection, SqliteConnection};
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// One open handle, owned either by the idle list or by exactly one caller
pub struct PooledConnection {
    id: u64,
    generation: u64,
    conn: SqliteConnection,
    created_at: Instant,
    last_used: Instant,
}

impl PooledConnection {
    fn new(id: u64, generation: u64, conn: SqliteConnection) -> Self {
        let now = Instant::now();
        Self {
            id,
            generation,
            conn,
            created_at: now,
            last_used: now,
        }
    }
}

struct Waiter {
    id: u64,
    tx: oneshot::Sender<PooledConnection>,
}

struct PoolInner {
    state: PoolState,
    /// Oldest release at the front; acquisition takes from the back
    idle: VecDeque<PooledConnection>,
    /// Idle + in use + opening
    total: u32,
    opening: u32,
    waiters: VecDeque<Waiter>,
    next_waiter: u64,
    generation: u64,
}

impl PoolInner {
    /// Connections handed out or being opened for a caller
    fn outstanding(&self) -> u32 {
        self.total - self.idle.len() as u32
    }

    fn remove_waiter(&mut self, id: u64) {
        if let Some(index) = self.waiters.iter().position(|w| w.id == id) {
            self.waiters.remove(index);
        }
    }
}

/// Bounded pool of SQLite connections
pub struct Pool {
    config: PoolConfig,
    inner: Mutex<PoolInner>,
    /// Serializes initialize/drain so concurrent callers await one completion
    lifecycle: tokio::sync::Mutex<()>,
    /// Signalled whenever an outstanding connection comes back
    returned: Notify,
    metrics: Arc<Metrics>,
    next_conn_id: AtomicU64,
    setup_report: Mutex<SchemaReport>,
}

impl Pool {
    pub fn new(config: PoolConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            inner: Mutex::new(PoolInner {
                state: PoolState::Uninitialized,
                idle: VecDeque::new(),
                total: 0,
                opening: 0,
                waiters: VecDeque::new(),
                next_waiter: 0,
                generation: 0,
            }),
            lifecycle: tokio::sync::Mutex::new(()),
            returned: Notify::new(),
            metrics: Arc::new(Metrics::new()),
            next_conn_id: AtomicU64::new(1),
            setup_report: Mutex::new(SchemaReport::default()),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn db_path(&self) -> &Path {
        &self.config.db_path
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn state(&self) -> PoolState {
        self.inner.lock().state
    }

    /// Non-fatal warnings from the most recent schema setup
    pub fn setup_warnings(&self) -> Vec<SetupWarning> {
        self.setup_report.lock().warnings.clone()
    }

    /// Create the database directory, apply pragmas and schema on a setup
    /// connection, then pre-populate the pool.
    ///
    /// No-op when already running. Concurrent callers wait for the first one
    /// to finish. Also re-opens a drained or closed pool.
    pub async fn initialize(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;

        if self.state() == PoolState::Running {
            return Ok(());
        }

        let db_path = self.config.db_path.display().to_string();
        info!(db_path = %db_path, "Initializing connection pool...");

        if let Some(parent) = self.config.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    AppError::Initialization(format!(
                        "cannot create database directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let generation = self.inner.lock().generation + 1;

        let mut setup = open_connection(&self.config).await.map_err(|e| {
            AppError::Initialization(format!("cannot open database {}: {}", db_path, e))
        })?;

        let report = match schema::initialize_schema(&mut setup).await {
            Ok(report) => report,
            Err(e) => {
                let _ = setup.close().await;
                return Err(AppError::Initialization(format!(
                    "schema setup failed: {}",
                    e
                )));
            }
        };
        self.metrics.record_connection_created();

        let mut opened = vec![self.wrap(setup, generation)];
        let target = self
            .config
            .initial_connections
            .clamp(1, self.config.max_connections.max(1));
        while (opened.len() as u32) < target {
            match open_connection(&self.config).await {
                Ok(conn) => {
                    self.metrics.record_connection_created();
                    opened.push(self.wrap(conn, generation));
                }
                Err(e) => {
                    // The pool grows on demand; a short warm-up is not fatal
                    warn!(error = %e, "Failed to pre-open connection");
                    break;
                }
            }
        }

        let warm = opened.len();
        let stale: Vec<PooledConnection> = {
            let mut inner = self.inner.lock();
            // Checkouts from the previous generation are no longer counted
            inner.generation = generation;
            inner.total = warm as u32;
            inner.opening = 0;
            let stale: Vec<_> = inner.idle.drain(..).collect();
            inner.idle.extend(opened);
            inner.state = PoolState::Running;
            stale
        };
        *self.setup_report.lock() = report;

        if !stale.is_empty() {
            let count = stale.len();
            close_all(stale).await;
            self.metrics.record_connections_closed(count as u64);
        }

        info!(
            connections = warm,
            max_connections = self.config.max_connections,
            "Connection pool ready"
        );
        Ok(())
    }

    /// Borrow a connection for exclusive use
    ///
    /// Idle connections are reused first, then the pool grows up to
    /// `max_connections`, then the caller queues (FIFO) for at most
    /// `acquire_timeout`.
    pub async fn acquire(self: &Arc<Self>) -> Result<PoolConnection> {
        let admission = {
            let mut inner = self.inner.lock();
            if inner.state != PoolState::Running {
                return Err(AppError::PoolUnavailable(format!("pool is {}", inner.state)));
            }

            if let Some(conn) = inner.idle.pop_back() {
                return Ok(PoolConnection::new(self.clone(), conn));
            }

            if inner.total < self.config.max_connections {
                // Reserve the slot before opening so concurrent callers cannot overshoot
                inner.total += 1;
                inner.opening += 1;
                Admission::Open(SlotReservation::new(self, inner.generation))
            } else {
                inner.waiters.retain(|w| !w.tx.is_closed());
                let (tx, rx) = oneshot::channel();
                let id = inner.next_waiter;
                inner.next_waiter += 1;
                inner.waiters.push_back(Waiter { id, tx });
                Admission::Wait(QueuedAcquire { pool: self, id, rx })
            }
        };

        match admission {
            Admission::Open(reservation) => {
                let conn = self.open_reserved(reservation).await?;
                Ok(PoolConnection::new(self.clone(), conn))
            }
            Admission::Wait(queued) => self.wait_for_connection(queued).await,
        }
    }

    /// Return a connection; equivalent to dropping the guard
    pub fn release(&self, conn: PoolConnection) {
        drop(conn);
    }

    /// Open a connection into a slot already reserved by the caller
    async fn open_reserved(
        self: &Arc<Self>,
        reservation: SlotReservation<'_>,
    ) -> Result<PooledConnection> {
        match open_connection(&self.config).await {
            Ok(conn) => {
                debug!("Opened new pooled connection");
                Ok(reservation.commit(conn))
            }
            Err(e) => {
                // A failed open must not occupy a slot
                drop(reservation);
                let starving = {
                    let inner = self.inner.lock();
                    !inner.waiters.is_empty() && inner.state == PoolState::Running
                };
                if starving {
                    self.spawn_replacement();
                }
                Err(map_sqlx_error("connect", "", e))
            }
        }
    }

    /// Queued callers only wake on release; when a slot frees without a
    /// release, open one connection in the background for them.
    fn spawn_replacement(self: &Arc<Self>) {
        let generation = {
            let mut inner = self.inner.lock();
            if inner.total >= self.config.max_connections {
                return;
            }
            inner.total += 1;
            inner.opening += 1;
            inner.generation
        };

        let pool = self.clone();
        tokio::spawn(async move {
            let reservation = SlotReservation::new(&pool, generation);
            match open_connection(&pool.config).await {
                Ok(conn) => {
                    let conn = reservation.commit(conn);
                    pool.return_connection(conn);
                }
                Err(e) => {
                    drop(reservation);
                    warn!(error = %e, "Replacement connection failed to open");
                }
            }
        });
    }

    async fn wait_for_connection(
        self: &Arc<Self>,
        mut queued: QueuedAcquire<'_>,
    ) -> Result<PoolConnection> {
        let started = Instant::now();

        let outcome = tokio::time::timeout(self.config.acquire_timeout, &mut queued.rx).await;
        match outcome {
            Ok(Ok(conn)) => {
                debug!(
                    waited_ms = started.elapsed().as_millis() as u64,
                    "Acquired connection from queue"
                );
                Ok(PoolConnection::new(self.clone(), conn))
            }
            // Sender dropped: the pool started draining or closed
            Ok(Err(_)) => Err(AppError::PoolUnavailable(format!("pool is {}", self.state()))),
            Err(_) => {
                // Leaves the queue; a connection that raced the timeout is passed on
                drop(queued);

                let waited_ms = started.elapsed().as_millis() as u64;
                self.metrics.record_timeout();
                warn!(waited_ms = waited_ms, "Timed out waiting for a database connection");
                Err(AppError::ConnectionTimeout { waited_ms })
            }
        }
    }

    /// Hand a connection to the next live waiter, or park it as idle
    fn return_connection(&self, mut conn: PooledConnection) {
        conn.last_used = Instant::now();

        let mut inner = self.inner.lock();
        if conn.generation != inner.generation {
            drop(inner);
            self.metrics.record_connections_closed(1);
            debug!(conn_id = conn.id, "Dropping connection from a previous pool generation");
            drop(conn);
            return;
        }
        match inner.state {
            PoolState::Running => {
                while let Some(waiter) = inner.waiters.pop_front() {
                    match waiter.tx.send(conn) {
                        Ok(()) => return,
                        // Caller gave up; try the next one
                        Err(back) => conn = back,
                    }
                }
                inner.idle.push_back(conn);
            }
            PoolState::Draining => inner.idle.push_back(conn),
            PoolState::Closed | PoolState::Uninitialized => {
                inner.total -= 1;
                drop(inner);
                self.metrics.record_connections_closed(1);
                debug!(conn_id = conn.id, "Dropping connection returned to a closed pool");
                drop(conn);
                self.returned.notify_waiters();
                return;
            }
        }
        drop(inner);
        self.returned.notify_waiters();
    }

    /// Close idle connections unused for longer than `idle_timeout`, keeping
    /// at least `min_idle` of them.
    pub async fn close_idle_connections(&self) -> usize {
        let expired: Vec<PooledConnection> = {
            let mut inner = self.inner.lock();
            if inner.state != PoolState::Running {
                return 0;
            }

            let now = Instant::now();
            let min_idle = self.config.min_idle as usize;
            let mut kept = VecDeque::with_capacity(inner.idle.len());
            let mut expired = Vec::new();

            while let Some(conn) = inner.idle.pop_front() {
                let would_remain = inner.idle.len() + kept.len();
                if now.duration_since(conn.last_used) >= self.config.idle_timeout
                    && would_remain >= min_idle
                {
                    expired.push(conn);
                } else {
                    kept.push_back(conn);
                }
            }

            inner.idle = kept;
            inner.total -= expired.len() as u32;
            expired
        };

        let count = expired.len();
        if count > 0 {
            close_all(expired).await;
            self.metrics.record_connections_closed(count as u64);
        }
        count
    }

    /// Quiesce the pool: reject new acquisitions, fail queued callers, wait
    /// for outstanding connections to come back, then close every
    /// connection.
    ///
    /// On timeout the pool resumes serving and an error is returned. After a
    /// successful drain the pool stays in `Draining` until `initialize()` or
    /// `close()`.
    pub async fn drain(&self, timeout: Duration) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;

        {
            let mut inner = self.inner.lock();
            match inner.state {
                PoolState::Running => {}
                PoolState::Draining => return Ok(()),
                PoolState::Uninitialized | PoolState::Closed => return Ok(()),
            }
            inner.state = PoolState::Draining;
            // Dropping the senders fails every queued acquire
            inner.waiters.clear();
        }
        info!("Draining connection pool...");

        let deadline = Instant::now() + timeout;
        loop {
            let returned = self.returned.notified();
            tokio::pin!(returned);
            returned.as_mut().enable();

            let outstanding = self.inner.lock().outstanding();
            if outstanding == 0 {
                break;
            }

            if tokio::time::timeout_at(deadline, returned).await.is_err() {
                let outstanding = {
                    let mut inner = self.inner.lock();
                    inner.state = PoolState::Running;
                    inner.outstanding()
                };
                warn!(outstanding = outstanding, "Pool drain timed out; resuming service");
                return Err(AppError::PoolUnavailable(format!(
                    "{} connection(s) still in use after {}ms",
                    outstanding,
                    timeout.as_millis()
                )));
            }
        }

        let idle: Vec<PooledConnection> = {
            let mut inner = self.inner.lock();
            let idle: Vec<_> = inner.idle.drain(..).collect();
            inner.total -= idle.len() as u32;
            idle
        };
        let count = idle.len();
        close_all(idle).await;
        self.metrics.record_connections_closed(count as u64);

        info!(closed = count, "Connection pool drained");
        Ok(())
    }

    /// Drain (best effort) and mark the pool closed
    pub async fn close(&self) {
        if let Err(e) = self.drain(self.config.acquire_timeout).await {
            warn!(error = %e, "Closing pool with connections still in use");
        }

        let leftovers: Vec<PooledConnection> = {
            let mut inner = self.inner.lock();
            inner.state = PoolState::Closed;
            inner.waiters.clear();
            let idle: Vec<_> = inner.idle.drain(..).collect();
            inner.total -= idle.len() as u32;
            idle
        };
        let count = leftovers.len();
        close_all(leftovers).await;
        self.metrics.record_connections_closed(count as u64);

        info!("Connection pool closed");
    }

    /// Occupancy snapshot
    pub fn status(&self) -> PoolStatus {
        let inner = self.inner.lock();
        let idle = inner.idle.len() as u32;
        PoolStatus {
            state: inner.state,
            max_connections: self.config.max_connections,
            total: inner.total,
            active: inner.total - idle - inner.opening,
            idle,
            queued: inner.waiters.iter().filter(|w| !w.tx.is_closed()).count() as u32,
        }
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        let status = self.status();
        self.metrics.snapshot(status.active, status.queued)
    }

    fn wrap(&self, conn: SqliteConnection, generation: u64) -> PooledConnection {
        PooledConnection::new(
            self.next_conn_id.fetch_add(1, Ordering::Relaxed),
            generation,
            conn,
        )
    }
}

enum Admission<'a> {
    Open(SlotReservation<'a>),
    Wait(QueuedAcquire<'a>),
}

/// A slot counted in `total` while its connection is being opened.
/// Dropped without `commit` (open failed, caller cancelled) it frees the slot.
struct SlotReservation<'a> {
    pool: &'a Pool,
    generation: u64,
    committed: bool,
}

impl<'a> SlotReservation<'a> {
    fn new(pool: &'a Pool, generation: u64) -> Self {
        Self {
            pool,
            generation,
            committed: false,
        }
    }

    fn commit(mut self, conn: SqliteConnection) -> PooledConnection {
        {
            let mut inner = self.pool.inner.lock();
            if inner.generation == self.generation {
                inner.opening -= 1;
            }
        }
        self.committed = true;
        self.pool.metrics.record_connection_created();
        self.pool.wrap(conn, self.generation)
    }
}

impl Drop for SlotReservation<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        {
            let mut inner = self.pool.inner.lock();
            if inner.generation != self.generation {
                return;
            }
            inner.opening -= 1;
            inner.total -= 1;
        }
        self.pool.returned.notify_waiters();
    }
}

/// A caller parked in the waiter queue. On drop (timeout or a cancelled
/// acquire) it leaves the queue and passes on any connection already sent
/// to it.
struct QueuedAcquire<'a> {
    pool: &'a Pool,
    id: u64,
    rx: oneshot::Receiver<PooledConnection>,
}

impl Drop for QueuedAcquire<'_> {
    fn drop(&mut self) {
        self.pool.inner.lock().remove_waiter(self.id);
        self.rx.close();
        if let Ok(conn) = self.rx.try_recv() {
            self.pool.return_connection(conn);
        }
    }
}

#[async_trait]
impl ConnectionReaper for Pool {
    async fn reap_idle(&self) -> Result<usize> {
        Ok(self.close_idle_connections().await)
    }
}

async fn close_all(conns: Vec<PooledConnection>) {
    for pooled in conns {
        let id = pooled.id;
        let age_secs = pooled.created_at.elapsed().as_secs();
        if let Err(e) = pooled.conn.close().await {
            warn!(conn_id = id, error = %e, "Error closing connection");
        } else {
            debug!(conn_id = id, age_secs = age_secs, "Closed connection");
        }
    }
}

/// Exclusive borrow of a pooled connection; returned to the pool on drop
pub struct PoolConnection {
    pool: Arc<Pool>,
    // Some until dropped
    conn: Option<PooledConnection>,
}

impl PoolConnection {
    fn new(pool: Arc<Pool>, conn: PooledConnection) -> Self {
        Self {
            pool,
            conn: Some(conn),
        }
    }

    /// Stable identifier of the underlying connection
    pub fn id(&self) -> u64 {
        self.pooled().id
    }

    fn pooled(&self) -> &PooledConnection {
        self.conn
            .as_ref()
            .expect("pooled connection is present until drop")
    }
}

impl Deref for PoolConnection {
    type Target = SqliteConnection;

    fn deref(&self) -> &SqliteConnection {
        &self.pooled().conn
    }
}

impl DerefMut for PoolConnection {
    fn deref_mut(&mut self) -> &mut SqliteConnection {
        &mut self
            .conn
            .as_mut()
            .expect("pooled connection is present until drop")
            .conn
    }
}

impl Drop for PoolConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.return_connection(conn);
        }
    }
}
