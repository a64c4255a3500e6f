//! Database connection management.
//!
//! Wraps a single rusqlite Connection in a Mutex and configures WAL mode,
//! the busy timeout, and the `cosine_distance` SQL function on open.
//! Async callers go through [`Database::run`], which moves the work onto
//! the blocking pool and interrupts it when the caller's token fires.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use aiep_core::config::StorageConfig;
use aiep_vector::distance::blob_cosine_distance;
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, InterruptHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::migrations;

/// Where a cancelled call stood when its token fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallState {
    /// Waiting for the connection.
    Queued,
    /// Holding the connection; its statement was interrupted.
    Running,
    /// Already released the connection.
    Finished,
}

/// SQLite database shared by all stores.
pub struct Database {
    conn: Mutex<Connection>,
    interrupt: InterruptHandle,
    /// Call currently holding the connection, if any.
    running: Mutex<Option<u64>>,
    next_call: AtomicU64,
}

impl Database {
    /// Open (or create) a database at the given path and run pending migrations.
    pub fn new(path: &Path, config: &StorageConfig) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Internal(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let conn = Connection::open(path)?;
        configure(&conn, config)?;
        info!("Database opened at {}", path.display());
        Self::from_connection(conn)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        configure(&conn, &StorageConfig::default())?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        migrations::run_migrations(&conn)?;
        Ok(Self {
            interrupt: conn.get_interrupt_handle(),
            conn: Mutex::new(conn),
            running: Mutex::new(None),
            next_call: AtomicU64::new(1),
        })
    }

    /// Execute a closure with exclusive access to the connection.
    ///
    /// The mutex is held for the duration of the closure.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.lock()?;
        f(&mut conn)
    }

    /// Run `f` on the blocking pool, honouring `cancel`.
    ///
    /// An already-cancelled token fails with [`StoreError::Cancelled`]
    /// without touching the database. A call still queued behind another
    /// caller fails with `Cancelled` as soon as the token fires; its `f`
    /// never runs. If the token fires while `f` runs, the in-flight
    /// statement is interrupted and the call fails with `Cancelled`; any
    /// transaction `f` opened is rolled back when dropped.
    pub async fn run<F, T>(self: &Arc<Self>, cancel: &CancellationToken, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection, &CancellationToken) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }

        let call_id = self.next_call.fetch_add(1, Ordering::Relaxed);
        let started = Arc::new(AtomicBool::new(false));
        let db = Arc::clone(self);
        let token = cancel.clone();
        let claimed = Arc::clone(&started);
        let mut task =
            tokio::task::spawn_blocking(move || db.run_blocking(call_id, &claimed, &token, f));

        tokio::select! {
            biased;
            joined = &mut task => return flatten(joined),
            _ = cancel.cancelled() => {}
        }

        match self.interrupt_call(call_id, &started) {
            CallState::Queued => {
                // The worker sees the cancelled token once it gets the
                // connection and returns without running `f`.
                debug!(call_id, "Cancelled while waiting for the connection");
                return Err(StoreError::Cancelled);
            }
            CallState::Running | CallState::Finished => {}
        }

        match flatten(task.await) {
            Ok(value) => Ok(value),
            Err(StoreError::Cancelled) => {
                warn!(call_id, "Database call cancelled");
                Err(StoreError::Cancelled)
            }
            Err(e) => {
                warn!(call_id, error = %e, "Database call failed after cancellation");
                Err(StoreError::Cancelled)
            }
        }
    }

    fn run_blocking<F, T>(
        &self,
        call_id: u64,
        started: &AtomicBool,
        token: &CancellationToken,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(&mut Connection, &CancellationToken) -> Result<T>,
    {
        let mut conn = self.lock()?;
        self.claim(call_id, started)?;
        let result = if token.is_cancelled() {
            Err(StoreError::Cancelled)
        } else {
            f(&mut conn, token)
        };
        // Cleared while the connection is still held so a late interrupt
        // cannot reach the next caller.
        self.release()?;
        result
    }

    /// Interrupt `call_id` if it owns the connection, reporting where it was.
    ///
    /// Decided under the registry lock: a call seen as queued claims the
    /// connection only after this returns, and then observes its token.
    fn interrupt_call(&self, call_id: u64, started: &AtomicBool) -> CallState {
        match self.running.lock() {
            Ok(running) if *running == Some(call_id) => {
                debug!(call_id, "Interrupting in-flight statement");
                self.interrupt.interrupt();
                CallState::Running
            }
            Ok(_) if started.load(Ordering::Acquire) => CallState::Finished,
            Ok(_) => CallState::Queued,
            Err(e) => {
                warn!("Call registry lock poisoned: {}", e);
                CallState::Finished
            }
        }
    }

    fn claim(&self, call_id: u64, started: &AtomicBool) -> Result<()> {
        let mut running = self
            .running
            .lock()
            .map_err(|e| StoreError::Internal(format!("Call registry lock poisoned: {}", e)))?;
        *running = Some(call_id);
        started.store(true, Ordering::Release);
        Ok(())
    }

    fn release(&self) -> Result<()> {
        let mut running = self
            .running
            .lock()
            .map_err(|e| StoreError::Internal(format!("Call registry lock poisoned: {}", e)))?;
        *running = None;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Internal(format!("Database lock poisoned: {}", e)))
    }

    /// Highest applied schema migration.
    pub fn schema_version(&self) -> Result<i64> {
        self.with_conn(|conn| migrations::current_version(conn))
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

fn flatten<T>(joined: std::result::Result<Result<T>, tokio::task::JoinError>) -> Result<T> {
    joined.map_err(|e| StoreError::Internal(format!("Database worker failed: {}", e)))?
}

fn configure(conn: &Connection, config: &StorageConfig) -> Result<()> {
    conn.execute_batch(&format!(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA cache_size = -{};",
        config.cache_size_kib
    ))?;
    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
    register_functions(conn)?;
    Ok(())
}

/// Register `cosine_distance(a, b)` over little-endian `f32` blobs.
///
/// Yields NULL when either argument is not a blob, the lengths differ, or
/// either vector has zero magnitude.
fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "cosine_distance",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let distance = match (blob_arg(ctx, 0), blob_arg(ctx, 1)) {
                (Some(a), Some(b)) => blob_cosine_distance(a, b),
                _ => None,
            };
            Ok(distance)
        },
    )
}

fn blob_arg<'a>(ctx: &'a Context<'_>, idx: usize) -> Option<&'a [u8]> {
    match ctx.get_raw(idx) {
        ValueRef::Blob(bytes) => Some(bytes),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiep_vector::codec::encode_blob;

    #[test]
    fn test_in_memory_database() {
        let db = Database::in_memory().unwrap();
        let count: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM chat_messages", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("test.db");
        let db = Database::new(&path, &StorageConfig::default()).unwrap();
        assert_eq!(db.schema_version().unwrap(), migrations::LATEST_VERSION);
        assert!(path.exists());
    }

    #[test]
    fn test_wal_mode_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(&dir.path().join("wal.db"), &StorageConfig::default()).unwrap();
        let mode: String = db
            .with_conn(|conn| Ok(conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?))
            .unwrap();
        assert_eq!(mode, "wal");
    }

    #[test]
    fn test_cosine_distance_function() {
        let db = Database::in_memory().unwrap();
        let a = encode_blob(&[1.0, 0.0]);
        let b = encode_blob(&[0.0, 1.0]);
        let (same, orthogonal, null, mismatched): (f64, f64, Option<f64>, Option<f64>) = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT cosine_distance(?1, ?1), cosine_distance(?1, ?2),
                            cosine_distance(?1, NULL), cosine_distance(?1, ?3)",
                    rusqlite::params![a, b, encode_blob(&[1.0])],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )?)
            })
            .unwrap();
        assert!(same.abs() < 1e-12);
        assert!((orthogonal - 1.0).abs() < 1e-12);
        assert_eq!(null, None);
        assert_eq!(mismatched, None);
    }

    #[tokio::test]
    async fn test_run_returns_closure_result() {
        let db = Arc::new(Database::in_memory().unwrap());
        let token = CancellationToken::new();
        let value = db
            .run(&token, |conn, _| Ok(conn.query_row("SELECT 41 + 1", [], |r| r.get::<_, i64>(0))?))
            .await
            .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_run_precancelled_skips_backend() {
        let db = Arc::new(Database::in_memory().unwrap());
        let token = CancellationToken::new();
        token.cancel();
        let touched = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&touched);
        let result = db
            .run(&token, move |_, _| {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(StoreError::Cancelled)));
        assert!(!touched.load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_while_queued_returns_promptly() {
        let db = Arc::new(Database::in_memory().unwrap());

        // Another caller holds the connection for a while.
        let (held_tx, held_rx) = tokio::sync::oneshot::channel();
        let holder_db = Arc::clone(&db);
        let holder = tokio::spawn(async move {
            holder_db
                .run(&CancellationToken::new(), move |_, _| {
                    let _ = held_tx.send(());
                    std::thread::sleep(Duration::from_millis(1500));
                    Ok(())
                })
                .await
        });
        held_rx.await.unwrap();

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let touched = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&touched);
        let started = std::time::Instant::now();
        let result = db
            .run(&token, move |_, _| {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(StoreError::Cancelled)));
        assert!(
            started.elapsed() < Duration::from_millis(1000),
            "waited {:?} for the connection",
            started.elapsed()
        );

        holder.await.unwrap().unwrap();
        // The abandoned worker skips its closure once it gets the connection.
        let fresh = CancellationToken::new();
        db.run(&fresh, |_, _| Ok(())).await.unwrap();
        assert!(!touched.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_run_interrupts_long_query() {
        let db = Arc::new(Database::in_memory().unwrap());
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        // Unbounded recursive CTE: only an interrupt ends it.
        let result = db
            .run(&token, |conn, _| {
                Ok(conn.query_row(
                    "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n)
                     SELECT COUNT(*) FROM n",
                    [],
                    |r| r.get::<_, i64>(0),
                )?)
            })
            .await;
        assert!(matches!(result, Err(StoreError::Cancelled)));

        // The connection is usable again afterwards.
        let fresh = CancellationToken::new();
        let one = db
            .run(&fresh, |conn, _| Ok(conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))?))
            .await
            .unwrap();
        assert_eq!(one, 1);
    }
}
