//! Single-file embedded store
//!
//! One `Store` wraps one SQLite connection to one bundle file. Reads go
//! through `Store::query`; the only write path is the crate-private
//! transaction used by the migrator. All SQLite work runs on tokio's
//! blocking pool and races the caller's `QueryContext`. A canceled call
//! interrupts only its own statement, and a call still queued behind another
//! one never starts its work.

pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::types::Value;
use rusqlite::{Connection, InterruptHandle, OpenFlags, Transaction, params_from_iter};
use thiserror::Error;
use tracing::{debug, info};

use crate::context::QueryContext;

/// How long a statement waits on a locked database before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// One result row, column values in select order
pub type Row = Vec<Value>;

/// Errors from the embedded store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bundle not found: {}", .0.display())]
    BundleNotFound(PathBuf),

    #[error("failed to open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("unexpected column value: {0}")]
    Scan(String),

    #[error("store is closed")]
    Closed,

    #[error("store lock poisoned")]
    Poisoned,

    #[error("query canceled")]
    Canceled,

    #[error("query deadline exceeded")]
    DeadlineExceeded,

    #[error("blocking task failed: {0}")]
    Join(String),
}

impl StoreError {
    /// Storage-layer "the bundle file does not exist"
    pub fn is_bundle_not_found(&self) -> bool {
        matches!(self, StoreError::BundleNotFound(_))
    }

    /// Canceled or timed out, as opposed to a data or I/O failure
    pub fn is_canceled(&self) -> bool {
        matches!(self, StoreError::Canceled | StoreError::DeadlineExceeded)
    }
}

/// Parameterised SQL statement
#[derive(Debug, Clone)]
pub struct Query {
    sql: String,
    args: Vec<Value>,
}

impl Query {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            args: Vec::new(),
        }
    }

    /// Bind the next positional `?` parameter
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    fn execute(&self, conn: &Connection) -> Result<Vec<Row>, StoreError> {
        let mut stmt = conn.prepare_cached(&self.sql)?;
        let column_count = stmt.column_count();
        let mut rows = stmt.query(params_from_iter(self.args.iter()))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(column_count);
            for idx in 0..column_count {
                values.push(row.get::<_, Value>(idx)?);
            }
            out.push(values);
        }
        Ok(out)
    }
}

/// SQLite-backed store for one bundle file
pub struct Store {
    path: PathBuf,
    conn: Arc<Mutex<Option<Connection>>>,
    interrupt: Arc<InterruptHandle>,
    /// Id of the call holding the connection, set and cleared under the connection lock
    active: Arc<Mutex<Option<u64>>>,
    next_call: AtomicU64,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("path", &self.path).finish()
    }
}

impl Store {
    /// Open an existing bundle file
    ///
    /// Never creates a file: a missing path yields `BundleNotFound`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        debug!(path = %path.display(), "open: called");

        if !path.is_file() {
            debug!("open: file missing");
            return Err(StoreError::BundleNotFound(path));
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI;
        let conn = Connection::open_with_flags(&path, flags).map_err(|source| StoreError::Open {
            path: path.clone(),
            source,
        })?;

        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|source| StoreError::Open { path: path.clone(), source })?;

        // Touch the header so non-database files fail here rather than on first query
        conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0))
            .map_err(|source| StoreError::Open { path: path.clone(), source })?;

        let interrupt = Arc::new(conn.get_interrupt_handle());
        info!(path = %path.display(), "Opened bundle store");

        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(Some(conn))),
            interrupt,
            active: Arc::new(Mutex::new(None)),
            next_call: AtomicU64::new(1),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run a read query and collect every row
    pub async fn query(&self, ctx: &QueryContext, query: Query) -> Result<Vec<Row>, StoreError> {
        debug!(sql = %query.sql(), args = query.args.len(), "query: called");
        self.run_blocking(ctx, move |conn| query.execute(conn)).await
    }

    /// Run `f` inside one transaction; commits only if `f` succeeds
    pub(crate) async fn transaction<T, E, F>(&self, ctx: &QueryContext, f: F) -> Result<T, E>
    where
        T: Send + 'static,
        E: From<StoreError> + Send + 'static,
        F: FnOnce(&Transaction<'_>) -> Result<T, E> + Send + 'static,
    {
        debug!(path = %self.path.display(), "transaction: called");
        self.run_blocking(ctx, move |conn| {
            let tx = conn.transaction().map_err(StoreError::from)?;
            let out = f(&tx)?;
            tx.commit().map_err(StoreError::from)?;
            Ok(out)
        })
        .await
    }

    async fn run_blocking<T, E, F>(&self, ctx: &QueryContext, f: F) -> Result<T, E>
    where
        T: Send + 'static,
        E: From<StoreError> + Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, E> + Send + 'static,
    {
        ctx.check()?;

        let call = self.next_call.fetch_add(1, Ordering::Relaxed);
        let conn = Arc::clone(&self.conn);
        let active = Arc::clone(&self.active);
        let task_ctx = ctx.clone();
        let task = tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            let conn = guard.as_mut().ok_or(StoreError::Closed)?;

            *active.lock().map_err(|_| StoreError::Poisoned)? = Some(call);
            // The caller may have given up while this call waited for the connection
            let out = match task_ctx.check() {
                Ok(()) => f(conn),
                Err(e) => Err(e.into()),
            };
            *active.lock().map_err(|_| StoreError::Poisoned)? = None;
            out
        });

        tokio::select! {
            joined = task => joined.map_err(|e| StoreError::Join(e.to_string()))?,
            err = ctx.done() => {
                self.interrupt_call(call);
                Err(err.into())
            }
        }
    }

    /// Interrupt the running statement only if it belongs to `call`
    fn interrupt_call(&self, call: u64) {
        // Holding `active` keeps the call from handing the connection on mid-check
        let Ok(active) = self.active.lock() else {
            return;
        };
        if *active == Some(call) {
            debug!(call, "interrupt_call: interrupting statement");
            self.interrupt.interrupt();
        } else {
            debug!(call, "interrupt_call: call not running, nothing to interrupt");
        }
    }

    /// Release the underlying file handle
    ///
    /// Closing twice is a no-op; any query after close fails with `Closed`.
    pub fn close(&self) -> Result<(), StoreError> {
        debug!(path = %self.path.display(), "close: called");
        let conn = {
            let mut guard = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
            guard.take()
        };

        match conn {
            Some(conn) => {
                conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;
                info!(path = %self.path.display(), "Closed bundle store");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// First column of the first row as an integer; `None` when there are no rows
pub fn scan_first_int(rows: Result<Vec<Row>, StoreError>) -> Result<Option<i64>, StoreError> {
    match first_value(rows)? {
        None => Ok(None),
        Some(Value::Integer(n)) => Ok(Some(n)),
        Some(other) => Err(StoreError::Scan(format!("expected integer, got {:?}", other.data_type()))),
    }
}

/// First column of the first row as bytes; `None` when there are no rows
pub fn scan_first_bytes(rows: Result<Vec<Row>, StoreError>) -> Result<Option<Vec<u8>>, StoreError> {
    match first_value(rows)? {
        None => Ok(None),
        Some(Value::Blob(bytes)) => Ok(Some(bytes)),
        Some(Value::Text(text)) => Ok(Some(text.into_bytes())),
        Some(other) => Err(StoreError::Scan(format!("expected blob, got {:?}", other.data_type()))),
    }
}

fn first_value(rows: Result<Vec<Row>, StoreError>) -> Result<Option<Value>, StoreError> {
    let rows = rows?;
    Ok(rows.into_iter().next().and_then(|row| row.into_iter().next()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Create a bundle-shaped SQLite file with the base tables
    pub(crate) fn create_bundle_file(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("bundle.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(schema::BASE_TABLES).unwrap();
        path
    }

    #[test]
    fn test_open_missing_file_is_bundle_not_found() {
        let dir = TempDir::new().unwrap();
        let err = Store::open(dir.path().join("nope.db")).unwrap_err();
        assert!(err.is_bundle_not_found());
        assert!(!dir.path().join("nope.db").exists(), "open must not create the file");
    }

    #[test]
    fn test_open_non_database_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("garbage.db");
        std::fs::write(&path, b"this is definitely not a sqlite database, just some text padding").unwrap();

        let err = Store::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::Open { .. }));
        assert!(!err.is_bundle_not_found());
    }

    #[tokio::test]
    async fn test_scan_first_int_and_missing_rows() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(create_bundle_file(&dir)).unwrap();
        let ctx = QueryContext::background();

        let missing = scan_first_int(store.query(&ctx, Query::new("SELECT num_result_chunks FROM meta")).await);
        assert_eq!(missing.unwrap(), None);

        let count = scan_first_int(
            store
                .query(&ctx, Query::new("SELECT count(*) FROM documents WHERE path = ?").bind("x".to_string()))
                .await,
        );
        assert_eq!(count.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_scan_first_bytes() {
        let dir = TempDir::new().unwrap();
        let path = create_bundle_file(&dir);
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute(
                "INSERT INTO documents (path, data) VALUES (?1, ?2)",
                rusqlite::params!["src/a.go", vec![1u8, 2, 3]],
            )
            .unwrap();
        }

        let store = Store::open(&path).unwrap();
        let ctx = QueryContext::background();
        let query = |p: &str| Query::new("SELECT data FROM documents WHERE path = ? LIMIT 1").bind(p.to_string());

        let hit = scan_first_bytes(store.query(&ctx, query("src/a.go")).await).unwrap();
        assert_eq!(hit, Some(vec![1, 2, 3]));

        let miss = scan_first_bytes(store.query(&ctx, query("src/b.go")).await).unwrap();
        assert_eq!(miss, None);
    }

    #[test]
    fn test_scan_type_mismatch_is_error() {
        let rows = Ok(vec![vec![Value::Text("seven".to_string())]]);
        assert!(matches!(scan_first_int(rows), Err(StoreError::Scan(_))));

        let rows = Ok(vec![vec![Value::Integer(7)]]);
        assert!(matches!(scan_first_bytes(rows), Err(StoreError::Scan(_))));
    }

    #[test]
    fn test_scan_propagates_query_error() {
        assert!(matches!(scan_first_int(Err(StoreError::Closed)), Err(StoreError::Closed)));
    }

    #[tokio::test]
    async fn test_query_after_close_fails() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(create_bundle_file(&dir)).unwrap();
        store.close().unwrap();
        store.close().unwrap();

        let err = store
            .query(&QueryContext::background(), Query::new("SELECT 1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Closed));
    }

    #[tokio::test]
    async fn test_canceled_context_rejects_query() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(create_bundle_file(&dir)).unwrap();
        let (ctx, canceler) = QueryContext::background().with_cancel();
        canceler.cancel();

        let err = store.query(&ctx, Query::new("SELECT 1")).await.unwrap_err();
        assert!(err.is_canceled());
    }

    #[tokio::test]
    async fn test_long_query_is_interrupted_by_deadline() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(create_bundle_file(&dir)).unwrap();
        let ctx = QueryContext::background().with_timeout(Duration::from_millis(50));

        // Unbounded recursive CTE; only the interrupt stops it
        let spin = Query::new(
            "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n) SELECT count(*) FROM n",
        );
        let err = tokio::time::timeout(Duration::from_secs(10), store.query(&ctx, spin))
            .await
            .expect("deadline should abort the query")
            .unwrap_err();
        assert!(matches!(err, StoreError::DeadlineExceeded));

        // The connection is usable again once the interrupted statement unwinds
        let ok = tokio::time::timeout(
            Duration::from_secs(10),
            store.query(&QueryContext::background(), Query::new("SELECT 1")),
        )
        .await
        .expect("store should recover after interrupt");
        assert!(ok.is_ok());
    }

    /// Finite but slow statement, long enough to keep the connection busy
    fn slow_count() -> Query {
        Query::new(
            "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n WHERE x < 3000000) SELECT count(*) FROM n",
        )
    }

    #[tokio::test]
    async fn test_deadline_does_not_interrupt_other_callers_statement() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::open(create_bundle_file(&dir)).unwrap());

        let slow = tokio::spawn({
            let store = Arc::clone(&store);
            async move { scan_first_int(store.query(&QueryContext::background(), slow_count()).await) }
        });
        // Let the slow statement take the connection first
        tokio::time::sleep(Duration::from_millis(20)).await;

        let ctx = QueryContext::background().with_timeout(Duration::from_millis(20));
        let err = store.query(&ctx, Query::new("SELECT 1")).await.unwrap_err();
        assert!(matches!(err, StoreError::DeadlineExceeded));

        let count = tokio::time::timeout(Duration::from_secs(60), slow)
            .await
            .expect("slow query should finish")
            .unwrap();
        assert_eq!(count.unwrap(), Some(3_000_000));
    }

    #[tokio::test]
    async fn test_queued_call_skips_work_after_deadline() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::open(create_bundle_file(&dir)).unwrap());
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let slow = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.query(&QueryContext::background(), slow_count()).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let ctx = QueryContext::background().with_timeout(Duration::from_millis(20));
        let result: Result<(), StoreError> = store
            .transaction(&ctx, {
                let ran = Arc::clone(&ran);
                move |tx| {
                    ran.store(true, Ordering::SeqCst);
                    tx.execute("INSERT INTO meta (num_result_chunks) VALUES (4)", [])?;
                    Ok(())
                }
            })
            .await;
        assert!(matches!(result, Err(StoreError::DeadlineExceeded)));

        assert!(slow.await.unwrap().is_ok());
        // Give the queued closure its turn on the connection
        tokio::time::sleep(Duration::from_millis(50)).await;
        let count = scan_first_int(
            store
                .query(&QueryContext::background(), Query::new("SELECT count(*) FROM meta"))
                .await,
        )
        .unwrap();
        assert_eq!(count, Some(0));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_transaction_rolls_back_on_error() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(create_bundle_file(&dir)).unwrap();
        let ctx = QueryContext::background();

        let result: Result<(), StoreError> = store
            .transaction(&ctx, |tx| {
                tx.execute("INSERT INTO meta (num_result_chunks) VALUES (4)", [])?;
                Err(StoreError::Scan("boom".to_string()))
            })
            .await;
        assert!(result.is_err());

        let count = scan_first_int(store.query(&ctx, Query::new("SELECT count(*) FROM meta")).await).unwrap();
        assert_eq!(count, Some(0));
    }
}
