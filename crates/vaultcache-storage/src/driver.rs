//! Storage driver: owns the database file and the single writer thread.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fs2::FileExt;
use rusqlite::Connection;
use tokio::sync::{mpsc, oneshot};
use vaultcache_core::{CacheElement, CacheError, Clock};

use crate::cipher::{Cipher, NoopCipher};
use crate::ops::{placeholders, OpOutcome, PreparedOp};
use crate::schema;

/// Transient lock errors are retried this many times before the whole
/// transaction's failure is propagated to every waiter.
const MAX_TRANSACTION_RETRIES: u32 = 5;

enum Command {
    Execute(
        Vec<PreparedOp>,
        oneshot::Sender<Result<Vec<OpOutcome>, CacheError>>,
    ),
    Shutdown(oneshot::Sender<()>),
}

/// Where the database lives.
pub enum StorageLocation {
    /// A file path; parent directory is created if missing.
    Path(PathBuf),
    /// An in-memory database, for tests and ephemeral caches. Still honors
    /// the coalescer and writer-thread ordering guarantees of the file
    /// variant, since those are implemented above this driver.
    Memory,
}

/// Opens the database file, owns the single writer thread, prepares
/// statements.
pub struct StorageDriver {
    tx: mpsc::UnboundedSender<Command>,
    closed: AtomicBool,
    _lock_file: Option<File>,
}

impl StorageDriver {
    /// Creates the file if absent, runs schema migration, acquires an
    /// exclusive advisory file lock, and spawns the dedicated writer
    /// thread.
    pub fn open(
        location: StorageLocation,
        cipher: Arc<dyn Cipher>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CacheError> {
        let (conn, lock_file) = match location {
            StorageLocation::Path(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        fs::create_dir_all(parent)
                            .map_err(|e| CacheError::Storage(e.to_string()))?;
                    }
                }
                let lock_file = acquire_exclusive_lock(&path)?;
                let conn = Connection::open(&path).map_err(to_storage_err)?;
                conn.pragma_update(None, "locking_mode", "EXCLUSIVE")
                    .map_err(to_storage_err)?;
                (conn, Some(lock_file))
            }
            StorageLocation::Memory => {
                let conn = Connection::open_in_memory().map_err(to_storage_err)?;
                (conn, None)
            }
        };

        schema::migrate(&conn).map_err(to_storage_err)?;

        let (tx, rx) = mpsc::unbounded_channel::<Command>();
        std::thread::Builder::new()
            .name("vaultcache-writer".into())
            .spawn(move || writer_loop(conn, rx, cipher, clock))
            .map_err(|e| CacheError::Storage(format!("failed to spawn writer thread: {e}")))?;

        Ok(Self {
            tx,
            closed: AtomicBool::new(false),
            _lock_file: lock_file,
        })
    }

    /// Opens an in-memory database with no cipher, for tests.
    pub fn open_in_memory(clock: Arc<dyn Clock>) -> Result<Self, CacheError> {
        Self::open(StorageLocation::Memory, Arc::new(NoopCipher), clock)
    }

    /// Executes a pre-coalesced batch inside one transaction. Returns one
    /// [`OpOutcome`] per input op, in order.
    pub async fn execute(&self, ops: Vec<PreparedOp>) -> Result<Vec<OpOutcome>, CacheError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CacheError::Disposed);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Execute(ops, reply_tx))
            .map_err(|_| CacheError::Disposed)?;
        reply_rx.await.map_err(|_| CacheError::Disposed)?
    }

    /// Transitions to `ShuttingDown`, drains in-flight work, and closes the
    /// writer thread. Idempotent.
    pub async fn shutdown(&self) -> Result<(), CacheError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown(reply_tx)).is_ok() {
            let _ = reply_rx.await;
        }
        Ok(())
    }
}

fn acquire_exclusive_lock(db_path: &Path) -> Result<File, CacheError> {
    let lock_path = {
        let mut p = db_path.as_os_str().to_owned();
        p.push(".lock");
        PathBuf::from(p)
    };
    let file = File::create(&lock_path).map_err(|e| CacheError::Storage(e.to_string()))?;
    file.try_lock_exclusive().map_err(|_| {
        CacheError::Storage(format!(
            "database at {} is already open by another engine",
            db_path.display()
        ))
    })?;
    Ok(file)
}

fn to_storage_err(e: rusqlite::Error) -> CacheError {
    CacheError::Storage(e.to_string())
}

fn is_transient(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(inner, _) => matches!(
            inner.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        ),
        _ => false,
    }
}

fn writer_loop(
    mut conn: Connection,
    mut rx: mpsc::UnboundedReceiver<Command>,
    cipher: Arc<dyn Cipher>,
    clock: Arc<dyn Clock>,
) {
    while let Some(cmd) = rx.blocking_recv() {
        match cmd {
            Command::Execute(ops, reply) => {
                let result = run_batch_with_retry(&mut conn, &ops, &cipher, clock.as_ref());
                let _ = reply.send(result);
            }
            Command::Shutdown(reply) => {
                let _ = reply.send(());
                break;
            }
        }
    }
}

fn run_batch_with_retry(
    conn: &mut Connection,
    ops: &[PreparedOp],
    cipher: &Arc<dyn Cipher>,
    clock: &dyn Clock,
) -> Result<Vec<OpOutcome>, CacheError> {
    let mut attempt = 0;
    loop {
        match run_batch(conn, ops, cipher, clock) {
            Ok(outcomes) => return Ok(outcomes),
            Err(BatchError::Transient(e)) if attempt < MAX_TRANSACTION_RETRIES => {
                attempt += 1;
                let base = 10 * attempt as u64;
                let jitter = rand::random::<u64>() % (base + 1);
                tracing::warn!(attempt, error = %e, "transaction retry after transient lock error");
                std::thread::sleep(std::time::Duration::from_millis(base + jitter));
                continue;
            }
            Err(BatchError::Transient(e)) => {
                tracing::error!(error = %e, attempts = attempt, "transaction failed after exhausting retries");
                return Err(to_storage_err(e));
            }
            Err(BatchError::Permanent(e)) => return Err(e),
        }
    }
}

enum BatchError {
    Transient(rusqlite::Error),
    Permanent(CacheError),
}

/// Errors that can occur while executing one [`PreparedOp`]: either a raw
/// `rusqlite` failure or a cipher failure from encrypting/decrypting the
/// `Value` column.
enum ExecError {
    Sqlite(rusqlite::Error),
    Cipher(CacheError),
}

impl From<rusqlite::Error> for ExecError {
    fn from(e: rusqlite::Error) -> Self {
        ExecError::Sqlite(e)
    }
}

fn run_batch(
    conn: &mut Connection,
    ops: &[PreparedOp],
    cipher: &Arc<dyn Cipher>,
    clock: &dyn Clock,
) -> Result<Vec<OpOutcome>, BatchError> {
    let tx = conn.transaction().map_err(|e| classify(e.into()))?;
    let mut outcomes = Vec::with_capacity(ops.len());
    for op in ops {
        if op.is_empty_no_op() {
            outcomes.push(op.empty_outcome());
            continue;
        }
        let outcome = execute_one(&tx, op, cipher, clock).map_err(classify)?;
        outcomes.push(outcome);
    }
    tx.commit().map_err(|e| classify(e.into()))?;
    Ok(outcomes)
}

fn classify(e: ExecError) -> BatchError {
    match e {
        ExecError::Sqlite(e) if is_transient(&e) => BatchError::Transient(e),
        ExecError::Sqlite(e) => BatchError::Permanent(to_storage_err(e)),
        ExecError::Cipher(e) => BatchError::Permanent(e),
    }
}

fn execute_one(
    conn: &rusqlite::Connection,
    op: &PreparedOp,
    cipher: &Arc<dyn Cipher>,
    clock: &dyn Clock,
) -> Result<OpOutcome, ExecError> {
    match op {
        PreparedOp::BulkInsert(rows) => {
            let sql = "INSERT OR REPLACE INTO CacheElement \
                       (Key, TypeName, Value, Expiration, CreatedAt) VALUES (?1, ?2, ?3, ?4, ?5)";
            let mut stmt = conn.prepare_cached(sql)?;
            for row in rows {
                let value = cipher
                    .encrypt(&row.value, &row.key)
                    .map_err(ExecError::Cipher)?;
                stmt.execute(rusqlite::params![
                    row.key,
                    row.type_name,
                    value,
                    row.expiration,
                    row.created_at
                ])?;
            }
            Ok(OpOutcome::Unit)
        }
        PreparedOp::BulkSelectByKey(keys) => {
            let sql = format!(
                "SELECT Key, TypeName, Value, Expiration, CreatedAt FROM CacheElement \
                 WHERE Key IN ({}) AND Expiration >= ?",
                placeholders(keys.len())
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = select_rows(&mut stmt, keys, clock.now(), cipher)?;
            Ok(OpOutcome::Rows(rows))
        }
        PreparedOp::BulkSelectByType(types) => {
            let sql = format!(
                "SELECT Key, TypeName, Value, Expiration, CreatedAt FROM CacheElement \
                 WHERE TypeName IN ({}) AND Expiration >= ?",
                placeholders(types.len())
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = select_rows(&mut stmt, types, clock.now(), cipher)?;
            Ok(OpOutcome::Rows(rows))
        }
        PreparedOp::BulkInvalidateByKey(keys) => {
            let sql = format!(
                "DELETE FROM CacheElement WHERE Key IN ({})",
                placeholders(keys.len())
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            stmt.execute(rusqlite::params_from_iter(keys.iter()))?;
            Ok(OpOutcome::Unit)
        }
        PreparedOp::BulkInvalidateByType(types) => {
            let sql = format!(
                "DELETE FROM CacheElement WHERE TypeName IN ({})",
                placeholders(types.len())
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            stmt.execute(rusqlite::params_from_iter(types.iter()))?;
            Ok(OpOutcome::Unit)
        }
        PreparedOp::InvalidateAll => {
            conn.execute("DELETE FROM CacheElement", [])?;
            Ok(OpOutcome::Unit)
        }
        PreparedOp::DeleteExpired => {
            conn.execute(
                "DELETE FROM CacheElement WHERE Expiration < ?1",
                [clock.now()],
            )?;
            Ok(OpOutcome::Unit)
        }
        PreparedOp::GetKeys => {
            let mut stmt =
                conn.prepare_cached("SELECT Key FROM CacheElement WHERE Expiration >= ?1")?;
            let keys = stmt
                .query_map([clock.now()], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(OpOutcome::Keys(keys))
        }
        PreparedOp::Vacuum => {
            conn.execute(
                "DELETE FROM CacheElement WHERE Expiration < ?1",
                [clock.now()],
            )?;
            conn.execute_batch("VACUUM")?;
            Ok(OpOutcome::Unit)
        }
    }
}

/// Runs a prepared `SELECT ... WHERE <col> IN (...) AND Expiration >= ?`
/// and decrypts every returned row. The SQL `WHERE` clause has already
/// selected exactly the rows the caller asked for (by `Key` or by
/// `TypeName` depending on which statement was prepared); there is nothing
/// left to filter in Rust, so every row the query returns is decoded.
fn select_rows(
    stmt: &mut rusqlite::CachedStatement<'_>,
    params: &[String],
    now: i64,
    cipher: &Arc<dyn Cipher>,
) -> Result<Vec<CacheElement>, ExecError> {
    let mut bind_params: Vec<&dyn rusqlite::ToSql> =
        params.iter().map(|p| p as &dyn rusqlite::ToSql).collect();
    bind_params.push(&now);

    let rows = stmt.query_map(bind_params.as_slice(), |row| {
        let key: String = row.get(0)?;
        let type_name: Option<String> = row.get(1)?;
        let value: Vec<u8> = row.get(2)?;
        let expiration: i64 = row.get(3)?;
        let created_at: i64 = row.get(4)?;
        Ok((key, type_name, value, expiration, created_at))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (key, type_name, value, expiration, created_at) = row?;
        let value = cipher.decrypt(&value, &key).map_err(ExecError::Cipher)?;
        out.push(CacheElement {
            key,
            type_name,
            value,
            expiration,
            created_at,
        });
    }
    Ok(out)
}
