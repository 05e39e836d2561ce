//! # Coordination Store
//!
//! Single embedded SQLite database shared by every component of the engine.
//!
//! ## Connection model
//!
//! [`Store`] is a cheap-to-clone, `Send + Sync` handle; the connections
//! themselves are **per thread**. Each thread lazily opens one connection per
//! database path on first use and reuses it for the thread's lifetime, so no
//! connection ever crosses a thread boundary. Connections are configured for
//! concurrent access: WAL journal mode, `synchronous=NORMAL`, foreign keys
//! on, and a busy timeout bounding how long a writer waits for the lock.
//!
//! ## Transactions
//!
//! [`Store::read`] runs against the bare connection (no explicit
//! transaction); reads may observe any already-committed write. [`Store::write`]
//! opens a `BEGIN IMMEDIATE` scope that commits when the closure returns `Ok`
//! and rolls back on any `Err`, so every mutation in the engine is
//! all-or-nothing. Writers that lose the lock race past the busy timeout
//! surface [`CoordinationError::StoreBusy`] and may be retried by the caller.

mod schema;

use std::cell::RefCell;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::debug;

use crate::errors::{CoordinationError, CoordinationResult};

thread_local! {
    /// One connection per (thread, database path).
    static CONNECTIONS: RefCell<HashMap<PathBuf, Connection>> = RefCell::new(HashMap::new());
}

#[derive(Debug)]
struct StoreInner {
    db_path: PathBuf,
    busy_timeout: Duration,
}

/// Shared handle to the embedded coordination database
///
/// Clones share the same path and settings; the actual connections live in
/// thread-local storage and never cross threads.
#[derive(Debug, Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    pub(crate) fn new(db_path: PathBuf, busy_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                db_path,
                busy_timeout,
            }),
        }
    }

    /// Path of the backing database file
    pub fn db_path(&self) -> &Path {
        &self.inner.db_path
    }

    /// Create the schema and seed the default channels; idempotent.
    pub(crate) fn initialize(&self, default_channels: &[String]) -> CoordinationResult<()> {
        self.with_conn(|conn| schema::initialize(conn, default_channels))
    }

    /// Run a read closure against this thread's connection.
    ///
    /// No explicit transaction is opened; each statement sees the latest
    /// committed state.
    pub fn read<T>(
        &self,
        f: impl FnOnce(&Connection) -> CoordinationResult<T>,
    ) -> CoordinationResult<T> {
        self.with_conn(|conn| f(conn))
    }

    /// Run a write closure inside a `BEGIN IMMEDIATE` transaction.
    ///
    /// Commits when the closure returns `Ok`; any `Err` rolls the whole
    /// transaction back and is returned unchanged.
    pub fn write<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> CoordinationResult<T>,
    ) -> CoordinationResult<T> {
        self.with_conn(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(CoordinationError::from)?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> CoordinationResult<T>,
    ) -> CoordinationResult<T> {
        CONNECTIONS.with(|cell| {
            let mut connections = cell.borrow_mut();
            let conn = match connections.entry(self.inner.db_path.clone()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => entry.insert(self.open_connection()?),
            };
            f(conn)
        })
    }

    fn open_connection(&self) -> CoordinationResult<Connection> {
        let conn = Connection::open(&self.inner.db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = -64000;",
        )?;
        conn.busy_timeout(self.inner.busy_timeout)?;
        debug!(db = %self.inner.db_path.display(), "opened store connection");
        Ok(conn)
    }
}

/// Format a timestamp as fixed-width RFC 3339 UTC (microseconds, `Z` suffix)
///
/// Fixed width keeps lexicographic order equal to chronological order, which
/// the pending-message and expiry queries rely on for string comparisons.
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current UTC time in the store's timestamp format
pub(crate) fn now_ts() -> String {
    format_ts(Utc::now())
}

/// Parse a stored timestamp column back into `DateTime<Utc>`
pub(crate) fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Parse an optional stored timestamp column
pub(crate) fn parse_ts_opt(
    idx: usize,
    raw: Option<String>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|value| parse_ts(idx, &value)).transpose()
}
