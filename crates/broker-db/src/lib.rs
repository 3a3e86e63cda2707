//! Persistence gateway for the wallet broker.
//!
//! The five broker tables (`user_wallet_tx`, `user_wallet_job`,
//! `user_wallet_address`, `user_wallet_balance`, `user_wallet_status`) are
//! owned by this crate and mutated only through it. Query methods are
//! grouped per table as traits implemented on [`rusqlite::Connection`];
//! callers that need atomicity run them inside [`Database::with_txn`],
//! which opens an immediate (write-locking) transaction — concurrent
//! NOTIFY transactions for the same txid are serialized by that lock.

pub mod error;
pub mod migrations;
pub mod queries;
pub mod schema;

pub use error::{DbError, Result};
pub use queries::addresses::{AddressQueries, AddressRow};
pub use queries::balances::BalanceQueries;
pub use queries::jobs::{JobQueries, JobRow, JOB_STATE_OBSERVED, JOB_STATE_PROCESSED};
pub use queries::status::{StatusQueries, StatusRow};
pub use queries::transactions::{TxQueries, TxRow, TX_TYPE_CREDIT, TX_TYPE_OBSERVATION};

use parking_lot::Mutex;
use rusqlite::{Connection, TransactionBehavior};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Handle to the broker database.
///
/// Cheap to clone; all clones share one connection behind a mutex.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (and if necessary create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let db = Self::from_connection(conn)?;
        info!(path = %path.display(), "database opened");
        Ok(db)
    }

    /// Open an in-memory database (tests).
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(schema::CREATE_SCHEMA)?;
        migrations::apply(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` inside a single immediate transaction.
    ///
    /// Commits if `f` returns `Ok`, rolls back if it returns `Err`. The
    /// immediate behavior takes SQLite's write lock up front, so two
    /// concurrent `with_txn` calls never interleave their statements.
    pub fn with_txn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let txn = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&txn)?;
        txn.commit()?;
        Ok(value)
    }

    /// Run a read-only closure against the connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }
}

/// Current Unix time in seconds, for created_at/updated_at columns.
pub(crate) fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_creates_all_tables() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name LIKE 'user_wallet_%'",
                [],
                |row| row.get(0),
            )?;
            assert_eq!(count, 5);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn with_txn_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        let result: Result<()> = db.with_txn(|conn| {
            conn.execute(
                "INSERT INTO user_wallet_balance (userid, balance, updated_at) VALUES ('U1', '1', 0)",
                [],
            )?;
            Err(DbError::Integrity("forced".into()))
        });
        assert!(result.is_err());

        db.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM user_wallet_balance", [], |row| row.get(0))?;
            assert_eq!(count, 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn with_txn_commits_on_ok() {
        let db = Database::open_in_memory().unwrap();
        db.with_txn(|conn| {
            conn.execute(
                "INSERT INTO user_wallet_balance (userid, balance, updated_at) VALUES ('U1', '1', 0)",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        db.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM user_wallet_balance", [], |row| row.get(0))?;
            assert_eq!(count, 1);
            Ok(())
        })
        .unwrap();
    }
}
