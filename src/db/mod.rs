//! SQLite-based local source of truth.
//!
//! The store lives at `DB_PATH` (default `~/.cashflowd/budget.db`) and holds
//! everything the forecaster needs: transactions, accounts, categories,
//! scheduled items, anchors, snapshots, cursors, audits and alerts. History
//! is append/upsert only; the forecast never rewrites it.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};

use crate::error::{AppError, AppResult};

pub mod types;
pub use types::*;

pub mod accounts;
pub mod categories;
pub mod schedule;
pub mod snapshots;
pub mod transactions;

pub struct BudgetDb {
    conn: Connection,
}

impl BudgetDb {
    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err.
    pub fn with_transaction<F, T>(&self, f: F) -> AppResult<T>
    where
        F: FnOnce(&Self) -> AppResult<T>,
    {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(self) {
            Ok(val) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(val)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Open (or create) the store at the default path and apply the schema.
    pub fn open() -> AppResult<Self> {
        Self::open_at(Self::default_path())
    }

    /// Open a store at an explicit path. Used by binaries and tests.
    pub fn open_at(path: PathBuf) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)?;

        // WAL for concurrent readers while the service owns writes
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        crate::migrations::run_migrations(&conn)?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Self { conn })
    }

    /// Open the store read-only. Used by reporting paths that must run
    /// safely alongside the writing service.
    pub fn open_readonly_at(path: &Path) -> AppResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(Self { conn })
    }

    /// Resolve the default store path: `~/.cashflowd/budget.db`.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .map(|h| h.join(".cashflowd").join("budget.db"))
            .unwrap_or_else(|| PathBuf::from("budget.db"))
    }

    /// Current UTC timestamp in the RFC3339 second-resolution form stored
    /// throughout the schema.
    pub fn now_iso() -> String {
        chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }

    /// Classify a rusqlite failure: constraint violations become integrity
    /// errors, busy/locked becomes a retryable conflict.
    pub(crate) fn integrity(context: &str, e: rusqlite::Error) -> AppError {
        match e {
            rusqlite::Error::SqliteFailure(f, _)
                if f.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                AppError::Integrity(format!("{context}: constraint violation"))
            }
            rusqlite::Error::SqliteFailure(f, _)
                if matches!(
                    f.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                AppError::Conflict(context.to_string())
            }
            other => AppError::Db(other),
        }
    }
}

// =============================================================================
// Shared test utilities
// =============================================================================

#[cfg(test)]
pub mod test_utils {
    use super::BudgetDb;

    /// Create a temporary store for testing.
    ///
    /// The `TempDir` is leaked so the directory persists for the duration of
    /// the test; the OS cleans up test temp dirs. FK enforcement is disabled
    /// so unit tests can insert rows without satisfying every foreign key.
    pub fn test_db() -> BudgetDb {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("test.db");
        std::mem::forget(dir);
        let db = BudgetDb::open_at(path).expect("Failed to open test database");
        db.conn_ref()
            .execute_batch("PRAGMA foreign_keys = OFF;")
            .expect("disable FK for tests");
        db
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::test_utils::test_db;
    use super::*;

    #[test]
    fn test_open_creates_tables() {
        let db = test_db();
        let count: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))
            .expect("transactions table should exist");
        assert_eq!(count, 0);

        let count: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM forecast_snapshot", [], |row| {
                row.get(0)
            })
            .expect("forecast_snapshot table should exist");
        assert_eq!(count, 0);
    }

    #[test]
    fn test_idempotent_schema_application() {
        // Opening the same store twice must not error
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("idempotent.db");

        let _db1 = BudgetDb::open_at(path.clone()).expect("first open");
        let _db2 = BudgetDb::open_at(path).expect("second open should not fail");
    }

    #[test]
    fn test_with_transaction_commits() {
        let db = test_db();
        db.with_transaction(|db| {
            db.conn_ref()
                .execute(
                    "INSERT INTO accounts (name, type, currency) VALUES ('A', 'checking', 'USD')",
                    [],
                )
                .map_err(AppError::Db)?;
            Ok(())
        })
        .expect("transaction should commit");

        let count: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM accounts", [], |row| row.get(0))
            .expect("count");
        assert_eq!(count, 1);
    }

    #[test]
    fn test_with_transaction_rolls_back() {
        let db = test_db();
        let result: AppResult<()> = db.with_transaction(|db| {
            db.conn_ref()
                .execute(
                    "INSERT INTO accounts (name, type, currency) VALUES ('B', 'checking', 'USD')",
                    [],
                )
                .map_err(AppError::Db)?;
            Err(AppError::Validation("forced".into()))
        });
        assert!(result.is_err());

        let count: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM accounts", [], |row| row.get(0))
            .expect("count");
        assert_eq!(count, 0, "insert must be rolled back");
    }
}
