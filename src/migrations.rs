//! Schema migration framework.
//!
//! Numbered SQL migrations are embedded at compile time via `include_str!`.
//! Each migration runs exactly once, tracked by the `schema_migrations`
//! table keyed on the numeric prefix of the filename.

use rusqlite::Connection;

use crate::error::AppError;

struct Migration {
    version: i32,
    filename: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        filename: "0001_baseline.sql",
        sql: include_str!("migrations/0001_baseline.sql"),
    },
    Migration {
        version: 2,
        filename: "0002_alerts.sql",
        sql: include_str!("migrations/0002_alerts.sql"),
    },
    Migration {
        version: 3,
        filename: "0003_anchors_aliases.sql",
        sql: include_str!("migrations/0003_anchors_aliases.sql"),
    },
];

fn ensure_schema_table(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            filename TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;
    Ok(())
}

/// Return the highest applied migration version, or 0 if none.
fn current_version(conn: &Connection) -> Result<i32, AppError> {
    let v = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;
    Ok(v)
}

/// Run all pending migrations, returning how many were applied.
///
/// Forward-compat guard: a database written by a newer binary refuses to
/// open rather than re-running baseline SQL against live tables.
pub fn run_migrations(conn: &Connection) -> Result<usize, AppError> {
    ensure_schema_table(conn)?;

    let current = current_version(conn)?;
    let max_known = MIGRATIONS.last().map(|m| m.version).unwrap_or(0);

    if current > max_known {
        return Err(AppError::Integrity(format!(
            "store schema version {current} is newer than this binary supports ({max_known})"
        )));
    }

    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();
    if pending.is_empty() {
        return Ok(0);
    }

    for migration in &pending {
        conn.execute_batch(migration.sql).map_err(|e| {
            AppError::Integrity(format!("migration {} failed: {e}", migration.filename))
        })?;
        conn.execute(
            "INSERT INTO schema_migrations (version, filename) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.filename],
        )?;
        log::info!("Applied migration {}", migration.filename);
    }

    Ok(pending.len())
}
