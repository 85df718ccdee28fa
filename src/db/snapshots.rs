//! Forecast snapshots, source cursors, ingest audit rows and alert
//! persistence. These are the only mutable pieces of global state; all of
//! them are written inside transactions.

use rusqlite::{params, OptionalExtension};

use super::{BudgetDb, DbAlert, DbIngestAudit, DbSnapshot, DbSnapshotMeta};
use crate::error::AppResult;

impl BudgetDb {
    // -------------------------------------------------------------------
    // Forecast snapshots (append-only; latest wins for the digest)
    // -------------------------------------------------------------------

    pub fn insert_snapshot(
        &self,
        created_at: &str,
        horizon_start: &str,
        horizon_end: &str,
        json_payload: &str,
        min_balance_cents: Option<i64>,
        min_balance_date: Option<&str>,
    ) -> AppResult<i64> {
        self.conn_ref().execute(
            "INSERT INTO forecast_snapshot
                (created_at, horizon_start, horizon_end, json_payload,
                 min_balance_cents, min_balance_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                created_at,
                horizon_start,
                horizon_end,
                json_payload,
                min_balance_cents,
                min_balance_date
            ],
        )?;
        Ok(self.conn_ref().last_insert_rowid())
    }

    pub fn latest_snapshot(&self) -> AppResult<Option<DbSnapshot>> {
        let row = self
            .conn_ref()
            .query_row(
                "SELECT id, created_at, horizon_start, horizon_end, json_payload,
                        min_balance_cents, min_balance_date
                 FROM forecast_snapshot
                 ORDER BY datetime(created_at) DESC, id DESC
                 LIMIT 1",
                [],
                |row| {
                    Ok(DbSnapshot {
                        id: row.get(0)?,
                        created_at: row.get(1)?,
                        horizon_start: row.get(2)?,
                        horizon_end: row.get(3)?,
                        json_payload: row.get(4)?,
                        min_balance_cents: row.get(5)?,
                        min_balance_date: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Metadata of the two most recent snapshots (current, previous).
    pub fn last_two_snapshot_metas(
        &self,
    ) -> AppResult<(Option<DbSnapshotMeta>, Option<DbSnapshotMeta>)> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT created_at, horizon_start, horizon_end, min_balance_cents, min_balance_date
             FROM forecast_snapshot
             ORDER BY datetime(created_at) DESC, id DESC
             LIMIT 2",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(DbSnapshotMeta {
                created_at: row.get(0)?,
                horizon_start: row.get(1)?,
                horizon_end: row.get(2)?,
                min_balance_cents: row.get(3)?,
                min_balance_date: row.get(4)?,
            })
        })?;
        let mut metas = Vec::new();
        for row in rows {
            metas.push(row?);
        }
        let mut iter = metas.into_iter();
        Ok((iter.next(), iter.next()))
    }

    // -------------------------------------------------------------------
    // Source cursors
    // -------------------------------------------------------------------

    pub fn read_source_cursor(&self, source: &str) -> AppResult<Option<String>> {
        let cursor: Option<Option<String>> = self
            .conn_ref()
            .query_row(
                "SELECT last_cursor FROM source_cursor WHERE source = ?1",
                params![source],
                |row| row.get(0),
            )
            .optional()?;
        Ok(cursor.flatten())
    }

    /// Advance the cursor. Callers run this inside the same transaction as
    /// the final upsert batch so a failed run never moves it.
    pub fn write_source_cursor(&self, source: &str, cursor: &str) -> AppResult<()> {
        self.conn_ref().execute(
            "INSERT INTO source_cursor (source, last_cursor, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(source) DO UPDATE SET
                last_cursor = excluded.last_cursor,
                updated_at = excluded.updated_at",
            params![source, cursor, Self::now_iso()],
        )?;
        Ok(())
    }

    // -------------------------------------------------------------------
    // Ingest audit
    // -------------------------------------------------------------------

    /// Pre-insert an audit row in `running` state; finalized by
    /// `finish_ingest_audit` in the run's closing transaction.
    pub fn start_ingest_audit(&self, source: &str, started_at: &str, notes: &str) -> AppResult<i64> {
        self.conn_ref().execute(
            "INSERT INTO ingest_audit (source, run_started_at, status, notes)
             VALUES (?1, ?2, 'running', ?3)",
            params![source, started_at, notes],
        )?;
        Ok(self.conn_ref().last_insert_rowid())
    }

    pub fn finish_ingest_audit(
        &self,
        audit_id: i64,
        finished_at: &str,
        rows_upserted: i64,
        status: &str,
        notes: &str,
    ) -> AppResult<()> {
        self.conn_ref().execute(
            "UPDATE ingest_audit
             SET run_finished_at = ?1, rows_upserted = ?2, status = ?3, notes = ?4
             WHERE id = ?5",
            params![finished_at, rows_upserted, status, notes, audit_id],
        )?;
        Ok(())
    }

    pub fn get_ingest_audits(&self, source: &str) -> AppResult<Vec<DbIngestAudit>> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT id, source, run_started_at, run_finished_at, rows_upserted, status, notes
             FROM ingest_audit WHERE source = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![source], |row| {
            Ok(DbIngestAudit {
                id: row.get(0)?,
                source: row.get(1)?,
                run_started_at: row.get(2)?,
                run_finished_at: row.get(3)?,
                rows_upserted: row.get(4)?,
                status: row.get(5)?,
                notes: row.get(6)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // -------------------------------------------------------------------
    // Alerts
    // -------------------------------------------------------------------

    /// Insert an alert unless one with the same (type, dedupe_key) exists.
    /// Returns true when a new row was created.
    pub fn insert_alert_deduped(
        &self,
        kind: &str,
        dedupe_key: &str,
        severity: &str,
        title: &str,
        message: &str,
        details_json: &str,
    ) -> AppResult<bool> {
        let changed = self.conn_ref().execute(
            "INSERT OR IGNORE INTO alerts
                (created_at, type, dedupe_key, severity, title, message, details_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                Self::now_iso(),
                kind,
                dedupe_key,
                severity,
                title,
                message,
                details_json
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn get_unresolved_alerts(&self) -> AppResult<Vec<DbAlert>> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT id, created_at, type, dedupe_key, severity, title, message,
                    details_json, resolved_at
             FROM alerts
             WHERE resolved_at IS NULL
             ORDER BY datetime(created_at) DESC, id DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(DbAlert {
                id: row.get(0)?,
                created_at: row.get(1)?,
                kind: row.get(2)?,
                dedupe_key: row.get(3)?,
                severity: row.get(4)?,
                title: row.get(5)?,
                message: row.get(6)?,
                details_json: row.get(7)?,
                resolved_at: row.get(8)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn count_alerts(&self) -> AppResult<i64> {
        let n = self
            .conn_ref()
            .query_row("SELECT COUNT(*) FROM alerts", [], |row| row.get(0))?;
        Ok(n)
    }
}
