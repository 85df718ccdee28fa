//! Transaction upserts and balance queries.
//!
//! Upserts never mutate history beyond `category_id`, `is_cleared` and
//! `import_meta_json`; the idempotency key is the dedup boundary for
//! at-least-once ingest.

use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension};

use super::{BudgetDb, DbTransaction};
use crate::error::AppResult;

impl BudgetDb {
    /// Insert or refresh a transaction keyed by `idempotency_key`.
    /// A conflicting key keeps any already-assigned category
    /// (`COALESCE(excluded.category_id, …)`).
    pub fn upsert_transaction(&self, txn: &DbTransaction) -> AppResult<()> {
        self.conn_ref().execute(
            "INSERT INTO transactions (
                idempotency_key, account_id, posted_at, amount_cents,
                payee, memo, external_id, source, category_id, is_cleared, import_meta_json
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(idempotency_key) DO UPDATE SET
                category_id = COALESCE(excluded.category_id, transactions.category_id),
                is_cleared = excluded.is_cleared,
                payee = excluded.payee,
                memo = excluded.memo,
                import_meta_json = excluded.import_meta_json",
            params![
                txn.idempotency_key,
                txn.account_id,
                txn.posted_at,
                txn.amount_cents,
                txn.payee,
                txn.memo,
                txn.external_id,
                txn.source,
                txn.category_id,
                txn.is_cleared as i64,
                txn.import_meta_json,
            ],
        )?;
        Ok(())
    }

    pub fn get_transaction(&self, idempotency_key: &str) -> AppResult<Option<DbTransaction>> {
        let row = self
            .conn_ref()
            .query_row(
                "SELECT idempotency_key, account_id, posted_at, amount_cents, payee, memo,
                        external_id, source, category_id, is_cleared, import_meta_json
                 FROM transactions WHERE idempotency_key = ?1",
                params![idempotency_key],
                Self::map_transaction_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn count_transactions(&self) -> AppResult<i64> {
        let n = self
            .conn_ref()
            .query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;
        Ok(n)
    }

    /// Sum of cleared amounts for one account with `posted_at <= as_of`.
    pub fn cleared_sum_through(&self, account_id: i64, as_of: NaiveDate) -> AppResult<i64> {
        let total = self.conn_ref().query_row(
            "SELECT COALESCE(SUM(amount_cents), 0) FROM transactions
             WHERE account_id = ?1 AND is_cleared = 1 AND DATE(posted_at) <= ?2",
            params![account_id, as_of.to_string()],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    /// Sum of cleared amounts for one account on the half-open day window
    /// `(after, through]`.
    pub fn cleared_sum_between(
        &self,
        account_id: i64,
        after: NaiveDate,
        through: NaiveDate,
    ) -> AppResult<i64> {
        let total = self.conn_ref().query_row(
            "SELECT COALESCE(SUM(amount_cents), 0) FROM transactions
             WHERE account_id = ?1 AND is_cleared = 1
               AND DATE(posted_at) > ?2 AND DATE(posted_at) <= ?3",
            params![account_id, after.to_string(), through.to_string()],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    /// Cleared daily net sums across active accounts within `[start, end]`,
    /// with the contributing idempotency keys. Used by the questionnaire's
    /// min-buffer computation.
    pub fn cleared_daily_sums(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> AppResult<Vec<(NaiveDate, i64, Vec<String>)>> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT DATE(t.posted_at) AS d,
                    COALESCE(SUM(t.amount_cents), 0) AS s,
                    GROUP_CONCAT(t.idempotency_key) AS evid
             FROM transactions t
             JOIN accounts a ON a.id = t.account_id
             WHERE a.is_active = 1 AND t.is_cleared = 1
               AND DATE(t.posted_at) BETWEEN ?1 AND ?2
             GROUP BY DATE(t.posted_at)
             ORDER BY DATE(t.posted_at) ASC",
        )?;
        let rows = stmt.query_map(params![start.to_string(), end.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (d, s, evid) = row?;
            let Ok(day) = d.parse::<NaiveDate>() else {
                continue;
            };
            let ids = evid
                .map(|joined| joined.split(',').map(str::to_string).collect())
                .unwrap_or_default();
            out.push((day, s, ids));
        }
        Ok(out)
    }

    /// Transactions posted within `[start, end]`, optionally filtered by
    /// category, ordered by date then key for stable pagination.
    pub fn transactions_in_window(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        category_id: Option<i64>,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<DbTransaction>> {
        const COLUMNS: &str =
            "idempotency_key, account_id, posted_at, amount_cents, payee, memo,
             external_id, source, category_id, is_cleared, import_meta_json";
        let mut out = Vec::new();
        match category_id {
            Some(cat) => {
                let mut stmt = self.conn_ref().prepare(&format!(
                    "SELECT {COLUMNS} FROM transactions
                     WHERE DATE(posted_at) BETWEEN ?1 AND ?2 AND category_id = ?3
                     ORDER BY DATE(posted_at) ASC, idempotency_key ASC LIMIT ?4 OFFSET ?5"
                ))?;
                let rows = stmt.query_map(
                    params![start.to_string(), end.to_string(), cat, limit, offset],
                    Self::map_transaction_row,
                )?;
                for row in rows {
                    out.push(row?);
                }
            }
            None => {
                let mut stmt = self.conn_ref().prepare(&format!(
                    "SELECT {COLUMNS} FROM transactions
                     WHERE DATE(posted_at) BETWEEN ?1 AND ?2
                     ORDER BY DATE(posted_at) ASC, idempotency_key ASC LIMIT ?3 OFFSET ?4"
                ))?;
                let rows = stmt.query_map(
                    params![start.to_string(), end.to_string(), limit, offset],
                    Self::map_transaction_row,
                )?;
                for row in rows {
                    out.push(row?);
                }
            }
        }
        Ok(out)
    }

    pub fn count_transactions_in_window(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        category_id: Option<i64>,
    ) -> AppResult<i64> {
        let n = match category_id {
            Some(cat) => self.conn_ref().query_row(
                "SELECT COUNT(*) FROM transactions
                 WHERE DATE(posted_at) BETWEEN ?1 AND ?2 AND category_id = ?3",
                params![start.to_string(), end.to_string(), cat],
                |row| row.get(0),
            )?,
            None => self.conn_ref().query_row(
                "SELECT COUNT(*) FROM transactions
                 WHERE DATE(posted_at) BETWEEN ?1 AND ?2",
                params![start.to_string(), end.to_string()],
                |row| row.get(0),
            )?,
        };
        Ok(n)
    }

    fn map_transaction_row(row: &rusqlite::Row) -> rusqlite::Result<DbTransaction> {
        Ok(DbTransaction {
            idempotency_key: row.get(0)?,
            account_id: row.get(1)?,
            posted_at: row.get(2)?,
            amount_cents: row.get(3)?,
            payee: row.get(4)?,
            memo: row.get(5)?,
            external_id: row.get(6)?,
            source: row.get(7)?,
            category_id: row.get(8)?,
            is_cleared: row.get::<_, i64>(9)? == 1,
            import_meta_json: row.get(10)?,
        })
    }
}
