//! Account and anchor queries.

use rusqlite::{params, OptionalExtension};

use super::{BudgetDb, DbAccount, DbAnchor};
use crate::error::{AppError, AppResult};

impl BudgetDb {
    /// Find an account by (name, type, currency), creating it on first
    /// sight. Accounts are never deleted, only deactivated.
    pub fn ensure_account(&self, name: &str, kind: &str, currency: &str) -> AppResult<i64> {
        let existing: Option<i64> = self
            .conn_ref()
            .query_row(
                "SELECT id FROM accounts WHERE name = ?1 AND type = ?2 AND currency = ?3",
                params![name, kind, currency],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }
        self.conn_ref().execute(
            "INSERT INTO accounts (name, type, currency, is_active) VALUES (?1, ?2, ?3, 1)",
            params![name, kind, currency],
        )?;
        Ok(self.conn_ref().last_insert_rowid())
    }

    pub fn get_account(&self, id: i64) -> AppResult<Option<DbAccount>> {
        let row = self
            .conn_ref()
            .query_row(
                "SELECT id, name, type, currency, is_active FROM accounts WHERE id = ?1",
                params![id],
                |row| {
                    Ok(DbAccount {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        kind: row.get(2)?,
                        currency: row.get(3)?,
                        is_active: row.get::<_, i64>(4)? == 1,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// All accounts, active first, then by name.
    pub fn get_all_accounts(&self) -> AppResult<Vec<DbAccount>> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT id, name, type, currency, is_active
             FROM accounts
             ORDER BY is_active DESC, name ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(DbAccount {
                id: row.get(0)?,
                name: row.get(1)?,
                kind: row.get(2)?,
                currency: row.get(3)?,
                is_active: row.get::<_, i64>(4)? == 1,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Ids of active accounts, the default account set for forecasts.
    pub fn active_account_ids(&self) -> AppResult<Vec<i64>> {
        let mut stmt = self
            .conn_ref()
            .prepare("SELECT id FROM accounts WHERE is_active = 1 ORDER BY id")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Upsert the operator-declared ground-truth anchor for an account.
    /// The account must exist.
    pub fn upsert_anchor(&self, anchor: &DbAnchor) -> AppResult<()> {
        if self.get_account(anchor.account_id)?.is_none() {
            return Err(AppError::NotFound(format!(
                "account {}",
                anchor.account_id
            )));
        }
        self.conn_ref()
            .execute(
                "INSERT INTO account_anchor (account_id, anchor_date, anchor_balance_cents, min_floor_cents)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(account_id) DO UPDATE SET
                    anchor_date = excluded.anchor_date,
                    anchor_balance_cents = excluded.anchor_balance_cents,
                    min_floor_cents = excluded.min_floor_cents",
                params![
                    anchor.account_id,
                    anchor.anchor_date,
                    anchor.anchor_balance_cents,
                    anchor.min_floor_cents
                ],
            )
            .map_err(|e| Self::integrity("upsert anchor", e))?;
        Ok(())
    }

    pub fn get_anchor(&self, account_id: i64) -> AppResult<Option<DbAnchor>> {
        let row = self
            .conn_ref()
            .query_row(
                "SELECT account_id, anchor_date, anchor_balance_cents, min_floor_cents
                 FROM account_anchor WHERE account_id = ?1",
                params![account_id],
                |row| {
                    Ok(DbAnchor {
                        account_id: row.get(0)?,
                        anchor_date: row.get(1)?,
                        anchor_balance_cents: row.get(2)?,
                        min_floor_cents: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn get_all_anchors(&self) -> AppResult<Vec<DbAnchor>> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT account_id, anchor_date, anchor_balance_cents, min_floor_cents
             FROM account_anchor ORDER BY account_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(DbAnchor {
                account_id: row.get(0)?,
                anchor_date: row.get(1)?,
                anchor_balance_cents: row.get(2)?,
                min_floor_cents: row.get(3)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}
