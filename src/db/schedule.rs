//! Commitments, scheduled inflows and key spend events: the calendar
//! sources the expander materializes.

use rusqlite::{params, OptionalExtension};

use super::{BudgetDb, DbCommitment, DbKeyEvent, DbScheduledInflow};
use crate::error::{AppError, AppResult};

impl BudgetDb {
    pub fn get_all_commitments(&self) -> AppResult<Vec<DbCommitment>> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT id, name, amount_cents, due_rule, next_due_date, priority,
                    account_id, flexible_window_days, category_id, type, shift_policy
             FROM commitments ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(DbCommitment {
                id: row.get(0)?,
                name: row.get(1)?,
                amount_cents: row.get(2)?,
                due_rule: row.get(3)?,
                next_due_date: row.get(4)?,
                priority: row.get(5)?,
                account_id: row.get(6)?,
                flexible_window_days: row.get(7)?,
                category_id: row.get(8)?,
                kind: row.get(9)?,
                shift_policy: row.get(10)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Commitments whose type marks a loan-like obligation.
    pub fn loan_commitments(&self) -> AppResult<Vec<DbCommitment>> {
        Ok(self
            .get_all_commitments()?
            .into_iter()
            .filter(|c| {
                matches!(c.kind.to_lowercase().as_str(), "loan" | "debt" | "credit")
            })
            .collect())
    }

    pub fn get_all_scheduled_inflows(&self) -> AppResult<Vec<DbScheduledInflow>> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT id, name, amount_cents, due_rule, next_due_date, account_id, type
             FROM scheduled_inflows ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(DbScheduledInflow {
                id: row.get(0)?,
                name: row.get(1)?,
                amount_cents: row.get(2)?,
                due_rule: row.get(3)?,
                next_due_date: row.get(4)?,
                account_id: row.get(5)?,
                kind: row.get(6)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn get_all_key_events(&self) -> AppResult<Vec<DbKeyEvent>> {
        self.key_events_filtered(None, None)
    }

    /// Key events with optional inclusive date bounds on `event_date`.
    pub fn key_events_filtered(
        &self,
        from: Option<&str>,
        to: Option<&str>,
    ) -> AppResult<Vec<DbKeyEvent>> {
        let mut sql = String::from(
            "SELECT id, name, event_date, repeat_rule, planned_amount_cents,
                    category_id, lead_time_days, shift_policy, account_id
             FROM key_spend_events",
        );
        let mut clauses = Vec::new();
        let mut bind: Vec<String> = Vec::new();
        if let Some(f) = from {
            clauses.push(format!("DATE(event_date) >= ?{}", bind.len() + 1));
            bind.push(f.to_string());
        }
        if let Some(t) = to {
            clauses.push(format!("DATE(event_date) <= ?{}", bind.len() + 1));
            bind.push(t.to_string());
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY DATE(event_date) ASC, id ASC");

        let mut stmt = self.conn_ref().prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(bind.iter()), Self::map_key_event)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn get_key_event(&self, id: i64) -> AppResult<Option<DbKeyEvent>> {
        let row = self
            .conn_ref()
            .query_row(
                "SELECT id, name, event_date, repeat_rule, planned_amount_cents,
                        category_id, lead_time_days, shift_policy, account_id
                 FROM key_spend_events WHERE id = ?1",
                params![id],
                Self::map_key_event,
            )
            .optional()?;
        Ok(row)
    }

    /// Insert a new key event or update an existing one by id.
    /// Returns the event id.
    pub fn upsert_key_event(&self, id: Option<i64>, event: &DbKeyEvent) -> AppResult<i64> {
        match id {
            Some(existing) => {
                let changed = self.conn_ref().execute(
                    "UPDATE key_spend_events
                     SET name = ?1, event_date = ?2, repeat_rule = ?3,
                         planned_amount_cents = ?4, category_id = ?5,
                         lead_time_days = ?6, shift_policy = ?7, account_id = ?8
                     WHERE id = ?9",
                    params![
                        event.name,
                        event.event_date,
                        event.repeat_rule,
                        event.planned_amount_cents,
                        event.category_id,
                        event.lead_time_days,
                        event.shift_policy,
                        event.account_id,
                        existing,
                    ],
                )?;
                if changed == 0 {
                    return Err(AppError::NotFound(format!("key event {existing}")));
                }
                Ok(existing)
            }
            None => {
                self.conn_ref().execute(
                    "INSERT INTO key_spend_events
                        (name, event_date, repeat_rule, planned_amount_cents,
                         category_id, lead_time_days, shift_policy, account_id)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        event.name,
                        event.event_date,
                        event.repeat_rule,
                        event.planned_amount_cents,
                        event.category_id,
                        event.lead_time_days,
                        event.shift_policy,
                        event.account_id,
                    ],
                )?;
                Ok(self.conn_ref().last_insert_rowid())
            }
        }
    }

    pub fn delete_key_event(&self, id: i64) -> AppResult<()> {
        let changed = self
            .conn_ref()
            .execute("DELETE FROM key_spend_events WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(AppError::NotFound(format!("key event {id}")));
        }
        Ok(())
    }

    fn map_key_event(row: &rusqlite::Row) -> rusqlite::Result<DbKeyEvent> {
        Ok(DbKeyEvent {
            id: row.get(0)?,
            name: row.get(1)?,
            event_date: row.get(2)?,
            repeat_rule: row.get(3)?,
            planned_amount_cents: row.get(4)?,
            category_id: row.get(5)?,
            lead_time_days: row.get(6)?,
            shift_policy: row.get(7)?,
            account_id: row.get(8)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::test_db;
    use super::*;

    fn sample_event(name: &str, date: &str) -> DbKeyEvent {
        DbKeyEvent {
            id: 0,
            name: name.to_string(),
            event_date: date.to_string(),
            repeat_rule: None,
            planned_amount_cents: Some(5_000),
            category_id: None,
            lead_time_days: Some(14),
            shift_policy: None,
            account_id: None,
        }
    }

    #[test]
    fn test_key_event_crud() {
        let db = test_db();
        let id = db
            .upsert_key_event(None, &sample_event("Birthday", "2025-03-10"))
            .expect("insert");

        let mut updated = sample_event("Birthday Dinner", "2025-03-11");
        updated.planned_amount_cents = Some(8_000);
        let same = db.upsert_key_event(Some(id), &updated).expect("update");
        assert_eq!(id, same);

        let stored = db.get_key_event(id).expect("get").expect("present");
        assert_eq!(stored.name, "Birthday Dinner");
        assert_eq!(stored.planned_amount_cents, Some(8_000));

        db.delete_key_event(id).expect("delete");
        assert!(db.get_key_event(id).expect("get").is_none());
        assert!(matches!(
            db.delete_key_event(id),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_update_missing_event_is_not_found() {
        let db = test_db();
        let err = db
            .upsert_key_event(Some(99), &sample_event("X", "2025-01-01"))
            .expect_err("missing id");
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_key_events_window_filter_and_order() {
        let db = test_db();
        db.upsert_key_event(None, &sample_event("C", "2025-03-01")).unwrap();
        db.upsert_key_event(None, &sample_event("A", "2025-01-01")).unwrap();
        db.upsert_key_event(None, &sample_event("B", "2025-02-01")).unwrap();

        let all = db.get_all_key_events().expect("all");
        assert_eq!(
            all.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(),
            vec!["A", "B", "C"],
            "ordered by event_date"
        );

        let windowed = db
            .key_events_filtered(Some("2025-01-15"), Some("2025-02-15"))
            .expect("window");
        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].name, "B");
    }

    #[test]
    fn test_loan_commitments_filter() {
        let db = test_db();
        db.conn_ref()
            .execute_batch(
                "INSERT INTO commitments (name, amount_cents, due_rule, next_due_date, account_id, type)
                 VALUES ('Car Loan', 30000, 'MONTHLY', '2025-01-15', 1, 'loan');
                 INSERT INTO commitments (name, amount_cents, due_rule, next_due_date, account_id, type)
                 VALUES ('Rent', 120000, 'MONTHLY', '2025-01-04', 1, 'bill');",
            )
            .expect("seed");
        let loans = db.loan_commitments().expect("loans");
        assert_eq!(loans.len(), 1);
        assert_eq!(loans[0].name, "Car Loan");
    }
}
