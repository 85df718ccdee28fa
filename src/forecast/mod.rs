//! Deterministic calendar forecast: opening balance + expanded entries →
//! dated balance trajectory with derived risk values.

pub mod anchor;
pub mod blended;
pub mod calendar;
pub mod engine;
pub mod rules;
pub mod simulate;

use std::collections::BTreeMap;

use chrono::{Days, NaiveDate};
use serde::Serialize;

use crate::db::BudgetDb;
use crate::error::AppResult;

pub use calendar::{Entry, EntryKind};

/// A fully computed forecast over `[start, end]`.
#[derive(Debug, Clone, Serialize)]
pub struct Forecast {
    pub horizon_start: NaiveDate,
    pub horizon_end: NaiveDate,
    pub opening_balance_cents: i64,
    pub entries: Vec<Entry>,
    pub balances: BTreeMap<NaiveDate, i64>,
    pub min_balance_cents: Option<i64>,
    pub min_balance_date: Option<NaiveDate>,
}

impl Forecast {
    /// Compute the forecast for `[start, end]` over `accounts` (empty =
    /// all active accounts). Pure over the store state it reads: the same
    /// state and arguments always produce the same value.
    pub fn compute(
        db: &BudgetDb,
        start: NaiveDate,
        end: NaiveDate,
        accounts: &[i64],
    ) -> AppResult<Self> {
        // Opening balance closes the day before the horizon begins
        let opening_as_of = start - Days::new(1);
        let opening = anchor::opening_balance(db, opening_as_of, accounts)?;
        let entries = calendar::expand_calendar(db, start, end)?;
        let balances = engine::compute_balances(opening, &entries);
        let (min_balance_date, min_balance_cents) = match engine::min_balance(&balances) {
            Some((d, b)) => (Some(d), Some(b)),
            None => (None, None),
        };
        Ok(Self {
            horizon_start: start,
            horizon_end: end,
            opening_balance_cents: opening,
            entries,
            balances,
            min_balance_cents,
            min_balance_date,
        })
    }

    /// End-of-day balance carried into `date`.
    pub fn balance_on(&self, date: NaiveDate) -> i64 {
        engine::balance_on(&self.balances, self.opening_balance_cents, date)
    }

    /// First date at or after `from` at or below the floor.
    pub fn next_cliff(&self, from: NaiveDate, buffer_floor_cents: i64) -> Option<NaiveDate> {
        engine::next_cliff_date(&self.balances, from, buffer_floor_cents)
    }

    /// Largest spend on `today` that keeps the horizon minimum at or above
    /// the floor.
    pub fn safe_to_spend(&self, today: NaiveDate, buffer_floor_cents: i64) -> i64 {
        simulate::simulate_spend(
            self.opening_balance_cents,
            &self.entries,
            self.horizon_start,
            today,
            0,
            buffer_floor_cents,
        )
        .max_safe_today_cents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;
    use crate::db::DbAnchor;

    fn d(s: &str) -> NaiveDate {
        s.parse().expect("valid date")
    }

    #[test]
    fn test_weekend_shift_scenario() {
        // Anchor 200000 on 2025-01-01; Rent 120000 monthly on the 4th with
        // PREV_BUSINESS_DAY lands on Friday the 3rd.
        let db = test_db();
        let acct = db.ensure_account("Checking", "depository", "USD").expect("acct");
        db.upsert_anchor(&DbAnchor {
            account_id: acct,
            anchor_date: "2025-01-01".into(),
            anchor_balance_cents: 200_000,
            min_floor_cents: None,
        })
        .expect("anchor");
        db.conn_ref()
            .execute(
                "INSERT INTO commitments (name, amount_cents, due_rule, next_due_date, account_id, type)
                 VALUES ('Rent', 120000, 'MONTHLY', '2025-01-04', ?1, 'bill')",
                rusqlite::params![acct],
            )
            .expect("commitment");

        let forecast =
            Forecast::compute(&db, d("2025-01-01"), d("2025-01-10"), &[acct]).expect("forecast");

        assert_eq!(forecast.opening_balance_cents, 200_000);
        assert_eq!(forecast.entries.len(), 1);
        assert_eq!(forecast.entries[0].date, d("2025-01-03"));
        assert_eq!(forecast.balances[&d("2025-01-03")], 80_000);
        assert_eq!(forecast.min_balance_cents, Some(80_000));
        assert_eq!(forecast.min_balance_date, Some(d("2025-01-03")));
    }

    #[test]
    fn test_forecast_is_deterministic() {
        let db = test_db();
        let acct = db.ensure_account("Checking", "depository", "USD").expect("acct");
        db.conn_ref()
            .execute(
                "INSERT INTO scheduled_inflows (name, amount_cents, due_rule, next_due_date, account_id, type)
                 VALUES ('Payday', 100000, 'WEEKLY', '2025-01-03', ?1, 'payroll')",
                rusqlite::params![acct],
            )
            .expect("inflow");

        let a = Forecast::compute(&db, d("2025-01-01"), d("2025-02-28"), &[]).expect("a");
        let b = Forecast::compute(&db, d("2025-01-01"), d("2025-02-28"), &[]).expect("b");
        assert_eq!(
            serde_json::to_string(&a).expect("json"),
            serde_json::to_string(&b).expect("json"),
            "byte-identical output for identical store state"
        );
    }

    #[test]
    fn test_balance_identity_over_horizon() {
        let db = test_db();
        let acct = db.ensure_account("Checking", "depository", "USD").expect("acct");
        db.conn_ref()
            .execute_batch(
                "INSERT INTO scheduled_inflows (name, amount_cents, due_rule, next_due_date, account_id, type)
                 VALUES ('Payday', 100000, 'WEEKLY', '2025-01-03', 1, 'payroll');
                 INSERT INTO commitments (name, amount_cents, due_rule, next_due_date, account_id, type)
                 VALUES ('Rent', 120000, 'MONTHLY', '2025-01-04', 1, 'bill');",
            )
            .expect("seed");
        let _ = acct;

        let f = Forecast::compute(&db, d("2025-01-01"), d("2025-03-31"), &[]).expect("forecast");
        let total: i64 = f.entries.iter().map(|e| e.amount_cents).sum();
        assert_eq!(
            f.balance_on(d("2025-03-31")),
            f.opening_balance_cents + total
        );
    }

    #[test]
    fn test_empty_store_forecast() {
        let db = test_db();
        let f = Forecast::compute(&db, d("2025-01-01"), d("2025-01-31"), &[]).expect("forecast");
        assert_eq!(f.opening_balance_cents, 0);
        assert!(f.entries.is_empty());
        assert!(f.balances.is_empty());
        assert_eq!(f.min_balance_cents, None);
        assert_eq!(f.safe_to_spend(d("2025-01-01"), 0), 0);
    }
}
