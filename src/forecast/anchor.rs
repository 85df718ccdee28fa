//! Opening-balance resolution from operator anchors and cleared history.
//!
//! `opening_balance` is a pure function of stored transactions and anchors:
//! no wall clock, no mutation.

use chrono::NaiveDate;

use crate::db::BudgetDb;
use crate::error::AppResult;

/// Opening balance for `as_of` across `accounts` (empty slice = all active).
///
/// Per account:
/// - with an anchor at `d0` holding `B0`:
///   `as_of >= d0` → `B0 + Σ cleared in (d0, as_of]`
///   `as_of <  d0` → `B0 - Σ cleared in (as_of, d0]`
/// - without an anchor: `Σ cleared with posted_at <= as_of`
pub fn opening_balance(db: &BudgetDb, as_of: NaiveDate, accounts: &[i64]) -> AppResult<i64> {
    let ids = if accounts.is_empty() {
        db.active_account_ids()?
    } else {
        accounts.to_vec()
    };

    let mut total = 0i64;
    for account_id in ids {
        total += opening_balance_for_account(db, as_of, account_id)?;
    }
    Ok(total)
}

fn opening_balance_for_account(db: &BudgetDb, as_of: NaiveDate, account_id: i64) -> AppResult<i64> {
    let Some(anchor) = db.get_anchor(account_id)? else {
        return db.cleared_sum_through(account_id, as_of);
    };

    let anchor_date: NaiveDate = anchor
        .anchor_date
        .parse()
        .map_err(|_| crate::error::AppError::Integrity(format!(
            "account {account_id} anchor date is not a calendar day"
        )))?;

    if as_of >= anchor_date {
        let delta = db.cleared_sum_between(account_id, anchor_date, as_of)?;
        Ok(anchor.anchor_balance_cents + delta)
    } else {
        let delta = db.cleared_sum_between(account_id, as_of, anchor_date)?;
        Ok(anchor.anchor_balance_cents - delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;
    use crate::db::{DbAnchor, DbTransaction};

    fn d(s: &str) -> NaiveDate {
        s.parse().expect("valid date")
    }

    fn cleared_txn(db: &BudgetDb, key: &str, account: i64, posted: &str, amount: i64) {
        db.upsert_transaction(&DbTransaction {
            idempotency_key: key.to_string(),
            account_id: account,
            posted_at: format!("{posted}T00:00:00Z"),
            amount_cents: amount,
            payee: None,
            memo: None,
            external_id: None,
            source: "test".into(),
            category_id: None,
            is_cleared: true,
            import_meta_json: None,
        })
        .expect("txn");
    }

    fn anchored_account(db: &BudgetDb, name: &str, date: &str, balance: i64) -> i64 {
        let id = db.ensure_account(name, "depository", "USD").expect("account");
        db.upsert_anchor(&DbAnchor {
            account_id: id,
            anchor_date: date.into(),
            anchor_balance_cents: balance,
            min_floor_cents: None,
        })
        .expect("anchor");
        id
    }

    #[test]
    fn test_anchor_date_is_exact() {
        let db = test_db();
        let acct = anchored_account(&db, "Checking", "2025-01-15", 123_456);
        // Transactions on the anchor day itself are baked into the anchor
        cleared_txn(&db, "t0", acct, "2025-01-15", -99_999);
        assert_eq!(
            opening_balance(&db, d("2025-01-15"), &[acct]).expect("opening"),
            123_456
        );
    }

    #[test]
    fn test_forward_of_anchor_adds_cleared() {
        let db = test_db();
        let acct = anchored_account(&db, "Checking", "2025-01-01", 200_000);
        cleared_txn(&db, "t1", acct, "2025-01-05", -30_000);
        cleared_txn(&db, "t2", acct, "2025-01-09", 10_000);
        // Uncleared rows never count
        db.upsert_transaction(&DbTransaction {
            idempotency_key: "t3".into(),
            account_id: acct,
            posted_at: "2025-01-06T00:00:00Z".into(),
            amount_cents: -500_000,
            payee: None,
            memo: None,
            external_id: None,
            source: "test".into(),
            category_id: None,
            is_cleared: false,
            import_meta_json: None,
        })
        .expect("uncleared");

        assert_eq!(
            opening_balance(&db, d("2025-01-10"), &[acct]).expect("opening"),
            180_000
        );
    }

    #[test]
    fn test_before_anchor_subtracts_cleared() {
        let db = test_db();
        let acct = anchored_account(&db, "Checking", "2025-01-10", 100_000);
        cleared_txn(&db, "t1", acct, "2025-01-08", -25_000);
        // Balance on the 5th must undo the later debit: 100000 - (-25000)
        assert_eq!(
            opening_balance(&db, d("2025-01-05"), &[acct]).expect("opening"),
            125_000
        );
    }

    #[test]
    fn test_unanchored_account_sums_history() {
        let db = test_db();
        let acct = db.ensure_account("Wallet", "cash", "USD").expect("account");
        cleared_txn(&db, "t1", acct, "2024-12-31", 10_000);
        cleared_txn(&db, "t2", acct, "2025-01-02", -4_000);
        assert_eq!(
            opening_balance(&db, d("2025-01-01"), &[acct]).expect("opening"),
            10_000
        );
        assert_eq!(
            opening_balance(&db, d("2025-01-31"), &[acct]).expect("opening"),
            6_000
        );
    }

    #[test]
    fn test_empty_set_uses_active_accounts() {
        let db = test_db();
        let a = anchored_account(&db, "Checking", "2025-01-01", 50_000);
        let b = db.ensure_account("Savings", "depository", "USD").expect("b");
        cleared_txn(&db, "t1", b, "2025-01-01", 25_000);
        let _ = a;
        assert_eq!(
            opening_balance(&db, d("2025-01-02"), &[]).expect("opening"),
            75_000
        );
    }
}
