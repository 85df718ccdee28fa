//! Pre-defined questionnaire packs: deterministic compositions of the
//! primitive queries, each item carrying its method and evidence ids.

use chrono::{Datelike, Days, NaiveDate};
use serde::Serialize;

use crate::db::BudgetDb;
use crate::error::{AppError, AppResult};
use crate::forecast::anchor;
use crate::q::{months_between, parse_period_token, queries, Period, QueryValue};

/// Days of cleared history behind the affordability pack's min-buffer item.
const MIN_BUFFER_LOOKBACK_DAYS: u64 = 60;

#[derive(Debug, Clone, Serialize)]
pub struct PackSection {
    pub id: String,
    pub title: String,
    pub items: Vec<QueryValue>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Pack {
    pub pack: String,
    pub period: String,
    pub sections: Vec<PackSection>,
}

fn section(id: &str, title: &str, items: Vec<QueryValue>) -> PackSection {
    PackSection {
        id: id.to_string(),
        title: title.to_string(),
        items,
    }
}

/// Assemble a pack by name. Unknown names are a NotFound.
pub fn assemble_pack(
    db: &BudgetDb,
    pack: &str,
    period: Option<&str>,
    today: NaiveDate,
) -> AppResult<Pack> {
    let key = pack.trim().to_lowercase().replace(' ', "-").replace('-', "_");
    match key.as_str() {
        "loan" | "loan_basics" | "loan_application_basics" => {
            loan_application_basics(db, today)
        }
        "affordability" | "affordability_snapshot" => {
            affordability_snapshot(db, period, today)
        }
        other => Err(AppError::NotFound(format!("pack {other}"))),
    }
}

/// Lender basics: income, loans, household cost averages and subscriptions
/// over the last three full months (the period is fixed for this pack so
/// lenders always see complete months).
fn loan_application_basics(db: &BudgetDb, today: NaiveDate) -> AppResult<Pack> {
    let period = parse_period_token(Some("3m_full"), today);
    let avg = |alias: &str| -> AppResult<QueryValue> {
        queries::monthly_average_by_category(db, &period, Some(alias), None)
    };

    let income = queries::income_summary(db, &period)?;
    let loans = queries::active_loans(db, &period)?;
    let housing = avg("housing")?;
    let utilities = avg("utilities")?;
    let childcare = avg("childcare")?;
    let transport = avg("transport")?;
    let discretionary = avg("discretionary")?;
    let subscriptions = queries::subscription_commitments(db, &period)?;

    Ok(Pack {
        pack: "loan_application_basics".to_string(),
        period: period.token.clone(),
        sections: vec![
            section("income", "Income (last 3 full months)", vec![income]),
            section("active_loans", "Active Loans", vec![loans]),
            section("housing_cost", "Housing Cost (avg 3m)", vec![housing]),
            section("utilities", "Utilities (avg 3m)", vec![utilities]),
            section("childcare", "Childcare (avg 3m)", vec![childcare]),
            section("transport", "Transport (avg 3m)", vec![transport]),
            section("subscriptions", "Subscriptions (monthly total)", vec![subscriptions]),
            section("discretionary", "Discretionary (avg 3m)", vec![discretionary]),
        ],
    })
}

/// Affordability snapshot: net income vs fixed costs, monthly volatility,
/// and the minimum cleared balance over the last 60 days.
fn affordability_snapshot(
    db: &BudgetDb,
    period_token: Option<&str>,
    today: NaiveDate,
) -> AppResult<Pack> {
    let period = parse_period_token(period_token, today);

    let income = queries::income_summary(db, &period)?;
    let fixed = queries::household_fixed_costs(db, &period)?;
    let net_after_fixed = income.value_cents + fixed.value_cents;
    let mut net_item = QueryValue::new(
        net_after_fixed,
        &period,
        "sum(income, fixed_costs)",
        income
            .evidence_ids
            .iter()
            .chain(fixed.evidence_ids.iter())
            .cloned()
            .collect(),
    );
    net_item.label = Some("net_after_fixed_cents".to_string());

    let volatility = monthly_volatility(db, &period)?;
    let min_buffer = min_cleared_balance(db, today, MIN_BUFFER_LOOKBACK_DAYS)?;

    Ok(Pack {
        pack: "affordability_snapshot".to_string(),
        period: period.token.clone(),
        sections: vec![
            section(
                "net_vs_fixed",
                "Net Income vs Fixed Costs",
                vec![income, fixed, net_item],
            ),
            section("volatility", "Monthly Volatility (std dev)", vec![volatility]),
            section(
                "min_buffer",
                "Min Cleared Balance (last 60 days)",
                vec![min_buffer],
            ),
        ],
    })
}

/// Sample standard deviation across per-month absolute expense totals.
fn monthly_volatility(db: &BudgetDb, period: &Period) -> AppResult<QueryValue> {
    let months = months_between(period.start, period.end).max(1);
    let mut totals: Vec<i64> = Vec::with_capacity(months as usize);
    let mut evidence: Vec<String> = Vec::new();

    let mut cursor = period.start;
    while cursor <= period.end {
        let first_of_month =
            NaiveDate::from_ymd_opt(cursor.year(), cursor.month(), 1).unwrap_or(cursor);
        let next_month = crate::forecast::rules::add_months(first_of_month, 1);
        let month_end = (next_month.pred_opt().unwrap_or(cursor)).min(period.end);
        let month_period = Period {
            start: cursor,
            end: month_end,
            token: period.token.clone(),
        };
        let total = queries::monthly_total_by_category(db, &month_period, None, None)?;
        totals.push(total.value_cents.abs());
        evidence.extend(total.evidence_ids);
        cursor = next_month;
    }

    let stddev = sample_stddev(&totals).round() as i64;
    Ok(QueryValue::new(
        stddev,
        period,
        "stddev_monthly_expense_totals",
        evidence,
    ))
}

fn sample_stddev(values: &[i64]) -> f64 {
    let n = values.len();
    if n <= 1 {
        return 0.0;
    }
    let mean = values.iter().sum::<i64>() as f64 / n as f64;
    let variance = values
        .iter()
        .map(|v| {
            let diff = *v as f64 - mean;
            diff * diff
        })
        .sum::<f64>()
        / (n as f64 - 1.0);
    variance.sqrt()
}

/// Minimum cleared balance across the trailing window, walked day by day
/// from the opening balance the day before the window starts.
fn min_cleared_balance(db: &BudgetDb, today: NaiveDate, days: u64) -> AppResult<QueryValue> {
    let start = today - Days::new(days.saturating_sub(1));
    let opening = anchor::opening_balance(db, start - Days::new(1), &[])?;
    let daily = db.cleared_daily_sums(start, today)?;

    let mut evidence: Vec<String> = Vec::new();
    let mut by_day = std::collections::BTreeMap::new();
    for (day, sum, ids) in daily {
        by_day.insert(day, sum);
        evidence.extend(ids);
    }

    // Minimum end-of-day balance across the window itself
    let mut balance = opening;
    let mut min_balance: Option<i64> = None;
    let mut day = start;
    while day <= today {
        balance += by_day.get(&day).copied().unwrap_or(0);
        min_balance = Some(min_balance.map_or(balance, |m| m.min(balance)));
        day = day + Days::new(1);
    }
    let min_balance = min_balance.unwrap_or(opening);

    let period = Period {
        start,
        end: today,
        token: format!("{days}d"),
    };
    Ok(QueryValue::new(
        min_balance,
        &period,
        format!("min_cleared_balance_from_transactions_last_{days}_days"),
        evidence,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;
    use crate::db::DbTransaction;

    fn d(s: &str) -> NaiveDate {
        s.parse().expect("valid date")
    }

    fn txn(db: &BudgetDb, key: &str, posted: &str, amount: i64, payee: &str) {
        db.upsert_transaction(&DbTransaction {
            idempotency_key: key.into(),
            account_id: 1,
            posted_at: format!("{posted}T00:00:00Z"),
            amount_cents: amount,
            payee: Some(payee.to_string()),
            memo: None,
            external_id: None,
            source: "test".into(),
            category_id: None,
            is_cleared: true,
            import_meta_json: None,
        })
        .expect("txn");
    }

    fn seeded_db() -> BudgetDb {
        let db = test_db();
        db.ensure_account("Checking", "depository", "USD").expect("acct");
        txn(&db, "inc1", "2025-03-25", 300_000, "Employer");
        txn(&db, "inc2", "2025-04-25", 300_000, "Employer");
        txn(&db, "inc3", "2025-05-25", 300_000, "Employer");
        txn(&db, "e1", "2025-03-10", -50_000, "Grocer");
        txn(&db, "e2", "2025-04-10", -80_000, "Grocer");
        txn(&db, "e3", "2025-05-10", -20_000, "Grocer");
        db.conn_ref()
            .execute(
                "INSERT INTO commitments (name, amount_cents, due_rule, next_due_date, account_id, type)
                 VALUES ('Rent', 120000, 'MONTHLY', '2025-06-04', 1, 'rent')",
                [],
            )
            .expect("commitment");
        db
    }

    #[test]
    fn test_affordability_snapshot_sections() {
        let db = seeded_db();
        let pack = assemble_pack(&db, "affordability_snapshot", None, d("2025-06-15"))
            .expect("pack");
        assert_eq!(pack.pack, "affordability_snapshot");
        assert_eq!(pack.period, "3m_full");
        assert_eq!(pack.sections.len(), 3);

        let net = &pack.sections[0];
        assert_eq!(net.items.len(), 3);
        assert_eq!(net.items[0].value_cents, 900_000, "income");
        assert_eq!(net.items[1].value_cents, -120_000, "fixed costs");
        assert_eq!(net.items[2].value_cents, 780_000, "net after fixed");
        assert_eq!(net.items[2].label.as_deref(), Some("net_after_fixed_cents"));

        // Monthly expense totals 50000/80000/20000 → sample stddev 30000
        assert_eq!(pack.sections[1].items[0].value_cents, 30_000);
    }

    #[test]
    fn test_loan_pack_fixes_period() {
        let db = seeded_db();
        let pack = assemble_pack(&db, "loan_application_basics", Some("12m"), d("2025-06-15"))
            .expect("pack");
        assert_eq!(pack.period, "3m_full", "loan pack always uses full months");
        assert_eq!(pack.sections.len(), 8);
        assert_eq!(pack.sections[0].items[0].value_cents, 900_000);
    }

    #[test]
    fn test_unknown_pack_is_not_found() {
        let db = test_db();
        let err = assemble_pack(&db, "mystery", None, d("2025-06-15")).expect_err("unknown");
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_min_cleared_balance_walks_window() {
        let db = test_db();
        db.ensure_account("Checking", "depository", "USD").expect("acct");
        // Opening before the window: +100000 long ago
        txn(&db, "old", "2025-01-01", 100_000, "Employer");
        // Dip mid-window then recover
        txn(&db, "dip", "2025-06-01", -90_000, "Garage");
        txn(&db, "rec", "2025-06-05", 70_000, "Employer");

        let value = min_cleared_balance(&db, d("2025-06-15"), 30).expect("min");
        assert_eq!(value.value_cents, 10_000);
        assert!(value.evidence_ids.contains(&"dip".to_string()));
    }

    #[test]
    fn test_sample_stddev() {
        assert_eq!(sample_stddev(&[]), 0.0);
        assert_eq!(sample_stddev(&[5]), 0.0);
        assert!((sample_stddev(&[50_000, 80_000, 20_000]) - 30_000.0).abs() < 1e-9);
    }
}
