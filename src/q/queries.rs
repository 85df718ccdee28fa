//! Primitive questionnaire queries.
//!
//! Every query answers with a value in cents, the window it covers, a
//! `method` string describing how the number was produced, and the
//! idempotency keys (or `commitment:<id>` refs) backing it.

use std::collections::BTreeMap;

use rusqlite::params;

use crate::db::BudgetDb;
use crate::error::AppResult;
use crate::q::{months_between, Period, QueryValue};

/// Payees must recur in at least this many distinct months to count as a
/// subscription.
const SUBSCRIPTION_MIN_MONTHS: usize = 3;

/// Amount similarity bound for the subscription heuristic (fraction of the
/// median charge).
const SUBSCRIPTION_AMOUNT_TOLERANCE: f64 = 0.2;

fn resolve_category(db: &BudgetDb, category: Option<&str>, category_id: Option<i64>) -> AppResult<Option<i64>> {
    if category_id.is_some() {
        return Ok(category_id);
    }
    match category {
        Some(term) => db.resolve_category_term(term),
        None => Ok(None),
    }
}

fn split_evidence(joined: Option<String>) -> Vec<String> {
    joined
        .map(|s| s.split(',').filter(|x| !x.is_empty()).map(str::to_string).collect())
        .unwrap_or_default()
}

/// Σ outflow in the window for a category (all expenses when the category
/// does not resolve). The value keeps its negative sign.
pub fn monthly_total_by_category(
    db: &BudgetDb,
    period: &Period,
    category: Option<&str>,
    category_id: Option<i64>,
) -> AppResult<QueryValue> {
    let cat = resolve_category(db, category, category_id)?;
    let (total, evidence): (i64, Option<String>) = match cat {
        Some(id) => db.conn_ref().query_row(
            "SELECT COALESCE(SUM(amount_cents), 0), GROUP_CONCAT(idempotency_key)
             FROM transactions
             WHERE DATE(posted_at) BETWEEN ?1 AND ?2 AND amount_cents < 0 AND category_id = ?3",
            params![period.start.to_string(), period.end.to_string(), id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?,
        None => db.conn_ref().query_row(
            "SELECT COALESCE(SUM(amount_cents), 0), GROUP_CONCAT(idempotency_key)
             FROM transactions
             WHERE DATE(posted_at) BETWEEN ?1 AND ?2 AND amount_cents < 0",
            params![period.start.to_string(), period.end.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?,
    };
    Ok(QueryValue::new(
        total,
        period,
        "sum_expense_transactions_in_window",
        split_evidence(evidence),
    ))
}

/// Window total divided by the number of calendar months it spans.
pub fn monthly_average_by_category(
    db: &BudgetDb,
    period: &Period,
    category: Option<&str>,
    category_id: Option<i64>,
) -> AppResult<QueryValue> {
    let total = monthly_total_by_category(db, period, category, category_id)?;
    let months = months_between(period.start, period.end).max(1);
    let average = (total.value_cents as f64 / months as f64).round() as i64;
    Ok(QueryValue {
        value_cents: average,
        method: format!("monthly_average_over_{months}_months"),
        ..total
    })
}

/// Σ inflow magnitudes with a per-source breakdown in `rows`.
pub fn income_summary(db: &BudgetDb, period: &Period) -> AppResult<QueryValue> {
    let (total, evidence): (i64, Option<String>) = db.conn_ref().query_row(
        "SELECT COALESCE(SUM(amount_cents), 0), GROUP_CONCAT(idempotency_key)
         FROM transactions
         WHERE DATE(posted_at) BETWEEN ?1 AND ?2 AND amount_cents > 0",
        params![period.start.to_string(), period.end.to_string()],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let mut breakdown: Vec<serde_json::Value> = Vec::new();
    {
        let mut stmt = db.conn_ref().prepare(
            "SELECT COALESCE(payee, '(unknown)') AS src, COALESCE(SUM(amount_cents), 0) AS total
             FROM transactions
             WHERE DATE(posted_at) BETWEEN ?1 AND ?2 AND amount_cents > 0
             GROUP BY COALESCE(payee, '(unknown)')
             ORDER BY total DESC, src ASC",
        )?;
        let rows = stmt.query_map(
            params![period.start.to_string(), period.end.to_string()],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
        )?;
        for row in rows {
            let (source, amount) = row?;
            breakdown.push(serde_json::json!({"source": source, "amount_cents": amount}));
        }
    }

    let mut value = QueryValue::new(
        total,
        period,
        "sum_income_transactions_in_window",
        split_evidence(evidence),
    );
    value.rows = Some(serde_json::Value::Array(breakdown));
    Ok(value)
}

/// Distinct loan-type commitments; the value is the summed monthly
/// obligation magnitude.
pub fn active_loans(db: &BudgetDb, period: &Period) -> AppResult<QueryValue> {
    let loans = db.loan_commitments()?;
    let rows: Vec<serde_json::Value> = loans
        .iter()
        .map(|c| {
            serde_json::json!({
                "id": c.id,
                "name": c.name,
                "amount_cents": c.amount_cents,
                "due_rule": c.due_rule,
                "next_due_date": c.next_due_date,
                "account_id": c.account_id,
                "type": c.kind,
            })
        })
        .collect();
    let evidence = loans.iter().map(|c| format!("commitment:{}", c.id)).collect();
    let total: i64 = loans.iter().map(|c| c.amount_cents.abs()).sum();

    let mut value = QueryValue::new(total, period, "commitments_type_filter", evidence);
    value.rows = Some(serde_json::Value::Array(rows));
    Ok(value)
}

/// Σ commitment amounts of a given kind (all kinds when `kind` is None).
pub fn monthly_commitment_total(
    db: &BudgetDb,
    period: &Period,
    kind: Option<&str>,
) -> AppResult<QueryValue> {
    let commitments = db.get_all_commitments()?;
    let wanted = kind.map(|k| k.to_lowercase());
    let matching: Vec<_> = commitments
        .iter()
        .filter(|c| match &wanted {
            Some(k) => c.kind.to_lowercase() == *k,
            None => true,
        })
        .collect();
    let total: i64 = matching.iter().map(|c| c.amount_cents.abs()).sum();
    let evidence = matching.iter().map(|c| format!("commitment:{}", c.id)).collect();
    Ok(QueryValue::new(
        -total,
        period,
        match kind {
            Some(k) => format!("sum_commitments_kind_{k}"),
            None => "sum_commitments_all_kinds".to_string(),
        },
        evidence,
    ))
}

/// Top-N categories by outflow magnitude in the window.
pub fn category_breakdown(db: &BudgetDb, period: &Period, top_n: usize) -> AppResult<QueryValue> {
    let mut rows: Vec<(Option<i64>, Option<String>, i64)> = Vec::new();
    {
        let mut stmt = db.conn_ref().prepare(
            "SELECT c.id, c.name, COALESCE(SUM(t.amount_cents), 0) AS total_cents
             FROM transactions t
             LEFT JOIN categories c ON c.id = t.category_id
             WHERE DATE(t.posted_at) BETWEEN ?1 AND ?2 AND t.amount_cents < 0
             GROUP BY c.id, c.name
             ORDER BY total_cents ASC, c.name ASC",
        )?;
        let mapped = stmt.query_map(
            params![period.start.to_string(), period.end.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        for row in mapped {
            rows.push(row?);
        }
    }
    rows.truncate(top_n.max(1));

    let total: i64 = rows.iter().map(|(_, _, t)| t).sum();
    let json_rows: Vec<serde_json::Value> = rows
        .iter()
        .map(|(id, name, total_cents)| {
            serde_json::json!({
                "category_id": id,
                "category_name": name.clone().unwrap_or_else(|| "(uncategorized)".to_string()),
                "total_cents": total_cents,
            })
        })
        .collect();

    let mut value = QueryValue::new(total, period, "sum_by_category_expenses", Vec::new());
    value.rows = Some(serde_json::Value::Array(json_rows));
    Ok(value)
}

/// Paginated evidence rows for a category and window.
pub fn supporting_transactions(
    db: &BudgetDb,
    period: &Period,
    category: Option<&str>,
    category_id: Option<i64>,
    page: usize,
    page_size: usize,
) -> AppResult<QueryValue> {
    let page = page.max(1);
    let page_size = page_size.clamp(1, 200);
    let offset = ((page - 1) * page_size) as i64;
    let cat = resolve_category(db, category, category_id)?;

    let txns = db.transactions_in_window(period.start, period.end, cat, page_size as i64, offset)?;
    let total = db.count_transactions_in_window(period.start, period.end, cat)?;

    let evidence: Vec<String> = txns.iter().map(|t| t.idempotency_key.clone()).collect();
    let rows: Vec<serde_json::Value> = txns
        .iter()
        .map(|t| {
            serde_json::json!({
                "idempotency_key": t.idempotency_key,
                "posted_at": t.posted_at,
                "amount_cents": t.amount_cents,
                "payee": t.payee,
                "memo": t.memo,
                "category_id": t.category_id,
            })
        })
        .collect();

    let sum: i64 = txns.iter().map(|t| t.amount_cents).sum();
    let mut value = QueryValue::new(sum, period, "list_transactions_window_filtered", evidence);
    value.rows = Some(serde_json::json!({
        "items": rows,
        "pagination": {"page": page, "page_size": page_size, "total": total},
    }));
    Ok(value)
}

/// Recurring payees: same payee charged in at least three distinct months
/// with similar magnitude.
pub fn subscription_list(db: &BudgetDb, period: &Period) -> AppResult<QueryValue> {
    struct Charge {
        month: String,
        amount: i64,
        key: String,
    }

    let mut by_payee: BTreeMap<String, Vec<Charge>> = BTreeMap::new();
    {
        let mut stmt = db.conn_ref().prepare(
            "SELECT payee, strftime('%Y-%m', posted_at) AS month, amount_cents, idempotency_key
             FROM transactions
             WHERE DATE(posted_at) BETWEEN ?1 AND ?2
               AND amount_cents < 0 AND payee IS NOT NULL AND payee != ''
             ORDER BY payee, posted_at",
        )?;
        let rows = stmt.query_map(
            params![period.start.to_string(), period.end.to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )?;
        for row in rows {
            let (payee, month, amount, key) = row?;
            by_payee
                .entry(crate::util::normalize_text(&payee))
                .or_default()
                .push(Charge {
                    month,
                    amount: amount.abs(),
                    key,
                });
        }
    }

    let mut rows: Vec<serde_json::Value> = Vec::new();
    let mut evidence: Vec<String> = Vec::new();
    let mut total = 0i64;
    for (payee, charges) in by_payee {
        let months: std::collections::BTreeSet<&str> =
            charges.iter().map(|c| c.month.as_str()).collect();
        if months.len() < SUBSCRIPTION_MIN_MONTHS {
            continue;
        }
        let mut amounts: Vec<i64> = charges.iter().map(|c| c.amount).collect();
        amounts.sort_unstable();
        let median = amounts[amounts.len() / 2];
        if median == 0 {
            continue;
        }
        let similar = charges
            .iter()
            .all(|c| (c.amount - median).abs() as f64 <= median as f64 * SUBSCRIPTION_AMOUNT_TOLERANCE);
        if !similar {
            continue;
        }

        total += median;
        evidence.extend(charges.iter().map(|c| c.key.clone()));
        rows.push(serde_json::json!({
            "payee": payee,
            "monthly_amount_cents": median,
            "months_seen": months.len(),
        }));
    }

    let mut value = QueryValue::new(
        -total,
        period,
        "recurring_payee_heuristic",
        evidence,
    );
    value.rows = Some(serde_json::Value::Array(rows));
    Ok(value)
}

/// Σ fixed-cost commitments (bill/rent/mortgage/utility), as a negative
/// amount.
pub fn household_fixed_costs(db: &BudgetDb, period: &Period) -> AppResult<QueryValue> {
    let commitments = db.get_all_commitments()?;
    let fixed: Vec<_> = commitments
        .iter()
        .filter(|c| {
            matches!(
                c.kind.to_lowercase().as_str(),
                "bill" | "rent" | "mortgage" | "utility"
            )
        })
        .collect();
    let total: i64 = fixed.iter().map(|c| c.amount_cents.abs()).sum();
    let evidence = fixed.iter().map(|c| format!("commitment:{}", c.id)).collect();
    Ok(QueryValue::new(
        -total,
        period,
        "sum_commitments_fixed_types",
        evidence,
    ))
}

/// Commitments of subscription-like kinds, for the loan pack's
/// subscription section.
pub fn subscription_commitments(db: &BudgetDb, period: &Period) -> AppResult<QueryValue> {
    let commitments = db.get_all_commitments()?;
    let subs: Vec<_> = commitments
        .iter()
        .filter(|c| matches!(c.kind.to_lowercase().as_str(), "bill" | "subscription"))
        .collect();
    let total: i64 = subs.iter().map(|c| c.amount_cents.abs()).sum();
    let evidence = subs.iter().map(|c| format!("commitment:{}", c.id)).collect();
    let rows: Vec<serde_json::Value> = subs
        .iter()
        .map(|c| {
            serde_json::json!({
                "id": c.id,
                "name": c.name,
                "amount_cents": c.amount_cents,
                "due_rule": c.due_rule,
                "next_due_date": c.next_due_date,
            })
        })
        .collect();
    let mut value = QueryValue::new(
        -total,
        period,
        "sum_commitments_subscriptions",
        evidence,
    );
    value.rows = Some(serde_json::Value::Array(rows));
    Ok(value)
}

/// Resolve a query by name, for the generic `/q/{query}` endpoint.
pub fn run_named_query(
    db: &BudgetDb,
    name: &str,
    period: &Period,
    category: Option<&str>,
    top_n: Option<usize>,
    page: Option<usize>,
    page_size: Option<usize>,
) -> AppResult<Option<QueryValue>> {
    let value = match name {
        "monthly_total_by_category" => Some(monthly_total_by_category(db, period, category, None)?),
        "monthly_average_by_category" => {
            Some(monthly_average_by_category(db, period, category, None)?)
        }
        "active_loans" => Some(active_loans(db, period)?),
        "monthly_commitment_total" => Some(monthly_commitment_total(db, period, category)?),
        "income_summary" => Some(income_summary(db, period)?),
        "category_breakdown" => Some(category_breakdown(db, period, top_n.unwrap_or(10))?),
        "supporting_transactions" => Some(supporting_transactions(
            db,
            period,
            category,
            None,
            page.unwrap_or(1),
            page_size.unwrap_or(50),
        )?),
        "subscription_list" => Some(subscription_list(db, period)?),
        "household_fixed_costs" => Some(household_fixed_costs(db, period)?),
        _ => None,
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;
    use crate::db::DbTransaction;
    use crate::q::parse_period_token;
    use chrono::NaiveDate;

    fn d(s: &str) -> NaiveDate {
        s.parse().expect("valid date")
    }

    fn txn(db: &BudgetDb, key: &str, posted: &str, amount: i64, payee: &str, category: Option<i64>) {
        db.upsert_transaction(&DbTransaction {
            idempotency_key: key.into(),
            account_id: 1,
            posted_at: format!("{posted}T00:00:00Z"),
            amount_cents: amount,
            payee: Some(payee.to_string()),
            memo: None,
            external_id: None,
            source: "test".into(),
            category_id: category,
            is_cleared: true,
            import_meta_json: None,
        })
        .expect("txn");
    }

    fn march_period() -> Period {
        Period {
            start: d("2025-03-01"),
            end: d("2025-05-31"),
            token: "3m_full".into(),
        }
    }

    #[test]
    fn test_monthly_total_filters_category_and_sign() {
        let db = test_db();
        txn(&db, "a", "2025-03-05", -2_000, "Grocer", Some(1));
        txn(&db, "b", "2025-03-06", -3_000, "Grocer", Some(1));
        txn(&db, "c", "2025-03-07", -9_000, "Garage", Some(2));
        txn(&db, "d", "2025-03-08", 50_000, "Employer", Some(1));
        txn(&db, "e", "2025-06-01", -1_000, "Grocer", Some(1)); // outside window

        let value =
            monthly_total_by_category(&db, &march_period(), None, Some(1)).expect("query");
        assert_eq!(value.value_cents, -5_000);
        assert_eq!(value.evidence_ids, vec!["a", "b"]);
        assert_eq!(value.method, "sum_expense_transactions_in_window");
    }

    #[test]
    fn test_monthly_average_divides_by_months() {
        let db = test_db();
        txn(&db, "a", "2025-03-05", -9_000, "Grocer", Some(1));
        let value =
            monthly_average_by_category(&db, &march_period(), None, Some(1)).expect("query");
        assert_eq!(value.value_cents, -3_000);
        assert_eq!(value.method, "monthly_average_over_3_months");
    }

    #[test]
    fn test_income_summary_with_breakdown() {
        let db = test_db();
        txn(&db, "a", "2025-03-05", 200_000, "Employer", None);
        txn(&db, "b", "2025-04-05", 200_000, "Employer", None);
        txn(&db, "c", "2025-04-10", 15_000, "Side Gig", None);
        txn(&db, "d", "2025-04-12", -4_000, "Grocer", None);

        let value = income_summary(&db, &march_period()).expect("query");
        assert_eq!(value.value_cents, 415_000);
        assert_eq!(value.evidence_ids.len(), 3);
        let rows = value.rows.expect("breakdown");
        assert_eq!(rows[0]["source"], "Employer");
        assert_eq!(rows[0]["amount_cents"], 400_000);
    }

    #[test]
    fn test_subscription_heuristic() {
        let db = test_db();
        // Netflix-like: same amount, three distinct months
        txn(&db, "s1", "2025-03-10", -1_599, "Streamflix", None);
        txn(&db, "s2", "2025-04-10", -1_599, "Streamflix", None);
        txn(&db, "s3", "2025-05-10", -1_599, "Streamflix", None);
        // Groceries: many charges, varying amounts, not a subscription
        txn(&db, "g1", "2025-03-03", -4_200, "Grocer", None);
        txn(&db, "g2", "2025-04-03", -9_700, "Grocer", None);
        txn(&db, "g3", "2025-05-03", -1_300, "Grocer", None);
        // Two months only, not enough
        txn(&db, "p1", "2025-04-01", -999, "Paper", None);
        txn(&db, "p2", "2025-05-01", -999, "Paper", None);

        let value = subscription_list(&db, &march_period()).expect("query");
        let rows = value.rows.expect("rows");
        let rows = rows.as_array().expect("array");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["payee"], "streamflix");
        assert_eq!(rows[0]["monthly_amount_cents"], 1_599);
        assert_eq!(value.value_cents, -1_599);
    }

    #[test]
    fn test_category_breakdown_orders_and_caps() {
        let db = test_db();
        db.conn_ref()
            .execute_batch(
                "INSERT INTO categories (id, name, source) VALUES (1, 'Groceries', 'internal');
                 INSERT INTO categories (id, name, source) VALUES (2, 'Transport', 'internal');
                 INSERT INTO categories (id, name, source) VALUES (3, 'Dining', 'internal');",
            )
            .expect("categories");
        txn(&db, "a", "2025-03-05", -10_000, "Grocer", Some(1));
        txn(&db, "b", "2025-03-06", -2_000, "Bus", Some(2));
        txn(&db, "c", "2025-03-07", -5_000, "Cafe", Some(3));

        let value = category_breakdown(&db, &march_period(), 2).expect("query");
        let rows = value.rows.expect("rows");
        let rows = rows.as_array().expect("array");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["category_name"], "Groceries");
        assert_eq!(rows[1]["category_name"], "Dining");
    }

    #[test]
    fn test_supporting_transactions_paginates() {
        let db = test_db();
        for i in 0..7 {
            txn(&db, &format!("k{i}"), "2025-03-10", -100, "Shop", Some(1));
        }
        let value =
            supporting_transactions(&db, &march_period(), None, Some(1), 2, 3).expect("query");
        assert_eq!(value.evidence_ids.len(), 3);
        let rows = value.rows.expect("rows");
        assert_eq!(rows["pagination"]["total"], 7);
        assert_eq!(rows["pagination"]["page"], 2);
    }

    #[test]
    fn test_fixed_costs_and_loans() {
        let db = test_db();
        db.conn_ref()
            .execute_batch(
                "INSERT INTO commitments (name, amount_cents, due_rule, next_due_date, account_id, type)
                 VALUES ('Rent', 120000, 'MONTHLY', '2025-01-04', 1, 'rent');
                 INSERT INTO commitments (name, amount_cents, due_rule, next_due_date, account_id, type)
                 VALUES ('Power', 8000, 'MONTHLY', '2025-01-12', 1, 'utility');
                 INSERT INTO commitments (name, amount_cents, due_rule, next_due_date, account_id, type)
                 VALUES ('Car Loan', 30000, 'MONTHLY', '2025-01-15', 1, 'loan');",
            )
            .expect("commitments");

        let fixed = household_fixed_costs(&db, &march_period()).expect("fixed");
        assert_eq!(fixed.value_cents, -128_000);
        assert_eq!(fixed.evidence_ids.len(), 2);

        let loans = active_loans(&db, &march_period()).expect("loans");
        assert_eq!(loans.value_cents, 30_000);
        assert_eq!(loans.evidence_ids, vec!["commitment:3"]);

        let by_kind = monthly_commitment_total(&db, &march_period(), Some("utility")).expect("kind");
        assert_eq!(by_kind.value_cents, -8_000);
    }

    #[test]
    fn test_named_query_dispatch() {
        let db = test_db();
        let period = parse_period_token(Some("30d"), d("2025-06-15"));
        assert!(run_named_query(&db, "income_summary", &period, None, None, None, None)
            .expect("dispatch")
            .is_some());
        assert!(run_named_query(&db, "no_such_query", &period, None, None, None, None)
            .expect("dispatch")
            .is_none());
    }
}
