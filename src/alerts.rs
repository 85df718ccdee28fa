//! Alert checks run after each snapshot.
//!
//! Each check is pure SQL + Rust over the store and emits zero or more
//! deduped alerts; re-running a check over the same state inserts nothing
//! new. Tolerances come from configuration, not constants buried here.

use chrono::{Datelike, Days, NaiveDate, Utc};
use rusqlite::params;
use serde::Serialize;

use crate::config::Config;
use crate::db::BudgetDb;
use crate::error::AppResult;

/// Window scanned for fresh large debits.
const LARGE_DEBIT_LOOKBACK_DAYS: u64 = 7;

/// Amount slack when matching a debit against a scheduled row.
const PLANNED_MATCH_TOLERANCE_CENTS: i64 = 100;

#[derive(Debug, Default, Serialize)]
pub struct AlertRunReport {
    pub threshold_breach: usize,
    pub floor_breach: usize,
    pub large_debit: usize,
    pub commitment_drift: usize,
}

impl AlertRunReport {
    pub fn total(&self) -> usize {
        self.threshold_breach + self.floor_breach + self.large_debit + self.commitment_drift
    }
}

/// Projected minimum crossed below the buffer floor since the previous
/// snapshot.
fn check_threshold_breach(db: &BudgetDb, buffer_floor_cents: i64) -> AppResult<usize> {
    if buffer_floor_cents <= 0 {
        return Ok(0);
    }
    let (current, previous) = db.last_two_snapshot_metas()?;
    let Some(current) = current else {
        return Ok(0);
    };
    let Some(cur_min) = current.min_balance_cents else {
        return Ok(0);
    };

    let prev_min = previous.and_then(|p| p.min_balance_cents);
    let crossed = match prev_min {
        Some(prev) => prev >= buffer_floor_cents && cur_min < buffer_floor_cents,
        None => cur_min < buffer_floor_cents,
    };
    if !crossed {
        return Ok(0);
    }

    let dedupe_key = format!(
        "{buffer_floor_cents}:{}:{cur_min}",
        current.min_balance_date.as_deref().unwrap_or("")
    );
    let details = serde_json::json!({
        "buffer_floor_cents": buffer_floor_cents,
        "current_min_balance_cents": cur_min,
        "current_min_balance_date": current.min_balance_date,
        "previous_min_balance_cents": prev_min,
    });
    let severity = if cur_min >= 0 { "warning" } else { "critical" };
    let created = db.insert_alert_deduped(
        "threshold_breach",
        &dedupe_key,
        severity,
        "Projected balance below buffer",
        "The projected minimum balance fell below the configured buffer since the last snapshot.",
        &details.to_string(),
    )?;
    Ok(created as usize)
}

/// Projected minimum below an operator-declared per-account floor (anchor
/// `min_floor_cents` or the env-provided overdraft thresholds).
fn check_floor_breach(db: &BudgetDb, config: &Config) -> AppResult<usize> {
    let (current, _) = db.last_two_snapshot_metas()?;
    let Some(current) = current else {
        return Ok(0);
    };
    let Some(cur_min) = current.min_balance_cents else {
        return Ok(0);
    };

    let mut floors: Vec<(i64, i64)> = db
        .get_all_anchors()?
        .into_iter()
        .filter_map(|a| a.min_floor_cents.map(|f| (a.account_id, f)))
        .collect();
    for (&account_id, &floor) in &config.overdraft_thresholds {
        floors.push((account_id, floor));
    }
    floors.sort();
    floors.dedup();

    let mut created = 0usize;
    for (account_id, floor) in floors {
        if cur_min >= floor {
            continue;
        }
        let dedupe_key = format!(
            "{account_id}:{floor}:{}",
            current.min_balance_date.as_deref().unwrap_or("")
        );
        let details = serde_json::json!({
            "account_id": account_id,
            "min_floor_cents": floor,
            "projected_min_balance_cents": cur_min,
            "projected_min_balance_date": current.min_balance_date,
        });
        if db.insert_alert_deduped(
            "floor_breach",
            &dedupe_key,
            "critical",
            "Projected balance below account floor",
            "The projected minimum balance breaches a declared account floor.",
            &details.to_string(),
        )? {
            created += 1;
        }
    }
    Ok(created)
}

/// Fresh cleared debits at or above the configured magnitude with no
/// scheduled counterpart.
fn check_large_unplanned_debits(db: &BudgetDb, config: &Config, today: NaiveDate) -> AppResult<usize> {
    let threshold = config.large_debit_cents.abs();
    if threshold == 0 {
        return Ok(0);
    }
    let since = today - Days::new(LARGE_DEBIT_LOOKBACK_DAYS);

    let commitments = db.get_all_commitments()?;
    let inflow_like: Vec<i64> = db
        .get_all_scheduled_inflows()?
        .iter()
        .map(|i| i.amount_cents.abs())
        .collect();

    struct Row {
        key: String,
        posted_at: String,
        amount_cents: i64,
        payee: Option<String>,
        category_id: Option<i64>,
    }

    let rows: Vec<Row> = {
        let mut stmt = db.conn_ref().prepare(
            "SELECT idempotency_key, posted_at, amount_cents, payee, category_id
             FROM transactions
             WHERE is_cleared = 1 AND amount_cents <= ?1
               AND DATE(posted_at) BETWEEN ?2 AND ?3",
        )?;
        let mapped = stmt.query_map(
            params![-threshold, since.to_string(), today.to_string()],
            |row| {
                Ok(Row {
                    key: row.get(0)?,
                    posted_at: row.get(1)?,
                    amount_cents: row.get(2)?,
                    payee: row.get(3)?,
                    category_id: row.get(4)?,
                })
            },
        )?;
        let mut items = Vec::new();
        for row in mapped {
            items.push(row?);
        }
        items
    };

    let mut created = 0usize;
    for row in rows {
        let magnitude = row.amount_cents.abs();
        let planned = commitments.iter().any(|c| {
            (row.category_id.is_some() && c.category_id == row.category_id)
                || (magnitude - c.amount_cents.abs()).abs() <= PLANNED_MATCH_TOLERANCE_CENTS
        }) || inflow_like
            .iter()
            .any(|amt| (magnitude - amt).abs() <= PLANNED_MATCH_TOLERANCE_CENTS);
        if planned {
            continue;
        }

        let payee = row.payee.clone().unwrap_or_default();
        let message = if payee.is_empty() {
            format!("A large debit of {:.2} occurred.", magnitude as f64 / 100.0)
        } else {
            format!(
                "A large debit of {:.2} occurred at {payee}.",
                magnitude as f64 / 100.0
            )
        };
        let details = serde_json::json!({
            "amount_cents": row.amount_cents,
            "posted_at": row.posted_at,
            "payee": payee,
            "threshold_cents": threshold,
        });
        if db.insert_alert_deduped(
            "large_debit",
            &row.key,
            "warning",
            "Large unplanned debit",
            &message,
            &details.to_string(),
        )? {
            created += 1;
        }
    }
    Ok(created)
}

/// Commitment whose observed monthly spend has deviated beyond the
/// tolerance for every one of the last `drift_cycles` full months. Emits a
/// `suggest_update` proposal with the observed average.
fn check_commitment_drift(db: &BudgetDb, config: &Config, today: NaiveDate) -> AppResult<usize> {
    let cycles = config.drift_cycles.max(1);
    let tolerance = config.drift_tolerance_pct as f64 / 100.0;

    // Last `cycles` full calendar months, newest first
    let mut periods: Vec<(NaiveDate, NaiveDate)> = Vec::new();
    let mut month_start = NaiveDate::from_ymd_opt(today.year(), today.month(), 1)
        .unwrap_or(today);
    for _ in 0..cycles {
        let prev_end = month_start.pred_opt().unwrap_or(month_start);
        let prev_start = NaiveDate::from_ymd_opt(prev_end.year(), prev_end.month(), 1)
            .unwrap_or(prev_end);
        periods.push((prev_start, prev_end));
        month_start = prev_start;
    }

    let mut created = 0usize;
    for commitment in db.get_all_commitments()? {
        let Some(category_id) = commitment.category_id else {
            continue;
        };
        let planned = commitment.amount_cents.abs();
        if planned == 0 {
            continue;
        }

        let mut observed = Vec::with_capacity(periods.len());
        let mut all_deviate = true;
        for (start, end) in &periods {
            let total: i64 = db.conn_ref().query_row(
                "SELECT COALESCE(SUM(amount_cents), 0) FROM transactions
                 WHERE category_id = ?1 AND amount_cents < 0
                   AND DATE(posted_at) BETWEEN ?2 AND ?3",
                params![category_id, start.to_string(), end.to_string()],
                |row| row.get(0),
            )?;
            let actual = total.abs();
            observed.push(actual);
            let deviation = (actual - planned).abs() as f64 / planned as f64;
            if deviation <= tolerance {
                all_deviate = false;
            }
        }
        if !all_deviate {
            continue;
        }

        let proposed = observed.iter().sum::<i64>() / observed.len() as i64;
        let dedupe_key = format!("{}:m{cycles}:tol{}", commitment.id, config.drift_tolerance_pct);
        let details = serde_json::json!({
            "commitment_id": commitment.id,
            "planned_amount_cents": planned,
            "observed_monthly_cents": observed,
            "proposed_amount_cents": proposed,
            "months": cycles,
            "tolerance_pct": config.drift_tolerance_pct,
        });
        if db.insert_alert_deduped(
            "commitment_drift",
            &dedupe_key,
            "info",
            "Commitment drift: suggest update",
            &format!(
                "Observed monthly spend for '{}' has deviated more than {}% from the configured amount for {cycles} months.",
                commitment.name, config.drift_tolerance_pct
            ),
            &details.to_string(),
        )? {
            created += 1;
        }
    }
    Ok(created)
}

/// Run every check and persist new alerts. Alert writes share one
/// transaction so a re-evaluation is all-or-nothing.
pub fn run_alert_checks(db: &BudgetDb, config: &Config) -> AppResult<AlertRunReport> {
    let today = Utc::now().date_naive();
    run_alert_checks_at(db, config, today)
}

pub fn run_alert_checks_at(
    db: &BudgetDb,
    config: &Config,
    today: NaiveDate,
) -> AppResult<AlertRunReport> {
    db.with_transaction(|db| {
        let report = AlertRunReport {
            threshold_breach: check_threshold_breach(db, config.buffer_floor_cents)?,
            floor_breach: check_floor_breach(db, config)?,
            large_debit: check_large_unplanned_debits(db, config, today)?,
            commitment_drift: check_commitment_drift(db, config, today)?,
        };
        if report.total() > 0 {
            log::info!(
                "Alert checks: {} threshold, {} floor, {} large debit, {} drift",
                report.threshold_breach,
                report.floor_breach,
                report.large_debit,
                report.commitment_drift
            );
        }
        Ok(report)
    })
}
