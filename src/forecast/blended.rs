//! Blended overlay: expected variable spend subtracted from the
//! deterministic baseline, with symmetric ±k·σ bands. No RNG anywhere;
//! the overlay is a pure function of history and parameters.

use std::collections::BTreeMap;

use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::db::{BudgetDb, DbTransaction};
use crate::error::AppResult;
use crate::forecast::engine::balance_on;

/// History window used when μ/σ/multipliers are not supplied.
pub const STATS_WINDOW_DAYS: i64 = 180;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyStats {
    pub mu_cents: i64,
    pub sigma_cents: i64,
    pub weekday_multipliers: [f64; 7],
}

impl DailyStats {
    pub fn neutral() -> Self {
        Self {
            mu_cents: 0,
            sigma_cents: 0,
            weekday_multipliers: [1.0; 7],
        }
    }
}

/// Variable-spend filter: keep cleared debits that are not income,
/// transfers or savings and do not line up with a scheduled commitment
/// category.
fn is_variable_spend(txn: &DbTransaction, committed_categories: &[i64]) -> bool {
    if txn.amount_cents >= 0 {
        return false;
    }
    if let Some(cat) = txn.category_id {
        if committed_categories.contains(&cat) {
            return false;
        }
    }
    let hints = [txn.payee.as_deref(), txn.memo.as_deref()];
    for hint in hints.into_iter().flatten() {
        let h = hint.to_lowercase();
        if h.contains("transfer") || h.contains("savings") {
            return false;
        }
    }
    true
}

/// Contiguous daily spend magnitudes (zero-filled) ending at the newest
/// eligible transaction.
fn daily_series(
    transactions: &[DbTransaction],
    committed_categories: &[i64],
    window_days: i64,
) -> Vec<(NaiveDate, i64)> {
    let mut by_day: BTreeMap<NaiveDate, i64> = BTreeMap::new();
    for txn in transactions {
        if !is_variable_spend(txn, committed_categories) {
            continue;
        }
        let Some(day) = txn.posted_at.get(..10).and_then(|s| s.parse::<NaiveDate>().ok()) else {
            continue;
        };
        *by_day.entry(day).or_insert(0) += txn.amount_cents.abs();
    }
    let Some((&max_day, _)) = by_day.iter().next_back() else {
        return Vec::new();
    };
    let start = max_day - Days::new((window_days.max(1) - 1) as u64);
    let mut out = Vec::with_capacity(window_days.max(1) as usize);
    let mut d = start;
    while d <= max_day {
        out.push((d, by_day.get(&d).copied().unwrap_or(0)));
        d = d + Days::new(1);
    }
    out
}

/// μ (mean) and σ (population stddev) of daily variable spend, in cents.
/// Zero-spend days inside the window count; sparse or empty data yields
/// (0, 0).
pub fn compute_daily_stats(
    transactions: &[DbTransaction],
    committed_categories: &[i64],
    window_days: i64,
) -> (i64, i64) {
    let series = daily_series(transactions, committed_categories, window_days);
    let n = series.len();
    if n == 0 {
        return (0, 0);
    }
    let sum: i64 = series.iter().map(|(_, v)| v).sum();
    let mu = sum as f64 / n as f64;
    let var = series
        .iter()
        .map(|(_, v)| {
            let diff = *v as f64 - mu;
            diff * diff
        })
        .sum::<f64>()
        / n as f64;
    (mu.round() as i64, var.sqrt().round() as i64)
}

/// Per-weekday multipliers normalized so their simple average is 1.0.
/// Monday is index 0. Sparse data degrades to neutral multipliers.
pub fn compute_weekday_multipliers(
    transactions: &[DbTransaction],
    committed_categories: &[i64],
    window_days: i64,
) -> [f64; 7] {
    let series = daily_series(transactions, committed_categories, window_days);
    let n = series.len();
    if n == 0 {
        return [1.0; 7];
    }
    let overall_mean = series.iter().map(|(_, v)| *v as f64).sum::<f64>() / n as f64;
    if overall_mean <= 0.0 {
        return [1.0; 7];
    }

    let mut sums = [0.0f64; 7];
    let mut counts = [0usize; 7];
    for (day, value) in &series {
        let w = day.weekday().num_days_from_monday() as usize;
        sums[w] += *value as f64;
        counts[w] += 1;
    }

    let mut mults = [1.0f64; 7];
    for w in 0..7 {
        if counts[w] > 0 {
            mults[w] = (sums[w] / counts[w] as f64) / overall_mean;
        }
    }

    let avg: f64 = mults.iter().sum::<f64>() / 7.0;
    if avg <= 0.0 {
        return [1.0; 7];
    }
    for m in &mut mults {
        *m /= avg;
    }
    mults
}

/// Stats from the store's recent cleared history.
pub fn stats_from_history(db: &BudgetDb, today: NaiveDate) -> AppResult<DailyStats> {
    let start = today - Days::new(STATS_WINDOW_DAYS as u64);
    let transactions = db.transactions_in_window(start, today, None, i64::MAX, 0)?;
    let committed: Vec<i64> = db
        .get_all_commitments()?
        .into_iter()
        .filter_map(|c| c.category_id)
        .collect();
    let (mu, sigma) = compute_daily_stats(&transactions, &committed, STATS_WINDOW_DAYS);
    let weekday = compute_weekday_multipliers(&transactions, &committed, STATS_WINDOW_DAYS);
    Ok(DailyStats {
        mu_cents: mu,
        sigma_cents: sigma,
        weekday_multipliers: weekday,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct BlendedSeries {
    pub baseline_blended: BTreeMap<NaiveDate, i64>,
    pub band_lower: BTreeMap<NaiveDate, i64>,
    pub band_upper: BTreeMap<NaiveDate, i64>,
}

/// Subtract each day's expected variable spend from the deterministic
/// series and add symmetric bands.
///
/// `blended[t] = deterministic[t] - μ·w[weekday(t)]`, bands `± k·σ`. The
/// deterministic entry set is untouched; the two series differ only by
/// the per-day subtraction and the constant-width bands.
pub fn blended_series(
    deterministic: &BTreeMap<NaiveDate, i64>,
    opening_cents: i64,
    start: NaiveDate,
    end: NaiveDate,
    stats: &DailyStats,
    band_k: f64,
) -> BlendedSeries {
    let mut baseline = BTreeMap::new();
    let mut lower = BTreeMap::new();
    let mut upper = BTreeMap::new();

    let band = (band_k * stats.sigma_cents as f64).round() as i64;
    let mut d = start;
    while d <= end {
        let w = d.weekday().num_days_from_monday() as usize;
        let expected = (stats.mu_cents as f64 * stats.weekday_multipliers[w]).round() as i64;

        let det = balance_on(deterministic, opening_cents, d);
        let blended = det - expected;
        baseline.insert(d, blended);
        lower.insert(d, blended - band);
        upper.insert(d, blended + band);
        d = d + Days::new(1);
    }

    BlendedSeries {
        baseline_blended: baseline,
        band_lower: lower,
        band_upper: upper,
    }
}
