//! What-if spend simulation.
//!
//! A simulation recomputes the deterministic series with one synthetic
//! outflow and judges it against the buffer floor. The safety decision
//! always uses the deterministic series; a blended baseline is reporting
//! only.

use chrono::NaiveDate;
use serde::Serialize;

use crate::forecast::calendar::{Entry, EntryKind};
use crate::forecast::engine::{compute_balances, min_balance_from};

/// Days within this margin above the buffer floor are reported as tight.
pub const TIGHT_EPSILON_CENTS: i64 = 1_000;

/// Synthetic source id for the simulated outflow; never collides with real
/// rows, which are positive rowids.
const SIMULATED_SOURCE_ID: i64 = -1;

#[derive(Debug, Clone, Serialize)]
pub struct SpendDecision {
    pub safe: bool,
    pub new_min_balance_cents: i64,
    pub new_min_balance_date: Option<NaiveDate>,
    pub tight_days: Vec<NaiveDate>,
    pub max_safe_today_cents: i64,
}

fn with_spend(entries: &[Entry], date: NaiveDate, amount_cents: i64) -> Vec<Entry> {
    let mut out = entries.to_vec();
    out.push(Entry {
        date,
        kind: EntryKind::KeyEvent,
        name: "simulated spend".into(),
        amount_cents: -amount_cents.abs(),
        source_id: SIMULATED_SOURCE_ID,
        shift_applied: false,
        policy: "AS_SCHEDULED".into(),
        ui_marker: None,
        is_within_lead_window: None,
    });
    out.sort_by(|a, b| (a.date, a.kind, a.source_id).cmp(&(b.date, b.kind, b.source_id)));
    out
}

/// Horizon minimum after spending `amount_cents` on `date`.
fn min_after_spend(
    opening_cents: i64,
    entries: &[Entry],
    horizon_start: NaiveDate,
    date: NaiveDate,
    amount_cents: i64,
) -> (i64, Option<NaiveDate>) {
    let simulated = with_spend(entries, date, amount_cents);
    let balances = compute_balances(opening_cents, &simulated);
    let min = min_balance_from(&balances, opening_cents, horizon_start);
    let min_date = balances
        .range(horizon_start..)
        .find(|(_, &bal)| bal == min)
        .map(|(&d, _)| d);
    (min, min_date)
}

/// Largest value in `[lo, hi]` satisfying a monotonic predicate, or `lo`
/// when nothing does. Integer bisection; never evaluates outside the range.
pub fn binary_search_max<F>(is_safe: F, lo: i64, hi: i64) -> i64
where
    F: Fn(i64) -> bool,
{
    if hi <= lo {
        return lo;
    }
    let (mut lo, mut hi) = (lo, hi);
    if !is_safe(lo) {
        return lo;
    }
    if is_safe(hi) {
        return hi;
    }
    // Invariant: is_safe(lo) && !is_safe(hi)
    while hi - lo > 1 {
        let mid = lo + (hi - lo) / 2;
        if is_safe(mid) {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    lo
}

/// Simulate an ad-hoc spend of `amount_cents` on `date`.
///
/// `entries` and `opening_cents` describe the deterministic horizon
/// `[horizon_start, horizon_end]`; the decision compares the post-spend
/// horizon minimum against `buffer_floor_cents`.
pub fn simulate_spend(
    opening_cents: i64,
    entries: &[Entry],
    horizon_start: NaiveDate,
    date: NaiveDate,
    amount_cents: i64,
    buffer_floor_cents: i64,
) -> SpendDecision {
    let (new_min, new_min_date) =
        min_after_spend(opening_cents, entries, horizon_start, date, amount_cents);
    let safe = new_min >= buffer_floor_cents;

    // Tight days reported from the simulated series
    let simulated = with_spend(entries, date, amount_cents);
    let balances = compute_balances(opening_cents, &simulated);
    let tight_days: Vec<NaiveDate> = balances
        .range(horizon_start..)
        .filter(|(_, &bal)| {
            bal >= buffer_floor_cents && bal - buffer_floor_cents <= TIGHT_EPSILON_CENTS
        })
        .map(|(&d, _)| d)
        .collect();

    // Upper bound: everything on hand plus everything still scheduled to
    // arrive can never be exceeded safely.
    let future_inflows: i64 = entries
        .iter()
        .filter(|e| e.amount_cents > 0)
        .map(|e| e.amount_cents)
        .sum();
    let hi = opening_cents + future_inflows.max(0);
    let max_safe_today_cents = if hi <= 0 {
        0
    } else {
        binary_search_max(
            |x| {
                let (min, _) = min_after_spend(opening_cents, entries, horizon_start, date, x);
                min >= buffer_floor_cents
            },
            0,
            hi,
        )
    };

    SpendDecision {
        safe,
        new_min_balance_cents: new_min,
        new_min_balance_date: new_min_date,
        tight_days,
        max_safe_today_cents,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().expect("valid date")
    }

    fn entry(date: &str, kind: EntryKind, amount: i64, source_id: i64) -> Entry {
        Entry {
            date: d(date),
            kind,
            name: "x".into(),
            amount_cents: amount,
            source_id,
            shift_applied: false,
            policy: "AS_SCHEDULED".into(),
            ui_marker: None,
            is_within_lead_window: None,
        }
    }

    #[test]
    fn test_binary_search_max() {
        assert_eq!(binary_search_max(|x| x <= 37, 0, 100), 37);
        assert_eq!(binary_search_max(|x| x <= 37, 0, 37), 37);
        assert_eq!(binary_search_max(|_| true, 0, 100), 100);
        assert_eq!(binary_search_max(|_| false, 0, 100), 0);
        assert_eq!(binary_search_max(|x| x <= 37, 0, 0), 0);
    }

    #[test]
    fn test_no_future_entries() {
        // Opening 100000, floor 5000: up to 95000 is safe
        let today = d("2025-01-01");
        let decision = simulate_spend(100_000, &[], today, today, 90_000, 5_000);
        assert!(decision.safe);
        assert_eq!(decision.new_min_balance_cents, 10_000);
        assert_eq!(decision.max_safe_today_cents, 95_000);

        let over = simulate_spend(100_000, &[], today, today, 96_000, 5_000);
        assert!(!over.safe);
        assert_eq!(over.new_min_balance_cents, 4_000);
        assert_eq!(over.max_safe_today_cents, 95_000);
    }

    #[test]
    fn test_boundary_is_exact() {
        // max_safe is safe; max_safe + 1 is not
        let today = d("2025-01-01");
        let entries = vec![
            entry("2025-01-05", EntryKind::Commitment, -40_000, 1),
            entry("2025-01-10", EntryKind::Inflow, 20_000, 1),
        ];
        let decision = simulate_spend(100_000, &entries, today, today, 0, 5_000);
        let max = decision.max_safe_today_cents;
        assert!(simulate_spend(100_000, &entries, today, today, max, 5_000).safe);
        assert!(!simulate_spend(100_000, &entries, today, today, max + 1, 5_000).safe);
    }

    #[test]
    fn test_spend_before_later_dip() {
        // The dip after the spend date constrains the answer
        let today = d("2025-01-01");
        let entries = vec![entry("2025-01-15", EntryKind::Commitment, -70_000, 1)];
        let decision = simulate_spend(100_000, &entries, today, today, 0, 5_000);
        // After the commitment: 100000 - x - 70000 >= 5000 → x <= 25000
        assert_eq!(decision.max_safe_today_cents, 25_000);
        assert_eq!(decision.new_min_balance_date, Some(d("2025-01-15")));
    }

    #[test]
    fn test_already_breached_baseline() {
        // Even zero spend is unsafe; nothing can be spent
        let today = d("2025-01-01");
        let entries = vec![entry("2025-01-03", EntryKind::Commitment, -99_000, 1)];
        let decision = simulate_spend(100_000, &entries, today, today, 0, 5_000);
        assert!(!decision.safe);
        assert_eq!(decision.max_safe_today_cents, 0);
    }

    #[test]
    fn test_tight_days_reported() {
        let today = d("2025-01-01");
        // Balance lands exactly at floor + 500 on the 3rd, recovers later
        let entries = vec![
            entry("2025-01-03", EntryKind::Commitment, -94_500, 1),
            entry("2025-01-07", EntryKind::Inflow, 50_000, 1),
        ];
        let decision = simulate_spend(100_000, &entries, today, today, 0, 5_000);
        assert_eq!(decision.tight_days, vec![d("2025-01-03")]);
    }

    #[test]
    fn test_negative_amount_is_treated_as_magnitude() {
        let today = d("2025-01-01");
        let a = simulate_spend(100_000, &[], today, today, 10_000, 0);
        let b = simulate_spend(100_000, &[], today, today, -10_000, 0);
        assert_eq!(a.new_min_balance_cents, b.new_min_balance_cents);
    }
}
