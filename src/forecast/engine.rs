//! Balance-series math: day-by-day composition of opening balance and
//! expanded entries, plus the values derived from the series.
//!
//! Everything here is pure; the only inputs are the opening balance and the
//! entry list, so a fixed store state always yields the same series.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::forecast::calendar::Entry;

/// End-of-day balances for every date carrying at least one entry.
///
/// The representation is sparse; consumers carry the last balance forward
/// across gap days. `opening_cents` is the balance at the close of the day
/// before the first entry.
pub fn compute_balances(opening_cents: i64, entries: &[Entry]) -> BTreeMap<NaiveDate, i64> {
    let mut balances = BTreeMap::new();
    let mut deltas: BTreeMap<NaiveDate, i64> = BTreeMap::new();
    for entry in entries {
        *deltas.entry(entry.date).or_insert(0) += entry.amount_cents;
    }
    let mut running = opening_cents;
    for (date, delta) in deltas {
        running += delta;
        balances.insert(date, running);
    }
    balances
}

/// Earliest date holding the series minimum, with that balance.
pub fn min_balance(balances: &BTreeMap<NaiveDate, i64>) -> Option<(NaiveDate, i64)> {
    let mut best: Option<(NaiveDate, i64)> = None;
    for (&date, &bal) in balances {
        match best {
            Some((_, current)) if bal >= current => {}
            _ => best = Some((date, bal)),
        }
    }
    best
}

/// First date at or after `from` whose balance is at or below the floor.
pub fn next_cliff_date(
    balances: &BTreeMap<NaiveDate, i64>,
    from: NaiveDate,
    buffer_floor_cents: i64,
) -> Option<NaiveDate> {
    balances
        .iter()
        .find(|(&date, &bal)| date >= from && bal <= buffer_floor_cents)
        .map(|(&date, _)| date)
}

/// Balance carried into `date`: the latest series value at or before it,
/// else the opening balance.
pub fn balance_on(
    balances: &BTreeMap<NaiveDate, i64>,
    opening_cents: i64,
    date: NaiveDate,
) -> i64 {
    balances
        .range(..=date)
        .next_back()
        .map(|(_, &bal)| bal)
        .unwrap_or(opening_cents)
}

/// Minimum balance from `from` onward, including the carried-in balance on
/// `from` itself. An empty tail means the balance never changes again, so
/// the carried value is the minimum.
pub fn min_balance_from(
    balances: &BTreeMap<NaiveDate, i64>,
    opening_cents: i64,
    from: NaiveDate,
) -> i64 {
    let carried = balance_on(balances, opening_cents, from);
    balances
        .range(from..)
        .map(|(_, &bal)| bal)
        .fold(carried, i64::min)
}
