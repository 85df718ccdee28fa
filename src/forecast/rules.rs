//! Recurring-rule and business-day-shift primitives.
//!
//! Due rules form a closed variant set parsed from the `due_rule` /
//! `repeat_rule` strings stored on commitments, inflows and key events.
//! Occurrence generation and shifting are pure date math with no wall
//! clock involved.

use chrono::{Datelike, Days, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShiftPolicy {
    AsScheduled,
    PrevBusinessDay,
    NextBusinessDay,
}

impl ShiftPolicy {
    /// Parse a stored policy string; unknown values fall back to
    /// `AS_SCHEDULED` rather than failing the whole expansion.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_uppercase()).as_deref() {
            Some("PREV_BUSINESS_DAY") => ShiftPolicy::PrevBusinessDay,
            Some("NEXT_BUSINESS_DAY") => ShiftPolicy::NextBusinessDay,
            _ => ShiftPolicy::AsScheduled,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ShiftPolicy::AsScheduled => "AS_SCHEDULED",
            ShiftPolicy::PrevBusinessDay => "PREV_BUSINESS_DAY",
            ShiftPolicy::NextBusinessDay => "NEXT_BUSINESS_DAY",
        }
    }
}

/// Business day = Mon-Fri. No holiday calendar in v1.
pub fn is_business_day(d: NaiveDate) -> bool {
    !matches!(d.weekday(), Weekday::Sat | Weekday::Sun)
}

pub fn prev_business_day(mut d: NaiveDate) -> NaiveDate {
    while !is_business_day(d) {
        d = d - Days::new(1);
    }
    d
}

pub fn next_business_day(mut d: NaiveDate) -> NaiveDate {
    while !is_business_day(d) {
        d = d + Days::new(1);
    }
    d
}

/// Apply a shift policy to a nominal date.
///
/// Returns `(shifted_date, shift_applied)`.
///
/// - `PREV_BUSINESS_DAY` with a `window_days` limit only shifts when the
///   move stays within the window; otherwise the nominal date is kept.
/// - `NEXT_BUSINESS_DAY` ignores the window.
pub fn apply_shift(
    d: NaiveDate,
    policy: ShiftPolicy,
    window_days: Option<i64>,
) -> (NaiveDate, bool) {
    match policy {
        ShiftPolicy::AsScheduled => (d, false),
        ShiftPolicy::PrevBusinessDay => {
            if is_business_day(d) {
                return (d, false);
            }
            let shifted = prev_business_day(d);
            if let Some(window) = window_days {
                if (d - shifted).num_days() > window {
                    return (d, false);
                }
            }
            (shifted, true)
        }
        ShiftPolicy::NextBusinessDay => {
            if is_business_day(d) {
                return (d, false);
            }
            (next_business_day(d), true)
        }
    }
}

/// Month stepping that clamps to the last day of short months.
pub fn add_months(d: NaiveDate, months: i32) -> NaiveDate {
    let zero_based = d.month0() as i32 + months;
    let year = d.year() + zero_based.div_euclid(12);
    let month = zero_based.rem_euclid(12) as u32 + 1;
    let last = last_day_of_month(year, month);
    NaiveDate::from_ymd_opt(year, month, d.day().min(last))
        .unwrap_or_else(|| NaiveDate::from_ymd_opt(year, month, 1).expect("valid first of month"))
}

fn last_day_of_month(year: i32, month: u32) -> u32 {
    let (next_y, next_m) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_y, next_m, 1)
        .expect("valid first of month")
        .pred_opt()
        .expect("non-epoch date")
        .day()
}

/// Closed recurrence variant set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueRule {
    /// Single occurrence at the seed date.
    FixedDate,
    /// Monthly on the seed's day-of-month (clamped in short months).
    MonthlyOn,
    /// Weekly on the seed's weekday.
    WeeklyOn,
    /// Every `n` days from the seed date.
    EveryNDays(u32),
}

impl DueRule {
    /// Parse a stored rule string. Unknown rules (including legacy annual
    /// tokens) degrade to a one-off at the seed date.
    pub fn parse(rule: Option<&str>) -> Self {
        let norm = rule.unwrap_or("ONE_OFF").trim().to_uppercase();
        match norm.as_str() {
            "WEEKLY" => DueRule::WeeklyOn,
            "BIWEEKLY" => DueRule::EveryNDays(14),
            "MONTHLY" | "MONTHLY_BY_DATE" => DueRule::MonthlyOn,
            other => {
                if let Some(n) = other.strip_prefix("EVERY_N_DAYS:") {
                    if let Ok(n) = n.trim().parse::<u32>() {
                        if n > 0 {
                            return DueRule::EveryNDays(n);
                        }
                    }
                }
                DueRule::FixedDate
            }
        }
    }

    /// All occurrence dates in `[start, end]` seeded at `seed`.
    ///
    /// The seed anchors the cycle's phase (day-of-month, weekday, n-day
    /// stride). Occurrences before `start` are stepped over, never emitted.
    pub fn occurrences(&self, seed: NaiveDate, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        if end < start {
            return Vec::new();
        }
        let mut out = Vec::new();
        match self {
            DueRule::FixedDate => {
                if seed >= start && seed <= end {
                    out.push(seed);
                }
            }
            DueRule::WeeklyOn => {
                Self::stride_occurrences(seed, start, end, 7, &mut out);
            }
            DueRule::EveryNDays(n) => {
                Self::stride_occurrences(seed, start, end, *n as i64, &mut out);
            }
            DueRule::MonthlyOn => {
                let mut d = seed;
                while d < start {
                    d = add_months(d, 1);
                }
                while d <= end {
                    out.push(d);
                    d = add_months(d, 1);
                }
            }
        }
        out
    }

    /// Fixed-stride occurrences, fast-forwarded past `start` in one step.
    fn stride_occurrences(
        seed: NaiveDate,
        start: NaiveDate,
        end: NaiveDate,
        stride: i64,
        out: &mut Vec<NaiveDate>,
    ) {
        let mut d = if seed < start {
            let gap = (start - seed).num_days();
            seed + Days::new((((gap + stride - 1) / stride) * stride) as u64)
        } else {
            seed
        };
        while d <= end {
            out.push(d);
            d = d + Days::new(stride as u64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().expect("valid date")
    }

    #[test]
    fn test_business_day_helpers() {
        // 2025-01-04 is a Saturday
        assert!(!is_business_day(d("2025-01-04")));
        assert!(is_business_day(d("2025-01-03")));
        assert_eq!(prev_business_day(d("2025-01-05")), d("2025-01-03"));
        assert_eq!(next_business_day(d("2025-01-04")), d("2025-01-06"));
        assert_eq!(prev_business_day(d("2025-01-02")), d("2025-01-02"));
    }

    #[test]
    fn test_shift_prev_with_window() {
        // Sunday 2025-05-04 → Friday 2025-05-02 is a 2-day move
        let (shifted, applied) = apply_shift(d("2025-05-04"), ShiftPolicy::PrevBusinessDay, Some(2));
        assert!(applied);
        assert_eq!(shifted, d("2025-05-02"));

        // A 1-day window cannot reach Friday; nominal date kept
        let (kept, applied) = apply_shift(d("2025-05-04"), ShiftPolicy::PrevBusinessDay, Some(1));
        assert!(!applied);
        assert_eq!(kept, d("2025-05-04"));
    }

    #[test]
    fn test_shift_next_ignores_window() {
        let (shifted, applied) = apply_shift(d("2025-01-04"), ShiftPolicy::NextBusinessDay, Some(0));
        assert!(applied);
        assert_eq!(shifted, d("2025-01-06"));
    }

    #[test]
    fn test_shift_noop_on_weekday() {
        let (same, applied) = apply_shift(d("2025-01-03"), ShiftPolicy::PrevBusinessDay, None);
        assert!(!applied);
        assert_eq!(same, d("2025-01-03"));
        let (same, applied) = apply_shift(d("2025-01-04"), ShiftPolicy::AsScheduled, None);
        assert!(!applied);
        assert_eq!(same, d("2025-01-04"));
    }

    #[test]
    fn test_add_months_clamps() {
        assert_eq!(add_months(d("2025-01-31"), 1), d("2025-02-28"));
        assert_eq!(add_months(d("2025-01-15"), 1), d("2025-02-15"));
        assert_eq!(add_months(d("2025-12-05"), 1), d("2026-01-05"));
        assert_eq!(add_months(d("2024-01-31"), 1), d("2024-02-29"));
    }

    #[test]
    fn test_rule_parsing() {
        assert_eq!(DueRule::parse(Some("monthly")), DueRule::MonthlyOn);
        assert_eq!(DueRule::parse(Some("MONTHLY_BY_DATE")), DueRule::MonthlyOn);
        assert_eq!(DueRule::parse(Some("Weekly")), DueRule::WeeklyOn);
        assert_eq!(DueRule::parse(Some("BIWEEKLY")), DueRule::EveryNDays(14));
        assert_eq!(DueRule::parse(Some("EVERY_N_DAYS:10")), DueRule::EveryNDays(10));
        assert_eq!(DueRule::parse(Some("ONE_OFF")), DueRule::FixedDate);
        assert_eq!(DueRule::parse(None), DueRule::FixedDate);
        assert_eq!(DueRule::parse(Some("gibberish")), DueRule::FixedDate);
        assert_eq!(DueRule::parse(Some("EVERY_N_DAYS:0")), DueRule::FixedDate);
    }

    #[test]
    fn test_monthly_occurrences() {
        let rule = DueRule::MonthlyOn;
        let occ = rule.occurrences(d("2025-01-04"), d("2025-01-01"), d("2025-03-31"));
        assert_eq!(occ, vec![d("2025-01-04"), d("2025-02-04"), d("2025-03-04")]);
    }

    #[test]
    fn test_weekly_occurrences_preserve_phase() {
        let rule = DueRule::WeeklyOn;
        // Seed is a Saturday; the window starts mid-cycle on a Friday.
        // Emitted dates stay on the seed's weekday.
        let occ = rule.occurrences(d("2025-01-04"), d("2025-01-10"), d("2025-01-24"));
        assert_eq!(occ, vec![d("2025-01-11"), d("2025-01-18")]);
    }

    #[test]
    fn test_monthly_occurrences_preserve_day_of_month() {
        let rule = DueRule::MonthlyOn;
        // Window opens after the January nominal date; February's is next.
        let occ = rule.occurrences(d("2025-01-04"), d("2025-01-10"), d("2025-03-31"));
        assert_eq!(occ, vec![d("2025-02-04"), d("2025-03-04")]);
    }

    #[test]
    fn test_one_off_outside_window() {
        let rule = DueRule::FixedDate;
        assert!(rule
            .occurrences(d("2025-06-01"), d("2025-01-01"), d("2025-05-31"))
            .is_empty());
        assert!(rule
            .occurrences(d("2024-12-31"), d("2025-01-01"), d("2025-05-31"))
            .is_empty());
        assert_eq!(
            rule.occurrences(d("2025-03-01"), d("2025-01-01"), d("2025-05-31")),
            vec![d("2025-03-01")]
        );
    }

    #[test]
    fn test_empty_window() {
        let rule = DueRule::MonthlyOn;
        assert!(rule
            .occurrences(d("2025-01-04"), d("2025-02-01"), d("2025-01-01"))
            .is_empty());
    }
}
