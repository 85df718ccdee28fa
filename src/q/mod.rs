//! Deterministic questionnaire layer: primitive queries with evidentiary
//! transaction ids, pre-composed packs, and hashed exports.

pub mod export;
pub mod packs;
pub mod queries;

use chrono::{Datelike, Days, NaiveDate};
use serde::Serialize;

/// A resolved query window with the token it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Period {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub token: String,
}

/// The shape every primitive query answers with.
#[derive(Debug, Clone, Serialize)]
pub struct QueryValue {
    pub value_cents: i64,
    pub window_start: String,
    pub window_end: String,
    pub method: String,
    pub evidence_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<serde_json::Value>,
}

impl QueryValue {
    pub fn new(
        value_cents: i64,
        period: &Period,
        method: impl Into<String>,
        evidence_ids: Vec<String>,
    ) -> Self {
        Self {
            value_cents,
            window_start: period.start.to_string(),
            window_end: period.end.to_string(),
            method: method.into(),
            evidence_ids,
            label: None,
            rows: None,
        }
    }
}

/// Window covering the last `n` complete calendar months before `today`.
pub fn last_full_months(n: u32, today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let first_of_month = NaiveDate::from_ymd_opt(today.year(), today.month(), 1).unwrap_or(today);
    let end = first_of_month.pred_opt().unwrap_or(first_of_month);
    let months_back = n.max(1) - 1;
    let start_anchor = crate::forecast::rules::add_months(
        NaiveDate::from_ymd_opt(end.year(), end.month(), 1).unwrap_or(end),
        -(months_back as i32),
    );
    (start_anchor, end)
}

/// Calendar months spanned by `[start, end]`, inclusive.
pub fn months_between(start: NaiveDate, end: NaiveDate) -> i64 {
    if end < start {
        return 0;
    }
    (end.year() as i64 - start.year() as i64) * 12 + (end.month() as i64 - start.month() as i64) + 1
}

/// Parse a period token:
/// - `3m_full` (default): the last three complete calendar months
/// - `Nm`: from the first of the month `N-1` months back through today
/// - `Nd`: the last `N` days through today
///
/// Anything unrecognized falls back to `3m_full`.
pub fn parse_period_token(token: Option<&str>, today: NaiveDate) -> Period {
    let raw = token.map(|t| t.trim().to_lowercase()).unwrap_or_default();
    if raw.is_empty() || raw == "3m_full" {
        let (start, end) = last_full_months(3, today);
        return Period {
            start,
            end,
            token: "3m_full".to_string(),
        };
    }

    if let Some(months) = raw.strip_suffix('m').and_then(|v| v.parse::<u32>().ok()) {
        let months = months.max(1);
        let anchor = NaiveDate::from_ymd_opt(today.year(), today.month(), 1).unwrap_or(today);
        let start = crate::forecast::rules::add_months(anchor, -((months - 1) as i32));
        return Period {
            start,
            end: today,
            token: raw,
        };
    }
    if let Some(days) = raw.strip_suffix('d').and_then(|v| v.parse::<u64>().ok()) {
        let days = days.max(1);
        return Period {
            start: today - Days::new(days - 1),
            end: today,
            token: raw,
        };
    }

    let (start, end) = last_full_months(3, today);
    Period {
        start,
        end,
        token: "3m_full".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().expect("valid date")
    }

    #[test]
    fn test_last_full_months() {
        let (start, end) = last_full_months(3, d("2025-06-15"));
        assert_eq!(start, d("2025-03-01"));
        assert_eq!(end, d("2025-05-31"));

        // Year boundary
        let (start, end) = last_full_months(3, d("2025-02-10"));
        assert_eq!(start, d("2024-11-01"));
        assert_eq!(end, d("2025-01-31"));
    }

    #[test]
    fn test_parse_period_tokens() {
        let today = d("2025-06-15");

        let default = parse_period_token(None, today);
        assert_eq!(default.token, "3m_full");
        assert_eq!(default.start, d("2025-03-01"));
        assert_eq!(default.end, d("2025-05-31"));

        let months = parse_period_token(Some("2m"), today);
        assert_eq!(months.start, d("2025-05-01"));
        assert_eq!(months.end, today);

        let days = parse_period_token(Some("30d"), today);
        assert_eq!(days.start, d("2025-05-17"));
        assert_eq!(days.end, today);

        let junk = parse_period_token(Some("whenever"), today);
        assert_eq!(junk.token, "3m_full");
    }

    #[test]
    fn test_months_between() {
        assert_eq!(months_between(d("2025-03-01"), d("2025-05-31")), 3);
        assert_eq!(months_between(d("2025-03-15"), d("2025-03-20")), 1);
        assert_eq!(months_between(d("2025-05-01"), d("2025-03-01")), 0);
        assert_eq!(months_between(d("2024-11-01"), d("2025-01-31")), 3);
    }
}
