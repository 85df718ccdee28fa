//! Calendar expansion: materialize scheduled inflows, commitments and key
//! spend events into a dated, deterministically ordered entry list.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::db::BudgetDb;
use crate::error::AppResult;
use crate::forecast::rules::{apply_shift, DueRule, ShiftPolicy};

/// Entry kinds in their canonical ordering position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Inflow,
    Commitment,
    KeyEvent,
}

/// One dated ledger line of the deterministic forecast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub date: NaiveDate,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub name: String,
    pub amount_cents: i64,
    pub source_id: i64,
    pub shift_applied: bool,
    pub policy: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui_marker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_within_lead_window: Option<bool>,
}

/// Decorative calendar marker carried in the payload.
fn ui_marker(kind: EntryKind, name: &str) -> Option<String> {
    match kind {
        EntryKind::Commitment => Some("📄".to_string()),
        EntryKind::KeyEvent => {
            let n = name.to_lowercase();
            let marker = if n.contains("birthday") || n.contains("bday") {
                "🎂"
            } else if n.contains("christmas") || n.contains("xmas") || n.contains("holiday") {
                "🎄"
            } else {
                "🎯"
            };
            Some(marker.to_string())
        }
        EntryKind::Inflow => None,
    }
}

/// Expand all scheduled items into dated entries across `[start, end]`.
///
/// - Inflows default to `NEXT_BUSINESS_DAY` and add to the balance.
/// - Commitments default to `PREV_BUSINESS_DAY`, honor
///   `flexible_window_days`, and subtract.
/// - Key events use their stored policy; a positive planned amount is an
///   expense (subtracts), a negative one is income (adds).
/// - The lead-window flag is evaluated against `start` so identical store
///   state yields identical output regardless of when it is computed.
///
/// Ordering is `(date, kind, source_id)`, stable across runs.
pub fn expand_calendar(db: &BudgetDb, start: NaiveDate, end: NaiveDate) -> AppResult<Vec<Entry>> {
    if end < start {
        return Ok(Vec::new());
    }

    let mut entries: Vec<Entry> = Vec::new();

    for inflow in db.get_all_scheduled_inflows()? {
        let Some(seed) = parse_day(inflow.next_due_date.as_deref()) else {
            continue;
        };
        let rule = DueRule::parse(Some(&inflow.due_rule));
        for nominal in rule.occurrences(seed, start, end) {
            let (date, shifted) = apply_shift(nominal, ShiftPolicy::NextBusinessDay, None);
            entries.push(Entry {
                date,
                kind: EntryKind::Inflow,
                name: inflow.name.clone(),
                amount_cents: inflow.amount_cents.abs(),
                source_id: inflow.id,
                shift_applied: shifted,
                policy: ShiftPolicy::NextBusinessDay.as_str().to_string(),
                ui_marker: None,
                is_within_lead_window: None,
            });
        }
    }

    for commitment in db.get_all_commitments()? {
        let Some(seed) = parse_day(commitment.next_due_date.as_deref()) else {
            continue;
        };
        let rule = DueRule::parse(Some(&commitment.due_rule));
        let policy = match commitment.shift_policy.as_deref() {
            Some(raw) => ShiftPolicy::parse(Some(raw)),
            None => ShiftPolicy::PrevBusinessDay,
        };
        for nominal in rule.occurrences(seed, start, end) {
            let (date, shifted) = apply_shift(nominal, policy, commitment.flexible_window_days);
            entries.push(Entry {
                date,
                kind: EntryKind::Commitment,
                name: commitment.name.clone(),
                amount_cents: -commitment.amount_cents.abs(),
                source_id: commitment.id,
                shift_applied: shifted,
                policy: policy.as_str().to_string(),
                ui_marker: ui_marker(EntryKind::Commitment, &commitment.name),
                is_within_lead_window: None,
            });
        }
    }

    for event in db.get_all_key_events()? {
        let Some(seed) = parse_day(Some(&event.event_date)) else {
            continue;
        };
        let rule = DueRule::parse(event.repeat_rule.as_deref());
        let policy = ShiftPolicy::parse(event.shift_policy.as_deref());
        // Positive planned amount = expense, negative = income
        let amount = -event.planned_amount_cents.unwrap_or(0);
        for nominal in rule.occurrences(seed, start, end) {
            let (date, shifted) = apply_shift(nominal, policy, None);
            let lead = event.lead_time_days.map(|lead_days| {
                let days_until = (date - start).num_days();
                (0..=lead_days).contains(&days_until)
            });
            entries.push(Entry {
                date,
                kind: EntryKind::KeyEvent,
                name: event.name.clone(),
                amount_cents: amount,
                source_id: event.id,
                shift_applied: shifted,
                policy: policy.as_str().to_string(),
                ui_marker: ui_marker(EntryKind::KeyEvent, &event.name),
                is_within_lead_window: lead,
            });
        }
    }

    entries.sort_by(|a, b| {
        (a.date, a.kind, a.source_id).cmp(&(b.date, b.kind, b.source_id))
    });
    Ok(entries)
}

fn parse_day(value: Option<&str>) -> Option<NaiveDate> {
    value.and_then(|v| v.get(..10)).and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;

    fn d(s: &str) -> NaiveDate {
        s.parse().expect("valid date")
    }

    fn seed_commitment(db: &BudgetDb, name: &str, amount: i64, rule: &str, due: &str, window: Option<i64>) {
        db.conn_ref()
            .execute(
                "INSERT INTO commitments
                    (name, amount_cents, due_rule, next_due_date, account_id, flexible_window_days, type)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5, 'bill')",
                rusqlite::params![name, amount, rule, due, window],
            )
            .expect("seed commitment");
    }

    fn seed_inflow(db: &BudgetDb, name: &str, amount: i64, rule: &str, due: &str) {
        db.conn_ref()
            .execute(
                "INSERT INTO scheduled_inflows (name, amount_cents, due_rule, next_due_date, account_id, type)
                 VALUES (?1, ?2, ?3, ?4, 1, 'payroll')",
                rusqlite::params![name, amount, rule, due],
            )
            .expect("seed inflow");
    }

    fn seed_event(db: &BudgetDb, name: &str, date: &str, planned: i64, lead: Option<i64>) {
        db.conn_ref()
            .execute(
                "INSERT INTO key_spend_events
                    (name, event_date, repeat_rule, planned_amount_cents, lead_time_days, shift_policy)
                 VALUES (?1, ?2, 'ONE_OFF', ?3, ?4, 'AS_SCHEDULED')",
                rusqlite::params![name, date, planned, lead],
            )
            .expect("seed event");
    }

    #[test]
    fn test_weekend_commitment_shifts_to_friday() {
        // 2025-01-04 is a Saturday; PREV_BUSINESS_DAY lands on Friday the 3rd
        let db = test_db();
        seed_commitment(&db, "Rent", 120_000, "MONTHLY", "2025-01-04", None);

        let entries = expand_calendar(&db, d("2025-01-01"), d("2025-01-10")).expect("expand");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].date, d("2025-01-03"));
        assert!(entries[0].shift_applied);
        assert_eq!(entries[0].amount_cents, -120_000);
        assert_eq!(entries[0].policy, "PREV_BUSINESS_DAY");
        assert_eq!(entries[0].ui_marker.as_deref(), Some("📄"));
    }

    #[test]
    fn test_flexible_window_allows_two_day_shift() {
        // 2025-05-04 is a Sunday; Friday the 2nd is within a 2-day window
        let db = test_db();
        seed_commitment(&db, "Rent", 120_000, "MONTHLY", "2025-05-04", Some(2));

        let entries = expand_calendar(&db, d("2025-05-01"), d("2025-05-10")).expect("expand");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].date, d("2025-05-02"));
        assert!(entries[0].shift_applied);
    }

    #[test]
    fn test_flexible_window_blocks_long_shift() {
        // Sunday with a 1-day window cannot reach Friday; due date kept
        let db = test_db();
        seed_commitment(&db, "Rent", 120_000, "MONTHLY", "2025-05-04", Some(1));

        let entries = expand_calendar(&db, d("2025-05-01"), d("2025-05-10")).expect("expand");
        assert_eq!(entries[0].date, d("2025-05-04"));
        assert!(!entries[0].shift_applied);
    }

    #[test]
    fn test_inflow_shifts_forward() {
        // Saturday payday rolls to Monday
        let db = test_db();
        seed_inflow(&db, "Payday", 250_000, "ONE_OFF", "2025-01-04");

        let entries = expand_calendar(&db, d("2025-01-01"), d("2025-01-10")).expect("expand");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].date, d("2025-01-06"));
        assert_eq!(entries[0].amount_cents, 250_000);
        assert_eq!(entries[0].kind, EntryKind::Inflow);
    }

    #[test]
    fn test_key_event_sign_convention() {
        let db = test_db();
        // Positive planned amount is an expense
        seed_event(&db, "Birthday", "2025-01-08", 5_000, Some(14));
        // Negative planned amount is income
        seed_event(&db, "Tax Refund", "2025-01-09", -20_000, Some(30));

        let entries = expand_calendar(&db, d("2025-01-01"), d("2025-01-31")).expect("expand");
        let birthday = entries.iter().find(|e| e.name == "Birthday").expect("birthday");
        let refund = entries.iter().find(|e| e.name == "Tax Refund").expect("refund");
        assert_eq!(birthday.amount_cents, -5_000);
        assert_eq!(refund.amount_cents, 20_000);
        assert_eq!(birthday.ui_marker.as_deref(), Some("🎂"));
        assert_eq!(refund.ui_marker.as_deref(), Some("🎯"));
    }

    #[test]
    fn test_lead_window_flag() {
        let db = test_db();
        seed_event(&db, "Trip", "2025-01-10", 10_000, Some(14));
        seed_event(&db, "Concert", "2025-02-20", 10_000, Some(14));

        let entries = expand_calendar(&db, d("2025-01-01"), d("2025-03-01")).expect("expand");
        let trip = entries.iter().find(|e| e.name == "Trip").expect("trip");
        let concert = entries.iter().find(|e| e.name == "Concert").expect("concert");
        assert_eq!(trip.is_within_lead_window, Some(true));
        assert_eq!(concert.is_within_lead_window, Some(false));
    }

    #[test]
    fn test_ordering_is_deterministic() {
        let db = test_db();
        seed_event(&db, "Gift", "2025-01-06", 1_000, None);
        seed_commitment(&db, "Rent", 120_000, "ONE_OFF", "2025-01-06", None);
        seed_inflow(&db, "Payday", 250_000, "ONE_OFF", "2025-01-06");

        let first = expand_calendar(&db, d("2025-01-01"), d("2025-01-31")).expect("expand");
        let second = expand_calendar(&db, d("2025-01-01"), d("2025-01-31")).expect("expand");

        let kinds: Vec<EntryKind> = first.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![EntryKind::Inflow, EntryKind::Commitment, EntryKind::KeyEvent],
            "same-day entries order inflow < commitment < key_event"
        );
        let as_json = serde_json::to_string(&first).expect("serialize");
        let again = serde_json::to_string(&second).expect("serialize");
        assert_eq!(as_json, again, "byte-identical across runs");
    }

    #[test]
    fn test_empty_and_inverted_windows() {
        let db = test_db();
        seed_commitment(&db, "Rent", 120_000, "MONTHLY", "2025-01-04", None);
        assert!(expand_calendar(&db, d("2025-02-01"), d("2025-01-01"))
            .expect("inverted")
            .is_empty());
        let db_empty = test_db();
        assert!(expand_calendar(&db_empty, d("2025-01-01"), d("2025-01-31"))
            .expect("empty store")
            .is_empty());
    }
}
