//! Post-ingest snapshot job and the digest derived from it.
//!
//! A snapshot persists the computed forecast as an append-only row; the
//! digest is the compact daily summary the overview endpoint serves. A
//! failed run writes no row, so readers keep the previous snapshot and the
//! UI shows staleness from `created_at`.

use chrono::{Days, NaiveDate};
use serde::Serialize;

use crate::config::{Config, DEFAULT_HORIZON_DAYS};
use crate::db::BudgetDb;
use crate::error::AppResult;
use crate::forecast::{anchor, EntryKind, Forecast};

#[derive(Debug, Clone, Serialize)]
pub struct DigestCommitment {
    pub date: NaiveDate,
    pub name: String,
    pub amount_cents: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DigestKeyEvent {
    pub date: NaiveDate,
    pub days_until: i64,
    pub name: String,
    pub amount_cents: i64,
    pub source_id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotInfo {
    pub created_at: Option<String>,
    pub horizon_start: Option<String>,
    pub horizon_end: Option<String>,
    pub stale: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Digest {
    pub current_balance_cents: i64,
    pub safe_to_spend_today_cents: i64,
    pub buffer_floor_cents: i64,
    pub next_cliff_date: Option<NaiveDate>,
    pub min_balance_cents: Option<i64>,
    pub min_balance_date: Option<NaiveDate>,
    pub top_commitments_next_14_days: Vec<DigestCommitment>,
    pub upcoming_key_events: Vec<DigestKeyEvent>,
    pub snapshot: SnapshotInfo,
}

/// Derive the digest from a computed forecast.
///
/// Top commitments: within 14 days of `today`, largest magnitude first,
/// ties by date then name, capped at five. Key events: inside their lead
/// window, soonest first.
pub fn derive_digest(
    forecast: &Forecast,
    today: NaiveDate,
    current_balance_cents: i64,
    buffer_floor_cents: i64,
    snapshot: SnapshotInfo,
) -> Digest {
    let window_end = today + Days::new(14);

    let mut commitments: Vec<DigestCommitment> = forecast
        .entries
        .iter()
        .filter(|e| e.kind == EntryKind::Commitment && e.date >= today && e.date <= window_end)
        .map(|e| DigestCommitment {
            date: e.date,
            name: e.name.clone(),
            amount_cents: e.amount_cents,
        })
        .collect();
    commitments.sort_by(|a, b| {
        b.amount_cents
            .abs()
            .cmp(&a.amount_cents.abs())
            .then(a.date.cmp(&b.date))
            .then(a.name.cmp(&b.name))
    });
    commitments.truncate(5);

    let mut key_events: Vec<DigestKeyEvent> = forecast
        .entries
        .iter()
        .filter(|e| {
            e.kind == EntryKind::KeyEvent
                && e.date >= today
                && e.is_within_lead_window == Some(true)
        })
        .map(|e| DigestKeyEvent {
            date: e.date,
            days_until: (e.date - today).num_days(),
            name: e.name.clone(),
            amount_cents: e.amount_cents,
            source_id: e.source_id,
        })
        .collect();
    key_events.sort_by(|a, b| {
        (a.date, -a.amount_cents.abs(), a.name.as_str())
            .cmp(&(b.date, -b.amount_cents.abs(), b.name.as_str()))
    });

    Digest {
        current_balance_cents,
        safe_to_spend_today_cents: forecast.safe_to_spend(today, buffer_floor_cents),
        buffer_floor_cents,
        next_cliff_date: forecast.next_cliff(today, buffer_floor_cents),
        min_balance_cents: forecast.min_balance_cents,
        min_balance_date: forecast.min_balance_date,
        top_commitments_next_14_days: commitments,
        upcoming_key_events: key_events,
        snapshot,
    }
}

/// Serialize the forecast into the snapshot payload: compact JSON, stable
/// key order (serde_json maps are BTree-backed).
fn snapshot_payload(forecast: &Forecast) -> AppResult<String> {
    let payload = serde_json::json!({
        "opening_balance_cents": forecast.opening_balance_cents,
        "entries": forecast.entries,
        "balances": forecast
            .balances
            .iter()
            .map(|(d, b)| (d.to_string(), *b))
            .collect::<std::collections::BTreeMap<String, i64>>(),
        "meta": {
            "horizon": {
                "start": forecast.horizon_start.to_string(),
                "end": forecast.horizon_end.to_string(),
            },
        },
    });
    serde_json::to_string(&payload)
        .map_err(|e| crate::error::AppError::Integrity(format!("snapshot payload: {e}")))
}

/// Compute and persist a snapshot for `[today, today + horizon]`, then
/// derive the digest. Alert checks run after the row commits.
pub fn run_snapshot(db: &BudgetDb, config: &Config, today: NaiveDate) -> AppResult<Digest> {
    let horizon_end = today + Days::new(DEFAULT_HORIZON_DAYS as u64);
    let forecast = Forecast::compute(db, today, horizon_end, &[])?;
    let payload = snapshot_payload(&forecast)?;

    let created_at = BudgetDb::now_iso();
    db.with_transaction(|db| {
        db.insert_snapshot(
            &created_at,
            &today.to_string(),
            &horizon_end.to_string(),
            &payload,
            forecast.min_balance_cents,
            forecast.min_balance_date.map(|d| d.to_string()).as_deref(),
        )?;
        Ok(())
    })?;
    log::info!(
        "Snapshot stored at {created_at} for {today}..{horizon_end} (min {:?})",
        forecast.min_balance_cents
    );

    let current_balance = anchor::opening_balance(db, today, &[])?;
    let digest = derive_digest(
        &forecast,
        today,
        current_balance,
        config.buffer_floor_cents,
        SnapshotInfo {
            created_at: Some(created_at),
            horizon_start: Some(today.to_string()),
            horizon_end: Some(horizon_end.to_string()),
            stale: false,
        },
    );

    if let Err(e) = crate::alerts::run_alert_checks(db, config) {
        log::error!("Alert checks failed after snapshot: {e}");
    }

    Ok(digest)
}

/// Digest for the overview endpoint, preferring the latest snapshot's
/// horizon and flagging staleness when that snapshot predates `today`.
pub fn overview_digest(db: &BudgetDb, config: &Config, today: NaiveDate) -> AppResult<Digest> {
    let meta = db.latest_snapshot()?;
    let (start, end, info) = match &meta {
        Some(snap) => {
            let start: NaiveDate = snap.horizon_start.parse().unwrap_or(today);
            let end: NaiveDate = snap
                .horizon_end
                .parse()
                .unwrap_or(today + Days::new(DEFAULT_HORIZON_DAYS as u64));
            let today_str = today.to_string();
            let stale = snap.created_at.get(..10) != Some(today_str.as_str());
            (
                start,
                end,
                SnapshotInfo {
                    created_at: Some(snap.created_at.clone()),
                    horizon_start: Some(snap.horizon_start.clone()),
                    horizon_end: Some(snap.horizon_end.clone()),
                    stale,
                },
            )
        }
        None => (
            today,
            today + Days::new(DEFAULT_HORIZON_DAYS as u64),
            SnapshotInfo {
                created_at: None,
                horizon_start: None,
                horizon_end: None,
                stale: true,
            },
        ),
    };

    let forecast = Forecast::compute(db, start.max(today), end.max(today), &[])?;
    let current_balance = anchor::opening_balance(db, today, &[])?;
    Ok(derive_digest(
        &forecast,
        today,
        current_balance,
        config.buffer_floor_cents,
        info,
    ))
}
