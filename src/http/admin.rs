//! Mutating endpoints: key events, anchors and ingest triggers. Every
//! handler passes the write guards before touching the store.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::forecast::WindowParams;
use super::{auth, parse_date, ApiResult, AppState};
use crate::db::{DbAnchor, DbKeyEvent};
use crate::error::AppError;
use crate::ingest::client::UpstreamClient;
use crate::ingest::IngestReport;

// ---------------------------------------------------------------------------
// Key events
// ---------------------------------------------------------------------------

pub async fn list_key_events(
    State(state): State<AppState>,
    Query(params): Query<WindowParams>,
) -> ApiResult<Json<Vec<DbKeyEvent>>> {
    // Validate bounds before they reach SQL
    if let Some(raw) = params.from.as_deref() {
        parse_date(raw, "from")?;
    }
    if let Some(raw) = params.to.as_deref() {
        parse_date(raw, "to")?;
    }
    let db = state.open_db()?;
    let events = db.key_events_filtered(params.from.as_deref(), params.to.as_deref())?;
    Ok(Json(events))
}

#[derive(Debug, Deserialize)]
pub struct KeyEventRequest {
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
    pub event_date: String,
    #[serde(default)]
    pub repeat_rule: Option<String>,
    #[serde(default)]
    pub planned_amount_cents: Option<i64>,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub lead_time_days: Option<i64>,
    #[serde(default)]
    pub shift_policy: Option<String>,
    #[serde(default)]
    pub account_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct KeyEventResponse {
    pub id: i64,
}

pub async fn upsert_key_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<KeyEventRequest>,
) -> ApiResult<Json<KeyEventResponse>> {
    auth::require_write_access(&headers, &state.config)?;

    let name = body.name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("'name' is required".into()).into());
    }
    parse_date(&body.event_date, "event_date")?;
    if let Some(lead) = body.lead_time_days {
        if lead < 0 {
            return Err(
                AppError::Validation("'lead_time_days' must be non-negative".into()).into(),
            );
        }
    }
    let shift_policy = match body.shift_policy.as_deref() {
        None => None,
        Some(raw) => {
            let normalized = raw.trim().to_uppercase();
            if !matches!(
                normalized.as_str(),
                "AS_SCHEDULED" | "PREV_BUSINESS_DAY" | "NEXT_BUSINESS_DAY"
            ) {
                return Err(AppError::Validation("'shift_policy' invalid".into()).into());
            }
            Some(normalized)
        }
    };

    let db = state.open_db()?;
    let id = db.with_transaction(|db| {
        db.upsert_key_event(
            body.id,
            &DbKeyEvent {
                id: body.id.unwrap_or(0),
                name: name.to_string(),
                event_date: body.event_date.clone(),
                repeat_rule: body.repeat_rule.clone(),
                planned_amount_cents: body.planned_amount_cents,
                category_id: body.category_id,
                lead_time_days: body.lead_time_days,
                shift_policy: shift_policy.clone(),
                account_id: body.account_id,
            },
        )
    })?;
    Ok(Json(KeyEventResponse { id }))
}

pub async fn delete_key_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    auth::require_write_access(&headers, &state.config)?;
    let db = state.open_db()?;
    db.with_transaction(|db| db.delete_key_event(id))?;
    Ok(Json(serde_json::json!({"deleted": id})))
}

// ---------------------------------------------------------------------------
// Anchors
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AnchorRequest {
    pub anchor_date: String,
    pub anchor_balance_cents: i64,
    #[serde(default)]
    pub min_floor_cents: Option<i64>,
}

pub async fn put_anchor(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(account_id): Path<i64>,
    Json(body): Json<AnchorRequest>,
) -> ApiResult<Json<DbAnchor>> {
    auth::require_write_access(&headers, &state.config)?;
    parse_date(&body.anchor_date, "anchor_date")?;

    let anchor = DbAnchor {
        account_id,
        anchor_date: body.anchor_date,
        anchor_balance_cents: body.anchor_balance_cents,
        min_floor_cents: body.min_floor_cents,
    };
    let db = state.open_db()?;
    // Anchor writes race with concurrent reconciles; retry once on a
    // conflicting transaction before surfacing.
    let result = db.with_transaction(|db| db.upsert_anchor(&anchor));
    if let Err(e) = result {
        if e.is_retryable() {
            db.with_transaction(|db| db.upsert_anchor(&anchor))?;
        } else {
            return Err(e.into());
        }
    }
    Ok(Json(anchor))
}

// ---------------------------------------------------------------------------
// Ingest triggers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub months: Option<u32>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
}

pub async fn post_ingest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((source, mode)): Path<(String, String)>,
    Json(body): Json<IngestRequest>,
) -> ApiResult<Json<IngestReport>> {
    auth::require_write_access(&headers, &state.config)?;

    use crate::ingest::{begin_run, complete_run, fetch_batch, FetchMode};

    let fetch_mode = match mode.as_str() {
        "delta" => Some(FetchMode::Delta),
        "backfill" => Some(FetchMode::Backfill {
            months: body.months.unwrap_or(3),
        }),
        "from-csv" => None,
        other => {
            return Err(AppError::Validation(format!(
                "unknown ingest mode '{other}' (expected delta, backfill or from-csv)"
            ))
            .into())
        }
    };

    let report = match fetch_mode {
        Some(fetch_mode) => {
            let client = UpstreamClient::from_config(&state.config)?;
            // Phased run: the store handle is only touched between awaits
            let plan = {
                let db = state.open_db()?;
                begin_run(&db, &source, fetch_mode)?
            };
            let fetched = fetch_batch(&client, &plan.since).await;
            let db = state.open_db()?;
            complete_run(&db, plan, fetched)?
        }
        None => {
            let path = body
                .path
                .as_deref()
                .ok_or_else(|| AppError::Validation("'path' is required for CSV import".into()))?;
            let db = state.open_db()?;
            crate::ingest::csv::run_import(&db, std::path::Path::new(path), body.account.as_deref())?
        }
    };
    Ok(Json(report))
}
