//! Digest and account read endpoints.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use super::{ApiResult, AppState};
use crate::db::{DbAccount, DbAnchor};
use crate::snapshot::{overview_digest, Digest};

/// GET /overview: the daily digest from the latest snapshot's horizon.
pub async fn get_overview(State(state): State<AppState>) -> ApiResult<Json<Digest>> {
    let db = state.open_db()?;
    let digest = overview_digest(&db, &state.config, Utc::now().date_naive())?;
    Ok(Json(digest))
}

#[derive(Debug, Serialize)]
pub struct AccountsResponse {
    pub accounts: Vec<DbAccount>,
}

pub async fn get_accounts(State(state): State<AppState>) -> ApiResult<Json<AccountsResponse>> {
    let db = state.open_db()?;
    Ok(Json(AccountsResponse {
        accounts: db.get_all_accounts()?,
    }))
}

#[derive(Debug, Serialize)]
pub struct AnchorsResponse {
    pub anchors: Vec<DbAnchor>,
}

pub async fn get_anchors(State(state): State<AppState>) -> ApiResult<Json<AnchorsResponse>> {
    let db = state.open_db()?;
    Ok(Json(AnchorsResponse {
        anchors: db.get_all_anchors()?,
    }))
}

#[derive(Debug, Serialize)]
pub struct FloorEntry {
    pub account_id: i64,
    pub min_floor_cents: i64,
}

#[derive(Debug, Serialize)]
pub struct FloorsResponse {
    pub floors: Vec<FloorEntry>,
}

/// GET /accounts/floors: declared floors from anchors plus the env-level
/// overdraft thresholds.
pub async fn get_floors(State(state): State<AppState>) -> ApiResult<Json<FloorsResponse>> {
    let db = state.open_db()?;
    let mut floors: Vec<FloorEntry> = db
        .get_all_anchors()?
        .into_iter()
        .filter_map(|a| {
            a.min_floor_cents.map(|f| FloorEntry {
                account_id: a.account_id,
                min_floor_cents: f,
            })
        })
        .collect();
    for (&account_id, &cents) in &state.config.overdraft_thresholds {
        if !floors.iter().any(|f| f.account_id == account_id) {
            floors.push(FloorEntry {
                account_id,
                min_floor_cents: cents,
            });
        }
    }
    floors.sort_by_key(|f| f.account_id);
    Ok(Json(FloorsResponse { floors }))
}
