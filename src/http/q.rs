//! Questionnaire endpoints: primitive queries, packs and hashed exports.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use super::{auth, ApiResult, AppState};
use crate::error::AppError;
use crate::q::export::{export_pack, ExportFormat, ExportResult};
use crate::q::packs::{assemble_pack, Pack};
use crate::q::{parse_period_token, queries, QueryValue};

#[derive(Debug, Deserialize)]
pub struct QueryParams {
    #[serde(default)]
    pub period: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub top_n: Option<usize>,
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub page_size: Option<usize>,
}

/// GET /q/{query}
pub async fn get_query(
    State(state): State<AppState>,
    Path(query): Path<String>,
    Query(params): Query<QueryParams>,
) -> ApiResult<Json<QueryValue>> {
    let today = Utc::now().date_naive();
    let period = parse_period_token(params.period.as_deref(), today);
    let db = state.open_db()?;

    // `monthly_commitment_total` takes a kind filter where the category
    // queries take a category term
    let filter = if query == "monthly_commitment_total" {
        params.kind.as_deref()
    } else {
        params.category.as_deref()
    };

    let value = queries::run_named_query(
        &db,
        &query,
        &period,
        filter,
        params.top_n,
        params.page,
        params.page_size,
    )?
    .ok_or_else(|| AppError::NotFound(format!("query {query}")))?;
    Ok(Json(value))
}

#[derive(Debug, Deserialize)]
pub struct PackParams {
    #[serde(default)]
    pub period: Option<String>,
}

/// GET /q/packs/{pack}
pub async fn get_pack(
    State(state): State<AppState>,
    Path(pack): Path<String>,
    Query(params): Query<PackParams>,
) -> ApiResult<Json<Pack>> {
    let today = Utc::now().date_naive();
    let db = state.open_db()?;
    let assembled = assemble_pack(&db, &pack, params.period.as_deref(), today)?;
    Ok(Json(assembled))
}

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    pub pack: String,
    #[serde(default)]
    pub period: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub redact_memos: bool,
}

/// POST /q/export. Exports publish files, so they sit behind the write
/// guards even though the store itself is untouched.
pub async fn post_export(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ExportRequest>,
) -> ApiResult<Json<ExportResult>> {
    auth::require_write_access(&headers, &state.config)?;

    let format = ExportFormat::parse(body.format.as_deref())?;
    let now = Utc::now();
    let today = now.date_naive();
    let generated_at = now.format("%Y-%m-%dT%H:%M:%SZ").to_string();

    let db = state.open_db()?;
    let result = export_pack(
        &db,
        &state.config.export_dir,
        &body.pack,
        body.period.as_deref(),
        format,
        body.redact_memos,
        today,
        &generated_at,
    )?;
    Ok(Json(result))
}
