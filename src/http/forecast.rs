//! Forecast endpoints: calendar series, blended overlay, raw entries and
//! the what-if simulator.

use std::collections::BTreeMap;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{auth, parse_accounts, parse_date, ApiResult, AppState};
use crate::error::AppError;
use crate::forecast::blended::{blended_series, stats_from_history, DailyStats};
use crate::forecast::simulate::simulate_spend;
use crate::forecast::{Entry, Forecast};

fn balances_by_day(balances: &BTreeMap<NaiveDate, i64>) -> BTreeMap<String, i64> {
    balances.iter().map(|(d, b)| (d.to_string(), *b)).collect()
}

// ---------------------------------------------------------------------------
// GET /forecast/calendar
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CalendarParams {
    start: String,
    end: String,
    #[serde(default)]
    buffer_floor: Option<i64>,
    #[serde(default)]
    accounts: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CalendarMeta {
    pub empty_series: bool,
    pub buffer_floor_cents: i64,
    pub below_buffer: bool,
}

#[derive(Debug, Serialize)]
pub struct CalendarResponse {
    pub opening_balance_cents: i64,
    pub entries: Vec<Entry>,
    pub balances: BTreeMap<String, i64>,
    pub min_balance_cents: Option<i64>,
    pub min_balance_date: Option<String>,
    pub meta: CalendarMeta,
}

fn compute_window(params_start: &str, params_end: &str) -> ApiResult<(NaiveDate, NaiveDate)> {
    let start = parse_date(params_start, "start")?;
    let end = parse_date(params_end, "end")?;
    if end < start {
        return Err(AppError::Validation("end must be on or after start".into()).into());
    }
    Ok((start, end))
}

pub async fn get_forecast_calendar(
    State(state): State<AppState>,
    Query(params): Query<CalendarParams>,
) -> ApiResult<Json<CalendarResponse>> {
    let (start, end) = compute_window(&params.start, &params.end)?;
    let accounts = parse_accounts(params.accounts.as_deref())?;
    let buffer_floor = params.buffer_floor.unwrap_or(state.config.buffer_floor_cents);

    let db = state.open_db()?;
    let forecast = Forecast::compute(&db, start, end, &accounts)?;

    let below_buffer = forecast
        .min_balance_cents
        .map(|min| min < buffer_floor)
        .unwrap_or(false);
    Ok(Json(CalendarResponse {
        opening_balance_cents: forecast.opening_balance_cents,
        balances: balances_by_day(&forecast.balances),
        min_balance_cents: forecast.min_balance_cents,
        min_balance_date: forecast.min_balance_date.map(|d| d.to_string()),
        meta: CalendarMeta {
            empty_series: forecast.entries.is_empty(),
            buffer_floor_cents: buffer_floor,
            below_buffer,
        },
        entries: forecast.entries,
    }))
}

// ---------------------------------------------------------------------------
// GET /forecast/blended
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct BlendedParams {
    start: String,
    end: String,
    #[serde(default)]
    buffer_floor: Option<i64>,
    #[serde(default)]
    accounts: Option<String>,
    #[serde(default)]
    mu_daily: Option<i64>,
    #[serde(default)]
    sigma_daily: Option<i64>,
    /// Comma-separated 7 weekday multipliers, Monday first.
    #[serde(default)]
    weekday_mult: Option<String>,
    #[serde(default)]
    band_k: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct BlendedBands {
    pub lower: BTreeMap<String, i64>,
    pub upper: BTreeMap<String, i64>,
}

#[derive(Debug, Serialize)]
pub struct BlendedResponse {
    #[serde(flatten)]
    pub deterministic: CalendarResponse,
    pub baseline_blended: BTreeMap<String, i64>,
    pub bands: BlendedBands,
    pub stats: DailyStats,
}

fn parse_weekday_mult(raw: &str) -> ApiResult<[f64; 7]> {
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    if parts.len() != 7 {
        return Err(
            AppError::Validation("weekday_mult needs exactly 7 comma-separated values".into())
                .into(),
        );
    }
    let mut out = [1.0f64; 7];
    for (i, part) in parts.iter().enumerate() {
        out[i] = part.parse().map_err(|_| {
            AppError::Validation(format!("bad weekday multiplier '{part}'"))
        })?;
    }
    Ok(out)
}

pub async fn get_forecast_blended(
    State(state): State<AppState>,
    Query(params): Query<BlendedParams>,
) -> ApiResult<Json<BlendedResponse>> {
    let (start, end) = compute_window(&params.start, &params.end)?;
    let accounts = parse_accounts(params.accounts.as_deref())?;
    let buffer_floor = params.buffer_floor.unwrap_or(state.config.buffer_floor_cents);
    let band_k = params.band_k.unwrap_or(1.0);

    let db = state.open_db()?;
    let forecast = Forecast::compute(&db, start, end, &accounts)?;

    // Supplied parameters win; anything missing is computed from history
    let stats = match (params.mu_daily, params.sigma_daily) {
        (Some(mu), Some(sigma)) => DailyStats {
            mu_cents: mu,
            sigma_cents: sigma,
            weekday_multipliers: match params.weekday_mult.as_deref() {
                Some(raw) => parse_weekday_mult(raw)?,
                None => [1.0; 7],
            },
        },
        _ => {
            let mut computed = stats_from_history(&db, Utc::now().date_naive())?;
            if let Some(raw) = params.weekday_mult.as_deref() {
                computed.weekday_multipliers = parse_weekday_mult(raw)?;
            }
            computed
        }
    };

    let overlay = blended_series(
        &forecast.balances,
        forecast.opening_balance_cents,
        start,
        end,
        &stats,
        band_k,
    );

    let below_buffer = forecast
        .min_balance_cents
        .map(|min| min < buffer_floor)
        .unwrap_or(false);
    Ok(Json(BlendedResponse {
        deterministic: CalendarResponse {
            opening_balance_cents: forecast.opening_balance_cents,
            balances: balances_by_day(&forecast.balances),
            min_balance_cents: forecast.min_balance_cents,
            min_balance_date: forecast.min_balance_date.map(|d| d.to_string()),
            meta: CalendarMeta {
                empty_series: forecast.entries.is_empty(),
                buffer_floor_cents: buffer_floor,
                below_buffer,
            },
            entries: forecast.entries,
        },
        baseline_blended: balances_by_day(&overlay.baseline_blended),
        bands: BlendedBands {
            lower: balances_by_day(&overlay.band_lower),
            upper: balances_by_day(&overlay.band_upper),
        },
        stats,
    }))
}

// ---------------------------------------------------------------------------
// GET /calendar: raw dated entries
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct WindowParams {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
}

pub async fn get_calendar(
    State(state): State<AppState>,
    Query(params): Query<WindowParams>,
) -> ApiResult<Json<Vec<Entry>>> {
    let today = Utc::now().date_naive();
    let from = match params.from.as_deref() {
        Some(raw) => parse_date(raw, "from")?,
        None => today,
    };
    let to = match params.to.as_deref() {
        Some(raw) => parse_date(raw, "to")?,
        None => from + Days::new(crate::config::DEFAULT_HORIZON_DAYS as u64),
    };
    if to < from {
        return Err(AppError::Validation("to must be on or after from".into()).into());
    }
    let db = state.open_db()?;
    let entries = crate::forecast::calendar::expand_calendar(&db, from, to)?;
    Ok(Json(entries))
}

// ---------------------------------------------------------------------------
// POST /forecast/simulate-spend
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SimulateSpendRequest {
    pub date: String,
    pub amount_cents: i64,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub buffer_floor: Option<i64>,
    #[serde(default)]
    pub horizon_days: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SimulateSpendResponse {
    pub safe: bool,
    pub new_min_balance_cents: i64,
    pub new_min_balance_date: Option<String>,
    pub tight_days: Vec<String>,
    pub max_safe_today_cents: i64,
    pub mode: String,
}

pub async fn post_simulate_spend(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SimulateSpendRequest>,
) -> ApiResult<Json<SimulateSpendResponse>> {
    auth::require_write_access(&headers, &state.config)?;

    let spend_date = parse_date(&body.date, "date")?;
    if body.amount_cents < 0 {
        return Err(AppError::Validation("'amount_cents' must be non-negative".into()).into());
    }
    let horizon_days = body.horizon_days.unwrap_or(crate::config::DEFAULT_HORIZON_DAYS);
    if horizon_days <= 0 {
        return Err(AppError::Validation("'horizon_days' must be positive".into()).into());
    }
    let mode = match body.mode.as_deref() {
        None | Some("deterministic") => "deterministic",
        Some("blended") => "blended",
        Some(other) => {
            return Err(
                AppError::Validation(format!("unknown mode '{other}'")).into()
            )
        }
    };
    let buffer_floor = body.buffer_floor.unwrap_or(state.config.buffer_floor_cents);

    let today = Utc::now().date_naive();
    let horizon_start = today.min(spend_date);
    let horizon_end = horizon_start + Days::new(horizon_days as u64);

    let db = state.open_db()?;
    let forecast = Forecast::compute(&db, horizon_start, horizon_end, &[])?;
    // The safety decision always runs on the deterministic series; blended
    // mode only changes the reported reference baseline.
    let decision = simulate_spend(
        forecast.opening_balance_cents,
        &forecast.entries,
        horizon_start,
        spend_date,
        body.amount_cents,
        buffer_floor,
    );

    Ok(Json(SimulateSpendResponse {
        safe: decision.safe,
        new_min_balance_cents: decision.new_min_balance_cents,
        new_min_balance_date: decision.new_min_balance_date.map(|d| d.to_string()),
        tight_days: decision.tight_days.iter().map(|d| d.to_string()).collect(),
        max_safe_today_cents: decision.max_safe_today_cents,
        mode: mode.to_string(),
    }))
}
