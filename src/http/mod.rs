//! HTTP/JSON surface.
//!
//! Read endpoints are open (unless an admin token is configured for them);
//! every mutation requires the admin token, plus the CSRF token when
//! configured. All monetary values are integer cents and all dates are ISO
//! `YYYY-MM-DD` strings.

pub mod admin;
pub mod auth;
pub mod forecast;
pub mod overview;
pub mod q;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};

use crate::config::Config;
use crate::db::BudgetDb;
use crate::error::{AppError, AppResult};

/// Shared request context. Handlers open the store per operation, the
/// same pattern the scheduler and CLI use, so no connection is ever held
/// across an await point.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn open_db(&self) -> AppResult<BudgetDb> {
        BudgetDb::open_at(self.config.db_path.clone())
    }
}

/// JSON error body, mapped from the error taxonomy.
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(e: AppError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            log::error!("Request failed: {}", self.0);
        }
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Serve a previously written export file.
async fn get_export(
    State(state): State<AppState>,
    axum::extract::Path(filename): axum::extract::Path<String>,
) -> ApiResult<Response> {
    // Hash-stamped names contain no separators; reject traversal outright
    if filename.contains('/') || filename.contains("..") {
        return Err(AppError::Validation("invalid export name".into()).into());
    }
    let path = state.config.export_dir.join(&filename);
    let bytes = std::fs::read(&path)
        .map_err(|_| AppError::NotFound(format!("export {filename}")))?;
    let content_type = if filename.ends_with(".csv") {
        "text/csv; charset=utf-8"
    } else {
        "text/html; charset=utf-8"
    };
    Ok(([("content-type", content_type)], bytes).into_response())
}

async fn health() -> &'static str {
    "ok"
}

/// Build the full router, honoring `BASE_PATH` when configured.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/forecast/calendar", get(forecast::get_forecast_calendar))
        .route("/forecast/blended", get(forecast::get_forecast_blended))
        .route("/forecast/simulate-spend", post(forecast::post_simulate_spend))
        .route("/calendar", get(forecast::get_calendar))
        .route("/key-events", get(admin::list_key_events).post(admin::upsert_key_event))
        .route("/key-events/:id", axum::routing::delete(admin::delete_key_event))
        .route("/overview", get(overview::get_overview))
        .route("/accounts", get(overview::get_accounts))
        .route("/accounts/anchors", get(overview::get_anchors))
        .route("/accounts/floors", get(overview::get_floors))
        .route("/accounts/:id/anchor", put(admin::put_anchor))
        .route("/ingest/:source/:mode", post(admin::post_ingest))
        .route("/q/packs/:pack", get(q::get_pack))
        .route("/q/export", post(q::post_export))
        .route("/q/:query", get(q::get_query))
        .route("/exports/:filename", get(get_export))
        .with_state(state.clone());

    let base = state.config.base_path.trim_end_matches('/').to_string();
    if base.is_empty() {
        api
    } else {
        let base = if base.starts_with('/') {
            base
        } else {
            format!("/{base}")
        };
        Router::new().nest(&base, api)
    }
}

/// Bind and serve until the process exits.
pub async fn serve(state: AppState) -> AppResult<()> {
    let addr = state.config.http_addr.clone();
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(AppError::Io)?;
    log::info!("Listening on http://{addr}");
    axum::serve(listener, app).await.map_err(AppError::Io)?;
    Ok(())
}

/// Parse an ISO calendar day out of a query/body string.
pub(crate) fn parse_date(value: &str, field: &str) -> AppResult<chrono::NaiveDate> {
    value
        .parse()
        .map_err(|_| AppError::Validation(format!("'{field}' must be YYYY-MM-DD")))
}

/// Parse the `accounts` filter: comma-separated account ids.
pub(crate) fn parse_accounts(value: Option<&str>) -> AppResult<Vec<i64>> {
    let Some(raw) = value else {
        return Ok(Vec::new());
    };
    let mut out = Vec::new();
    for piece in raw.split(',') {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        out.push(
            piece
                .parse()
                .map_err(|_| AppError::Validation(format!("bad account id '{piece}'")))?,
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accounts() {
        assert_eq!(parse_accounts(None).expect("none"), Vec::<i64>::new());
        assert_eq!(parse_accounts(Some("1,2, 3")).expect("ok"), vec![1, 2, 3]);
        assert_eq!(parse_accounts(Some("")).expect("empty"), Vec::<i64>::new());
        assert!(parse_accounts(Some("1,x")).is_err());
    }

    #[test]
    fn test_parse_date() {
        assert!(parse_date("2025-01-31", "start").is_ok());
        assert!(parse_date("01/31/2025", "start").is_err());
        assert!(parse_date("", "start").is_err());
    }
}
