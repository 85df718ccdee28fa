//! Admin-token and CSRF guards for mutating endpoints.
//!
//! Both checks are no-ops when the corresponding token is not configured,
//! which keeps local development and tests friction-free. The LLM
//! assistant layer is only ever given read/query endpoints; every mutation
//! goes through these guards, so a human holding the tokens stays in the
//! loop.

use axum::http::HeaderMap;

use crate::config::Config;
use crate::error::{AppError, AppResult};

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";
pub const CSRF_TOKEN_HEADER: &str = "x-csrf-token";

fn header_value<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Require `X-Admin-Token` when `ADMIN_TOKEN` is configured.
pub fn require_admin(headers: &HeaderMap, config: &Config) -> AppResult<()> {
    let Some(expected) = config.admin_token.as_deref() else {
        return Ok(());
    };
    match header_value(headers, ADMIN_TOKEN_HEADER) {
        Some(provided) if provided == expected => Ok(()),
        _ => Err(AppError::Auth),
    }
}

/// Require `X-CSRF-Token` when `CSRF_TOKEN` is configured.
pub fn require_csrf(headers: &HeaderMap, config: &Config) -> AppResult<()> {
    let Some(expected) = config.csrf_token.as_deref() else {
        return Ok(());
    };
    match header_value(headers, CSRF_TOKEN_HEADER) {
        Some(provided) if provided == expected => Ok(()),
        _ => Err(AppError::Forbidden),
    }
}

/// Both write guards in order: auth first, then CSRF.
pub fn require_write_access(headers: &HeaderMap, config: &Config) -> AppResult<()> {
    require_admin(headers, config)?;
    require_csrf(headers, config)
}
