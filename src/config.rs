//! Environment-derived runtime configuration.
//!
//! Read once at startup; upstream credentials are held but never logged.

use std::collections::HashMap;
use std::path::PathBuf;

/// Default forecast horizon for snapshots and the overview digest.
pub const DEFAULT_HORIZON_DAYS: i64 = 120;

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub export_dir: PathBuf,
    pub buffer_floor_cents: i64,
    pub admin_token: Option<String>,
    pub csrf_token: Option<String>,
    pub upstream_url: Option<String>,
    pub upstream_token: Option<String>,
    pub upstream_budget_id: Option<String>,
    pub large_debit_cents: i64,
    pub drift_tolerance_pct: u32,
    pub drift_cycles: u32,
    /// Per-account overdraft alert floors, parsed from
    /// `OVERDRAFT_ALERT_THRESHOLDS="acct_id:cents,..."`.
    pub overdraft_thresholds: HashMap<i64, i64>,
    pub scheduler_enabled: bool,
    pub scheduler_hour: u32,
    pub scheduler_minute: u32,
    pub scheduler_tz: String,
    pub base_path: String,
    pub http_addr: String,
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_i64(key: &str, default: i64) -> i64 {
    env_string(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env_string(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env_string(key).as_deref() {
        Some("1") | Some("true") | Some("yes") => true,
        Some("0") | Some("false") | Some("no") => false,
        _ => default,
    }
}

fn parse_overdraft_thresholds(raw: &str) -> HashMap<i64, i64> {
    let mut map = HashMap::new();
    for pair in raw.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let Some((acct, cents)) = pair.split_once(':') else {
            log::warn!("Ignoring malformed overdraft threshold entry: {pair}");
            continue;
        };
        match (acct.trim().parse::<i64>(), cents.trim().parse::<i64>()) {
            (Ok(a), Ok(c)) => {
                map.insert(a, c);
            }
            _ => log::warn!("Ignoring malformed overdraft threshold entry: {pair}"),
        }
    }
    map
}

fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".cashflowd").join("budget.db"))
        .unwrap_or_else(|| PathBuf::from("budget.db"))
}

impl Config {
    pub fn from_env() -> Self {
        let db_path = env_string("DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(default_db_path);
        let export_dir = env_string("EXPORT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                db_path
                    .parent()
                    .map(|p| p.join("exports"))
                    .unwrap_or_else(|| PathBuf::from("exports"))
            });

        Self {
            db_path,
            export_dir,
            buffer_floor_cents: env_i64("BUFFER_FLOOR_CENTS", 0),
            admin_token: env_string("ADMIN_TOKEN"),
            csrf_token: env_string("CSRF_TOKEN"),
            upstream_url: env_string("UPSTREAM_URL"),
            upstream_token: env_string("UPSTREAM_TOKEN"),
            upstream_budget_id: env_string("UPSTREAM_BUDGET_ID"),
            large_debit_cents: env_i64("LARGE_DEBIT_CENTS", 50_000).abs(),
            drift_tolerance_pct: env_u32("DRIFT_TOLERANCE_PCT", 10),
            drift_cycles: env_u32("DRIFT_CYCLES", 3),
            overdraft_thresholds: env_string("OVERDRAFT_ALERT_THRESHOLDS")
                .map(|raw| parse_overdraft_thresholds(&raw))
                .unwrap_or_default(),
            scheduler_enabled: env_bool("SCHEDULER_ENABLED", false),
            scheduler_hour: env_u32("SCHEDULER_HOUR", 2).min(23),
            scheduler_minute: env_u32("SCHEDULER_MINUTE", 30).min(59),
            scheduler_tz: env_string("SCHEDULER_TZ").unwrap_or_else(|| "UTC".to_string()),
            base_path: env_string("BASE_PATH").unwrap_or_default(),
            http_addr: env_string("HTTP_ADDR").unwrap_or_else(|| "127.0.0.1:8080".to_string()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            export_dir: PathBuf::from("exports"),
            buffer_floor_cents: 0,
            admin_token: None,
            csrf_token: None,
            upstream_url: None,
            upstream_token: None,
            upstream_budget_id: None,
            large_debit_cents: 50_000,
            drift_tolerance_pct: 10,
            drift_cycles: 3,
            overdraft_thresholds: HashMap::new(),
            scheduler_enabled: false,
            scheduler_hour: 2,
            scheduler_minute: 30,
            scheduler_tz: "UTC".to_string(),
            base_path: String::new(),
            http_addr: "127.0.0.1:8080".to_string(),
        }
    }
}
