//! Row structs shared by the query modules and the HTTP layer.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbAccount {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub currency: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbTransaction {
    pub idempotency_key: String,
    pub account_id: i64,
    pub posted_at: String,
    pub amount_cents: i64,
    pub payee: Option<String>,
    pub memo: Option<String>,
    pub external_id: Option<String>,
    pub source: String,
    pub category_id: Option<i64>,
    pub is_cleared: bool,
    pub import_meta_json: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbCategory {
    pub id: i64,
    pub name: String,
    pub parent_id: Option<i64>,
    pub is_archived: bool,
    pub source: Option<String>,
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbCommitment {
    pub id: i64,
    pub name: String,
    pub amount_cents: i64,
    pub due_rule: String,
    pub next_due_date: Option<String>,
    pub priority: Option<i64>,
    pub account_id: i64,
    pub flexible_window_days: Option<i64>,
    pub category_id: Option<i64>,
    #[serde(rename = "type")]
    pub kind: String,
    pub shift_policy: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbScheduledInflow {
    pub id: i64,
    pub name: String,
    pub amount_cents: i64,
    pub due_rule: String,
    pub next_due_date: Option<String>,
    pub account_id: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbKeyEvent {
    pub id: i64,
    pub name: String,
    pub event_date: String,
    pub repeat_rule: Option<String>,
    pub planned_amount_cents: Option<i64>,
    pub category_id: Option<i64>,
    pub lead_time_days: Option<i64>,
    pub shift_policy: Option<String>,
    pub account_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbAnchor {
    pub account_id: i64,
    pub anchor_date: String,
    pub anchor_balance_cents: i64,
    pub min_floor_cents: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbSnapshot {
    pub id: i64,
    pub created_at: String,
    pub horizon_start: String,
    pub horizon_end: String,
    pub json_payload: String,
    pub min_balance_cents: Option<i64>,
    pub min_balance_date: Option<String>,
}

/// Snapshot metadata without the (possibly large) payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbSnapshotMeta {
    pub created_at: String,
    pub horizon_start: String,
    pub horizon_end: String,
    pub min_balance_cents: Option<i64>,
    pub min_balance_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbIngestAudit {
    pub id: i64,
    pub source: String,
    pub run_started_at: String,
    pub run_finished_at: Option<String>,
    pub rows_upserted: i64,
    pub status: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbAlert {
    pub id: i64,
    pub created_at: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub dedupe_key: String,
    pub severity: String,
    pub title: String,
    pub message: String,
    pub details_json: Option<String>,
    pub resolved_at: Option<String>,
}
