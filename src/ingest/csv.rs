//! CSV import: parse a bookkeeping-export file and upsert its rows
//! idempotently. CSV rows carry no upstream id, so the dedup key is a
//! digest over the canonical row fields.

use std::path::Path;

use chrono::{NaiveDate, Utc};

use crate::db::{BudgetDb, DbTransaction};
use crate::error::{AppError, AppResult};
use crate::ingest::{csv_idempotency_key, IngestReport};

pub const CSV_SOURCE: &str = "csv";

/// Parse an amount cell: currency symbols, thousands separators and
/// parenthesized negatives are tolerated.
fn parse_amount_cell(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let negative = trimmed.starts_with('(') && trimmed.ends_with(')');
    let cleaned: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    let value: f64 = cleaned.parse().ok()?;
    Some(if negative { -value } else { value })
}

/// Signed cents from either a unified amount column or outflow/inflow pair.
fn row_amount_cents(get: &impl Fn(&str) -> Option<String>) -> i64 {
    for key in ["amount", "total", "value"] {
        if let Some(cell) = get(key) {
            if let Some(v) = parse_amount_cell(&cell) {
                return (v * 100.0).round() as i64;
            }
        }
    }
    let inflow = get("inflow").and_then(|c| parse_amount_cell(&c)).unwrap_or(0.0);
    let outflow = get("outflow").and_then(|c| parse_amount_cell(&c)).unwrap_or(0.0);
    ((inflow - outflow) * 100.0).round() as i64
}

fn parse_date_cell(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    for format in ["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(d);
        }
    }
    trimmed.get(..10).and_then(|s| s.parse().ok())
}

fn cleared_cell(raw: Option<String>) -> bool {
    matches!(
        raw.map(|v| v.trim().to_lowercase()).as_deref(),
        Some("cleared") | Some("reconciled") | Some("true") | Some("1") | Some("yes") | Some("y")
    )
}

/// Import a CSV export. Column names are matched case-insensitively;
/// unmapped categories fall back to the internal Holding category.
pub fn run_import(
    db: &BudgetDb,
    csv_path: &Path,
    account_override: Option<&str>,
) -> AppResult<IngestReport> {
    let started_at = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    let notes_base = serde_json::json!({"mode": "csv", "path": csv_path.display().to_string()});
    let audit_id = db.start_ingest_audit(CSV_SOURCE, &started_at, &notes_base.to_string())?;

    let result = db.with_transaction(|db| {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_path(csv_path)
            .map_err(|e| AppError::Validation(format!("cannot read CSV: {e}")))?;

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| AppError::Validation(format!("cannot read CSV header: {e}")))?
            .iter()
            .map(|h| h.trim().to_lowercase())
            .collect();

        let holding_id = db.ensure_holding_category()?;
        let mut rows_upserted = 0i64;
        let mut rows_seen = 0i64;

        for record in reader.records() {
            let record = record.map_err(|e| AppError::Validation(format!("bad CSV row: {e}")))?;
            rows_seen += 1;

            let get = |name: &str| -> Option<String> {
                headers
                    .iter()
                    .position(|h| h == name)
                    .and_then(|i| record.get(i))
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
            };

            let date = get("date")
                .or_else(|| get("posted"))
                .or_else(|| get("transaction date"))
                .and_then(|c| parse_date_cell(&c))
                .unwrap_or_else(|| Utc::now().date_naive());
            let date_iso = date.to_string();
            let posted_at = format!("{date_iso}T00:00:00Z");

            let payee = get("payee").or_else(|| get("description")).unwrap_or_default();
            let memo = get("memo").or_else(|| get("notes")).unwrap_or_default();
            let category_name = get("category")
                .or_else(|| get("master category"))
                .unwrap_or_default();
            let amount_cents = row_amount_cents(&get);

            let account_name = account_override
                .map(str::to_string)
                .or_else(|| get("account"))
                .or_else(|| get("account name"))
                .unwrap_or_else(|| "CSV Imports".to_string());
            let local_account_id = db.ensure_account(&account_name, "unknown", "USD")?;

            // Categories arrive as names; route through the map keyed on
            // the name, else Holding
            let category_id = if category_name.is_empty() {
                Some(holding_id)
            } else {
                Some(
                    db.lookup_category_map(CSV_SOURCE, &category_name)?
                        .unwrap_or(holding_id),
                )
            };

            let key = csv_idempotency_key(
                CSV_SOURCE,
                &date_iso,
                &account_name,
                amount_cents,
                &payee,
                &memo,
                &category_name,
            );
            let is_new = db.get_transaction(&key)?.is_none();

            let import_meta = serde_json::json!({
                "csv_account": account_name,
                "csv_category": category_name,
            });

            db.upsert_transaction(&DbTransaction {
                idempotency_key: key,
                account_id: local_account_id,
                posted_at,
                amount_cents,
                payee: (!payee.is_empty()).then_some(payee),
                memo: (!memo.is_empty()).then_some(memo),
                external_id: None,
                source: CSV_SOURCE.to_string(),
                category_id,
                is_cleared: cleared_cell(get("cleared").or_else(|| get("status"))),
                import_meta_json: Some(import_meta.to_string()),
            })?;

            if is_new {
                rows_upserted += 1;
            }
        }

        let finished_at = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let notes = serde_json::json!({
            "mode": "csv",
            "path": csv_path.display().to_string(),
            "rows_seen": rows_seen,
        })
        .to_string();
        db.finish_ingest_audit(audit_id, &finished_at, rows_upserted, "success", &notes)?;

        Ok(IngestReport {
            source: CSV_SOURCE.to_string(),
            started_at: started_at.clone(),
            finished_at,
            rows_upserted,
            status: "success".to_string(),
            notes,
        })
    });

    if let Err(e) = &result {
        let finished_at = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let notes = serde_json::json!({"mode": "csv", "error": e.to_string()}).to_string();
        let _ = db.finish_ingest_audit(audit_id, &finished_at, 0, "failure", &notes);
        log::error!("CSV import failed: {e}");
    }
    result
}
