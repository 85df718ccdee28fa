//! Idempotent ingestion pipeline.
//!
//! Three modes share one contract: compute an idempotency key per record,
//! upsert, write exactly one audit row, and (delta/backfill) advance the
//! source cursor inside the same transaction as the final upsert batch.
//! At-least-once fetching plus the unique key yields exactly-once effect.
//!
//! A run is split into three phases so no store handle is ever held across
//! an await point: `begin_run` (store, sync) → `fetch_batch` (network,
//! async) → `complete_run` (store, sync). `run_delta`/`run_backfill`
//! compose the phases for single-threaded callers like the CLI.

pub mod client;
pub mod csv;
pub mod mapper;

use chrono::{Days, NaiveDate, Utc};
use sha2::{Digest, Sha256};

use crate::db::{BudgetDb, DbTransaction};
use crate::error::{AppError, AppResult};

use client::{cleared_flag, to_cents, UpstreamAccount, UpstreamClient, UpstreamTransaction};

/// Outcome of one ingest run, mirrored into `ingest_audit`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct IngestReport {
    pub source: String,
    pub started_at: String,
    pub finished_at: String,
    pub rows_upserted: i64,
    pub status: String,
    pub notes: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Delta,
    Backfill { months: u32 },
}

impl FetchMode {
    fn name(&self) -> &'static str {
        match self {
            FetchMode::Delta => "delta",
            FetchMode::Backfill { .. } => "backfill",
        }
    }
}

/// State carried between the phases of one run.
pub struct RunPlan {
    pub source: String,
    pub mode: FetchMode,
    pub started_at: String,
    pub audit_id: i64,
    pub since: String,
    pub last_cursor: Option<String>,
}

/// Everything one fetch returns.
pub struct Batch {
    pub accounts: Vec<UpstreamAccount>,
    pub transactions: Vec<UpstreamTransaction>,
}

/// Stable dedup key: the source plus a digest over the record identity.
pub fn idempotency_key(source: &str, external_id: &str, posted_at: &str, amount_cents: i64) -> String {
    let canonical = format!("{source}|{external_id}|{posted_at}|{amount_cents}");
    let digest = Sha256::digest(canonical.as_bytes());
    format!("{source}:{}", hex_encode(&digest))
}

/// Dedup key for records with no upstream id (CSV rows): digest over the
/// canonical row fields instead.
pub fn csv_idempotency_key(
    source: &str,
    date_iso: &str,
    account_name: &str,
    amount_cents: i64,
    payee: &str,
    memo: &str,
    category: &str,
) -> String {
    let canonical = format!(
        "{date_iso}|{}|{amount_cents}|{}|{}|{}",
        crate::util::normalize_text(account_name),
        crate::util::normalize_text(payee),
        crate::util::normalize_text(memo),
        crate::util::normalize_text(category),
    );
    let digest = Sha256::digest(canonical.as_bytes());
    format!("{source}:{}", hex_encode(&digest))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn now_iso() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Start a run: pre-insert the audit row in `running` state and resolve
/// the fetch window.
///
/// Delta fetches since `cursor - 1 day`; the overlap protects against
/// clock skew between this host and the upstream; the idempotency
/// constraint absorbs the duplicated day. Backfill reaches back `months`
/// months regardless of the cursor.
pub fn begin_run(db: &BudgetDb, source: &str, mode: FetchMode) -> AppResult<RunPlan> {
    let started_at = now_iso();
    let notes = match mode {
        FetchMode::Delta => serde_json::json!({"mode": "delta"}),
        FetchMode::Backfill { months } => {
            serde_json::json!({"mode": "backfill", "months": months})
        }
    };
    let audit_id = db.start_ingest_audit(source, &started_at, &notes.to_string())?;

    let last_cursor = db.read_source_cursor(source)?;
    let today = Utc::now().date_naive();
    let since = match mode {
        FetchMode::Delta => {
            let base: NaiveDate = last_cursor
                .as_deref()
                .and_then(|c| c.parse().ok())
                .unwrap_or(today);
            (base - Days::new(1)).to_string()
        }
        FetchMode::Backfill { months } => {
            crate::forecast::rules::add_months(today, -(months.min(120) as i32)).to_string()
        }
    };

    Ok(RunPlan {
        source: source.to_string(),
        mode,
        started_at,
        audit_id,
        since,
        last_cursor,
    })
}

/// Fetch accounts and transactions for the plan's window. Touches only
/// the network, safe to await from any executor.
pub async fn fetch_batch(client: &UpstreamClient, since: &str) -> AppResult<Batch> {
    let accounts = client.fetch_accounts().await?;
    let transactions = client.fetch_transactions(since).await?;
    Ok(Batch {
        accounts,
        transactions,
    })
}

/// Apply a fetched batch and finalize the audit row. All row writes, the
/// cursor advance and the audit finalization share one transaction, so a
/// failure rolls everything back; the audit row then records the failure
/// on its own.
pub fn complete_run(
    db: &BudgetDb,
    plan: RunPlan,
    fetched: AppResult<Batch>,
) -> AppResult<IngestReport> {
    let mode = plan.mode.name();
    let batch = match fetched {
        Ok(batch) => batch,
        Err(e) => {
            let finished_at = now_iso();
            let notes = serde_json::json!({"mode": mode, "error": e.to_string()}).to_string();
            db.finish_ingest_audit(plan.audit_id, &finished_at, 0, "failure", &notes)?;
            log::error!("Ingest {} ({mode}) failed: {e}", plan.source);
            return Err(e);
        }
    };

    let seen = batch.transactions.len();
    let result = db.with_transaction(|db| {
        let mut rows_upserted = 0i64;
        let mut max_seen: Option<NaiveDate> = None;

        for txn in &batch.transactions {
            let account = batch.accounts.iter().find(|a| a.id == txn.account_id);
            let account_name = account.map(|a| a.name.clone()).unwrap_or_else(|| {
                let short: String = txn.account_id.chars().take(8).collect();
                format!("{} {short}", plan.source)
            });
            let account_type = account
                .and_then(|a| a.r#type.clone())
                .unwrap_or_else(|| "unknown".to_string());
            let currency = account
                .and_then(|a| a.currency.clone())
                .unwrap_or_else(|| "USD".to_string());
            let local_account_id = db.ensure_account(&account_name, &account_type, &currency)?;

            let posted_date: NaiveDate = txn
                .date
                .get(..10)
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| {
                    AppError::Validation(format!("upstream transaction {} has no valid date", txn.id))
                })?;
            let posted_at = format!("{posted_date}T00:00:00Z");
            let amount_cents = to_cents(txn.amount);

            let category_id = match &txn.category_id {
                Some(external) => db.lookup_category_map(&plan.source, external)?,
                None => None,
            };

            let key = idempotency_key(&plan.source, &txn.id, &posted_at, amount_cents);
            let is_new = db.get_transaction(&key)?.is_none();

            let import_meta = serde_json::json!({
                "external_id": txn.id,
                "external_account_id": txn.account_id,
                "import_id": txn.import_id,
            });

            db.upsert_transaction(&DbTransaction {
                idempotency_key: key,
                account_id: local_account_id,
                posted_at,
                amount_cents,
                payee: txn.payee_name.clone(),
                memo: txn.memo.clone(),
                external_id: Some(txn.id.clone()),
                source: plan.source.clone(),
                category_id,
                is_cleared: cleared_flag(txn.cleared.as_deref()),
                import_meta_json: Some(import_meta.to_string()),
            })?;

            if is_new {
                rows_upserted += 1;
            }
            max_seen = Some(max_seen.map_or(posted_date, |m: NaiveDate| m.max(posted_date)));
        }

        // Cursor advances with the batch or not at all
        let new_cursor = max_seen
            .unwrap_or_else(|| Utc::now().date_naive())
            .to_string();
        db.write_source_cursor(&plan.source, &new_cursor)?;

        let finished_at = now_iso();
        let notes = serde_json::json!({
            "mode": mode,
            "since": plan.since,
            "last_cursor": plan.last_cursor,
            "new_cursor": new_cursor,
            "transactions_seen": seen,
        })
        .to_string();
        db.finish_ingest_audit(plan.audit_id, &finished_at, rows_upserted, "success", &notes)?;

        Ok(IngestReport {
            source: plan.source.clone(),
            started_at: plan.started_at.clone(),
            finished_at,
            rows_upserted,
            status: "success".to_string(),
            notes,
        })
    });

    match result {
        Ok(report) => {
            log::info!(
                "Ingest {} ({mode}): {} new rows in {seen} transactions seen",
                plan.source,
                report.rows_upserted
            );
            Ok(report)
        }
        Err(e) => {
            // The transaction rolled back; record the failure on the
            // pre-inserted audit row (best effort).
            let finished_at = now_iso();
            let notes = serde_json::json!({"mode": mode, "error": e.to_string()}).to_string();
            let _ = db.finish_ingest_audit(plan.audit_id, &finished_at, 0, "failure", &notes);
            log::error!("Ingest {} ({mode}) failed during upsert: {e}", plan.source);
            Err(e)
        }
    }
}

/// Delta sync composed end-to-end. The future holds the store handle
/// across the fetch, so this is for single-threaded callers (the CLI);
/// multi-threaded executors use the three phases directly.
pub async fn run_delta(db: &BudgetDb, client: &UpstreamClient, source: &str) -> AppResult<IngestReport> {
    let plan = begin_run(db, source, FetchMode::Delta)?;
    let fetched = fetch_batch(client, &plan.since).await;
    complete_run(db, plan, fetched)
}

/// Backfill composed end-to-end; same caveats as `run_delta`.
pub async fn run_backfill(
    db: &BudgetDb,
    client: &UpstreamClient,
    source: &str,
    months: u32,
) -> AppResult<IngestReport> {
    let plan = begin_run(db, source, FetchMode::Backfill { months })?;
    let fetched = fetch_batch(client, &plan.since).await;
    complete_run(db, plan, fetched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;

    #[test]
    fn test_idempotency_key_is_stable() {
        let a = idempotency_key("upstream", "t1", "2025-01-05T00:00:00Z", -1200);
        let b = idempotency_key("upstream", "t1", "2025-01-05T00:00:00Z", -1200);
        assert_eq!(a, b);
        assert!(a.starts_with("upstream:"));
    }

    #[test]
    fn test_idempotency_key_varies_per_field() {
        let base = idempotency_key("upstream", "t1", "2025-01-05T00:00:00Z", -1200);
        assert_ne!(base, idempotency_key("upstream", "t2", "2025-01-05T00:00:00Z", -1200));
        assert_ne!(base, idempotency_key("upstream", "t1", "2025-01-06T00:00:00Z", -1200));
        assert_ne!(base, idempotency_key("upstream", "t1", "2025-01-05T00:00:00Z", -1201));
        assert_ne!(base, idempotency_key("csv", "t1", "2025-01-05T00:00:00Z", -1200));
    }

    #[test]
    fn test_csv_key_normalizes_text() {
        let a = csv_idempotency_key("csv", "2025-01-05", "Checking", -1200, "Corner  Shop", "", "Groceries");
        let b = csv_idempotency_key("csv", "2025-01-05", "checking", -1200, "corner shop", "", "groceries");
        assert_eq!(a, b);
    }

    fn upstream_txn(id: &str, date: &str, amount: f64) -> UpstreamTransaction {
        UpstreamTransaction {
            id: id.to_string(),
            account_id: "ext-1".to_string(),
            date: date.to_string(),
            amount,
            payee_name: Some("Shop".to_string()),
            memo: None,
            category_id: None,
            cleared: Some("cleared".to_string()),
            import_id: None,
        }
    }

    fn upstream_batch(transactions: Vec<UpstreamTransaction>) -> Batch {
        Batch {
            accounts: vec![UpstreamAccount {
                id: "ext-1".to_string(),
                name: "Checking".to_string(),
                r#type: Some("depository".to_string()),
                currency: Some("USD".to_string()),
            }],
            transactions,
        }
    }

    #[test]
    fn test_apply_batch_twice_is_idempotent() {
        let db = test_db();
        let txns = vec![
            upstream_txn("t1", "2025-01-05", -12.00),
            upstream_txn("t2", "2025-01-06", -8.50),
        ];

        let plan = begin_run(&db, "upstream", FetchMode::Delta).expect("plan");
        let report = complete_run(&db, plan, Ok(upstream_batch(txns.clone()))).expect("first");
        assert_eq!(report.rows_upserted, 2);
        assert_eq!(db.count_transactions().expect("count"), 2);

        let plan = begin_run(&db, "upstream", FetchMode::Delta).expect("plan");
        let report = complete_run(&db, plan, Ok(upstream_batch(txns))).expect("second");
        assert_eq!(report.rows_upserted, 0, "re-ingest changes nothing");
        assert_eq!(db.count_transactions().expect("count"), 2);

        let audits = db.get_ingest_audits("upstream").expect("audits");
        assert_eq!(audits.len(), 2);
        assert!(audits.iter().all(|a| a.status == "success"));
    }

    #[test]
    fn test_cursor_advances_with_batch() {
        let db = test_db();
        let plan = begin_run(&db, "upstream", FetchMode::Delta).expect("plan");
        complete_run(
            &db,
            plan,
            Ok(upstream_batch(vec![
                upstream_txn("t1", "2025-01-05", -1.0),
                upstream_txn("t2", "2025-01-09", -1.0),
            ])),
        )
        .expect("run");
        assert_eq!(
            db.read_source_cursor("upstream").expect("cursor"),
            Some("2025-01-09".to_string()),
            "cursor lands on the newest posted date"
        );
    }

    #[test]
    fn test_failed_fetch_leaves_cursor_and_audits_failure() {
        let db = test_db();
        db.write_source_cursor("upstream", "2025-01-15").expect("seed cursor");

        let plan = begin_run(&db, "upstream", FetchMode::Delta).expect("plan");
        assert_eq!(plan.since, "2025-01-14", "delta overlaps one day");

        let err = complete_run(&db, plan, Err(AppError::Upstream("503".into())))
            .expect_err("propagates");
        assert!(matches!(err, AppError::Upstream(_)));

        assert_eq!(
            db.read_source_cursor("upstream").expect("cursor"),
            Some("2025-01-15".to_string()),
            "cursor unchanged on failure"
        );
        let audits = db.get_ingest_audits("upstream").expect("audits");
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].status, "failure");
    }

    #[test]
    fn test_bad_record_rolls_back_whole_batch() {
        let db = test_db();
        let plan = begin_run(&db, "upstream", FetchMode::Delta).expect("plan");
        let batch = upstream_batch(vec![
            upstream_txn("good", "2025-01-05", -1.0),
            upstream_txn("bad", "not-a-date", -1.0),
        ]);
        assert!(complete_run(&db, plan, Ok(batch)).is_err());

        assert_eq!(db.count_transactions().expect("count"), 0, "all or nothing");
        assert_eq!(db.read_source_cursor("upstream").expect("cursor"), None);
        let audits = db.get_ingest_audits("upstream").expect("audits");
        assert_eq!(audits[0].status, "failure");
    }

    #[test]
    fn test_category_resolution_via_map() {
        let db = test_db();
        let holding = db.ensure_holding_category().expect("holding");
        db.insert_category_map_if_absent("upstream", "cat-9", holding)
            .expect("map");

        let mut txn = upstream_txn("t1", "2025-01-05", -3.0);
        txn.category_id = Some("cat-9".to_string());
        let plan = begin_run(&db, "upstream", FetchMode::Delta).expect("plan");
        complete_run(&db, plan, Ok(upstream_batch(vec![txn]))).expect("run");

        let key = idempotency_key("upstream", "t1", "2025-01-05T00:00:00Z", -300);
        let stored = db.get_transaction(&key).expect("get").expect("present");
        assert_eq!(stored.category_id, Some(holding));
    }
}
