//! Time-based scheduler for the nightly ingest + snapshot job.
//!
//! A single designated instance (the `SCHEDULER_ENABLED` leader) runs a
//! one-minute poll loop over a cron expression built from the configured
//! hour and minute in the configured timezone. Sleep/wake gaps are
//! detected by time jumps; a job missed inside the grace window runs on
//! wake.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;

use crate::config::Config;
use crate::db::BudgetDb;
use crate::error::{AppError, AppResult};
use crate::ingest::client::UpstreamClient;

/// Grace period for missed jobs (2 hours).
const MISSED_JOB_GRACE_PERIOD_SECS: i64 = 7200;

/// Time jump threshold to detect sleep/wake (5 minutes).
const TIME_JUMP_THRESHOLD_SECS: i64 = 300;

/// Poll interval for the scheduler loop (1 minute).
const POLL_INTERVAL_SECS: u64 = 60;

pub struct Scheduler {
    config: Arc<Config>,
    schedule: Schedule,
    timezone: Tz,
    last_run: Option<DateTime<Utc>>,
}

impl Scheduler {
    pub fn new(config: Arc<Config>) -> AppResult<Self> {
        let expression = format!(
            "0 {} {} * * *",
            config.scheduler_minute, config.scheduler_hour
        );
        let schedule = Schedule::from_str(&expression).map_err(|e| {
            AppError::Validation(format!("invalid schedule '{expression}': {e}"))
        })?;
        let timezone: Tz = config.scheduler_tz.parse().map_err(|_| {
            AppError::Validation(format!("invalid SCHEDULER_TZ '{}'", config.scheduler_tz))
        })?;
        Ok(Self {
            config,
            schedule,
            timezone,
            last_run: None,
        })
    }

    /// Run the polling loop forever. Call only on the leader instance.
    pub async fn run(mut self) {
        log::info!(
            "Scheduler: nightly job at {:02}:{:02} {}",
            self.config.scheduler_hour,
            self.config.scheduler_minute,
            self.config.scheduler_tz
        );
        let mut last_check = Utc::now();

        loop {
            tokio::time::sleep(std::time::Duration::from_secs(POLL_INTERVAL_SECS)).await;
            let now = Utc::now();

            let time_jump = (now - last_check).num_seconds();
            if time_jump > TIME_JUMP_THRESHOLD_SECS {
                log::info!(
                    "Detected system wake (time jumped {time_jump}s), checking for missed jobs"
                );
                if let Some(missed) = self.find_missed_job(now) {
                    log::info!("Running nightly job missed at {missed}");
                    self.fire(now).await;
                }
            }

            if self.should_run_now(now) {
                self.fire(now).await;
            }

            last_check = now;
        }
    }

    /// A scheduled time is due when it falls within two minutes of now and
    /// has not already run.
    fn should_run_now(&self, now: DateTime<Utc>) -> bool {
        let now_local = now.with_timezone(&self.timezone);
        let mut upcoming = self
            .schedule
            .after(&(now_local - chrono::Duration::minutes(2)));
        if let Some(next) = upcoming.next() {
            let next_utc = next.with_timezone(&Utc);
            if (now - next_utc).num_seconds().abs() < 120 {
                if let Some(last) = self.last_run {
                    if (last - next_utc).num_seconds().abs() < 60 {
                        return false;
                    }
                }
                return true;
            }
        }
        false
    }

    /// Most recent scheduled time inside the grace window that never ran.
    fn find_missed_job(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let now_local = now.with_timezone(&self.timezone);
        let grace_start = now_local - chrono::Duration::seconds(MISSED_JOB_GRACE_PERIOD_SECS);

        for scheduled in self.schedule.after(&grace_start) {
            let scheduled_utc = scheduled.with_timezone(&Utc);
            if scheduled_utc > now {
                break;
            }
            match self.last_run {
                Some(last) if last >= scheduled_utc => continue,
                _ => return Some(scheduled_utc),
            }
        }
        None
    }

    async fn fire(&mut self, now: DateTime<Utc>) {
        self.last_run = Some(now);
        run_nightly_job(&self.config).await;
    }
}

/// The nightly sequence: delta ingest (when upstream credentials exist),
/// then snapshot + digest + alerts. An ingest failure does not block the
/// snapshot; the forecast should still refresh over whatever the store
/// holds.
pub async fn run_nightly_job(config: &Config) {
    use crate::ingest::{begin_run, complete_run, fetch_batch, FetchMode};

    match UpstreamClient::from_config(config) {
        Ok(client) => {
            // Phased run keeps the store handle out of the await
            let plan = match BudgetDb::open_at(config.db_path.clone())
                .and_then(|db| begin_run(&db, "upstream", FetchMode::Delta))
            {
                Ok(plan) => Some(plan),
                Err(e) => {
                    log::error!("Nightly ingest could not start: {e}");
                    None
                }
            };
            if let Some(plan) = plan {
                let fetched = fetch_batch(&client, &plan.since).await;
                match BudgetDb::open_at(config.db_path.clone())
                    .and_then(|db| complete_run(&db, plan, fetched))
                {
                    Ok(report) => {
                        log::info!("Nightly ingest: {} rows upserted", report.rows_upserted)
                    }
                    Err(e) => log::error!("Nightly ingest failed: {e}"),
                }
            }
        }
        Err(_) => {
            log::info!("Nightly job: no upstream credentials, skipping ingest");
        }
    }

    let snapshot_result = BudgetDb::open_at(config.db_path.clone())
        .and_then(|db| crate::snapshot::run_snapshot(&db, config, Utc::now().date_naive()));
    match snapshot_result {
        Ok(digest) => {
            log::info!(
                "Nightly snapshot complete: min balance {:?} on {:?}",
                digest.min_balance_cents,
                digest.min_balance_date
            );
        }
        Err(e) => {
            log::error!("Nightly snapshot failed (previous snapshot remains current): {e}");
        }
    }
}
