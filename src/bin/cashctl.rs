//! Operator CLI with the same semantics as the admin/ingest endpoints.
//!
//! Exit codes: 0 success, 1 usage error, 2 operational failure (an audit
//! row is written for failed ingest runs).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

use cashflowd::config::Config;
use cashflowd::db::BudgetDb;
use cashflowd::error::AppResult;
use cashflowd::ingest::client::UpstreamClient;

#[derive(Parser)]
#[command(name = "cashctl", about = "cashflowd ops CLI", version)]
struct Cli {
    /// Path to the SQLite store (defaults to DB_PATH or ~/.cashflowd/budget.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingestion runs against the upstream service or a CSV export
    Ingest(IngestArgs),
    /// Category snapshot and mapping
    Categories {
        #[command(subcommand)]
        command: CategoriesCommand,
    },
    /// Reconciliation checks over the store
    Reconcile,
    /// Store utilities
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
}

#[derive(Args)]
struct IngestArgs {
    /// Source name (e.g. "upstream")
    source: String,
    /// Run a delta sync from the stored cursor
    #[arg(long, conflicts_with_all = ["backfill", "from_csv"])]
    delta: bool,
    /// Run a backfill over the last N months
    #[arg(long, conflicts_with = "from_csv")]
    backfill: bool,
    /// Backfill horizon in months
    #[arg(long, default_value_t = 3)]
    months: u32,
    /// Import from a CSV export instead of the upstream API
    #[arg(long)]
    from_csv: Option<PathBuf>,
    /// Override the account name for CSV rows
    #[arg(long)]
    account: Option<String>,
}

#[derive(Subcommand)]
enum CategoriesCommand {
    /// Snapshot upstream categories and refresh the mapping
    Sync {
        /// Source name (e.g. "upstream")
        source: String,
    },
}

#[derive(Subcommand)]
enum DbCommand {
    /// Apply pending migrations
    Migrate,
    /// Delete the store file, re-create the schema, optionally repopulate
    Reset {
        /// Skip the confirmation check
        #[arg(long)]
        force: bool,
        /// Leave the fresh store empty
        #[arg(long)]
        no_populate: bool,
        /// Repopulate with a delta sync instead of a backfill
        #[arg(long, conflicts_with = "backfill")]
        delta: bool,
        /// Repopulate with a backfill (the default)
        #[arg(long)]
        backfill: bool,
        /// Backfill horizon in months
        #[arg(long, default_value_t = 3)]
        months: u32,
    },
}

fn open_store(config: &Config, db_override: &Option<PathBuf>) -> AppResult<BudgetDb> {
    let path = db_override.clone().unwrap_or_else(|| config.db_path.clone());
    BudgetDb::open_at(path)
}

async fn run(cli: Cli, config: &Config) -> AppResult<()> {
    match cli.command {
        Command::Ingest(args) => {
            let db = open_store(config, &cli.db)?;
            if let Some(csv_path) = args.from_csv {
                let report =
                    cashflowd::ingest::csv::run_import(&db, &csv_path, args.account.as_deref())?;
                println!(
                    "CSV import: {} rows upserted ({})",
                    report.rows_upserted, report.status
                );
            } else if args.backfill {
                let client = UpstreamClient::from_config(config)?;
                let report =
                    cashflowd::ingest::run_backfill(&db, &client, &args.source, args.months)
                        .await?;
                println!(
                    "Backfill ({} months): {} rows upserted ({})",
                    args.months, report.rows_upserted, report.status
                );
            } else {
                // Delta is the default mode
                let client = UpstreamClient::from_config(config)?;
                let report = cashflowd::ingest::run_delta(&db, &client, &args.source).await?;
                println!(
                    "Delta sync: {} rows upserted ({})",
                    report.rows_upserted, report.status
                );
            }
        }
        Command::Categories { command } => match command {
            CategoriesCommand::Sync { source } => {
                let db = open_store(config, &cli.db)?;
                let client = UpstreamClient::from_config(config)?;
                let report = cashflowd::ingest::mapper::sync_categories(&db, &client, &source).await?;
                println!(
                    "Category sync: {} seen, {} upserted, {} newly mapped",
                    report.categories_seen, report.categories_upserted, report.maps_created
                );
            }
        },
        Command::Reconcile => {
            let db = open_store(config, &cli.db)?;
            reconcile(&db)?;
        }
        Command::Db { command } => match command {
            DbCommand::Migrate => {
                // Opening applies pending migrations
                let _ = open_store(config, &cli.db)?;
                println!("Migrations up to date.");
            }
            DbCommand::Reset {
                force,
                no_populate,
                delta,
                backfill: _,
                months,
            } => {
                let path = cli.db.clone().unwrap_or_else(|| config.db_path.clone());
                if path.exists() {
                    if !force {
                        return Err(cashflowd::error::AppError::Validation(
                            "refusing to delete the store without --force".into(),
                        ));
                    }
                    std::fs::remove_file(&path)?;
                    // WAL side files go with the store
                    let _ = std::fs::remove_file(path.with_extension("db-wal"));
                    let _ = std::fs::remove_file(path.with_extension("db-shm"));
                }
                let db = BudgetDb::open_at(path)?;
                println!("Store re-created.");

                if !no_populate {
                    let client = UpstreamClient::from_config(config)?;
                    let report = if delta {
                        cashflowd::ingest::run_delta(&db, &client, "upstream").await?
                    } else {
                        cashflowd::ingest::run_backfill(&db, &client, "upstream", months).await?
                    };
                    println!(
                        "Repopulated: {} rows upserted ({})",
                        report.rows_upserted, report.status
                    );
                }
            }
        },
    }
    Ok(())
}

/// Reconciliation: compare anchor-projected balances against cleared
/// history and surface rows that cannot resolve.
fn reconcile(db: &BudgetDb) -> AppResult<()> {
    let today = chrono::Utc::now().date_naive();
    let transactions = db.count_transactions()?;
    println!("transactions: {transactions}");

    let orphans: i64 = db.conn_ref().query_row(
        "SELECT COUNT(*) FROM transactions t
         WHERE NOT EXISTS (SELECT 1 FROM accounts a WHERE a.id = t.account_id)",
        [],
        |row| row.get(0),
    )?;
    if orphans > 0 {
        println!("WARNING: {orphans} transactions reference missing accounts");
    }

    for account in db.get_all_accounts()? {
        let balance = cashflowd::forecast::anchor::opening_balance(db, today, &[account.id])?;
        let anchored = db.get_anchor(account.id)?.is_some();
        println!(
            "account {:>3}  {:<24} {:>12.2} {}  {}",
            account.id,
            account.name,
            balance as f64 / 100.0,
            account.currency,
            if anchored { "(anchored)" } else { "" }
        );
        if let Some(anchor) = db.get_anchor(account.id)? {
            if let Some(floor) = anchor.min_floor_cents {
                if balance < floor {
                    println!(
                        "  BREACH: balance {:.2} below declared floor {:.2}",
                        balance as f64 / 100.0,
                        floor as f64 / 100.0
                    );
                }
            }
        }
    }

    let alerts = db.get_unresolved_alerts()?;
    println!("unresolved alerts: {}", alerts.len());
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help/version are not usage errors
            if e.use_stderr() {
                eprintln!("{e}");
                return ExitCode::from(1);
            }
            print!("{e}");
            return ExitCode::SUCCESS;
        }
    };

    let config = Config::from_env();
    match run(cli, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
    }
}
