//! Service entry point: open the store (running migrations), spawn the
//! scheduler on the leader instance, serve the HTTP API.

use cashflowd::config::Config;
use cashflowd::db::BudgetDb;
use cashflowd::http::{serve, AppState};
use cashflowd::scheduler::Scheduler;

#[tokio::main]
async fn main() {
    env_logger::init();
    let config = Config::from_env();

    // Open once at startup so migrations run before any request arrives
    if let Err(e) = BudgetDb::open_at(config.db_path.clone()) {
        log::error!("Cannot open store at {}: {e}", config.db_path.display());
        std::process::exit(2);
    }
    log::info!(
        "cashflowd {} (store {})",
        cashflowd::VERSION,
        config.db_path.display()
    );

    let state = AppState::new(config);

    if state.config.scheduler_enabled {
        match Scheduler::new(state.config.clone()) {
            Ok(scheduler) => {
                tokio::spawn(scheduler.run());
            }
            Err(e) => {
                log::error!("Scheduler disabled: {e}");
            }
        }
    } else {
        log::info!("Scheduler disabled (SCHEDULER_ENABLED not set); this instance serves reads/writes only");
    }

    if let Err(e) = serve(state).await {
        log::error!("HTTP server exited: {e}");
        std::process::exit(2);
    }
}
