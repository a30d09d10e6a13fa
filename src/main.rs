use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use bulwark::app::App;
use bulwark::config::{Config, SearchBackend};
use bulwark::logging;
use bulwark::report::ReportScheduler;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let config = Config::from_env()?;
    info!("Loaded configuration");

    if config.search.backend == SearchBackend::Memory {
        warn!(
            "SEARCH_BACKEND=memory: the daemon reports on its own empty in-process index; \
             documents ingested by other processes are not visible"
        );
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let app = App::build(&config, Some(shutdown_rx.clone())).await?;
    info!("Database initialized successfully");

    let scheduler = Arc::new(ReportScheduler::new(
        app.service,
        app.store,
        app.guard,
        config.scheduler_settings(),
        shutdown_rx,
    ));
    let handles = scheduler.spawn();
    info!(
        interval_secs = config.report.interval_secs,
        lock_prefix = %config.lock.key_prefix,
        "report scheduler running"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping scheduler...");
    shutdown_tx.send_replace(true);

    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "scheduler task ended abnormally");
        }
    }
    info!("Scheduler stopped");

    Ok(())
}
