use std::sync::{Arc, Mutex};

use corridor_signals::{config, db, orchestrator};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stdout)
        .with_target(false)
        .init();

    info!("Corridor signals starting...");

    // Load configuration
    let cfg = config::load()?;
    info!("  DB Path: {}", cfg.db_path);
    info!("  Windows: {:?}", cfg.windows);
    info!("  Cycle interval: {}s", cfg.cycle_interval_secs);
    info!("  Batch limit: {}", cfg.batch_limit);

    // Run DB migrations once at startup
    {
        let conn = db::connect(&cfg.db_path)?;
        db::run_migrations(&conn)?;
    }

    // Shared DB connection
    let shared_conn = Arc::new(Mutex::new(db::connect(&cfg.db_path)?));

    // Single orchestrator per process: the corridor cache is not shared
    let orchestrator_handle = tokio::spawn({
        let cfg = cfg.clone();
        let conn = Arc::clone(&shared_conn);
        async move { orchestrator::run(cfg, conn).await }
    });

    // Graceful shutdown
    tokio::select! {
        res = orchestrator_handle => match res {
            Ok(Ok(_)) => info!("Orchestrator exited cleanly"),
            Ok(Err(e)) => error!("Orchestrator error: {:?}", e),
            Err(e) => error!("Orchestrator task panicked: {:?}", e),
        },
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received, stopping...");
        }
    }

    info!("Corridor signals stopped.");
    Ok(())
}
