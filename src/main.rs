use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use spotres::clock::{Clock, SystemClock};
use spotres::config::Config;
use spotres::directory::{InMemoryDirectory, ResourceDirectory};
use spotres::engine::{Engine, EngineDeps};
use spotres::notify::NotifyHub;
use spotres::pricing::{DiscountRegistry, InMemoryDiscountRegistry, PricingEngine, StaticRateTable};
use spotres::sweeper::{self, Sweeper};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    spotres::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let directory: Arc<dyn ResourceDirectory> = match &config.spots_file {
        Some(path) => Arc::new(InMemoryDirectory::load_json(path)?),
        None => Arc::new(InMemoryDirectory::new()),
    };
    let discounts: Arc<dyn DiscountRegistry> = match &config.discounts_file {
        Some(path) => Arc::new(InMemoryDiscountRegistry::load_json(path)?),
        None => Arc::new(InMemoryDiscountRegistry::new()),
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let pricing = Arc::new(PricingEngine::new(
        Arc::new(StaticRateTable::default()),
        discounts,
        directory.clone(),
        clock.clone(),
        config.engine.pricing.clone(),
    ));
    let deps = EngineDeps {
        directory,
        pricing,
        clock,
        notify: Arc::new(NotifyHub::new()),
    };
    let engine = Arc::new(Engine::new(config.wal_path(), deps, config.engine.clone())?);

    let sweeper = Arc::new(Sweeper::new(engine.clone()));
    tokio::spawn(sweeper::run_no_show_sweeper(
        sweeper.clone(),
        Duration::from_secs(config.no_show_sweep_secs.max(1)),
    ));
    tokio::spawn(sweeper::run_expiry_sweeper(
        sweeper,
        Duration::from_secs(config.expiry_sweep_secs.max(1)),
    ));
    tokio::spawn(sweeper::run_compactor(engine.clone(), config.compact_threshold));

    info!("spotres started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  no-show sweep: every {}s", config.no_show_sweep_secs);
    info!("  expiry sweep: every {}s", config.expiry_sweep_secs);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    shutdown_signal().await?;
    info!("shutdown signal received, compacting reservation log");
    if let Err(e) = engine.compact_wal().await {
        tracing::error!("final compaction failed: {e:?}");
    }
    info!("spotres stopped");
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            r = ctrl_c => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }
    Ok(())
}
