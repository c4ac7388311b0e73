use std::sync::Arc;

use auditor::{
    config::AppConfig,
    db::Db,
    metrics::{Counters, ObservationView},
    poller::run_region_poller,
    provider::{JsonDirSource, SnapshotSource},
    reconciler::Reconciler,
    store::{LedgerRepository, SqlxLedgerRepository},
};
use common::logger::init_logger;

/// Connects, migrates and builds the repository shared by every region.
async fn init_store(cfg: &AppConfig) -> anyhow::Result<Arc<dyn LedgerRepository>> {
    let db = Db::connect(&cfg.database_url).await?;
    db.migrate().await?;

    Ok(Arc::new(SqlxLedgerRepository::new(db.pool.clone())))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = AppConfig::from_env()?;
    init_logger("auditor", cfg.log_format);

    tracing::info!(regions = ?cfg.regions, every = ?cfg.poll_interval, "Starting reservation auditor...");

    let repo = init_store(&cfg).await?;
    let counters = Counters::default();
    let reconciler = Arc::new(Reconciler::new(repo, cfg.reconcile.clone(), counters.clone()));
    let source: Arc<dyn SnapshotSource> = Arc::new(JsonDirSource::new(cfg.snapshot_dir.clone()));
    let view = ObservationView::new();

    for region in &cfg.regions {
        tokio::spawn(run_region_poller(
            region.clone(),
            cfg.poll_interval,
            Arc::clone(&source),
            Arc::clone(&reconciler),
            view.clone(),
        ));
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!(
        cycles = Counters::get(&counters.cycles),
        failed = Counters::get(&counters.cycles_failed),
        rows = Counters::get(&counters.rows_written),
        gauges = view.gauges().len(),
        "Shutdown signal received"
    );

    Ok(())
}
