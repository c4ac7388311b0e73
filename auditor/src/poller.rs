use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

use crate::metrics::ObservationView;
use crate::provider::SnapshotSource;
use crate::reconciler::Reconciler;

/// Polls one region forever. Regions never share lineage, so each one
/// gets its own task and failures stay local to the cycle.
pub async fn run_region_poller(
    region: String,
    every: Duration,
    source: Arc<dyn SnapshotSource>,
    reconciler: Arc<Reconciler>,
    view: ObservationView,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        poll_once(&region, source.as_ref(), &reconciler, &view).await;
    }
}

/// One fetch + reconcile round. Returns true when a cycle completed.
pub async fn poll_once(
    region: &str,
    source: &dyn SnapshotSource,
    reconciler: &Reconciler,
    view: &ObservationView,
) -> bool {
    let raw = match source.fetch(region).await {
        Ok(raw) => raw,
        Err(e) => {
            // No snapshot yet -> skip this tick.
            warn!(error = %e, region = %region, "snapshot unavailable");
            return false;
        }
    };

    match reconciler.run_cycle(&raw, Utc::now()).await {
        Ok(report) => {
            debug!(region = %region, writes = report.writes(), "cycle done");
            view.publish(region, report.observations);
            true
        }
        Err(e) => {
            error!(error = ?e, region = %region, "reconcile cycle failed");
            false
        }
    }
}
