use std::time::Duration;

use common::logger::{TraceId, root_span};
use tracing::{Span, field};

/// Span wrapping one poll cycle of one region.
pub fn cycle_span(region: &str, trace_id: &TraceId) -> Span {
    let span = root_span("reconcile_cycle", trace_id);
    span.record("region", field::display(region));
    span
}

/// Span wrapping the reconciliation of one reservation family.
pub fn family_span(family: &str) -> Span {
    tracing::info_span!("family", family = %family, reservation_id = field::Empty)
}

/// Attaches the reservation currently being classified to the active span.
pub fn annotate_reservation(reservation_id: &uuid::Uuid) {
    Span::current().record("reservation_id", field::display(reservation_id));
}

pub async fn warn_if_slow<F, T>(label: &'static str, max: Duration, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = std::time::Instant::now();
    let out = fut.await;
    let elapsed = start.elapsed();
    if elapsed > max {
        tracing::warn!(
            target: "performance",
            label = label,
            elapsed_ms = elapsed.as_millis() as u64,
            "slow operation detected"
        );
    }
    out
}
