use tracing::{Span, field};

use super::TraceId;

/// Root span for one unit of work (a poll cycle, a backfill run).
/// `region` is left empty so callers can record it once known.
pub fn root_span(name: &'static str, trace_id: &TraceId) -> Span {
    tracing::info_span!(
        "root",
        name = %name,
        trace_id = %trace_id,
        region = field::Empty
    )
}

