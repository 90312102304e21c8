use tracing::trace;

// Trace-based counters; a subscriber filtering on `vitrine.metrics` can aggregate them.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "vitrine.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "vitrine.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn stage_failed(stage: &'static str) {
    trace!(
        target = "vitrine.metrics",
        stage = stage,
        "stage_failures_total_inc"
    );
}
