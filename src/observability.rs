use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: allocation attempts. Labels: outcome (confirmed, waitlisted, or the error code).
pub const ALLOCATIONS_TOTAL: &str = "spotres_allocations_total";

/// Histogram: allocation latency in seconds.
pub const ALLOCATION_DURATION_SECONDS: &str = "spotres_allocation_duration_seconds";

/// Counter: successful cancellations.
pub const CANCELLATIONS_TOTAL: &str = "spotres_cancellations_total";

/// Histogram: refund amount per cancellation.
pub const REFUND_AMOUNT: &str = "spotres_refund_amount";

// ── Background work ─────────────────────────────────────────────

/// Counter: transitions made by sweeps. Labels: to (target status).
pub const SWEEP_TRANSITIONS_TOTAL: &str = "spotres_sweep_transitions_total";

/// Counter: waitlisted reservations promoted to confirmed.
pub const WAITLIST_PROMOTIONS_TOTAL: &str = "spotres_waitlist_promotions_total";

/// Gauge: live surge multiplier. Labels: zone.
pub const SURGE_MULTIPLIER: &str = "spotres_surge_multiplier";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "spotres_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "spotres_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
