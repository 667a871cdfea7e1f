use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests served. Labels: route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "campusbook_http_requests_total";

/// Histogram: HTTP handler latency in seconds. Labels: route.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "campusbook_http_request_duration_seconds";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: booking requests accepted.
pub const BOOKINGS_REQUESTED_TOTAL: &str = "campusbook_bookings_requested_total";

/// Counter: booking attempts refused because the slot was taken.
pub const BOOKING_CONFLICTS_TOTAL: &str = "campusbook_booking_conflicts_total";

/// Counter: booking status transitions. Labels: to.
pub const BOOKING_TRANSITIONS_TOTAL: &str = "campusbook_booking_transitions_total";

/// Counter: notification records created by the dispatcher.
pub const NOTIFICATIONS_DISPATCHED_TOTAL: &str = "campusbook_notifications_dispatched_total";

/// Counter: notifications lost (create failed or dispatcher lagged).
pub const NOTIFICATIONS_FAILED_TOTAL: &str = "campusbook_notifications_failed_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Counter: failed logins.
pub const LOGIN_FAILURES_TOTAL: &str = "campusbook_login_failures_total";

/// Gauge: live sessions.
pub const SESSIONS_ACTIVE: &str = "campusbook_sessions_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "campusbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "campusbook_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Status class label (`2xx`, `3xx`, ...) so cardinality stays fixed.
pub fn status_class(status: u16) -> &'static str {
    match status {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    }
}
