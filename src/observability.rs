use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::BuildError;

use crate::engine::BookingError;
use crate::model::Reservation;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: check-and-book calls. Labels: outcome.
pub const BOOKINGS_TOTAL: &str = "carbook_bookings_total";

/// Histogram: check-and-book latency in seconds. Labels: outcome.
pub const BOOKING_DURATION_SECONDS: &str = "carbook_booking_duration_seconds";

/// Counter: reservations cancelled.
pub const CANCELLATIONS_TOTAL: &str = "carbook_cancellations_total";

/// Counter: HTTP requests served. Labels: route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "carbook_http_requests_total";

/// Histogram: HTTP latency in seconds. Labels: route.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "carbook_http_request_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: cars currently registered.
pub const CARS_REGISTERED: &str = "carbook_cars_registered";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "carbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "carbook_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for the result of a booking attempt.
pub fn outcome_label(result: &Result<Reservation, BookingError>) -> &'static str {
    match result {
        Ok(_) => "booked",
        Err(BookingError::InvalidRequest(_)) => "invalid",
        Err(BookingError::NotFound(_)) => "not_found",
        Err(BookingError::Unavailable { .. }) => "unavailable",
        Err(BookingError::StorageFailure(_)) => "storage_failure",
        Err(BookingError::LimitExceeded(_)) => "limit_exceeded",
        Err(BookingError::AlreadyExists(_) | BookingError::HasReservations(_)) => "other",
    }
}

pub fn record_booking(result: &Result<Reservation, BookingError>, elapsed: Duration) {
    let outcome = outcome_label(result);
    metrics::counter!(BOOKINGS_TOTAL, "outcome" => outcome).increment(1);
    metrics::histogram!(BOOKING_DURATION_SECONDS, "outcome" => outcome)
        .record(elapsed.as_secs_f64());
}
