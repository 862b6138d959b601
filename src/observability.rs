use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests served. Labels: method, route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "hallbook_http_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: method, route.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "hallbook_http_request_duration_seconds";

// ── Booking lifecycle ───────────────────────────────────────────

pub const BOOKINGS_CREATED_TOTAL: &str = "hallbook_bookings_created_total";
pub const BOOKINGS_UPDATED_TOTAL: &str = "hallbook_bookings_updated_total";
pub const BOOKINGS_CANCELLED_TOTAL: &str = "hallbook_bookings_cancelled_total";

/// Counter: writes refused because the interval overlapped an active booking.
pub const BOOKING_CONFLICTS_TOTAL: &str = "hallbook_booking_conflicts_total";

// ── Notifications ───────────────────────────────────────────────

/// Counter. Labels: recipient.
pub const NOTIFICATIONS_SENT_TOTAL: &str = "hallbook_notifications_sent_total";

/// Counter: deliveries abandoned after the last retry. Labels: recipient.
pub const NOTIFICATIONS_FAILED_TOTAL: &str = "hallbook_notifications_failed_total";

/// Counter: notifications never queued because the queue was full or closed.
pub const NOTIFICATIONS_DROPPED_TOTAL: &str = "hallbook_notifications_dropped_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: facilities currently loaded.
pub const FACILITIES_ACTIVE: &str = "hallbook_facilities_active";

/// Histogram: journal group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "hallbook_journal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (events per flush).
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "hallbook_journal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Coarse status class for metric labels.
pub fn status_class(status: u16) -> &'static str {
    match status {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classes() {
        assert_eq!(status_class(201), "2xx");
        assert_eq!(status_class(409), "4xx");
        assert_eq!(status_class(500), "5xx");
    }

    #[test]
    fn init_without_port_is_noop() {
        assert!(init(None).is_ok());
    }
}
