//! Prometheus metrics for the ticketing engine.
//!
//! Recorders are thin wrappers over the `metrics` macros so call sites stay one line and
//! the metric names live in one place. The server installs the Prometheus recorder and
//! renders it at `GET /metrics`.

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;
use turnstile_core::checkin::OutcomeCode;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

/// Check-in attempts by outcome
pub const CHECKIN_ATTEMPTS: &str = "turnstile_checkin_attempts_total";
/// Check-in latency
pub const CHECKIN_DURATION: &str = "turnstile_checkin_duration_seconds";
/// Booking transitions by kind
pub const BOOKINGS: &str = "turnstile_bookings_total";
/// Ticket-number collisions detected at commit
pub const TICKET_NUMBER_COLLISIONS: &str = "turnstile_ticket_number_collisions_total";
/// Storage calls cut off by the timeout
pub const STORAGE_TIMEOUTS: &str = "turnstile_storage_timeouts_total";
/// Tickets moved to `expired`
pub const TICKETS_EXPIRED: &str = "turnstile_tickets_expired_total";
/// Conditional writes that found the row already moved on, by operation
pub const STORAGE_CONFLICTS: &str = "turnstile_storage_conflicts_total";

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

fn builder() -> Result<PrometheusBuilder, MetricsError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
        )
        .map_err(|e| MetricsError::Build(e.to_string()))
}

/// Install the global Prometheus recorder and describe every metric.
///
/// # Errors
///
/// Returns [`MetricsError`] if the exporter cannot be built or a recorder is already
/// installed.
pub fn install_recorder() -> Result<PrometheusHandle, MetricsError> {
    let handle = builder()?
        .install_recorder()
        .map_err(|e| MetricsError::Install(e.to_string()))?;
    register_metrics();
    tracing::info!("Prometheus metrics recorder installed");
    Ok(handle)
}

/// A handle to a recorder that is not installed globally; renders nothing recorded
/// through the macros. For routers built in tests.
///
/// # Errors
///
/// Returns [`MetricsError::Build`] if the exporter cannot be built.
pub fn detached_handle() -> Result<PrometheusHandle, MetricsError> {
    Ok(builder()?.build_recorder().handle())
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(CHECKIN_ATTEMPTS, "Check-in attempts by outcome");
    describe_histogram!(CHECKIN_DURATION, "Time taken to validate a scan");
    describe_counter!(BOOKINGS, "Booking lifecycle transitions");
    describe_counter!(
        TICKET_NUMBER_COLLISIONS,
        "Ticket-number collisions detected by the uniqueness constraint"
    );
    describe_counter!(STORAGE_TIMEOUTS, "Storage calls that exceeded the timeout");
    describe_counter!(TICKETS_EXPIRED, "Tickets expired by the sweeper");
    describe_counter!(
        STORAGE_CONFLICTS,
        "Conditional writes lost to a concurrent transition"
    );
}

/// Check-in metrics recorder.
pub struct CheckInMetrics;

impl CheckInMetrics {
    /// Record one scan.
    pub fn record(outcome: OutcomeCode, duration: Duration) {
        counter!(CHECKIN_ATTEMPTS, "outcome" => outcome.as_str()).increment(1);
        histogram!(CHECKIN_DURATION).record(duration.as_secs_f64());
    }
}

/// Booking metrics recorder.
pub struct BookingMetrics;

impl BookingMetrics {
    /// Record a booking transition (`created`, `confirmed`, `cancelled`, ...).
    pub fn record_transition(transition: &'static str) {
        counter!(BOOKINGS, "transition" => transition).increment(1);
    }

    /// Record a ticket-number collision.
    pub fn record_collision() {
        counter!(TICKET_NUMBER_COLLISIONS).increment(1);
    }
}

/// Storage metrics recorder.
pub struct StorageMetrics;

impl StorageMetrics {
    /// Record a timed-out storage call.
    pub fn record_timeout(operation: &'static str) {
        counter!(STORAGE_TIMEOUTS, "operation" => operation).increment(1);
    }

    /// Record a conditional write that lost to a concurrent transition.
    pub fn record_conflict(operation: &'static str) {
        counter!(STORAGE_CONFLICTS, "operation" => operation).increment(1);
    }
}

/// Sweeper metrics recorder.
pub struct SweepMetrics;

impl SweepMetrics {
    /// Record expired tickets.
    pub fn record_expired(count: usize) {
        counter!(TICKETS_EXPIRED).increment(u64::try_from(count).unwrap_or(u64::MAX));
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn recorders_emit_named_series() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            CheckInMetrics::record(OutcomeCode::AlreadyUsed, Duration::from_millis(3));
            BookingMetrics::record_transition("confirmed");
            BookingMetrics::record_collision();
            StorageMetrics::record_timeout("check_in_ticket");
            StorageMetrics::record_conflict("transition_ticket");
            SweepMetrics::record_expired(4);
        });

        let rendered = handle.render();
        assert!(rendered.contains("turnstile_checkin_attempts_total{outcome=\"already_used\"} 1"));
        assert!(rendered.contains("turnstile_bookings_total{transition=\"confirmed\"} 1"));
        assert!(rendered.contains("turnstile_ticket_number_collisions_total 1"));
        assert!(rendered.contains("turnstile_storage_timeouts_total{operation=\"check_in_ticket\"} 1"));
        assert!(rendered.contains("turnstile_tickets_expired_total 4"));
        assert!(rendered.contains("turnstile_storage_conflicts_total{operation=\"transition_ticket\"} 1"));
    }

    #[test]
    fn detached_handle_renders() {
        let handle = detached_handle().unwrap();
        assert!(!handle.render().contains("turnstile_"));
    }
}
