//! Application state shared across all HTTP handlers.

use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use turnstile_core::store::StoreFuture;
use turnstile_postgres::PostgresTicketingStore;
use turnstile_runtime::{BookingLedger, CheckInValidator};

/// Dependency check behind `GET /ready`.
pub trait ReadinessProbe: Send + Sync {
    /// Succeeds when storage can serve requests.
    fn check(&self) -> StoreFuture<'_, ()>;
}

impl ReadinessProbe for PostgresTicketingStore {
    fn check(&self) -> StoreFuture<'_, ()> {
        Box::pin(self.ping())
    }
}

/// Probe for deployments without an external dependency (in-memory stores).
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysReady;

impl ReadinessProbe for AlwaysReady {
    fn check(&self) -> StoreFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

/// Application state shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Booking lifecycle
    pub ledger: BookingLedger,
    /// Scan validation
    pub validator: CheckInValidator,
    /// Readiness check
    pub readiness: Arc<dyn ReadinessProbe>,
    /// Prometheus exposition
    pub metrics: PrometheusHandle,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(
        ledger: BookingLedger,
        validator: CheckInValidator,
        readiness: Arc<dyn ReadinessProbe>,
        metrics: PrometheusHandle,
    ) -> Self {
        Self {
            ledger,
            validator,
            readiness,
            metrics,
        }
    }
}
