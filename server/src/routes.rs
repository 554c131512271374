//! Router configuration.

use crate::api::{bookings, check_ins, payments, tickets};
use crate::health::{health_check, metrics, readiness_check};
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

/// Build the complete router.
///
/// - `GET /health`, `GET /ready`, `GET /metrics` (no identity required)
/// - `/api/bookings`, `/api/payments/callback` for buyers and the payment processor
/// - `/api/check-ins`, `/api/tickets/:id/audit` for scanner staff
///
/// Every request gets an `x-request-id` (generated when absent) that is echoed back and
/// recorded on the trace span.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/bookings", post(bookings::create_booking))
        .route("/bookings/:id", get(bookings::get_booking))
        .route("/bookings/:id/cancel", post(bookings::cancel_booking))
        .route("/bookings/:id/refund", post(bookings::refund_booking))
        .route("/payments/callback", post(payments::payment_callback))
        .route("/check-ins", post(check_ins::check_in))
        .route("/tickets/:id/audit", get(tickets::audit_trail));

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics))
        .nest("/api", api_routes)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .with_state(state)
}
