//! Scanner endpoint.
//!
//! `POST /api/check-ins` with `{ "payload": "TKT1..." }` and the operator in `X-Staff-Id`.
//! Every classification is a 200 with the result body, rejected scans included. Only a
//! `transient_failure` answers 503, telling the scanner to retry the same scan.

use crate::identity::Scanner;
use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode};
use serde::Deserialize;
use turnstile_core::checkin::{CheckInOutcome, CheckInResult};

/// A scanned code.
#[derive(Debug, Deserialize)]
pub struct CheckInRequest {
    /// Raw QR payload
    pub payload: String,
}

/// `POST /api/check-ins`
pub async fn check_in(
    State(state): State<AppState>,
    scanner: Scanner,
    Json(request): Json<CheckInRequest>,
) -> (StatusCode, Json<CheckInResult>) {
    let result = state.validator.validate(&request.payload, scanner.0).await;
    let status = match result.outcome {
        CheckInOutcome::TransientFailure { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (status, Json(result))
}
