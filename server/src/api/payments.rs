//! Payment processor callback.
//!
//! `POST /api/payments/callback` with `{ "booking_id", "success", "reference" }`.
//! Success confirms the booking and returns it with its freshly issued tickets; failure
//! cancels it. Replays of an applied callback get 409 `ALREADY_FINALIZED`.

#![allow(clippy::missing_errors_doc)]

use crate::error::AppError;
use crate::state::AppState;
use axum::{Json, extract::State};
use turnstile_runtime::{BookingDetails, PaymentResult};

/// `POST /api/payments/callback`
#[tracing::instrument(skip(state, result), fields(booking_id = %result.booking_id, success = result.success))]
pub async fn payment_callback(
    State(state): State<AppState>,
    Json(result): Json<PaymentResult>,
) -> Result<Json<BookingDetails>, AppError> {
    Ok(Json(state.ledger.handle_payment_result(result).await?))
}
