//! Booking endpoints.
//!
//! - `POST /api/bookings`: create a pending booking (201)
//! - `GET /api/bookings/:id`: booking and its tickets
//! - `POST /api/bookings/:id/cancel`: cancel a pending booking
//! - `POST /api/bookings/:id/refund`: refund a confirmed booking
//!
//! Every endpoint is restricted to the booking's buyer. Other callers get 404 so booking
//! ids cannot be probed.

#![allow(clippy::missing_errors_doc)]

use crate::error::AppError;
use crate::identity::Buyer;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use turnstile_core::booking::NewBooking;
use turnstile_core::types::{Booking, BookingId, EventId, TicketTypeId};
use turnstile_runtime::BookingDetails;

/// Request to create a booking.
#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    /// Event to book
    pub event_id: EventId,
    /// Ticket type, if the event sells typed tickets
    #[serde(default)]
    pub ticket_type_id: Option<TicketTypeId>,
    /// Units to book
    pub quantity: u32,
}

async fn owned_booking(state: &AppState, buyer: Buyer, id: BookingId) -> Result<BookingDetails, AppError> {
    let details = state.ledger.get_booking(id).await?;
    if details.booking.user_id != buyer.0 {
        tracing::warn!(booking_id = %id, user_id = %buyer.0, "Booking requested by non-owner");
        return Err(AppError::not_found("Booking", id));
    }
    Ok(details)
}

/// `POST /api/bookings`
#[tracing::instrument(skip(state, request), fields(user_id = %buyer.0))]
pub async fn create_booking(
    State(state): State<AppState>,
    buyer: Buyer,
    Json(request): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<Booking>), AppError> {
    let booking = state
        .ledger
        .create_booking(NewBooking {
            user_id: buyer.0,
            event_id: request.event_id,
            ticket_type_id: request.ticket_type_id,
            quantity: request.quantity,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

/// `GET /api/bookings/:id`
pub async fn get_booking(
    State(state): State<AppState>,
    buyer: Buyer,
    Path(id): Path<BookingId>,
) -> Result<Json<BookingDetails>, AppError> {
    owned_booking(&state, buyer, id).await.map(Json)
}

/// `POST /api/bookings/:id/cancel`
#[tracing::instrument(skip(state), fields(user_id = %buyer.0))]
pub async fn cancel_booking(
    State(state): State<AppState>,
    buyer: Buyer,
    Path(id): Path<BookingId>,
) -> Result<Json<Booking>, AppError> {
    owned_booking(&state, buyer, id).await?;
    Ok(Json(state.ledger.cancel_booking(id).await?))
}

/// `POST /api/bookings/:id/refund`
#[tracing::instrument(skip(state), fields(user_id = %buyer.0))]
pub async fn refund_booking(
    State(state): State<AppState>,
    buyer: Buyer,
    Path(id): Path<BookingId>,
) -> Result<Json<Booking>, AppError> {
    owned_booking(&state, buyer, id).await?;
    Ok(Json(state.ledger.refund_booking(id).await?))
}
