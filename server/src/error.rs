//! Error types for HTTP handlers.
//!
//! Bridges ledger and storage errors to HTTP responses with a machine-readable code.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::fmt;
use turnstile_core::booking::LedgerError;
use turnstile_core::store::StoreError;

/// Application error type for web handlers.
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: &'static str,
    /// Structured context for the client (e.g. conflicting tickets)
    details: Option<serde_json::Value>,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: &'static str) -> Self {
        Self {
            status,
            message,
            code,
            details: None,
            source: None,
        }
    }

    /// Attach an internal source error.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Attach structured details to the response body.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// HTTP status
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable code
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message.into(), "BAD_REQUEST")
    }

    /// Create a 401 Unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message.into(), "UNAUTHORIZED")
    }

    /// Create a 404 Not Found error.
    #[must_use]
    pub fn not_found(resource: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("{resource} with id {id} not found"),
            "NOT_FOUND",
        )
    }

    /// Create a 409 Conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>, code: &'static str) -> Self {
        Self::new(StatusCode::CONFLICT, message.into(), code)
    }

    /// Create a 422 Unprocessable Entity error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message.into(), "VALIDATION_ERROR")
    }

    /// Create a 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message.into(), "INTERNAL_SERVER_ERROR")
    }

    /// Create a 503 Service Unavailable error; the request may be retried unchanged.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message.into(), "SERVICE_UNAVAILABLE")
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            match &self.source {
                Some(source) => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    error = %source,
                    "Request failed"
                ),
                None => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    "Request failed"
                ),
            }
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        if err.is_transient() {
            Self::unavailable("Storage is temporarily unavailable, retry the request").with_source(err)
        } else {
            Self::internal("An internal error occurred").with_source(err)
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        let message = err.to_string();
        match err {
            LedgerError::InvalidQuantity { .. }
            | LedgerError::TicketTypeMismatch { .. }
            | LedgerError::PricingOverflow
            | LedgerError::MissingPaymentReference(_) => Self::validation(message),
            LedgerError::CapacityExceeded {
                requested,
                remaining,
            } => Self::conflict(message, "CAPACITY_EXCEEDED").with_details(serde_json::json!({
                "requested": requested,
                "remaining": remaining,
            })),
            LedgerError::SaleWindowClosed(_) => Self::conflict(message, "SALE_CLOSED"),
            LedgerError::EventNotFound(id) => Self::not_found("Event", id),
            LedgerError::TicketTypeNotFound(id) => Self::not_found("Ticket type", id),
            LedgerError::BookingNotFound(id) => Self::not_found("Booking", id),
            LedgerError::AlreadyFinalized { status, .. } => Self::conflict(message, "ALREADY_FINALIZED")
                .with_details(serde_json::json!({ "status": status })),
            LedgerError::NotRefundable { status, .. } => Self::conflict(message, "NOT_REFUNDABLE")
                .with_details(serde_json::json!({ "status": status })),
            LedgerError::RefundConflict {
                used, cancelled, ..
            } => Self::conflict(message, "REFUND_CONFLICT").with_details(serde_json::json!({
                "used": used,
                "cancelled": cancelled,
            })),
            LedgerError::TicketNumberExhausted { .. } => {
                Self::unavailable("Could not issue tickets, retry the confirmation")
                    .with_source(anyhow::anyhow!(message))
            }
            LedgerError::Storage(store) => store.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use turnstile_core::types::{BookingId, BookingStatus};

    #[test]
    fn test_error_display() {
        let err = AppError::bad_request("Invalid input");
        assert_eq!(err.to_string(), "[BAD_REQUEST] Invalid input");
    }

    #[test]
    fn ledger_errors_map_to_statuses() {
        let cases = [
            (
                LedgerError::InvalidQuantity { quantity: 0, max: 8 },
                StatusCode::UNPROCESSABLE_ENTITY,
                "VALIDATION_ERROR",
            ),
            (
                LedgerError::CapacityExceeded {
                    requested: 3,
                    remaining: 2,
                },
                StatusCode::CONFLICT,
                "CAPACITY_EXCEEDED",
            ),
            (
                LedgerError::BookingNotFound(BookingId::new()),
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
            ),
            (
                LedgerError::AlreadyFinalized {
                    booking_id: BookingId::new(),
                    status: BookingStatus::Cancelled,
                },
                StatusCode::CONFLICT,
                "ALREADY_FINALIZED",
            ),
            (
                LedgerError::MissingPaymentReference(BookingId::new()),
                StatusCode::UNPROCESSABLE_ENTITY,
                "VALIDATION_ERROR",
            ),
            (
                LedgerError::TicketNumberExhausted {
                    booking_id: BookingId::new(),
                    attempts: 5,
                },
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
            ),
            (
                LedgerError::Storage(StoreError::Timeout {
                    operation: "load_booking",
                    after_ms: 2_000,
                }),
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
            ),
            (
                LedgerError::Storage(StoreError::DatabaseError("boom".to_string())),
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_SERVER_ERROR",
            ),
        ];

        for (err, status, code) in cases {
            let app: AppError = err.into();
            assert_eq!(app.status(), status);
            assert_eq!(app.code(), code);
        }
    }
}
