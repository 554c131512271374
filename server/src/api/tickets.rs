//! Ticket audit trail.

#![allow(clippy::missing_errors_doc)]

use crate::error::AppError;
use crate::identity::Scanner;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
};
use turnstile_core::checkin::AuditEntry;
use turnstile_core::types::TicketId;

/// `GET /api/tickets/:id/audit`: every check-in attempt for a ticket, oldest first.
pub async fn audit_trail(
    State(state): State<AppState>,
    scanner: Scanner,
    Path(id): Path<TicketId>,
) -> Result<Json<Vec<AuditEntry>>, AppError> {
    tracing::debug!(ticket_id = %id, staff_id = %scanner.0, "Audit trail requested");
    Ok(Json(state.validator.audit_trail(id).await?))
}
