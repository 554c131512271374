//! Booking ledger service.
//!
//! Each operation follows the same shape:
//! 1. Load the booking (and reference data) from the store
//! 2. Validate or plan with the pure core functions
//! 3. Persist with a conditional write
//! 4. Map a lost race to the outcome the winner produced

use crate::issuer::TicketIssuer;
use crate::metrics::BookingMetrics;
use crate::{BookingPolicy, bounded};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use turnstile_core::booking::{BookingCommand, BookingTransition, LedgerError, NewBooking, UsedTicket};
use turnstile_core::environment::Clock;
use turnstile_core::identifier::QrSigner;
use turnstile_core::store::{BookingWrite, StoreError, TicketWrite, TicketingStore};
use turnstile_core::types::{Booking, BookingId, BookingStatus, Ticket, TicketStatus};

/// A booking together with the tickets it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingDetails {
    /// The booking
    pub booking: Booking,
    /// Its tickets (empty until confirmed)
    pub tickets: Vec<Ticket>,
}

/// Outcome reported by the payment processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentResult {
    /// Booking the charge was for
    pub booking_id: BookingId,
    /// Whether the charge succeeded
    pub success: bool,
    /// Processor reference; required when `success` is true
    pub reference: Option<String>,
}

/// Owns booking records and their status transitions.
#[derive(Clone)]
pub struct BookingLedger {
    store: Arc<dyn TicketingStore>,
    clock: Arc<dyn Clock>,
    issuer: TicketIssuer,
    default_max_per_order: u32,
    storage_timeout: Duration,
}

impl BookingLedger {
    /// Create a new ledger
    #[must_use]
    pub fn new(
        store: Arc<dyn TicketingStore>,
        signer: Arc<QrSigner>,
        clock: Arc<dyn Clock>,
        policy: BookingPolicy,
    ) -> Self {
        let issuer = TicketIssuer::new(Arc::clone(&store), signer, Arc::clone(&clock), &policy);
        Self {
            store,
            clock,
            issuer,
            default_max_per_order: policy.default_max_per_order,
            storage_timeout: policy.storage_timeout,
        }
    }

    async fn load(&self, booking_id: BookingId) -> Result<Booking, LedgerError> {
        bounded(
            "load_booking",
            self.storage_timeout,
            self.store.load_booking(booking_id),
        )
        .await?
        .ok_or(LedgerError::BookingNotFound(booking_id))
    }

    /// Validate a request and persist a `pending` booking with its soft reservation.
    ///
    /// # Errors
    ///
    /// `EventNotFound`, `TicketTypeNotFound`, `InvalidQuantity`, `TicketTypeMismatch`,
    /// `SaleWindowClosed`, `CapacityExceeded`, `PricingOverflow` or `Storage`. Nothing is
    /// persisted on error.
    #[tracing::instrument(skip(self), fields(user_id = %request.user_id, event_id = %request.event_id))]
    pub async fn create_booking(&self, request: NewBooking) -> Result<Booking, LedgerError> {
        let event = bounded(
            "load_event",
            self.storage_timeout,
            self.store.load_event(request.event_id),
        )
        .await?
        .ok_or(LedgerError::EventNotFound(request.event_id))?;

        let ticket_type = match request.ticket_type_id {
            Some(id) => Some(
                bounded("load_ticket_type", self.storage_timeout, self.store.load_ticket_type(id))
                    .await?
                    .ok_or(LedgerError::TicketTypeNotFound(id))?,
            ),
            None => None,
        };

        let booking = request.validate(
            &event,
            ticket_type.as_ref(),
            self.default_max_per_order,
            self.clock.now(),
        )?;

        bounded(
            "create_booking",
            self.storage_timeout,
            self.store.create_booking(booking.clone()),
        )
        .await
        .map_err(|err| match err {
            StoreError::CapacityExceeded {
                requested,
                remaining,
            } => LedgerError::CapacityExceeded {
                requested,
                remaining,
            },
            other => other.into(),
        })?;

        BookingMetrics::record_transition("created");
        tracing::info!(booking_id = %booking.id, quantity = booking.quantity, "Booking created");
        Ok(booking)
    }

    /// Confirm a `pending` booking and issue its tickets in the same write.
    ///
    /// # Errors
    ///
    /// `BookingNotFound`, `AlreadyFinalized` (carrying the current status),
    /// `TicketNumberExhausted`, `CapacityExceeded` or `Storage`.
    #[tracing::instrument(skip(self, payment_reference))]
    pub async fn confirm_booking(
        &self,
        booking_id: BookingId,
        payment_reference: &str,
    ) -> Result<BookingDetails, LedgerError> {
        let booking = self.load(booking_id).await?;
        BookingTransition::plan(
            &booking,
            &BookingCommand::Confirm {
                payment_reference: payment_reference.to_string(),
            },
        )?;
        self.issuer.issue_tickets(&booking, payment_reference).await
    }

    /// Cancel a `pending` booking and release its reservation.
    ///
    /// # Errors
    ///
    /// `BookingNotFound`, `AlreadyFinalized` or `Storage`.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_booking(&self, booking_id: BookingId) -> Result<Booking, LedgerError> {
        let booking = self.load(booking_id).await?;
        let booking = self.transition(&booking, &BookingCommand::Cancel).await?;
        BookingMetrics::record_transition("cancelled");
        tracing::info!("Booking cancelled");
        Ok(booking)
    }

    /// Refund a `confirmed` booking, cancelling each of its `valid` tickets.
    ///
    /// Checked-in tickets are never cancelled. If any exist, the valid tickets are still
    /// cancelled but the booking stays `confirmed` and `RefundConflict` lists the used ones.
    ///
    /// # Errors
    ///
    /// `BookingNotFound`, `NotRefundable`, `AlreadyFinalized`, `RefundConflict` or `Storage`.
    #[tracing::instrument(skip(self))]
    pub async fn refund_booking(&self, booking_id: BookingId) -> Result<Booking, LedgerError> {
        let booking = self.load(booking_id).await?;
        BookingTransition::plan(&booking, &BookingCommand::Refund)?;

        let tickets = bounded(
            "tickets_for_booking",
            self.storage_timeout,
            self.store.tickets_for_booking(booking_id),
        )
        .await?;

        let mut used = Vec::new();
        let mut cancelled = Vec::new();
        for ticket in tickets {
            let current = if ticket.status == TicketStatus::Valid {
                match bounded(
                    "transition_ticket",
                    self.storage_timeout,
                    self.store.transition_ticket(ticket.id, TicketStatus::Cancelled),
                )
                .await?
                {
                    TicketWrite::Applied(t) => {
                        cancelled.push(t.id);
                        continue;
                    }
                    // A scanner got there first
                    TicketWrite::Conflict(t) => t,
                }
            } else {
                ticket
            };

            if current.status == TicketStatus::Used {
                used.push(UsedTicket {
                    ticket_id: current.id,
                    ticket_number: current.ticket_number,
                    checked_in_at: current.checked_in_at,
                    checked_in_by: current.checked_in_by,
                });
            }
        }

        if !used.is_empty() {
            tracing::warn!(
                used = used.len(),
                cancelled = cancelled.len(),
                "Refund blocked by checked-in tickets, booking left confirmed"
            );
            return Err(LedgerError::RefundConflict {
                booking_id,
                used,
                cancelled,
            });
        }

        let booking = self.transition(&booking, &BookingCommand::Refund).await?;
        BookingMetrics::record_transition("refunded");
        tracing::info!(cancelled = cancelled.len(), "Booking refunded");
        Ok(booking)
    }

    /// Apply the payment processor's callback.
    ///
    /// Success confirms the booking and issues tickets; failure marks the payment failed,
    /// cancels the booking and releases its reservation.
    ///
    /// # Errors
    ///
    /// `MissingPaymentReference` when a success names no charge; otherwise as
    /// [`Self::confirm_booking`] on success and [`Self::cancel_booking`] on failure.
    #[tracing::instrument(skip(self), fields(booking_id = %result.booking_id, success = result.success))]
    pub async fn handle_payment_result(
        &self,
        result: PaymentResult,
    ) -> Result<BookingDetails, LedgerError> {
        if result.success {
            let Some(reference) = result.reference.filter(|r| !r.trim().is_empty()) else {
                tracing::warn!("Successful payment callback without a reference");
                return Err(LedgerError::MissingPaymentReference(result.booking_id));
            };
            return self.confirm_booking(result.booking_id, &reference).await;
        }

        let booking = self.load(result.booking_id).await?;
        let booking = self
            .transition(
                &booking,
                &BookingCommand::FailPayment {
                    payment_reference: result.reference,
                },
            )
            .await?;
        BookingMetrics::record_transition("payment_failed");
        tracing::info!("Payment failed, booking cancelled");
        Ok(BookingDetails {
            booking,
            tickets: Vec::new(),
        })
    }

    /// A booking and its tickets.
    ///
    /// # Errors
    ///
    /// `BookingNotFound` or `Storage`.
    pub async fn get_booking(&self, booking_id: BookingId) -> Result<BookingDetails, LedgerError> {
        let booking = self.load(booking_id).await?;
        let tickets = if booking.status == BookingStatus::Pending {
            Vec::new()
        } else {
            bounded(
                "tickets_for_booking",
                self.storage_timeout,
                self.store.tickets_for_booking(booking_id),
            )
            .await?
        };
        Ok(BookingDetails { booking, tickets })
    }

    async fn transition(
        &self,
        booking: &Booking,
        command: &BookingCommand,
    ) -> Result<Booking, LedgerError> {
        let plan = BookingTransition::plan(booking, command)?;
        match bounded(
            "transition_booking",
            self.storage_timeout,
            self.store.transition_booking(booking.id, plan, self.clock.now()),
        )
        .await?
        {
            BookingWrite::Applied(updated) => Ok(updated),
            BookingWrite::Conflict(current) => Err(LedgerError::AlreadyFinalized {
                booking_id: current.id,
                status: current.status,
            }),
        }
    }
}
