//! Ticket issuance.
//!
//! Issuance is never a separate step a booking can be left halfway through: the tickets,
//! the booking's `pending → confirmed` change and the ticket type's `reserved → sold` move
//! are one store write. A ticket-number collision rolls that write back; the issuer then
//! mints a fresh batch and tries again, up to the configured number of attempts.

use crate::ledger::BookingDetails;
use crate::metrics::BookingMetrics;
use crate::retry::{RetryPolicy, retry_with_predicate};
use crate::{BookingPolicy, bounded};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use turnstile_core::booking::LedgerError;
use turnstile_core::environment::Clock;
use turnstile_core::identifier::{QrSigner, TicketNumber};
use turnstile_core::store::{BookingWrite, Confirmation, StoreError, TicketingStore};
use turnstile_core::types::{Booking, Ticket, TicketId, TicketStatus};

/// Mints tickets for a booking and commits them with its confirmation.
#[derive(Clone)]
pub struct TicketIssuer {
    store: Arc<dyn TicketingStore>,
    signer: Arc<QrSigner>,
    clock: Arc<dyn Clock>,
    attempts: u32,
    storage_timeout: Duration,
}

impl TicketIssuer {
    /// Create a new issuer
    #[must_use]
    pub fn new(
        store: Arc<dyn TicketingStore>,
        signer: Arc<QrSigner>,
        clock: Arc<dyn Clock>,
        policy: &BookingPolicy,
    ) -> Self {
        Self {
            store,
            signer,
            clock,
            attempts: policy.ticket_number_attempts.max(1),
            storage_timeout: policy.storage_timeout,
        }
    }

    /// One `valid` ticket per purchased unit, each with a fresh number and signed payload.
    #[must_use]
    pub fn mint_tickets(&self, booking: &Booking, issued_at: DateTime<Utc>) -> Vec<Ticket> {
        (0..booking.quantity)
            .map(|_| {
                let id = TicketId::new();
                Ticket {
                    id,
                    booking_id: booking.id,
                    user_id: booking.user_id,
                    event_id: booking.event_id,
                    ticket_type_id: booking.ticket_type_id,
                    ticket_number: TicketNumber::generate(booking.event_id),
                    qr_payload: self.signer.sign(id, issued_at),
                    status: TicketStatus::Valid,
                    checked_in_at: None,
                    checked_in_by: None,
                    created_at: issued_at,
                }
            })
            .collect()
    }

    /// Confirm `booking` and persist its tickets atomically.
    ///
    /// # Errors
    ///
    /// - `AlreadyFinalized`: the booking left `pending` (a concurrent confirmation won)
    /// - `TicketNumberExhausted`: every attempt collided; the booking is still `pending`
    /// - `CapacityExceeded`: selling would exceed the ticket type's availability
    /// - `Storage`: the store failed or timed out
    #[tracing::instrument(skip(self, booking, payment_reference), fields(booking_id = %booking.id, quantity = booking.quantity))]
    pub async fn issue_tickets(
        &self,
        booking: &Booking,
        payment_reference: &str,
    ) -> Result<BookingDetails, LedgerError> {
        let committed = retry_with_predicate(
            RetryPolicy::immediate(self.attempts),
            || {
                let issued_at = self.clock.now();
                let tickets = self.mint_tickets(booking, issued_at);
                let confirmation = Confirmation {
                    booking_id: booking.id,
                    payment_reference: payment_reference.to_string(),
                    tickets: tickets.clone(),
                    confirmed_at: issued_at,
                };
                async move {
                    let write = bounded(
                        "confirm_booking",
                        self.storage_timeout,
                        self.store.confirm_booking(confirmation),
                    )
                    .await;
                    if let Err(StoreError::DuplicateTicketNumber(number)) = &write {
                        BookingMetrics::record_collision();
                        tracing::warn!(ticket_number = %number, "Ticket number collision, re-minting batch");
                    }
                    write.map(|write| (write, tickets))
                }
            },
            |err| matches!(err, StoreError::DuplicateTicketNumber(_)),
        )
        .await;

        match committed {
            Ok((BookingWrite::Applied(booking), tickets)) => {
                BookingMetrics::record_transition("confirmed");
                tracing::info!(tickets = tickets.len(), "Booking confirmed, tickets issued");
                Ok(BookingDetails { booking, tickets })
            }
            Ok((BookingWrite::Conflict(current), _)) => Err(LedgerError::AlreadyFinalized {
                booking_id: current.id,
                status: current.status,
            }),
            Err(StoreError::DuplicateTicketNumber(_)) => {
                tracing::error!(attempts = self.attempts, "Ticket numbers exhausted, booking left pending");
                Err(LedgerError::TicketNumberExhausted {
                    booking_id: booking.id,
                    attempts: self.attempts,
                })
            }
            Err(StoreError::CapacityExceeded {
                requested,
                remaining,
            }) => Err(LedgerError::CapacityExceeded {
                requested,
                remaining,
            }),
            Err(StoreError::NotFound { .. }) => Err(LedgerError::BookingNotFound(booking.id)),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use turnstile_core::booking::NewBooking;
    use turnstile_core::types::{BookingStatus, UserId};
    use turnstile_testing::{FixedClock, InMemoryTicketingStore, fixtures};

    fn setup(attempts: u32) -> (InMemoryTicketingStore, TicketIssuer, Booking) {
        let store = InMemoryTicketingStore::new();
        let event = fixtures::event_starting_at(fixtures::test_time());
        let ticket_type = fixtures::ticket_type_for(&event, 10);
        store.insert_event(event.clone());
        store.insert_ticket_type(ticket_type.clone());

        let booking = NewBooking {
            user_id: UserId::new(),
            event_id: event.id,
            ticket_type_id: Some(ticket_type.id),
            quantity: 3,
        }
        .validate(&event, Some(&ticket_type), 8, fixtures::test_time())
        .unwrap();

        let policy = BookingPolicy {
            ticket_number_attempts: attempts,
            ..BookingPolicy::default()
        };
        let issuer = TicketIssuer::new(
            Arc::new(store.clone()),
            Arc::new(fixtures::test_signer()),
            Arc::new(FixedClock::new(fixtures::test_time())),
            &policy,
        );
        (store, issuer, booking)
    }

    #[test]
    fn minted_tickets_have_distinct_numbers_and_verifiable_payloads() {
        let (_, issuer, booking) = setup(5);
        let tickets = issuer.mint_tickets(&booking, fixtures::test_time());

        assert_eq!(tickets.len(), 3);
        let numbers: std::collections::HashSet<_> =
            tickets.iter().map(|t| t.ticket_number.clone()).collect();
        assert_eq!(numbers.len(), 3);
        for ticket in &tickets {
            let verified = fixtures::test_signer().verify(ticket.qr_payload.as_str()).unwrap();
            assert_eq!(verified.ticket_id, ticket.id);
            assert_eq!(ticket.booking_id, booking.id);
        }
    }

    #[tokio::test]
    async fn collisions_are_retried() {
        let (store, issuer, booking) = setup(5);
        store.create_booking(booking.clone()).await.unwrap();
        store.force_ticket_number_collisions(2);

        let details = issuer.issue_tickets(&booking, "pi_1").await.unwrap();
        assert_eq!(details.booking.status, BookingStatus::Confirmed);
        assert_eq!(details.tickets.len(), 3);
        assert_eq!(store.ticket_count(), 3);
    }

    #[tokio::test]
    async fn exhaustion_leaves_booking_pending() {
        let (store, issuer, booking) = setup(3);
        store.create_booking(booking.clone()).await.unwrap();
        store.force_ticket_number_collisions(3);

        let err = issuer.issue_tickets(&booking, "pi_1").await.unwrap_err();
        assert_eq!(
            err,
            LedgerError::TicketNumberExhausted {
                booking_id: booking.id,
                attempts: 3
            }
        );
        assert_eq!(store.ticket_count(), 0);
        let stored = store.load_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Pending);
    }
}
