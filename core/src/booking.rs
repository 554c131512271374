//! Booking validation and the booking state machine.
//!
//! ```text
//!                 payment ok                refund
//! pending ───────────────────► confirmed ──────────► refunded
//!    │                          (completed)           (refunded)
//!    │ cancel / payment failed
//!    ▼
//! cancelled (pending | failed)
//! ```
//!
//! The functions here are pure: they validate a request against reference data or plan a
//! transition from the booking's current status. The runtime ledger turns a plan into a
//! conditional store write, so a plan made from stale state simply loses the race.

use crate::store::StoreError;
use crate::types::{
    Booking, BookingId, BookingStatus, EventId, EventInfo, Money, PaymentStatus, StaffId,
    TicketId, TicketType, TicketTypeId, UserId,
};
use crate::identifier::TicketNumber;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the booking ledger and ticket issuer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Quantity below one or above the per-order cap.
    #[error("invalid quantity {quantity}: must be between 1 and {max}")]
    InvalidQuantity {
        /// Requested
        quantity: u32,
        /// Per-order cap
        max: u32,
    },

    /// Not enough unsold, unreserved units.
    #[error("capacity exceeded: requested {requested}, remaining {remaining}")]
    CapacityExceeded {
        /// Requested
        requested: u32,
        /// Remaining at validation time
        remaining: u32,
    },

    /// Ticket type not on sale at this time.
    #[error("ticket sales are closed for ticket type {0}")]
    SaleWindowClosed(TicketTypeId),

    /// Ticket type belongs to a different event.
    #[error("ticket type {ticket_type_id} does not belong to event {event_id}")]
    TicketTypeMismatch {
        /// Requested ticket type
        ticket_type_id: TicketTypeId,
        /// Requested event
        event_id: EventId,
    },

    /// A successful payment callback did not name the processor's charge.
    #[error("payment for booking {0} succeeded without a processor reference")]
    MissingPaymentReference(BookingId),

    /// Total price does not fit the money type.
    #[error("total price overflows")]
    PricingOverflow,

    /// Unknown event.
    #[error("event not found: {0}")]
    EventNotFound(EventId),

    /// Unknown ticket type.
    #[error("ticket type not found: {0}")]
    TicketTypeNotFound(TicketTypeId),

    /// Unknown booking.
    #[error("booking not found: {0}")]
    BookingNotFound(BookingId),

    /// The booking already left the status the operation requires.
    #[error("booking {booking_id} already finalized ({status})")]
    AlreadyFinalized {
        /// Booking
        booking_id: BookingId,
        /// Current status
        status: BookingStatus,
    },

    /// Refund requested for a booking that was never paid.
    #[error("booking {booking_id} cannot be refunded while {status}")]
    NotRefundable {
        /// Booking
        booking_id: BookingId,
        /// Current status
        status: BookingStatus,
    },

    /// Refund found checked-in tickets; the booking stays confirmed for manual resolution.
    #[error("refund of booking {booking_id} conflicts with {} checked-in ticket(s)", used.len())]
    RefundConflict {
        /// Booking
        booking_id: BookingId,
        /// Tickets that were already used
        used: Vec<UsedTicket>,
        /// Valid tickets the refund cancelled
        cancelled: Vec<TicketId>,
    },

    /// Every minting attempt hit a taken ticket number; the booking stays pending.
    #[error("could not mint unique ticket numbers for booking {booking_id} after {attempts} attempts")]
    TicketNumberExhausted {
        /// Booking
        booking_id: BookingId,
        /// Attempts made
        attempts: u32,
    },

    /// Storage failure.
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl LedgerError {
    /// Whether the caller may retry the same request unchanged.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_transient(),
            Self::TicketNumberExhausted { .. } => true,
            _ => false,
        }
    }
}

/// A checked-in ticket that blocked a refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsedTicket {
    /// Ticket
    pub ticket_id: TicketId,
    /// Displayed number
    pub ticket_number: TicketNumber,
    /// When it was checked in
    pub checked_in_at: Option<DateTime<Utc>>,
    /// Who checked it in
    pub checked_in_by: Option<StaffId>,
}

/// A buyer's request to book tickets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBooking {
    /// Verified buyer
    pub user_id: UserId,
    /// Event
    pub event_id: EventId,
    /// Ticket type, if the event sells typed tickets
    pub ticket_type_id: Option<TicketTypeId>,
    /// Units
    pub quantity: u32,
}

impl NewBooking {
    /// Validates the request against reference data and builds the `pending` booking.
    ///
    /// `ticket_type` must be the loaded type for `self.ticket_type_id` (or `None` when no
    /// type was requested). Without a ticket type the booking is free and capped by
    /// `default_cap`.
    ///
    /// # Errors
    ///
    /// `InvalidQuantity`, `TicketTypeMismatch`, `SaleWindowClosed`, `CapacityExceeded` or
    /// `PricingOverflow`. Nothing is persisted on error.
    pub fn validate(
        &self,
        event: &EventInfo,
        ticket_type: Option<&TicketType>,
        default_cap: u32,
        now: DateTime<Utc>,
    ) -> Result<Booking, LedgerError> {
        let max = ticket_type.map_or(default_cap, |tt| tt.max_per_order);
        if self.quantity == 0 || self.quantity > max {
            return Err(LedgerError::InvalidQuantity {
                quantity: self.quantity,
                max,
            });
        }

        let total = match ticket_type {
            Some(tt) => {
                if tt.event_id != event.id {
                    return Err(LedgerError::TicketTypeMismatch {
                        ticket_type_id: tt.id,
                        event_id: event.id,
                    });
                }
                if !tt.sale_open(now) {
                    return Err(LedgerError::SaleWindowClosed(tt.id));
                }
                if !tt.has_capacity(self.quantity) {
                    return Err(LedgerError::CapacityExceeded {
                        requested: self.quantity,
                        remaining: tt.remaining(),
                    });
                }
                tt.price
                    .checked_multiply(self.quantity)
                    .ok_or(LedgerError::PricingOverflow)?
            }
            None => Money::ZERO,
        };

        Ok(Booking {
            id: BookingId::new(),
            user_id: self.user_id,
            event_id: event.id,
            ticket_type_id: ticket_type.map(|tt| tt.id),
            quantity: self.quantity,
            total,
            currency: event.currency.clone(),
            status: BookingStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_reference: None,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Requested booking state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingCommand {
    /// Payment succeeded
    Confirm {
        /// Processor reference
        payment_reference: String,
    },
    /// Buyer abandoned before paying
    Cancel,
    /// Payment failed
    FailPayment {
        /// Processor reference, if any
        payment_reference: Option<String>,
    },
    /// Paid booking refunded
    Refund,
}

/// A planned, not yet persisted, booking transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingTransition {
    /// Status the booking must still be in for the write to apply
    pub from: BookingStatus,
    /// New status
    pub to: BookingStatus,
    /// New payment status
    pub payment_status: PaymentStatus,
    /// Payment reference to record, if any
    pub payment_reference: Option<String>,
    /// Whether the booking's soft reservation is released
    pub release_reservation: bool,
}

impl BookingTransition {
    /// Plans `command` against the booking's current status.
    ///
    /// # Errors
    ///
    /// - `AlreadyFinalized` when the booking left the status the command needs
    /// - `NotRefundable` when refunding a booking that is still pending
    pub fn plan(booking: &Booking, command: &BookingCommand) -> Result<Self, LedgerError> {
        let finalized = || LedgerError::AlreadyFinalized {
            booking_id: booking.id,
            status: booking.status,
        };

        match (booking.status, command) {
            (BookingStatus::Pending, BookingCommand::Confirm { payment_reference }) => Ok(Self {
                from: BookingStatus::Pending,
                to: BookingStatus::Confirmed,
                payment_status: PaymentStatus::Completed,
                payment_reference: Some(payment_reference.clone()),
                release_reservation: false,
            }),
            (BookingStatus::Pending, BookingCommand::Cancel) => Ok(Self {
                from: BookingStatus::Pending,
                to: BookingStatus::Cancelled,
                payment_status: booking.payment_status,
                payment_reference: None,
                release_reservation: true,
            }),
            (BookingStatus::Pending, BookingCommand::FailPayment { payment_reference }) => Ok(Self {
                from: BookingStatus::Pending,
                to: BookingStatus::Cancelled,
                payment_status: PaymentStatus::Failed,
                payment_reference: payment_reference.clone(),
                release_reservation: true,
            }),
            (BookingStatus::Confirmed, BookingCommand::Refund) => Ok(Self {
                from: BookingStatus::Confirmed,
                to: BookingStatus::Refunded,
                payment_status: PaymentStatus::Refunded,
                payment_reference: None,
                release_reservation: false,
            }),
            (BookingStatus::Pending, BookingCommand::Refund) => Err(LedgerError::NotRefundable {
                booking_id: booking.id,
                status: booking.status,
            }),
            _ => Err(finalized()),
        }
    }

    /// Applies the transition to an in-memory booking.
    pub fn apply_to(&self, booking: &mut Booking, at: DateTime<Utc>) {
        booking.status = self.to;
        booking.payment_status = self.payment_status;
        if let Some(reference) = &self.payment_reference {
            booking.payment_reference = Some(reference.clone());
        }
        booking.updated_at = at;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::types::CurrencyCode;
    use chrono::Duration;

    fn event() -> EventInfo {
        let starts_at = Utc::now() + Duration::days(7);
        EventInfo {
            id: EventId::new(),
            name: "Warehouse Night".to_string(),
            starts_at,
            ends_at: starts_at + Duration::hours(6),
            currency: CurrencyCode::parse("EUR").unwrap(),
        }
    }

    fn ticket_type(event: &EventInfo, available: u32) -> TicketType {
        TicketType {
            id: TicketTypeId::new(),
            event_id: event.id,
            name: "GA".to_string(),
            price: Money::from_cents(2_000),
            quantity_available: available,
            quantity_sold: 0,
            quantity_reserved: 0,
            max_per_order: 6,
            sale_starts_at: None,
            sale_ends_at: None,
        }
    }

    fn request(event: &EventInfo, tt: Option<&TicketType>, quantity: u32) -> NewBooking {
        NewBooking {
            user_id: UserId::new(),
            event_id: event.id,
            ticket_type_id: tt.map(|t| t.id),
            quantity,
        }
    }

    #[test]
    fn valid_request_builds_pending_booking() {
        let ev = event();
        let tt = ticket_type(&ev, 10);
        let booking = request(&ev, Some(&tt), 3)
            .validate(&ev, Some(&tt), 8, Utc::now())
            .unwrap();

        assert_eq!(booking.status, BookingStatus::Pending);
        assert_eq!(booking.payment_status, PaymentStatus::Pending);
        assert_eq!(booking.total, Money::from_cents(6_000));
        assert_eq!(booking.currency.as_str(), "EUR");
    }

    #[test]
    fn quantity_bounds() {
        let ev = event();
        let tt = ticket_type(&ev, 100);
        let now = Utc::now();

        assert_eq!(
            request(&ev, Some(&tt), 0).validate(&ev, Some(&tt), 8, now),
            Err(LedgerError::InvalidQuantity { quantity: 0, max: 6 })
        );
        assert_eq!(
            request(&ev, Some(&tt), 7).validate(&ev, Some(&tt), 8, now),
            Err(LedgerError::InvalidQuantity { quantity: 7, max: 6 })
        );
        assert_eq!(
            request(&ev, None, 9).validate(&ev, None, 8, now),
            Err(LedgerError::InvalidQuantity { quantity: 9, max: 8 })
        );
    }

    #[test]
    fn capacity_exceeded_when_three_requested_of_two() {
        let ev = event();
        let tt = ticket_type(&ev, 2);
        assert_eq!(
            request(&ev, Some(&tt), 3).validate(&ev, Some(&tt), 8, Utc::now()),
            Err(LedgerError::CapacityExceeded { requested: 3, remaining: 2 })
        );
    }

    #[test]
    fn sale_window_and_event_mismatch() {
        let ev = event();
        let now = Utc::now();

        let mut closed = ticket_type(&ev, 10);
        closed.sale_ends_at = Some(now - Duration::minutes(1));
        assert_eq!(
            request(&ev, Some(&closed), 1).validate(&ev, Some(&closed), 8, now),
            Err(LedgerError::SaleWindowClosed(closed.id))
        );

        let other = event();
        let foreign = ticket_type(&other, 10);
        assert!(matches!(
            request(&ev, Some(&foreign), 1).validate(&ev, Some(&foreign), 8, now),
            Err(LedgerError::TicketTypeMismatch { .. })
        ));
    }

    #[test]
    fn transitions_follow_state_machine() {
        let ev = event();
        let mut booking = request(&ev, None, 1).validate(&ev, None, 8, Utc::now()).unwrap();

        let cancel = BookingTransition::plan(&booking, &BookingCommand::Cancel).unwrap();
        assert!(cancel.release_reservation);

        assert!(matches!(
            BookingTransition::plan(&booking, &BookingCommand::Refund),
            Err(LedgerError::NotRefundable { .. })
        ));

        let confirm = BookingTransition::plan(
            &booking,
            &BookingCommand::Confirm {
                payment_reference: "pi_123".to_string(),
            },
        )
        .unwrap();
        confirm.apply_to(&mut booking, Utc::now());
        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert_eq!(booking.payment_status, PaymentStatus::Completed);
        assert_eq!(booking.payment_reference.as_deref(), Some("pi_123"));

        assert_eq!(
            BookingTransition::plan(&booking, &BookingCommand::Cancel),
            Err(LedgerError::AlreadyFinalized {
                booking_id: booking.id,
                status: BookingStatus::Confirmed,
            })
        );

        let refund = BookingTransition::plan(&booking, &BookingCommand::Refund).unwrap();
        refund.apply_to(&mut booking, Utc::now());
        assert_eq!(booking.status, BookingStatus::Refunded);
        assert_eq!(booking.payment_status, PaymentStatus::Refunded);
        assert!(BookingTransition::plan(&booking, &BookingCommand::Refund).is_err());
    }

    #[test]
    fn failed_payment_cancels_and_releases() {
        let ev = event();
        let booking = request(&ev, None, 2).validate(&ev, None, 8, Utc::now()).unwrap();
        let plan = BookingTransition::plan(
            &booking,
            &BookingCommand::FailPayment {
                payment_reference: Some("pi_declined".to_string()),
            },
        )
        .unwrap();

        assert_eq!(plan.to, BookingStatus::Cancelled);
        assert_eq!(plan.payment_status, PaymentStatus::Failed);
        assert!(plan.release_reservation);
    }
}
