//! Storage abstraction for bookings, tickets and the check-in audit log.
//!
//! # Design
//!
//! The store is the only place shared mutable state lives. Every state change is a
//! conditional write that names the state it expects to replace:
//!
//! - Booking transitions are compare-and-set on the booking status
//! - Ticket transitions only ever replace `valid`
//! - Ticket numbers are protected by a uniqueness constraint
//! - Ticket-type counters move in the same transaction as the booking change that causes them
//!
//! A conditional write that finds an unexpected state does not fail; it returns the state it
//! found ([`TicketWrite::Conflict`], [`BookingWrite::Conflict`]) so the caller can classify
//! the lost race precisely.
//!
//! # Implementations
//!
//! - `PostgresTicketingStore` (in `turnstile-postgres`): production
//! - `InMemoryTicketingStore` (in `turnstile-testing`): fast, deterministic tests
//!
//! # Dyn Compatibility
//!
//! Methods return boxed futures instead of using `async fn` so the services can hold an
//! `Arc<dyn TicketingStore>`.

use crate::booking::BookingTransition;
use crate::checkin::{AuditEntry, NewAuditEntry};
use crate::types::{
    Booking, BookingId, EventId, EventInfo, StaffId, Ticket, TicketId, TicketStatus, TicketType,
    TicketTypeId,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by store and collaborator methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Errors that can occur during storage operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A referenced record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Record kind
        entity: &'static str,
        /// Record id
        id: String,
    },

    /// Reserving or selling would exceed the ticket type's availability.
    #[error("capacity exceeded: requested {requested}, remaining {remaining}")]
    CapacityExceeded {
        /// Units requested
        requested: u32,
        /// Units left when the write was attempted
        remaining: u32,
    },

    /// A minted ticket number is already taken; nothing was written.
    #[error("duplicate ticket number: {0}")]
    DuplicateTicketNumber(String),

    /// The call did not complete within the configured bound.
    #[error("storage operation {operation} timed out after {after_ms}ms")]
    Timeout {
        /// Operation name
        operation: &'static str,
        /// Configured bound
        after_ms: u64,
    },

    /// The backend is unreachable (pool exhausted, connection refused).
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Database connection or query failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A stored value could not be decoded.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl StoreError {
    /// Whether the caller may retry the same request unchanged.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unavailable(_))
    }
}

/// Result of a conditional ticket write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketWrite {
    /// The write committed; the ticket as it now is.
    Applied(Ticket),
    /// The ticket was not in the expected state; the state that was found.
    Conflict(Ticket),
}

/// Result of a conditional booking write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingWrite {
    /// The write committed; the booking as it now is.
    Applied(Booking),
    /// The booking was not in the expected status; the booking that was found.
    Conflict(Booking),
}

/// Everything committed atomically when a booking is confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    /// Booking being confirmed (must be `pending`)
    pub booking_id: BookingId,
    /// Processor reference recorded on the booking
    pub payment_reference: String,
    /// Freshly minted tickets, exactly `quantity` of them
    pub tickets: Vec<Ticket>,
    /// Confirmation time
    pub confirmed_at: DateTime<Utc>,
}

/// Persistence for the booking-to-ticket lifecycle.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; many validators and ledgers share one store.
pub trait TicketingStore: Send + Sync {
    /// Load event reference data.
    fn load_event(&self, event_id: EventId) -> StoreFuture<'_, Option<EventInfo>>;

    /// Load a ticket type with its current counters.
    fn load_ticket_type(&self, ticket_type_id: TicketTypeId) -> StoreFuture<'_, Option<TicketType>>;

    /// Insert a `pending` booking and soft-reserve its quantity, in one transaction.
    ///
    /// # Errors
    ///
    /// - `CapacityExceeded`: the reservation no longer fits (another booking won the units)
    /// - `NotFound`: the ticket type disappeared
    fn create_booking(&self, booking: Booking) -> StoreFuture<'_, ()>;

    /// Load a booking.
    fn load_booking(&self, booking_id: BookingId) -> StoreFuture<'_, Option<Booking>>;

    /// Confirm a `pending` booking in one transaction: set `confirmed`/`completed`, insert
    /// every ticket, and move the quantity from reserved to sold.
    ///
    /// Returns [`BookingWrite::Conflict`] without writing if the booking is not `pending`.
    ///
    /// # Errors
    ///
    /// - `DuplicateTicketNumber`: a minted number is taken; the whole transaction rolled back
    /// - `CapacityExceeded`: selling would exceed `quantity_available`
    /// - `NotFound`: unknown booking
    fn confirm_booking(&self, confirmation: Confirmation) -> StoreFuture<'_, BookingWrite>;

    /// Apply a planned booking transition if the booking is still in `transition.from`,
    /// releasing the soft reservation in the same transaction when the transition asks to.
    ///
    /// # Errors
    ///
    /// - `NotFound`: unknown booking
    fn transition_booking(
        &self,
        booking_id: BookingId,
        transition: BookingTransition,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, BookingWrite>;

    /// Load a ticket.
    fn load_ticket(&self, ticket_id: TicketId) -> StoreFuture<'_, Option<Ticket>>;

    /// All tickets owned by a booking, in issue order.
    fn tickets_for_booking(&self, booking_id: BookingId) -> StoreFuture<'_, Vec<Ticket>>;

    /// Move a ticket `valid → used` and append the `admitted` audit entry, atomically.
    ///
    /// Exactly one concurrent caller gets [`TicketWrite::Applied`]; the others get
    /// [`TicketWrite::Conflict`] carrying the winner's check-in.
    ///
    /// # Errors
    ///
    /// - `NotFound`: unknown ticket
    fn check_in_ticket(
        &self,
        ticket_id: TicketId,
        staff_id: StaffId,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, TicketWrite>;

    /// Move a `valid` ticket to `cancelled` or `expired`.
    ///
    /// # Errors
    ///
    /// - `NotFound`: unknown ticket
    fn transition_ticket(&self, ticket_id: TicketId, to: TicketStatus) -> StoreFuture<'_, TicketWrite>;

    /// Ids of `valid` tickets whose event ended before `ended_before`, oldest events first.
    fn list_expirable_tickets(
        &self,
        ended_before: DateTime<Utc>,
        limit: u32,
    ) -> StoreFuture<'_, Vec<TicketId>>;

    /// Append a check-in audit entry; storage assigns its sequence number.
    fn append_audit(&self, entry: NewAuditEntry) -> StoreFuture<'_, AuditEntry>;

    /// Audit entries for a ticket in sequence order.
    fn audit_trail(&self, ticket_id: TicketId) -> StoreFuture<'_, Vec<AuditEntry>>;
}
