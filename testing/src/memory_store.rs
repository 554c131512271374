//! In-memory [`TicketingStore`] for fast, deterministic tests.
//!
//! All state sits behind one mutex, so every method is a single atomic step. That gives
//! the same conditional-write semantics as the PostgreSQL store: a `valid → used` write
//! either applies or reports the state it found.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use turnstile_core::booking::BookingTransition;
use turnstile_core::checkin::{AuditEntry, CheckInOutcome, NewAuditEntry};
use turnstile_core::store::{
    BookingWrite, Confirmation, StoreError, StoreFuture, TicketWrite, TicketingStore,
};
use turnstile_core::types::{
    Booking, BookingId, BookingStatus, EventId, EventInfo, PaymentStatus, StaffId, Ticket,
    TicketId, TicketStatus, TicketType, TicketTypeId,
};

#[derive(Debug, Default)]
struct State {
    events: HashMap<EventId, EventInfo>,
    ticket_types: HashMap<TicketTypeId, TicketType>,
    bookings: HashMap<BookingId, Booking>,
    tickets: HashMap<TicketId, Ticket>,
    booking_tickets: HashMap<BookingId, Vec<TicketId>>,
    ticket_numbers: HashSet<String>,
    audit: Vec<AuditEntry>,
    forced_collisions: u32,
    failure: Option<StoreError>,
}

impl State {
    fn append_audit(&mut self, entry: NewAuditEntry) -> AuditEntry {
        let sequence = i64::try_from(self.audit.len()).unwrap_or(i64::MAX - 1) + 1;
        let entry = entry.with_sequence(sequence);
        self.audit.push(entry.clone());
        entry
    }
}

/// In-memory ticketing store.
///
/// # Example
///
/// ```
/// use turnstile_testing::InMemoryTicketingStore;
///
/// let store = InMemoryTicketingStore::new();
/// assert_eq!(store.booking_count(), 0);
/// assert_eq!(store.ticket_lookups(), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryTicketingStore {
    state: Arc<Mutex<State>>,
    latency: Arc<Mutex<Option<Duration>>>,
    ticket_lookups: Arc<AtomicUsize>,
}

fn not_found(entity: &'static str, id: impl ToString) -> StoreError {
    StoreError::NotFound {
        entity,
        id: id.to_string(),
    }
}

impl InMemoryTicketingStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_string()))
    }

    /// Injected latency, then injected failure.
    async fn gate(&self) -> Result<(), StoreError> {
        let latency = self.latency.lock().ok().and_then(|latency| *latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match &self.lock()?.failure {
            Some(failure) => Err(failure.clone()),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------------
    // Seeding
    // ------------------------------------------------------------------------

    /// Insert or replace event reference data
    pub fn insert_event(&self, event: EventInfo) {
        if let Ok(mut state) = self.lock() {
            state.events.insert(event.id, event);
        }
    }

    /// Insert or replace a ticket type
    pub fn insert_ticket_type(&self, ticket_type: TicketType) {
        if let Ok(mut state) = self.lock() {
            state.ticket_types.insert(ticket_type.id, ticket_type);
        }
    }

    // ------------------------------------------------------------------------
    // Fault injection
    // ------------------------------------------------------------------------

    /// Delay every call by `latency` (`None` to disable)
    pub fn set_latency(&self, latency: Option<Duration>) {
        if let Ok(mut current) = self.latency.lock() {
            *current = latency;
        }
    }

    /// Fail every call with `failure` until [`Self::clear_failure`]
    pub fn fail_with(&self, failure: StoreError) {
        if let Ok(mut state) = self.lock() {
            state.failure = Some(failure);
        }
    }

    /// Stop failing calls
    pub fn clear_failure(&self) {
        if let Ok(mut state) = self.lock() {
            state.failure = None;
        }
    }

    /// Make the next `count` confirmations fail with a ticket-number collision
    pub fn force_ticket_number_collisions(&self, count: u32) {
        if let Ok(mut state) = self.lock() {
            state.forced_collisions = count;
        }
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    /// Number of `load_ticket` calls so far
    #[must_use]
    pub fn ticket_lookups(&self) -> usize {
        self.ticket_lookups.load(Ordering::SeqCst)
    }

    /// Number of persisted bookings
    #[must_use]
    pub fn booking_count(&self) -> usize {
        self.lock().map_or(0, |state| state.bookings.len())
    }

    /// Number of persisted tickets
    #[must_use]
    pub fn ticket_count(&self) -> usize {
        self.lock().map_or(0, |state| state.tickets.len())
    }

    /// Current counters of a ticket type
    #[must_use]
    pub fn ticket_type(&self, id: TicketTypeId) -> Option<TicketType> {
        self.lock().ok().and_then(|state| state.ticket_types.get(&id).cloned())
    }

    /// Current state of a ticket
    #[must_use]
    pub fn ticket(&self, id: TicketId) -> Option<Ticket> {
        self.lock().ok().and_then(|state| state.tickets.get(&id).cloned())
    }

    /// Every audit entry, in sequence order
    #[must_use]
    pub fn all_audit_entries(&self) -> Vec<AuditEntry> {
        self.lock().map_or_else(|_| Vec::new(), |state| state.audit.clone())
    }
}

impl TicketingStore for InMemoryTicketingStore {
    fn load_event(&self, event_id: EventId) -> StoreFuture<'_, Option<EventInfo>> {
        Box::pin(async move {
            self.gate().await?;
            Ok(self.lock()?.events.get(&event_id).cloned())
        })
    }

    fn load_ticket_type(&self, ticket_type_id: TicketTypeId) -> StoreFuture<'_, Option<TicketType>> {
        Box::pin(async move {
            self.gate().await?;
            Ok(self.lock()?.ticket_types.get(&ticket_type_id).cloned())
        })
    }

    fn create_booking(&self, booking: Booking) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.gate().await?;
            let mut state = self.lock()?;

            if let Some(type_id) = booking.ticket_type_id {
                let ticket_type = state
                    .ticket_types
                    .get_mut(&type_id)
                    .ok_or_else(|| not_found("ticket type", type_id))?;
                if !ticket_type.has_capacity(booking.quantity) {
                    return Err(StoreError::CapacityExceeded {
                        requested: booking.quantity,
                        remaining: ticket_type.remaining(),
                    });
                }
                ticket_type.quantity_reserved += booking.quantity;
            }

            state.bookings.insert(booking.id, booking);
            Ok(())
        })
    }

    fn load_booking(&self, booking_id: BookingId) -> StoreFuture<'_, Option<Booking>> {
        Box::pin(async move {
            self.gate().await?;
            Ok(self.lock()?.bookings.get(&booking_id).cloned())
        })
    }

    fn confirm_booking(&self, confirmation: Confirmation) -> StoreFuture<'_, BookingWrite> {
        Box::pin(async move {
            self.gate().await?;
            let mut state = self.lock()?;

            let booking = state
                .bookings
                .get(&confirmation.booking_id)
                .cloned()
                .ok_or_else(|| not_found("booking", confirmation.booking_id))?;
            if booking.status != BookingStatus::Pending {
                return Ok(BookingWrite::Conflict(booking));
            }

            // Validate everything before mutating anything: the write is all-or-nothing.
            let mut batch = HashSet::new();
            for ticket in &confirmation.tickets {
                let number = ticket.ticket_number.as_str();
                if state.ticket_numbers.contains(number) || !batch.insert(number) {
                    return Err(StoreError::DuplicateTicketNumber(number.to_string()));
                }
            }
            if state.forced_collisions > 0 {
                state.forced_collisions -= 1;
                let number = confirmation
                    .tickets
                    .first()
                    .map_or_else(String::new, |t| t.ticket_number.to_string());
                return Err(StoreError::DuplicateTicketNumber(number));
            }
            if let Some(type_id) = booking.ticket_type_id {
                let ticket_type = state
                    .ticket_types
                    .get_mut(&type_id)
                    .ok_or_else(|| not_found("ticket type", type_id))?;
                let sold = ticket_type.quantity_sold + booking.quantity;
                if sold > ticket_type.quantity_available {
                    return Err(StoreError::CapacityExceeded {
                        requested: booking.quantity,
                        remaining: ticket_type
                            .quantity_available
                            .saturating_sub(ticket_type.quantity_sold),
                    });
                }
                ticket_type.quantity_sold = sold;
                ticket_type.quantity_reserved =
                    ticket_type.quantity_reserved.saturating_sub(booking.quantity);
            }

            let mut confirmed = booking;
            confirmed.status = BookingStatus::Confirmed;
            confirmed.payment_status = PaymentStatus::Completed;
            confirmed.payment_reference = Some(confirmation.payment_reference);
            confirmed.updated_at = confirmation.confirmed_at;
            state.bookings.insert(confirmed.id, confirmed.clone());

            for ticket in confirmation.tickets {
                state.ticket_numbers.insert(ticket.ticket_number.to_string());
                state
                    .booking_tickets
                    .entry(confirmed.id)
                    .or_default()
                    .push(ticket.id);
                state.tickets.insert(ticket.id, ticket);
            }

            Ok(BookingWrite::Applied(confirmed))
        })
    }

    fn transition_booking(
        &self,
        booking_id: BookingId,
        transition: BookingTransition,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, BookingWrite> {
        Box::pin(async move {
            self.gate().await?;
            let mut state = self.lock()?;

            let mut booking = state
                .bookings
                .get(&booking_id)
                .cloned()
                .ok_or_else(|| not_found("booking", booking_id))?;
            if booking.status != transition.from {
                return Ok(BookingWrite::Conflict(booking));
            }

            if transition.release_reservation {
                if let Some(ticket_type) = booking
                    .ticket_type_id
                    .and_then(|type_id| state.ticket_types.get_mut(&type_id))
                {
                    ticket_type.quantity_reserved =
                        ticket_type.quantity_reserved.saturating_sub(booking.quantity);
                }
            }

            transition.apply_to(&mut booking, at);
            state.bookings.insert(booking_id, booking.clone());
            Ok(BookingWrite::Applied(booking))
        })
    }

    fn load_ticket(&self, ticket_id: TicketId) -> StoreFuture<'_, Option<Ticket>> {
        Box::pin(async move {
            self.ticket_lookups.fetch_add(1, Ordering::SeqCst);
            self.gate().await?;
            Ok(self.lock()?.tickets.get(&ticket_id).cloned())
        })
    }

    fn tickets_for_booking(&self, booking_id: BookingId) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            self.gate().await?;
            let state = self.lock()?;
            Ok(state
                .booking_tickets
                .get(&booking_id)
                .into_iter()
                .flatten()
                .filter_map(|id| state.tickets.get(id).cloned())
                .collect())
        })
    }

    fn check_in_ticket(
        &self,
        ticket_id: TicketId,
        staff_id: StaffId,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, TicketWrite> {
        Box::pin(async move {
            self.gate().await?;
            let mut state = self.lock()?;

            let ticket = state
                .tickets
                .get_mut(&ticket_id)
                .ok_or_else(|| not_found("ticket", ticket_id))?;
            if ticket.status != TicketStatus::Valid {
                return Ok(TicketWrite::Conflict(ticket.clone()));
            }
            ticket.status = TicketStatus::Used;
            ticket.checked_in_at = Some(at);
            ticket.checked_in_by = Some(staff_id);
            let ticket = ticket.clone();

            let admitted = CheckInOutcome::Admitted {
                checked_in_at: at,
                checked_in_by: staff_id,
            };
            state.append_audit(NewAuditEntry::for_outcome(Some(ticket_id), staff_id, at, &admitted));
            Ok(TicketWrite::Applied(ticket))
        })
    }

    fn transition_ticket(&self, ticket_id: TicketId, to: TicketStatus) -> StoreFuture<'_, TicketWrite> {
        Box::pin(async move {
            self.gate().await?;
            if !matches!(to, TicketStatus::Cancelled | TicketStatus::Expired) {
                return Err(StoreError::DatabaseError(format!(
                    "ticket transition to {to} must go through check-in"
                )));
            }

            let mut state = self.lock()?;
            let ticket = state
                .tickets
                .get_mut(&ticket_id)
                .ok_or_else(|| not_found("ticket", ticket_id))?;
            if !ticket.status.can_transition_to(to) {
                return Ok(TicketWrite::Conflict(ticket.clone()));
            }
            ticket.status = to;
            Ok(TicketWrite::Applied(ticket.clone()))
        })
    }

    fn list_expirable_tickets(
        &self,
        ended_before: DateTime<Utc>,
        limit: u32,
    ) -> StoreFuture<'_, Vec<TicketId>> {
        Box::pin(async move {
            self.gate().await?;
            let state = self.lock()?;

            let mut candidates: Vec<(DateTime<Utc>, DateTime<Utc>, TicketId)> = state
                .tickets
                .values()
                .filter(|ticket| ticket.status == TicketStatus::Valid)
                .filter_map(|ticket| {
                    let event = state.events.get(&ticket.event_id)?;
                    (event.ends_at < ended_before).then_some((event.ends_at, ticket.created_at, ticket.id))
                })
                .collect();
            candidates.sort();
            Ok(candidates
                .into_iter()
                .take(limit as usize)
                .map(|(_, _, id)| id)
                .collect())
        })
    }

    fn append_audit(&self, entry: NewAuditEntry) -> StoreFuture<'_, AuditEntry> {
        Box::pin(async move {
            self.gate().await?;
            Ok(self.lock()?.append_audit(entry))
        })
    }

    fn audit_trail(&self, ticket_id: TicketId) -> StoreFuture<'_, Vec<AuditEntry>> {
        Box::pin(async move {
            self.gate().await?;
            Ok(self
                .lock()?
                .audit
                .iter()
                .filter(|entry| entry.ticket_id == Some(ticket_id))
                .cloned()
                .collect())
        })
    }
}
