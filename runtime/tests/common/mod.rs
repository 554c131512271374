//! Shared wiring for runtime integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use chrono::Duration;
use std::sync::Arc;
use turnstile_core::booking::NewBooking;
use turnstile_core::environment::Clock;
use turnstile_core::types::{Booking, EventInfo, StaffId, TicketType, UserId};
use turnstile_runtime::{
    BookingDetails, BookingLedger, BookingPolicy, CheckInPolicy, CheckInValidator, ExpirySweeper,
};
use turnstile_testing::{InMemoryTicketingStore, ManualClock, StaticStaffDirectory, fixtures};

pub const GRACE_MINUTES: i64 = 120;

pub struct Harness {
    pub store: InMemoryTicketingStore,
    pub staff: StaticStaffDirectory,
    pub clock: Arc<ManualClock>,
    pub event: EventInfo,
    pub ticket_type: TicketType,
    pub staff_id: StaffId,
    pub ledger: BookingLedger,
    pub validator: CheckInValidator,
    pub sweeper: ExpirySweeper,
}

impl Harness {
    /// One event at `fixtures::test_time()`, one ticket type, one assigned staff member.
    /// The clock starts a day before the event so sales are open.
    pub fn new(quantity_available: u32) -> Self {
        Self::with_storage_timeout(quantity_available, std::time::Duration::from_millis(500))
    }

    pub fn with_storage_timeout(quantity_available: u32, storage_timeout: std::time::Duration) -> Self {
        turnstile_testing::init_test_tracing();

        let store = InMemoryTicketingStore::new();
        let event = fixtures::event_starting_at(fixtures::test_time());
        let ticket_type = fixtures::ticket_type_for(&event, quantity_available);
        store.insert_event(event.clone());
        store.insert_ticket_type(ticket_type.clone());

        let staff = StaticStaffDirectory::new();
        let staff_id = StaffId::new();
        staff.assign(staff_id, event.id);

        let clock = Arc::new(ManualClock::new(fixtures::test_time() - Duration::days(1)));
        let signer = Arc::new(fixtures::test_signer());
        let check_in = CheckInPolicy {
            grace: Duration::minutes(GRACE_MINUTES),
            storage_timeout,
        };
        let booking = BookingPolicy {
            storage_timeout,
            ..BookingPolicy::default()
        };

        let ledger = BookingLedger::new(
            Arc::new(store.clone()),
            Arc::clone(&signer),
            Arc::clone(&clock) as Arc<dyn Clock>,
            booking,
        );
        let validator = CheckInValidator::new(
            Arc::new(store.clone()),
            Arc::new(staff.clone()),
            signer,
            Arc::clone(&clock) as Arc<dyn Clock>,
            check_in,
        );
        let sweeper = ExpirySweeper::new(
            Arc::new(store.clone()),
            Arc::clone(&clock) as Arc<dyn Clock>,
            check_in,
        );

        Self {
            store,
            staff,
            clock,
            event,
            ticket_type,
            staff_id,
            ledger,
            validator,
            sweeper,
        }
    }

    pub fn request(&self, quantity: u32) -> NewBooking {
        NewBooking {
            user_id: UserId::new(),
            event_id: self.event.id,
            ticket_type_id: Some(self.ticket_type.id),
            quantity,
        }
    }

    pub async fn pending_booking(&self, quantity: u32) -> Booking {
        self.ledger.create_booking(self.request(quantity)).await.unwrap()
    }

    pub async fn confirmed_booking(&self, quantity: u32) -> BookingDetails {
        let booking = self.pending_booking(quantity).await;
        self.ledger.confirm_booking(booking.id, "pi_test").await.unwrap()
    }

    /// Move the clock to the event's start.
    pub fn open_doors(&self) {
        self.clock.set(self.event.starts_at);
    }
}
