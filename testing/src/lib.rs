//! # Turnstile Testing
//!
//! Test doubles and fixtures for the Turnstile ticketing engine.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - [`InMemoryTicketingStore`]: conditional writes under a lock, with latency and
//!   failure injection and lookup counters
//! - [`StaticStaffDirectory`]: explicit staff-to-event assignments
//! - Fixtures for events, ticket types and a signer
//!
//! ## Example
//!
//! ```
//! use turnstile_testing::{fixtures, InMemoryTicketingStore};
//!
//! let store = InMemoryTicketingStore::new();
//! let event = fixtures::event_starting_at(fixtures::test_time());
//! let ticket_type = fixtures::ticket_type_for(&event, 100);
//! store.insert_event(event);
//! store.insert_ticket_type(ticket_type);
//! ```

pub mod fixtures;
mod memory_store;
mod staff;

pub use memory_store::InMemoryTicketingStore;
pub use staff::StaticStaffDirectory;

use chrono::{DateTime, Utc};
use turnstile_core::environment::Clock;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use chrono::Duration;
    use std::sync::Mutex;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use turnstile_testing::mocks::FixedClock;
    /// use turnstile_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Lets a test walk a scan across the check-in window boundary.
    ///
    /// ```
    /// use turnstile_testing::mocks::ManualClock;
    /// use turnstile_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let start = Utc::now();
    /// let clock = ManualClock::new(start);
    /// clock.advance(Duration::seconds(2));
    /// assert_eq!(clock.now(), start + Duration::seconds(2));
    /// ```
    #[derive(Debug)]
    pub struct ManualClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Create a clock at `time`
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Jump to `time`
        pub fn set(&self, time: DateTime<Utc>) {
            if let Ok(mut current) = self.time.lock() {
                *current = time;
            }
        }

        /// Move forward (or back, with a negative duration)
        pub fn advance(&self, by: Duration) {
            if let Ok(mut current) = self.time.lock() {
                *current += by;
            }
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
                .lock()
                .map_or_else(|poisoned| *poisoned.into_inner(), |time| *time)
        }
    }

    /// Create a default fixed clock for tests (see [`crate::fixtures::test_time`])
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(crate::fixtures::test_time())
    }
}

/// Install a test-friendly tracing subscriber (idempotent).
///
/// Honours `RUST_LOG`; output goes through the test harness capture.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "turnstile=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
    }

    #[test]
    fn manual_clock_moves_on_request() {
        let clock = ManualClock::new(fixtures::test_time());
        clock.advance(Duration::minutes(5));
        assert_eq!(clock.now(), fixtures::test_time() + Duration::minutes(5));

        clock.set(fixtures::test_time());
        assert_eq!(clock.now(), fixtures::test_time());
    }
}
