//! Environment seams injected into the runtime services.
//!
//! Everything time- or collaborator-dependent is abstracted behind a trait so the
//! services can run against deterministic doubles in tests (see `turnstile-testing`).

use crate::store::StoreFuture;
use crate::types::{EventId, StaffId};
use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations for testability
///
/// # Examples
///
/// ```
/// use turnstile_core::environment::{Clock, SystemClock};
///
/// let clock = SystemClock;
/// let _now = clock.now();
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Staff-to-event assignment, supplied by the host management collaborator.
///
/// The check-in validator asks this before attempting any ticket transition; a staff
/// member scanning a ticket for an event they are not assigned to gets `WrongEvent`.
pub trait StaffDirectory: Send + Sync {
    /// Returns whether `staff` is assigned to scan for `event`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`](crate::store::StoreError) when the directory cannot be reached.
    fn is_assigned(&self, staff: StaffId, event: EventId) -> StoreFuture<'_, bool>;
}
