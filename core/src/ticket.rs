//! Ticket state machine and the check-in window.
//!
//! ```text
//!         ┌──► used        (check-in)
//! valid ──┼──► cancelled   (booking refunded)
//!         └──► expired     (event ended, sweep)
//! ```
//!
//! Every transition leaves `valid`; nothing ever returns to it.

use crate::types::{EventInfo, TicketStatus};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

impl TicketStatus {
    /// Whether storage may move a ticket from `self` to `to`.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Valid, Self::Used | Self::Cancelled | Self::Expired)
        )
    }

    /// Only `valid` tickets admit entry or change state.
    #[must_use]
    pub const fn is_final(self) -> bool {
        !matches!(self, Self::Valid)
    }
}

/// Inclusive interval during which an event's tickets may be checked in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInWindow {
    /// Event start minus grace
    pub opens_at: DateTime<Utc>,
    /// Event end plus grace
    pub closes_at: DateTime<Utc>,
}

impl CheckInWindow {
    /// `[starts_at − grace, ends_at + grace]`
    #[must_use]
    pub fn for_event(event: &EventInfo, grace: Duration) -> Self {
        Self {
            opens_at: event.starts_at - grace,
            closes_at: event.ends_at + grace,
        }
    }

    /// Both bounds are inclusive.
    #[must_use]
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.opens_at <= now && now <= self.closes_at
    }
}
