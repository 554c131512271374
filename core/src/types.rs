//! Domain types for bookings, tickets and their reference data.
//!
//! Events and ticket types are reference data owned by the surrounding product; this
//! crate only reads them, except for the ticket-type counters which move inside the
//! same storage transaction as the booking transition that causes them.

use crate::identifier::{QrPayload, TicketNumber};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for an event
    EventId
);
uuid_id!(
    /// Unique identifier for a ticket type within an event
    TicketTypeId
);
uuid_id!(
    /// Unique identifier for a booking
    BookingId
);
uuid_id!(
    /// Unique identifier for a ticket
    TicketId
);
uuid_id!(
    /// Verified buyer identity
    UserId
);
uuid_id!(
    /// Verified host/staff identity
    StaffId
);

// ============================================================================
// Money
// ============================================================================

/// Monetary amount in minor units (cents)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Zero amount
    pub const ZERO: Self = Self(0);

    /// Creates money from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Multiplies by a unit count, returning `None` on overflow.
    #[must_use]
    pub const fn checked_multiply(self, quantity: u32) -> Option<Self> {
        match self.0.checked_mul(quantity as u64) {
            Some(total) => Some(Self(total)),
            None => None,
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// ISO-4217 currency code, three upper-case ASCII letters.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode(String);

/// A string that is not a three-letter currency code.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid currency code: {0:?}")]
pub struct InvalidCurrency(pub String);

impl CurrencyCode {
    /// Parses and normalises a currency code (`"eur"` becomes `"EUR"`).
    ///
    /// # Errors
    ///
    /// Returns [`InvalidCurrency`] unless the input is exactly three ASCII letters.
    pub fn parse(code: &str) -> Result<Self, InvalidCurrency> {
        if code.len() == 3 && code.bytes().all(|b| b.is_ascii_alphabetic()) {
            Ok(Self(code.to_ascii_uppercase()))
        } else {
            Err(InvalidCurrency(code.to_string()))
        }
    }

    /// Returns the code as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = InvalidCurrency;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CurrencyCode> for String {
    fn from(code: CurrencyCode) -> Self {
        code.0
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Reference data
// ============================================================================

/// Event reference data (never mutated by this crate)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventInfo {
    /// Event ID
    pub id: EventId,
    /// Display name
    pub name: String,
    /// Doors open / start time
    pub starts_at: DateTime<Utc>,
    /// End time
    pub ends_at: DateTime<Utc>,
    /// Currency all ticket types of this event are priced in
    pub currency: CurrencyCode,
}

/// A sellable ticket category of an event, with its inventory counters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketType {
    /// Ticket type ID
    pub id: TicketTypeId,
    /// Owning event
    pub event_id: EventId,
    /// Display name ("General Admission", "VIP")
    pub name: String,
    /// Unit price
    pub price: Money,
    /// Total units that may ever be sold
    pub quantity_available: u32,
    /// Units issued to confirmed bookings
    pub quantity_sold: u32,
    /// Units held by pending bookings
    pub quantity_reserved: u32,
    /// Maximum units per booking
    pub max_per_order: u32,
    /// Sale opens at (inclusive), if bounded
    pub sale_starts_at: Option<DateTime<Utc>>,
    /// Sale closes at (exclusive), if bounded
    pub sale_ends_at: Option<DateTime<Utc>>,
}

impl TicketType {
    /// Units neither sold nor reserved.
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.quantity_available
            .saturating_sub(self.quantity_sold)
            .saturating_sub(self.quantity_reserved)
    }

    /// Whether `quantity` more units can be reserved without overselling.
    #[must_use]
    pub const fn has_capacity(&self, quantity: u32) -> bool {
        quantity <= self.remaining()
    }

    /// Whether the sale window contains `now`.
    #[must_use]
    pub fn sale_open(&self, now: DateTime<Utc>) -> bool {
        self.sale_starts_at.is_none_or(|start| now >= start)
            && self.sale_ends_at.is_none_or(|end| now < end)
    }
}

// ============================================================================
// Status enums
// ============================================================================

/// A status string that does not name a known variant.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind} status: {value:?}")]
pub struct UnknownStatus {
    /// Which status enum was being parsed
    pub kind: &'static str,
    /// The rejected value
    pub value: String,
}

macro_rules! status_strings {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Storage/wire representation
            #[must_use]
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownStatus;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownStatus { kind: $kind, value: other.to_string() }),
                }
            }
        }
    };
}

/// Booking lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Created, awaiting payment
    Pending,
    /// Paid; tickets issued
    Confirmed,
    /// Abandoned before payment (terminal)
    Cancelled,
    /// Paid then refunded (terminal)
    Refunded,
}

status_strings!(BookingStatus, "booking", {
    Pending => "pending",
    Confirmed => "confirmed",
    Cancelled => "cancelled",
    Refunded => "refunded",
});

impl BookingStatus {
    /// Cancelled and refunded bookings never change again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Refunded)
    }
}

/// Payment status tracked alongside the booking status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// No result from the payment processor yet
    Pending,
    /// Charge succeeded
    Completed,
    /// Charge failed
    Failed,
    /// Charge refunded
    Refunded,
}

status_strings!(PaymentStatus, "payment", {
    Pending => "pending",
    Completed => "completed",
    Failed => "failed",
    Refunded => "refunded",
});

/// Ticket status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// Admits one entry
    Valid,
    /// Checked in
    Used,
    /// Invalidated by its booking's refund
    Cancelled,
    /// Event ended while still valid
    Expired,
}

status_strings!(TicketStatus, "ticket", {
    Valid => "valid",
    Used => "used",
    Cancelled => "cancelled",
    Expired => "expired",
});

// ============================================================================
// Entities
// ============================================================================

/// A buyer's purchase record for one or more tickets to an event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    /// Booking ID
    pub id: BookingId,
    /// Buyer
    pub user_id: UserId,
    /// Event booked
    pub event_id: EventId,
    /// Ticket type booked, if the event sells typed tickets
    pub ticket_type_id: Option<TicketTypeId>,
    /// Units purchased (at least one)
    pub quantity: u32,
    /// Total amount
    pub total: Money,
    /// Currency of `total`
    pub currency: CurrencyCode,
    /// Lifecycle status
    pub status: BookingStatus,
    /// Payment status
    pub payment_status: PaymentStatus,
    /// Processor reference, set on confirmation
    pub payment_reference: Option<String>,
    /// Created at
    pub created_at: DateTime<Utc>,
    /// Last transition at
    pub updated_at: DateTime<Utc>,
}

/// One admission unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket ID
    pub id: TicketId,
    /// Owning booking (immutable)
    pub booking_id: BookingId,
    /// Ticket holder
    pub user_id: UserId,
    /// Event admitted to
    pub event_id: EventId,
    /// Ticket type, if any
    pub ticket_type_id: Option<TicketTypeId>,
    /// Human-displayable number, unique system-wide
    pub ticket_number: TicketNumber,
    /// Signed payload rendered as the QR code
    pub qr_payload: QrPayload,
    /// Status
    pub status: TicketStatus,
    /// Set when used
    pub checked_in_at: Option<DateTime<Utc>>,
    /// Set when used
    pub checked_in_by: Option<StaffId>,
    /// Issued at
    pub created_at: DateTime<Utc>,
}
