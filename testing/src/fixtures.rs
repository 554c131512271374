//! Reference data and keys for tests.

use chrono::{DateTime, Duration, Utc};
use turnstile_core::identifier::QrSigner;
use turnstile_core::types::{CurrencyCode, EventId, EventInfo, Money, TicketType, TicketTypeId};

/// 32-byte signing key used by [`test_signer`].
pub const TEST_SIGNING_KEY: &[u8; 32] = b"turnstile-test-signing-key-32byt";

/// 2025-06-01 18:00:00 UTC
///
/// # Panics
///
/// Never in practice; the timestamp is a constant.
#[must_use]
#[allow(clippy::expect_used)]
pub fn test_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-06-01T18:00:00Z")
        .expect("hardcoded timestamp should always parse")
        .with_timezone(&Utc)
}

/// Signer over [`TEST_SIGNING_KEY`].
///
/// # Panics
///
/// Never in practice; the key is long enough.
#[must_use]
#[allow(clippy::expect_used)]
pub fn test_signer() -> QrSigner {
    QrSigner::new(TEST_SIGNING_KEY).expect("test key is 32 bytes")
}

/// Four-hour event priced in USD.
///
/// # Panics
///
/// Never in practice; the currency code is a constant.
#[must_use]
#[allow(clippy::expect_used)]
pub fn event_starting_at(starts_at: DateTime<Utc>) -> EventInfo {
    EventInfo {
        id: EventId::new(),
        name: "Friday Rooftop Party".to_string(),
        starts_at,
        ends_at: starts_at + Duration::hours(4),
        currency: CurrencyCode::parse("USD").expect("USD is a valid code"),
    }
}

/// General admission at $25.00, always on sale, eight per order.
#[must_use]
pub fn ticket_type_for(event: &EventInfo, quantity_available: u32) -> TicketType {
    TicketType {
        id: TicketTypeId::new(),
        event_id: event.id,
        name: "General Admission".to_string(),
        price: Money::from_cents(2_500),
        quantity_available,
        quantity_sold: 0,
        quantity_reserved: 0,
        max_per_order: 8,
        sale_starts_at: None,
        sale_ends_at: None,
    }
}
