//! Row decoding and value conversion between the schema and domain types.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Postgres, Row};
use turnstile_core::checkin::AuditEntry;
use turnstile_core::identifier::{QrPayload, TicketNumber};
use turnstile_core::store::StoreError;
use turnstile_core::types::{
    Booking, BookingId, CurrencyCode, EventId, EventInfo, Money, StaffId, Ticket, TicketId,
    TicketType, TicketTypeId, UserId,
};
use uuid::Uuid;

pub(crate) const EVENT_COLUMNS: &str = "id, name, starts_at, ends_at, currency";

pub(crate) const TICKET_TYPE_COLUMNS: &str = "id, event_id, name, price_cents, quantity_available, \
     quantity_sold, quantity_reserved, max_per_order, sale_starts_at, sale_ends_at";

pub(crate) const BOOKING_COLUMNS: &str = "id, user_id, event_id, ticket_type_id, quantity, \
     total_cents, currency, status, payment_status, payment_reference, created_at, updated_at";

pub(crate) const TICKET_COLUMNS: &str = "id, booking_id, user_id, event_id, ticket_type_id, \
     ticket_number, qr_payload, status, checked_in_at, checked_in_by, created_at";

pub(crate) const AUDIT_COLUMNS: &str = "sequence, ticket_id, staff_id, recorded_at, outcome, detail";

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::SerializationError(format!("column {name}: {e}")))
}

fn parsed<T>(row: &PgRow, name: &str) -> Result<T, StoreError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = column(row, name)?;
    raw.parse()
        .map_err(|e: T::Err| StoreError::SerializationError(format!("column {name}: {e}")))
}

fn count(row: &PgRow, name: &str) -> Result<u32, StoreError> {
    let value: i32 = column(row, name)?;
    u32::try_from(value)
        .map_err(|_| StoreError::SerializationError(format!("column {name}: negative count {value}")))
}

fn cents(row: &PgRow, name: &str) -> Result<Money, StoreError> {
    let value: i64 = column(row, name)?;
    u64::try_from(value)
        .map(Money::from_cents)
        .map_err(|_| StoreError::SerializationError(format!("column {name}: negative amount {value}")))
}

fn currency(row: &PgRow) -> Result<CurrencyCode, StoreError> {
    let raw: String = column(row, "currency")?;
    CurrencyCode::parse(&raw).map_err(|e| StoreError::SerializationError(e.to_string()))
}

/// Counts and amounts are unsigned in the domain and signed in `PostgreSQL`.
pub(crate) fn to_i32(value: u32, what: &str) -> Result<i32, StoreError> {
    i32::try_from(value)
        .map_err(|_| StoreError::SerializationError(format!("{what} {value} does not fit the schema")))
}

pub(crate) fn to_i64(value: Money) -> Result<i64, StoreError> {
    i64::try_from(value.cents())
        .map_err(|_| StoreError::SerializationError(format!("amount {value} does not fit the schema")))
}

pub(crate) fn event(row: &PgRow) -> Result<EventInfo, StoreError> {
    Ok(EventInfo {
        id: EventId::from_uuid(column(row, "id")?),
        name: column(row, "name")?,
        starts_at: column(row, "starts_at")?,
        ends_at: column(row, "ends_at")?,
        currency: currency(row)?,
    })
}

pub(crate) fn ticket_type(row: &PgRow) -> Result<TicketType, StoreError> {
    Ok(TicketType {
        id: TicketTypeId::from_uuid(column(row, "id")?),
        event_id: EventId::from_uuid(column(row, "event_id")?),
        name: column(row, "name")?,
        price: cents(row, "price_cents")?,
        quantity_available: count(row, "quantity_available")?,
        quantity_sold: count(row, "quantity_sold")?,
        quantity_reserved: count(row, "quantity_reserved")?,
        max_per_order: count(row, "max_per_order")?,
        sale_starts_at: column(row, "sale_starts_at")?,
        sale_ends_at: column(row, "sale_ends_at")?,
    })
}

pub(crate) fn booking(row: &PgRow) -> Result<Booking, StoreError> {
    let ticket_type_id: Option<Uuid> = column(row, "ticket_type_id")?;
    Ok(Booking {
        id: BookingId::from_uuid(column(row, "id")?),
        user_id: UserId::from_uuid(column(row, "user_id")?),
        event_id: EventId::from_uuid(column(row, "event_id")?),
        ticket_type_id: ticket_type_id.map(TicketTypeId::from_uuid),
        quantity: count(row, "quantity")?,
        total: cents(row, "total_cents")?,
        currency: currency(row)?,
        status: parsed(row, "status")?,
        payment_status: parsed(row, "payment_status")?,
        payment_reference: column(row, "payment_reference")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

pub(crate) fn ticket(row: &PgRow) -> Result<Ticket, StoreError> {
    let ticket_type_id: Option<Uuid> = column(row, "ticket_type_id")?;
    let checked_in_by: Option<Uuid> = column(row, "checked_in_by")?;
    let number: String = column(row, "ticket_number")?;
    let checked_in_at: Option<DateTime<Utc>> = column(row, "checked_in_at")?;
    Ok(Ticket {
        id: TicketId::from_uuid(column(row, "id")?),
        booking_id: BookingId::from_uuid(column(row, "booking_id")?),
        user_id: UserId::from_uuid(column(row, "user_id")?),
        event_id: EventId::from_uuid(column(row, "event_id")?),
        ticket_type_id: ticket_type_id.map(TicketTypeId::from_uuid),
        ticket_number: TicketNumber::parse(&number)
            .map_err(|e| StoreError::SerializationError(e.to_string()))?,
        qr_payload: QrPayload::from_stored(column(row, "qr_payload")?),
        status: parsed(row, "status")?,
        checked_in_at,
        checked_in_by: checked_in_by.map(StaffId::from_uuid),
        created_at: column(row, "created_at")?,
    })
}

pub(crate) fn audit_entry(row: &PgRow) -> Result<AuditEntry, StoreError> {
    let ticket_id: Option<Uuid> = column(row, "ticket_id")?;
    Ok(AuditEntry {
        sequence: column(row, "sequence")?,
        ticket_id: ticket_id.map(TicketId::from_uuid),
        staff_id: StaffId::from_uuid(column(row, "staff_id")?),
        recorded_at: column(row, "recorded_at")?,
        outcome: parsed(row, "outcome")?,
        detail: column(row, "detail")?,
    })
}
