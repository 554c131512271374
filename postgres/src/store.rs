//! `PostgreSQL` implementation of [`TicketingStore`].

use crate::rows::{
    self, AUDIT_COLUMNS, BOOKING_COLUMNS, EVENT_COLUMNS, TICKET_COLUMNS, TICKET_TYPE_COLUMNS,
    to_i32, to_i64,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::Instrument;
use turnstile_core::booking::BookingTransition;
use turnstile_core::checkin::{AuditEntry, CheckInOutcome, NewAuditEntry};
use turnstile_core::store::{
    BookingWrite, Confirmation, StoreError, StoreFuture, TicketWrite, TicketingStore,
};
use turnstile_core::types::{
    Booking, BookingId, BookingStatus, EventId, EventInfo, PaymentStatus, StaffId, Ticket,
    TicketId, TicketStatus, TicketType, TicketTypeId,
};
use turnstile_runtime::metrics::StorageMetrics;

/// Unique constraint on `tickets.ticket_number`.
const TICKET_NUMBER_CONSTRAINT: &str = "tickets_ticket_number_key";

/// Map a driver error, separating "cannot reach the database" from query failures.
pub(crate) fn db_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(err.to_string())
        }
        _ => StoreError::DatabaseError(err.to_string()),
    }
}

fn not_found(entity: &'static str, id: impl ToString) -> StoreError {
    StoreError::NotFound {
        entity,
        id: id.to_string(),
    }
}

fn insert_ticket_error(err: sqlx::Error, ticket: &Ticket) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() && db_err.constraint() == Some(TICKET_NUMBER_CONSTRAINT) {
            return StoreError::DuplicateTicketNumber(ticket.ticket_number.to_string());
        }
    }
    db_error(err)
}

/// `PostgreSQL`-backed ticketing store.
///
/// Every state change is a single conditional `UPDATE … WHERE status = …` or a transaction
/// that starts with one, so any number of server processes can share the database.
///
/// # Example
///
/// ```ignore
/// let store = PostgresTicketingStore::connect("postgres://localhost/turnstile", 10, Duration::from_secs(3)).await?;
/// store.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PostgresTicketingStore {
    pool: PgPool,
}

impl PostgresTicketingStore {
    /// Create a store over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a new pool.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the database cannot be reached.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to connect: {e}")))?;
        Ok(Self::new(pool))
    }

    /// Apply the bundled schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DatabaseError`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round trip to the database, for readiness probes.
    ///
    /// # Errors
    ///
    /// Returns the mapped driver error.
    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    /// Insert or update event reference data.
    ///
    /// # Errors
    ///
    /// Returns the mapped driver error.
    pub async fn upsert_event(&self, event: &EventInfo) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO events (id, name, starts_at, ends_at, currency)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name,
                starts_at = EXCLUDED.starts_at,
                ends_at = EXCLUDED.ends_at,
                currency = EXCLUDED.currency
            ",
        )
        .bind(*event.id.as_uuid())
        .bind(&event.name)
        .bind(event.starts_at)
        .bind(event.ends_at)
        .bind(event.currency.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    /// Insert a ticket type, or update its descriptive fields and limits.
    ///
    /// The sold and reserved counters are never overwritten once the row exists.
    ///
    /// # Errors
    ///
    /// Returns the mapped driver error.
    pub async fn upsert_ticket_type(&self, ticket_type: &TicketType) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO ticket_types (
                id, event_id, name, price_cents, quantity_available, quantity_sold,
                quantity_reserved, max_per_order, sale_starts_at, sale_ends_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name,
                price_cents = EXCLUDED.price_cents,
                quantity_available = EXCLUDED.quantity_available,
                max_per_order = EXCLUDED.max_per_order,
                sale_starts_at = EXCLUDED.sale_starts_at,
                sale_ends_at = EXCLUDED.sale_ends_at
            ",
        )
        .bind(*ticket_type.id.as_uuid())
        .bind(*ticket_type.event_id.as_uuid())
        .bind(&ticket_type.name)
        .bind(to_i64(ticket_type.price)?)
        .bind(to_i32(ticket_type.quantity_available, "quantity_available")?)
        .bind(to_i32(ticket_type.quantity_sold, "quantity_sold")?)
        .bind(to_i32(ticket_type.quantity_reserved, "quantity_reserved")?)
        .bind(to_i32(ticket_type.max_per_order, "max_per_order")?)
        .bind(ticket_type.sale_starts_at)
        .bind(ticket_type.sale_ends_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool.begin().await.map_err(db_error)
    }

    async fn current_booking(
        tx: &mut Transaction<'static, Postgres>,
        booking_id: BookingId,
    ) -> Result<Booking, StoreError> {
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(*booking_id.as_uuid())
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_error)?
            .ok_or_else(|| not_found("booking", booking_id))?;
        rows::booking(&row)
    }

    async fn current_ticket(&self, ticket_id: TicketId) -> Result<Ticket, StoreError> {
        let sql = format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(*ticket_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .ok_or_else(|| not_found("ticket", ticket_id))?;
        rows::ticket(&row)
    }

    /// Units left for sale (or for confirmation when `sold_only`), for error reporting.
    async fn remaining(
        tx: &mut Transaction<'static, Postgres>,
        ticket_type_id: TicketTypeId,
        sold_only: bool,
    ) -> Result<u32, StoreError> {
        let sql = if sold_only {
            "SELECT GREATEST(quantity_available - quantity_sold, 0) FROM ticket_types WHERE id = $1"
        } else {
            "SELECT GREATEST(quantity_available - quantity_sold - quantity_reserved, 0) \
             FROM ticket_types WHERE id = $1"
        };
        let remaining: Option<(i32,)> = sqlx::query_as(sql)
            .bind(*ticket_type_id.as_uuid())
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_error)?;
        let (remaining,) = remaining.ok_or_else(|| not_found("ticket type", ticket_type_id))?;
        Ok(u32::try_from(remaining).unwrap_or(0))
    }

    async fn insert_audit(
        executor: impl sqlx::PgExecutor<'_>,
        entry: NewAuditEntry,
    ) -> Result<AuditEntry, StoreError> {
        let (sequence,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO check_in_audit (ticket_id, staff_id, recorded_at, outcome, detail)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING sequence
            ",
        )
        .bind(entry.ticket_id.map(|id| *id.as_uuid()))
        .bind(*entry.staff_id.as_uuid())
        .bind(entry.recorded_at)
        .bind(entry.outcome.as_str())
        .bind(&entry.detail)
        .fetch_one(executor)
        .await
        .map_err(db_error)?;
        Ok(entry.with_sequence(sequence))
    }
}

impl TicketingStore for PostgresTicketingStore {
    fn load_event(&self, event_id: EventId) -> StoreFuture<'_, Option<EventInfo>> {
        Box::pin(async move {
            let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1");
            sqlx::query(&sql)
                .bind(*event_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?
                .map(|row| rows::event(&row))
                .transpose()
        })
    }

    fn load_ticket_type(&self, ticket_type_id: TicketTypeId) -> StoreFuture<'_, Option<TicketType>> {
        Box::pin(async move {
            let sql = format!("SELECT {TICKET_TYPE_COLUMNS} FROM ticket_types WHERE id = $1");
            sqlx::query(&sql)
                .bind(*ticket_type_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?
                .map(|row| rows::ticket_type(&row))
                .transpose()
        })
    }

    fn create_booking(&self, booking: Booking) -> StoreFuture<'_, ()> {
        let span = tracing::debug_span!("create_booking", booking_id = %booking.id);
        Box::pin(
            async move {
                let quantity = to_i32(booking.quantity, "quantity")?;
                let mut tx = self.begin().await?;

                if let Some(type_id) = booking.ticket_type_id {
                    let reserved = sqlx::query(
                        r"
                        UPDATE ticket_types
                        SET quantity_reserved = quantity_reserved + $2
                        WHERE id = $1
                          AND quantity_sold + quantity_reserved + $2 <= quantity_available
                        RETURNING id
                        ",
                    )
                    .bind(*type_id.as_uuid())
                    .bind(quantity)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(db_error)?;

                    if reserved.is_none() {
                        let remaining = Self::remaining(&mut tx, type_id, false).await?;
                        return Err(StoreError::CapacityExceeded {
                            requested: booking.quantity,
                            remaining,
                        });
                    }
                }

                sqlx::query(
                    r"
                    INSERT INTO bookings (
                        id, user_id, event_id, ticket_type_id, quantity, total_cents, currency,
                        status, payment_status, payment_reference, created_at, updated_at
                    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                    ",
                )
                .bind(*booking.id.as_uuid())
                .bind(*booking.user_id.as_uuid())
                .bind(*booking.event_id.as_uuid())
                .bind(booking.ticket_type_id.map(|id| *id.as_uuid()))
                .bind(quantity)
                .bind(to_i64(booking.total)?)
                .bind(booking.currency.as_str())
                .bind(booking.status.as_str())
                .bind(booking.payment_status.as_str())
                .bind(&booking.payment_reference)
                .bind(booking.created_at)
                .bind(booking.updated_at)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;

                tx.commit().await.map_err(db_error)
            }
            .instrument(span),
        )
    }

    fn load_booking(&self, booking_id: BookingId) -> StoreFuture<'_, Option<Booking>> {
        Box::pin(async move {
            let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1");
            sqlx::query(&sql)
                .bind(*booking_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?
                .map(|row| rows::booking(&row))
                .transpose()
        })
    }

    fn confirm_booking(&self, confirmation: Confirmation) -> StoreFuture<'_, BookingWrite> {
        let span = tracing::debug_span!(
            "confirm_booking",
            booking_id = %confirmation.booking_id,
            tickets = confirmation.tickets.len()
        );
        Box::pin(
            async move {
                let mut tx = self.begin().await?;

                // The row lock serializes confirmation against cancel and payment failure
                let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1 FOR UPDATE");
                let row = sqlx::query(&sql)
                    .bind(*confirmation.booking_id.as_uuid())
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(db_error)?
                    .ok_or_else(|| not_found("booking", confirmation.booking_id))?;
                let booking = rows::booking(&row)?;
                if booking.status != BookingStatus::Pending {
                    return Ok(BookingWrite::Conflict(booking));
                }

                if let Some(type_id) = booking.ticket_type_id {
                    let sold = sqlx::query(
                        r"
                        UPDATE ticket_types
                        SET quantity_sold = quantity_sold + $2,
                            quantity_reserved = GREATEST(quantity_reserved - $2, 0)
                        WHERE id = $1
                          AND quantity_sold + $2 <= quantity_available
                        RETURNING id
                        ",
                    )
                    .bind(*type_id.as_uuid())
                    .bind(to_i32(booking.quantity, "quantity")?)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(db_error)?;

                    if sold.is_none() {
                        let remaining = Self::remaining(&mut tx, type_id, true).await?;
                        return Err(StoreError::CapacityExceeded {
                            requested: booking.quantity,
                            remaining,
                        });
                    }
                }

                for (position, ticket) in confirmation.tickets.iter().enumerate() {
                    let position = i32::try_from(position)
                        .map_err(|_| StoreError::SerializationError("too many tickets".to_string()))?;
                    sqlx::query(
                        r"
                        INSERT INTO tickets (
                            id, booking_id, user_id, event_id, ticket_type_id, position,
                            ticket_number, qr_payload, status, created_at
                        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                        ",
                    )
                    .bind(*ticket.id.as_uuid())
                    .bind(*ticket.booking_id.as_uuid())
                    .bind(*ticket.user_id.as_uuid())
                    .bind(*ticket.event_id.as_uuid())
                    .bind(ticket.ticket_type_id.map(|id| *id.as_uuid()))
                    .bind(position)
                    .bind(ticket.ticket_number.as_str())
                    .bind(ticket.qr_payload.as_str())
                    .bind(ticket.status.as_str())
                    .bind(ticket.created_at)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| insert_ticket_error(e, ticket))?;
                }

                let sql = format!(
                    "UPDATE bookings SET status = $2, payment_status = $3, payment_reference = $4, \
                     updated_at = $5 WHERE id = $1 RETURNING {BOOKING_COLUMNS}"
                );
                let row = sqlx::query(&sql)
                    .bind(*confirmation.booking_id.as_uuid())
                    .bind(BookingStatus::Confirmed.as_str())
                    .bind(PaymentStatus::Completed.as_str())
                    .bind(&confirmation.payment_reference)
                    .bind(confirmation.confirmed_at)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(db_error)?;
                let confirmed = rows::booking(&row)?;

                tx.commit().await.map_err(db_error)?;
                Ok(BookingWrite::Applied(confirmed))
            }
            .instrument(span),
        )
    }

    fn transition_booking(
        &self,
        booking_id: BookingId,
        transition: BookingTransition,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, BookingWrite> {
        let span = tracing::debug_span!(
            "transition_booking",
            booking_id = %booking_id,
            from = %transition.from,
            to = %transition.to
        );
        Box::pin(
            async move {
                let mut tx = self.begin().await?;

                let sql = format!(
                    "UPDATE bookings SET status = $3, payment_status = $4, \
                     payment_reference = COALESCE($5, payment_reference), updated_at = $6 \
                     WHERE id = $1 AND status = $2 RETURNING {BOOKING_COLUMNS}"
                );
                let updated = sqlx::query(&sql)
                    .bind(*booking_id.as_uuid())
                    .bind(transition.from.as_str())
                    .bind(transition.to.as_str())
                    .bind(transition.payment_status.as_str())
                    .bind(&transition.payment_reference)
                    .bind(at)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(db_error)?;

                let Some(row) = updated else {
                    let current = Self::current_booking(&mut tx, booking_id).await?;
                    return Ok(BookingWrite::Conflict(current));
                };
                let booking = rows::booking(&row)?;

                if transition.release_reservation {
                    if let Some(type_id) = booking.ticket_type_id {
                        sqlx::query(
                            r"
                            UPDATE ticket_types
                            SET quantity_reserved = GREATEST(quantity_reserved - $2, 0)
                            WHERE id = $1
                            ",
                        )
                        .bind(*type_id.as_uuid())
                        .bind(to_i32(booking.quantity, "quantity")?)
                        .execute(&mut *tx)
                        .await
                        .map_err(db_error)?;
                    }
                }

                tx.commit().await.map_err(db_error)?;
                Ok(BookingWrite::Applied(booking))
            }
            .instrument(span),
        )
    }

    fn load_ticket(&self, ticket_id: TicketId) -> StoreFuture<'_, Option<Ticket>> {
        Box::pin(async move {
            let sql = format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1");
            sqlx::query(&sql)
                .bind(*ticket_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?
                .map(|row| rows::ticket(&row))
                .transpose()
        })
    }

    fn tickets_for_booking(&self, booking_id: BookingId) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT {TICKET_COLUMNS} FROM tickets WHERE booking_id = $1 ORDER BY position"
            );
            sqlx::query(&sql)
                .bind(*booking_id.as_uuid())
                .fetch_all(&self.pool)
                .await
                .map_err(db_error)?
                .iter()
                .map(rows::ticket)
                .collect()
        })
    }

    fn check_in_ticket(
        &self,
        ticket_id: TicketId,
        staff_id: StaffId,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, TicketWrite> {
        let span = tracing::debug_span!("check_in_ticket", ticket_id = %ticket_id, staff_id = %staff_id);
        Box::pin(
            async move {
                let mut tx = self.begin().await?;

                // Concurrent scans queue on the row lock; every one after the first
                // re-evaluates `status = 'valid'` against the committed row and matches nothing.
                let sql = format!(
                    "UPDATE tickets SET status = $2, checked_in_at = $3, checked_in_by = $4 \
                     WHERE id = $1 AND status = $5 RETURNING {TICKET_COLUMNS}"
                );
                let updated = sqlx::query(&sql)
                    .bind(*ticket_id.as_uuid())
                    .bind(TicketStatus::Used.as_str())
                    .bind(at)
                    .bind(*staff_id.as_uuid())
                    .bind(TicketStatus::Valid.as_str())
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(db_error)?;

                let Some(row) = updated else {
                    drop(tx);
                    let current = self.current_ticket(ticket_id).await?;
                    StorageMetrics::record_conflict("check_in_ticket");
                    return Ok(TicketWrite::Conflict(current));
                };
                let ticket = rows::ticket(&row)?;

                let admitted = CheckInOutcome::Admitted {
                    checked_in_at: at,
                    checked_in_by: staff_id,
                };
                Self::insert_audit(
                    &mut *tx,
                    NewAuditEntry::for_outcome(Some(ticket_id), staff_id, at, &admitted),
                )
                .await?;

                tx.commit().await.map_err(db_error)?;
                Ok(TicketWrite::Applied(ticket))
            }
            .instrument(span),
        )
    }

    fn transition_ticket(&self, ticket_id: TicketId, to: TicketStatus) -> StoreFuture<'_, TicketWrite> {
        Box::pin(async move {
            if !matches!(to, TicketStatus::Cancelled | TicketStatus::Expired) {
                return Err(StoreError::DatabaseError(format!(
                    "ticket transition to {to} must go through check-in"
                )));
            }

            let sql = format!(
                "UPDATE tickets SET status = $2 WHERE id = $1 AND status = $3 RETURNING {TICKET_COLUMNS}"
            );
            let updated = sqlx::query(&sql)
                .bind(*ticket_id.as_uuid())
                .bind(to.as_str())
                .bind(TicketStatus::Valid.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;

            match updated {
                Some(row) => Ok(TicketWrite::Applied(rows::ticket(&row)?)),
                None => {
                    StorageMetrics::record_conflict("transition_ticket");
                    Ok(TicketWrite::Conflict(self.current_ticket(ticket_id).await?))
                }
            }
        })
    }

    fn list_expirable_tickets(
        &self,
        ended_before: DateTime<Utc>,
        limit: u32,
    ) -> StoreFuture<'_, Vec<TicketId>> {
        Box::pin(async move {
            let ids: Vec<(uuid::Uuid,)> = sqlx::query_as(
                r"
                SELECT t.id
                FROM tickets t
                JOIN events e ON e.id = t.event_id
                WHERE t.status = 'valid'
                  AND e.ends_at < $1
                ORDER BY e.ends_at, t.created_at, t.id
                LIMIT $2
                ",
            )
            .bind(ended_before)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
            Ok(ids.into_iter().map(|(id,)| TicketId::from_uuid(id)).collect())
        })
    }

    fn append_audit(&self, entry: NewAuditEntry) -> StoreFuture<'_, AuditEntry> {
        Box::pin(async move { Self::insert_audit(&self.pool, entry).await })
    }

    fn audit_trail(&self, ticket_id: TicketId) -> StoreFuture<'_, Vec<AuditEntry>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT {AUDIT_COLUMNS} FROM check_in_audit WHERE ticket_id = $1 ORDER BY sequence"
            );
            sqlx::query(&sql)
                .bind(*ticket_id.as_uuid())
                .fetch_all(&self.pool)
                .await
                .map_err(db_error)?
                .iter()
                .map(rows::audit_entry)
                .collect()
        })
    }
}
