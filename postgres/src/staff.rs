//! Staff assignments backed by the `staff_assignments` table.

use crate::store::db_error;
use sqlx::PgPool;
use turnstile_core::environment::StaffDirectory;
use turnstile_core::store::{StoreError, StoreFuture};
use turnstile_core::types::{EventId, StaffId};

/// Answers "may this staff member scan at this event?" from the database.
#[derive(Clone)]
pub struct PostgresStaffDirectory {
    pool: PgPool,
}

impl PostgresStaffDirectory {
    /// Create a directory over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Assign `staff` to `event`. Assigning twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the mapped driver error (including an unknown event).
    pub async fn assign(&self, staff: StaffId, event: EventId) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO staff_assignments (staff_id, event_id)
            VALUES ($1, $2)
            ON CONFLICT (staff_id, event_id) DO NOTHING
            ",
        )
        .bind(*staff.as_uuid())
        .bind(*event.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        tracing::info!(staff_id = %staff, event_id = %event, "Staff assigned to event");
        Ok(())
    }

    /// Remove an assignment.
    ///
    /// # Errors
    ///
    /// Returns the mapped driver error.
    pub async fn unassign(&self, staff: StaffId, event: EventId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM staff_assignments WHERE staff_id = $1 AND event_id = $2")
            .bind(*staff.as_uuid())
            .bind(*event.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }
}

impl StaffDirectory for PostgresStaffDirectory {
    fn is_assigned(&self, staff: StaffId, event: EventId) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let (assigned,): (bool,) = sqlx::query_as(
                "SELECT EXISTS(SELECT 1 FROM staff_assignments WHERE staff_id = $1 AND event_id = $2)",
            )
            .bind(*staff.as_uuid())
            .bind(*event.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
            Ok(assigned)
        })
    }
}
