//! `PostgreSQL` storage for Turnstile.
//!
//! Implements [`TicketingStore`](turnstile_core::store::TicketingStore) and
//! [`StaffDirectory`](turnstile_core::environment::StaffDirectory) with sqlx:
//!
//! - Booking and ticket transitions as conditional `UPDATE … WHERE status = …`
//! - Confirmation (booking, tickets, counters) in one transaction
//! - Ticket numbers guarded by a unique constraint
//! - Append-only audit log with a `BIGSERIAL` sequence
//!
//! # Example
//!
//! ```ignore
//! use turnstile_postgres::{PostgresStaffDirectory, PostgresTicketingStore};
//!
//! let store = PostgresTicketingStore::connect(&database_url, 10, Duration::from_secs(3)).await?;
//! store.migrate().await?;
//! let staff = PostgresStaffDirectory::new(store.pool().clone());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod rows;
mod staff;
mod store;

pub use staff::PostgresStaffDirectory;
pub use store::PostgresTicketingStore;
