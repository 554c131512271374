//! # Turnstile Runtime
//!
//! The imperative shell around `turnstile-core`: services that load state from a
//! [`TicketingStore`](turnstile_core::store::TicketingStore), decide with the core's pure
//! functions, and persist through conditional writes.
//!
//! - [`BookingLedger`]: create, confirm, cancel, refund, payment callbacks
//! - [`TicketIssuer`]: mints and commits tickets with a booking's confirmation
//! - [`CheckInValidator`]: exactly-once admission under concurrent scanners
//! - [`ExpirySweeper`]: expires tickets of finished events
//!
//! Every storage call is bounded by a timeout; an expired call surfaces as
//! [`StoreError::Timeout`] and, for scans, as a `TransientFailure` outcome.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use turnstile_core::environment::SystemClock;
//! use turnstile_core::identifier::QrSigner;
//! use turnstile_runtime::{CheckInPolicy, CheckInValidator};
//! # use turnstile_core::environment::StaffDirectory;
//! # use turnstile_core::store::TicketingStore;
//! # async fn example(
//! #     store: Arc<dyn TicketingStore>,
//! #     staff: Arc<dyn StaffDirectory>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let signer = Arc::new(QrSigner::new(std::env::var("QR_SIGNING_KEY")?)?);
//! let validator = CheckInValidator::new(
//!     store,
//!     staff,
//!     signer,
//!     Arc::new(SystemClock),
//!     CheckInPolicy::default(),
//! );
//! let result = validator.validate("TKT1....", turnstile_core::types::StaffId::new()).await;
//! println!("{}: {}", result.accepted(), result.reason());
//! # Ok(())
//! # }
//! ```

pub mod issuer;
pub mod ledger;
pub mod metrics;
pub mod retry;
pub mod sweeper;
pub mod validator;

pub use issuer::TicketIssuer;
pub use ledger::{BookingDetails, BookingLedger, PaymentResult};
pub use sweeper::{ExpirySweeper, SweepReport};
pub use validator::CheckInValidator;

use std::time::Duration;
use turnstile_core::store::{StoreError, StoreFuture};

/// Check-in and sweep tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckInPolicy {
    /// Window widening on both sides of the event
    pub grace: chrono::Duration,
    /// Bound on each storage call
    pub storage_timeout: Duration,
}

impl Default for CheckInPolicy {
    fn default() -> Self {
        Self {
            grace: chrono::Duration::minutes(120),
            storage_timeout: Duration::from_millis(2_000),
        }
    }
}

/// Booking and issuance tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingPolicy {
    /// Per-order cap for bookings without a ticket type
    pub default_max_per_order: u32,
    /// Minting attempts before giving up on unique ticket numbers
    pub ticket_number_attempts: u32,
    /// Bound on each storage call
    pub storage_timeout: Duration,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            default_max_per_order: 8,
            ticket_number_attempts: 5,
            storage_timeout: Duration::from_millis(2_000),
        }
    }
}

/// Await a storage call for at most `limit`.
///
/// # Errors
///
/// Returns the call's own error, or [`StoreError::Timeout`] when `limit` elapses first.
pub async fn bounded<T>(
    operation: &'static str,
    limit: Duration,
    call: StoreFuture<'_, T>,
) -> Result<T, StoreError> {
    if let Ok(result) = tokio::time::timeout(limit, call).await {
        result
    } else {
        let after_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
        metrics::StorageMetrics::record_timeout(operation);
        tracing::error!(operation, after_ms, "Storage call timed out");
        Err(StoreError::Timeout {
            operation,
            after_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounded_passes_through_fast_calls() {
        let call: StoreFuture<'_, u8> = Box::pin(async { Ok(3) });
        assert_eq!(bounded("load", Duration::from_millis(50), call).await, Ok(3));
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_times_out_slow_calls() {
        let call: StoreFuture<'_, u8> = Box::pin(async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(3)
        });
        assert_eq!(
            bounded("load_ticket", Duration::from_millis(50), call).await,
            Err(StoreError::Timeout {
                operation: "load_ticket",
                after_ms: 50
            })
        );
    }
}
