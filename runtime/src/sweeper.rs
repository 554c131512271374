//! Expiry sweep for tickets of finished events.

use crate::metrics::SweepMetrics;
use crate::{CheckInPolicy, bounded};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use turnstile_core::environment::Clock;
use turnstile_core::store::{StoreError, TicketWrite, TicketingStore};
use turnstile_core::types::TicketStatus;

/// Tickets examined per store round trip.
pub const DEFAULT_BATCH_SIZE: u32 = 500;

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Tickets moved `valid → expired`
    pub expired: usize,
    /// Tickets used or cancelled between listing and writing
    pub conflicts: usize,
}

/// Moves still-`valid` tickets to `expired` once their event's check-in window has closed.
#[derive(Clone)]
pub struct ExpirySweeper {
    store: Arc<dyn TicketingStore>,
    clock: Arc<dyn Clock>,
    policy: CheckInPolicy,
    batch_size: u32,
}

impl ExpirySweeper {
    /// Create a new sweeper
    #[must_use]
    pub fn new(store: Arc<dyn TicketingStore>, clock: Arc<dyn Clock>, policy: CheckInPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Override the batch size
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = if batch_size == 0 { 1 } else { batch_size };
        self
    }

    /// Sweep as of the clock's current time.
    ///
    /// # Errors
    ///
    /// See [`Self::sweep_expired`].
    pub async fn sweep_once(&self) -> Result<SweepReport, StoreError> {
        self.sweep_expired(self.clock.now()).await
    }

    /// Expire `valid` tickets whose event ended before `now − grace`.
    ///
    /// The cutoff keeps the sweep out of the check-in window, so it only races refunds and
    /// late check-ins, and those are settled by the conditional write. A negative grace
    /// counts as zero: the cutoff never passes `now`.
    ///
    /// # Errors
    ///
    /// Returns the first [`StoreError`]; tickets expired before it stay expired.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        let cutoff = now - self.policy.grace.max(chrono::Duration::zero());
        let timeout = self.policy.storage_timeout;
        let mut report = SweepReport::default();

        loop {
            let batch = bounded(
                "list_expirable_tickets",
                timeout,
                self.store.list_expirable_tickets(cutoff, self.batch_size),
            )
            .await?;
            if batch.is_empty() {
                break;
            }

            let full_page = batch.len() >= self.batch_size as usize;
            for ticket_id in batch {
                match bounded(
                    "transition_ticket",
                    timeout,
                    self.store.transition_ticket(ticket_id, TicketStatus::Expired),
                )
                .await?
                {
                    TicketWrite::Applied(_) => report.expired += 1,
                    TicketWrite::Conflict(current) => {
                        tracing::debug!(ticket_id = %current.id, status = %current.status, "Ticket left valid before it could expire");
                        report.conflicts += 1;
                    }
                }
            }
            if !full_page {
                break;
            }
        }

        if report.expired > 0 {
            SweepMetrics::record_expired(report.expired);
            tracing::info!(expired = report.expired, conflicts = report.conflicts, "Expired tickets of finished events");
        }
        Ok(report)
    }

    /// Sweep every `interval` until `shutdown` flips to `true`. A zero interval is refused.
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        if interval.is_zero() {
            tracing::error!("Expiry sweeper not started: interval must be positive");
            return;
        }
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval_secs = interval.as_secs(), "Expiry sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.sweep_once().await {
                        tracing::error!(error = %err, "Expiry sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Expiry sweeper stopped");
                        return;
                    }
                }
            }
        }
    }
}
