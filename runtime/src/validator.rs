//! Check-in validator.
//!
//! Safe to run from any number of processes at once: the only thing that decides a winner
//! is the store's conditional `valid → used` write. The validator never returns an error;
//! storage trouble becomes a `TransientFailure` outcome, which is safe to retry because a
//! committed check-in is never repeated.

use crate::metrics::CheckInMetrics;
use crate::{CheckInPolicy, bounded};
use std::sync::Arc;
use std::time::Instant;
use turnstile_core::checkin::{
    AuditEntry, CheckInOutcome, CheckInResult, NewAuditEntry, ScanDecision, classify_scan,
    outcome_for_current_state,
};
use turnstile_core::environment::{Clock, StaffDirectory};
use turnstile_core::identifier::{QrSigner, TicketNumber};
use turnstile_core::store::{StoreError, TicketWrite, TicketingStore};
use turnstile_core::ticket::CheckInWindow;
use turnstile_core::types::{StaffId, TicketId};

/// Validates scans and records every attempt in the audit log.
#[derive(Clone)]
pub struct CheckInValidator {
    store: Arc<dyn TicketingStore>,
    staff: Arc<dyn StaffDirectory>,
    signer: Arc<QrSigner>,
    clock: Arc<dyn Clock>,
    policy: CheckInPolicy,
}

/// Where a scan ended up, before it is audited.
struct Scan {
    ticket_id: Option<TicketId>,
    ticket_number: Option<TicketNumber>,
    outcome: CheckInOutcome,
    /// The success entry is written by the store together with the transition.
    audited: bool,
}

impl Scan {
    const fn rejected(ticket_id: Option<TicketId>, outcome: CheckInOutcome) -> Self {
        Self {
            ticket_id,
            ticket_number: None,
            outcome,
            audited: false,
        }
    }
}

fn transient(err: &StoreError) -> CheckInOutcome {
    CheckInOutcome::TransientFailure {
        reason: err.to_string(),
    }
}

impl CheckInValidator {
    /// Create a new validator
    #[must_use]
    pub fn new(
        store: Arc<dyn TicketingStore>,
        staff: Arc<dyn StaffDirectory>,
        signer: Arc<QrSigner>,
        clock: Arc<dyn Clock>,
        policy: CheckInPolicy,
    ) -> Self {
        Self {
            store,
            staff,
            signer,
            clock,
            policy,
        }
    }

    /// Validate one scan.
    #[tracing::instrument(skip(self, payload), fields(staff_id = %staff_id))]
    pub async fn validate(&self, payload: &str, staff_id: StaffId) -> CheckInResult {
        let started = Instant::now();
        let now = self.clock.now();

        let scan = self.evaluate(payload, staff_id, now).await;

        if !scan.audited {
            let entry = NewAuditEntry::for_outcome(scan.ticket_id, staff_id, now, &scan.outcome);
            if let Err(err) = bounded(
                "append_audit",
                self.policy.storage_timeout,
                self.store.append_audit(entry),
            )
            .await
            {
                tracing::error!(error = %err, outcome = %scan.outcome.code(), "Failed to record check-in audit entry");
            }
        }

        CheckInMetrics::record(scan.outcome.code(), started.elapsed());
        match &scan.outcome {
            CheckInOutcome::Admitted { .. } => {
                tracing::info!(ticket_id = ?scan.ticket_id, "Ticket admitted");
            }
            CheckInOutcome::InvalidSignature => {}
            CheckInOutcome::TransientFailure { reason } => {
                tracing::warn!(ticket_id = ?scan.ticket_id, reason = %reason, "Check-in failed transiently");
            }
            rejected => {
                tracing::info!(ticket_id = ?scan.ticket_id, outcome = %rejected.code(), "Ticket rejected");
            }
        }

        CheckInResult {
            ticket_id: scan.ticket_id,
            ticket_number: scan.ticket_number,
            outcome: scan.outcome,
            scanned_at: now,
        }
    }

    async fn evaluate(&self, payload: &str, staff_id: StaffId, now: chrono::DateTime<chrono::Utc>) -> Scan {
        let timeout = self.policy.storage_timeout;

        // 1. Authenticity, before any storage access
        let ticket_id = match self.signer.verify(payload) {
            Ok(verified) => verified.ticket_id,
            Err(err) => {
                tracing::warn!(error = %err, "Rejected QR payload with invalid signature");
                return Scan::rejected(None, CheckInOutcome::InvalidSignature);
            }
        };

        // 2. Ticket and its event
        let ticket = match bounded("load_ticket", timeout, self.store.load_ticket(ticket_id)).await {
            Ok(Some(ticket)) => ticket,
            Ok(None) => return Scan::rejected(Some(ticket_id), CheckInOutcome::NotFound),
            Err(err) => return Scan::rejected(Some(ticket_id), transient(&err)),
        };
        let event = match bounded("load_event", timeout, self.store.load_event(ticket.event_id)).await {
            Ok(Some(event)) => event,
            Ok(None) => return Scan::rejected(Some(ticket_id), CheckInOutcome::NotFound),
            Err(err) => return Scan::rejected(Some(ticket_id), transient(&err)),
        };
        let rejected = |outcome| Scan {
            ticket_id: Some(ticket_id),
            ticket_number: Some(ticket.ticket_number.clone()),
            outcome,
            audited: false,
        };

        // 3. Staff assignment
        let assigned = match bounded(
            "is_assigned",
            timeout,
            self.staff.is_assigned(staff_id, ticket.event_id),
        )
        .await
        {
            Ok(assigned) => assigned,
            Err(err) => return rejected(transient(&err)),
        };

        // 4 and 6. Window, then current status
        let window = CheckInWindow::for_event(&event, self.policy.grace);
        if let ScanDecision::Reject(outcome) = classify_scan(&ticket, assigned, &window, now) {
            return rejected(outcome);
        }

        // 5. The conditional write decides the winner
        match bounded(
            "check_in_ticket",
            timeout,
            self.store.check_in_ticket(ticket_id, staff_id, now),
        )
        .await
        {
            Ok(TicketWrite::Applied(used)) => Scan {
                ticket_id: Some(ticket_id),
                ticket_number: Some(used.ticket_number),
                outcome: CheckInOutcome::Admitted {
                    checked_in_at: now,
                    checked_in_by: staff_id,
                },
                audited: true,
            },
            Ok(TicketWrite::Conflict(current)) => rejected(outcome_for_current_state(&current)),
            Err(StoreError::NotFound { .. }) => rejected(CheckInOutcome::NotFound),
            Err(err) => rejected(transient(&err)),
        }
    }

    /// Audit entries for a ticket, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails or times out.
    pub async fn audit_trail(&self, ticket_id: TicketId) -> Result<Vec<AuditEntry>, StoreError> {
        bounded(
            "audit_trail",
            self.policy.storage_timeout,
            self.store.audit_trail(ticket_id),
        )
        .await
    }
}
