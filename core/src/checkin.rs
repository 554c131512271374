//! Check-in classification and audit records.
//!
//! A scan goes through ordered checks; the first that fails decides the outcome:
//!
//! 1. Payload authenticity (no storage access)
//! 2. Ticket and event lookup
//! 3. Staff assignment to the ticket's event
//! 4. Check-in window
//! 5. The conditional `valid → used` write, whose loser reads the winner's check-in
//! 6. Non-valid status classification
//!
//! Steps 3, 4 and 6 are pure and live in [`classify_scan`]; step 5's loser is classified by
//! [`outcome_for_current_state`].

use crate::identifier::TicketNumber;
use crate::ticket::CheckInWindow;
use crate::types::{StaffId, Ticket, TicketId, TicketStatus, UnknownStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Classification of a scan attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CheckInOutcome {
    /// First valid scan; the ticket is now used.
    Admitted {
        /// Check-in time
        checked_in_at: DateTime<Utc>,
        /// Scanning staff
        checked_in_by: StaffId,
    },
    /// Forged, tampered or unreadable code.
    InvalidSignature,
    /// Authentic code for a ticket (or event) that does not exist.
    NotFound,
    /// Staff is not assigned to the ticket's event.
    WrongEvent,
    /// Scan outside the check-in window.
    OutOfWindow {
        /// Window start (inclusive)
        opens_at: DateTime<Utc>,
        /// Window end (inclusive)
        closes_at: DateTime<Utc>,
    },
    /// Ticket was already checked in.
    AlreadyUsed {
        /// Original check-in time
        checked_in_at: Option<DateTime<Utc>>,
        /// Original scanning staff
        checked_in_by: Option<StaffId>,
    },
    /// Ticket cancelled by a refund.
    Cancelled,
    /// Ticket expired after its event.
    Expired,
    /// Storage did not answer in time; scanning again is safe.
    TransientFailure {
        /// What failed
        reason: String,
    },
}

impl CheckInOutcome {
    /// Flat code used in audit records and metrics labels.
    #[must_use]
    pub const fn code(&self) -> OutcomeCode {
        match self {
            Self::Admitted { .. } => OutcomeCode::Admitted,
            Self::InvalidSignature => OutcomeCode::InvalidSignature,
            Self::NotFound => OutcomeCode::NotFound,
            Self::WrongEvent => OutcomeCode::WrongEvent,
            Self::OutOfWindow { .. } => OutcomeCode::OutOfWindow,
            Self::AlreadyUsed { .. } => OutcomeCode::AlreadyUsed,
            Self::Cancelled => OutcomeCode::Cancelled,
            Self::Expired => OutcomeCode::Expired,
            Self::TransientFailure { .. } => OutcomeCode::TransientFailure,
        }
    }

    /// Whether the holder may enter.
    #[must_use]
    pub const fn accepted(&self) -> bool {
        matches!(self, Self::Admitted { .. })
    }

    /// Text shown on the scanner.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::Admitted { .. } => "Admitted".to_string(),
            Self::InvalidSignature => "Not a genuine ticket code".to_string(),
            Self::NotFound => "Ticket not found".to_string(),
            Self::WrongEvent => "Ticket is for a different event".to_string(),
            Self::OutOfWindow { opens_at, closes_at } => format!(
                "Check-in is open from {} to {}",
                opens_at.format("%Y-%m-%d %H:%M UTC"),
                closes_at.format("%Y-%m-%d %H:%M UTC")
            ),
            Self::AlreadyUsed {
                checked_in_at,
                checked_in_by,
            } => match (checked_in_at, checked_in_by) {
                (Some(at), Some(by)) => format!(
                    "Already checked in at {} by staff {by}",
                    at.format("%Y-%m-%d %H:%M:%S UTC")
                ),
                _ => "Already checked in".to_string(),
            },
            Self::Cancelled => "Ticket was cancelled".to_string(),
            Self::Expired => "Ticket has expired".to_string(),
            Self::TransientFailure { .. } => "Temporary problem, please scan again".to_string(),
        }
    }

    /// Detail stored with the audit entry.
    #[must_use]
    pub fn audit_detail(&self) -> String {
        match self {
            Self::TransientFailure { reason } => reason.clone(),
            other => other.reason(),
        }
    }
}

/// Flat outcome code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeCode {
    /// See [`CheckInOutcome::Admitted`]
    Admitted,
    /// See [`CheckInOutcome::InvalidSignature`]
    InvalidSignature,
    /// See [`CheckInOutcome::NotFound`]
    NotFound,
    /// See [`CheckInOutcome::WrongEvent`]
    WrongEvent,
    /// See [`CheckInOutcome::OutOfWindow`]
    OutOfWindow,
    /// See [`CheckInOutcome::AlreadyUsed`]
    AlreadyUsed,
    /// See [`CheckInOutcome::Cancelled`]
    Cancelled,
    /// See [`CheckInOutcome::Expired`]
    Expired,
    /// See [`CheckInOutcome::TransientFailure`]
    TransientFailure,
}

impl OutcomeCode {
    /// Storage/label representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Admitted => "admitted",
            Self::InvalidSignature => "invalid_signature",
            Self::NotFound => "not_found",
            Self::WrongEvent => "wrong_event",
            Self::OutOfWindow => "out_of_window",
            Self::AlreadyUsed => "already_used",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
            Self::TransientFailure => "transient_failure",
        }
    }

    /// Every code, for metric registration.
    pub const ALL: [Self; 9] = [
        Self::Admitted,
        Self::InvalidSignature,
        Self::NotFound,
        Self::WrongEvent,
        Self::OutOfWindow,
        Self::AlreadyUsed,
        Self::Cancelled,
        Self::Expired,
        Self::TransientFailure,
    ];
}

impl fmt::Display for OutcomeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutcomeCode {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|code| code.as_str() == s)
            .ok_or_else(|| UnknownStatus {
                kind: "check-in outcome",
                value: s.to_string(),
            })
    }
}

/// Result of one scan, returned to the scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInResult {
    /// Ticket the payload named, once authenticated
    pub ticket_id: Option<TicketId>,
    /// Displayed number, once the ticket was found
    pub ticket_number: Option<TicketNumber>,
    /// Classification
    #[serde(flatten)]
    pub outcome: CheckInOutcome,
    /// When the scan was evaluated
    pub scanned_at: DateTime<Utc>,
}

impl CheckInResult {
    /// Whether the holder may enter.
    #[must_use]
    pub const fn accepted(&self) -> bool {
        self.outcome.accepted()
    }

    /// Text shown on the scanner.
    #[must_use]
    pub fn reason(&self) -> String {
        self.outcome.reason()
    }
}

/// Audit entry before storage assigns its sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAuditEntry {
    /// Absent when the payload could not be authenticated
    pub ticket_id: Option<TicketId>,
    /// Scanning staff
    pub staff_id: StaffId,
    /// Scan time
    pub recorded_at: DateTime<Utc>,
    /// Outcome
    pub outcome: OutcomeCode,
    /// Human-readable detail
    pub detail: String,
}

impl NewAuditEntry {
    /// Audit entry describing `outcome`.
    #[must_use]
    pub fn for_outcome(
        ticket_id: Option<TicketId>,
        staff_id: StaffId,
        recorded_at: DateTime<Utc>,
        outcome: &CheckInOutcome,
    ) -> Self {
        Self {
            ticket_id,
            staff_id,
            recorded_at,
            outcome: outcome.code(),
            detail: outcome.audit_detail(),
        }
    }

    /// Attaches the storage-assigned sequence number.
    #[must_use]
    pub fn with_sequence(self, sequence: i64) -> AuditEntry {
        AuditEntry {
            sequence,
            ticket_id: self.ticket_id,
            staff_id: self.staff_id,
            recorded_at: self.recorded_at,
            outcome: self.outcome,
            detail: self.detail,
        }
    }
}

/// Immutable record of one check-in attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Storage-assigned, monotonically increasing
    pub sequence: i64,
    /// Absent when the payload could not be authenticated
    pub ticket_id: Option<TicketId>,
    /// Scanning staff
    pub staff_id: StaffId,
    /// Scan time
    pub recorded_at: DateTime<Utc>,
    /// Outcome
    pub outcome: OutcomeCode,
    /// Human-readable detail
    pub detail: String,
}

/// What to do with a scan once the ticket and its event are loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanDecision {
    /// Attempt the conditional `valid → used` write.
    AttemptCheckIn,
    /// Reject without writing.
    Reject(CheckInOutcome),
}

/// Steps 3, 4 and 6 of a scan: assignment, window, then current status.
#[must_use]
pub fn classify_scan(
    ticket: &Ticket,
    staff_assigned: bool,
    window: &CheckInWindow,
    now: DateTime<Utc>,
) -> ScanDecision {
    if !staff_assigned {
        return ScanDecision::Reject(CheckInOutcome::WrongEvent);
    }
    if !window.contains(now) {
        return ScanDecision::Reject(CheckInOutcome::OutOfWindow {
            opens_at: window.opens_at,
            closes_at: window.closes_at,
        });
    }
    match ticket.status {
        TicketStatus::Valid => ScanDecision::AttemptCheckIn,
        _ => ScanDecision::Reject(outcome_for_current_state(ticket)),
    }
}

/// Outcome for a ticket that is (or turned out to be) no longer `valid`.
#[must_use]
pub fn outcome_for_current_state(ticket: &Ticket) -> CheckInOutcome {
    match ticket.status {
        TicketStatus::Used => CheckInOutcome::AlreadyUsed {
            checked_in_at: ticket.checked_in_at,
            checked_in_by: ticket.checked_in_by,
        },
        TicketStatus::Cancelled => CheckInOutcome::Cancelled,
        TicketStatus::Expired => CheckInOutcome::Expired,
        TicketStatus::Valid => CheckInOutcome::TransientFailure {
            reason: "ticket changed during check-in".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::identifier::QrPayload;
    use crate::types::{BookingId, EventId, UserId};
    use chrono::Duration;

    fn ticket(status: TicketStatus) -> Ticket {
        let event_id = EventId::new();
        Ticket {
            id: TicketId::new(),
            booking_id: BookingId::new(),
            user_id: UserId::new(),
            event_id,
            ticket_type_id: None,
            ticket_number: TicketNumber::generate(event_id),
            qr_payload: QrPayload::from_stored("TKT1.x.y".to_string()),
            status,
            checked_in_at: None,
            checked_in_by: None,
            created_at: Utc::now(),
        }
    }

    fn open_window(now: DateTime<Utc>) -> CheckInWindow {
        CheckInWindow {
            opens_at: now - Duration::hours(1),
            closes_at: now + Duration::hours(1),
        }
    }

    #[test]
    fn unassigned_staff_is_wrong_event_even_outside_window() {
        let now = Utc::now();
        let closed = CheckInWindow {
            opens_at: now + Duration::hours(1),
            closes_at: now + Duration::hours(2),
        };
        assert_eq!(
            classify_scan(&ticket(TicketStatus::Valid), false, &closed, now),
            ScanDecision::Reject(CheckInOutcome::WrongEvent)
        );
    }

    #[test]
    fn window_is_checked_before_status() {
        let now = Utc::now();
        let closed = CheckInWindow {
            opens_at: now + Duration::seconds(1),
            closes_at: now + Duration::hours(2),
        };
        assert!(matches!(
            classify_scan(&ticket(TicketStatus::Cancelled), true, &closed, now),
            ScanDecision::Reject(CheckInOutcome::OutOfWindow { .. })
        ));
    }

    #[test]
    fn status_classification() {
        let now = Utc::now();
        let window = open_window(now);

        assert_eq!(
            classify_scan(&ticket(TicketStatus::Valid), true, &window, now),
            ScanDecision::AttemptCheckIn
        );
        assert_eq!(
            classify_scan(&ticket(TicketStatus::Cancelled), true, &window, now),
            ScanDecision::Reject(CheckInOutcome::Cancelled)
        );
        assert_eq!(
            classify_scan(&ticket(TicketStatus::Expired), true, &window, now),
            ScanDecision::Reject(CheckInOutcome::Expired)
        );

        let staff = StaffId::new();
        let mut used = ticket(TicketStatus::Used);
        used.checked_in_at = Some(now);
        used.checked_in_by = Some(staff);
        assert_eq!(
            classify_scan(&used, true, &window, now),
            ScanDecision::Reject(CheckInOutcome::AlreadyUsed {
                checked_in_at: Some(now),
                checked_in_by: Some(staff),
            })
        );
    }

    #[test]
    fn reasons_and_codes() {
        let outcome = CheckInOutcome::AlreadyUsed {
            checked_in_at: Some(Utc::now()),
            checked_in_by: Some(StaffId::new()),
        };
        assert!(!outcome.accepted());
        assert!(outcome.reason().starts_with("Already checked in at"));
        assert_eq!(outcome.code().as_str(), "already_used");

        for code in OutcomeCode::ALL {
            assert_eq!(code.as_str().parse::<OutcomeCode>().unwrap(), code);
        }
    }

    #[test]
    fn result_serializes_with_flat_outcome_tag() {
        let result = CheckInResult {
            ticket_id: None,
            ticket_number: None,
            outcome: CheckInOutcome::InvalidSignature,
            scanned_at: Utc::now(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["outcome"], "invalid_signature");
    }
}
