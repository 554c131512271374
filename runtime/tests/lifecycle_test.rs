//! Booking-to-ticket lifecycle scenarios against the in-memory store.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use chrono::Duration;
use common::{GRACE_MINUTES, Harness};
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};
use turnstile_core::booking::LedgerError;
use turnstile_core::checkin::{CheckInOutcome, OutcomeCode};
use turnstile_core::environment::Clock;
use turnstile_core::identifier::QrSigner;
use turnstile_core::store::TicketingStore;
use turnstile_core::types::{BookingStatus, PaymentStatus, StaffId, TicketId, TicketStatus};
use turnstile_runtime::{CheckInPolicy, ExpirySweeper, PaymentResult};
use turnstile_testing::fixtures;

// ============================================================================
// Booking ledger and issuer
// ============================================================================

#[tokio::test]
async fn confirmed_booking_owns_exactly_quantity_tickets() {
    let h = Harness::new(10);
    let details = h.confirmed_booking(3).await;

    assert_eq!(details.booking.status, BookingStatus::Confirmed);
    assert_eq!(details.booking.payment_status, PaymentStatus::Completed);
    assert_eq!(details.tickets.len(), 3);
    assert!(details.tickets.iter().all(|t| t.booking_id == details.booking.id));
    assert!(details.tickets.iter().all(|t| t.status == TicketStatus::Valid));

    let counters = h.store.ticket_type(h.ticket_type.id).unwrap();
    assert_eq!((counters.quantity_sold, counters.quantity_reserved), (3, 0));
}

#[tokio::test]
async fn repeated_confirmation_is_rejected_and_issues_nothing() {
    let h = Harness::new(10);
    let details = h.confirmed_booking(2).await;

    let err = h
        .ledger
        .confirm_booking(details.booking.id, "pi_retry")
        .await
        .unwrap_err();
    assert_eq!(
        err,
        LedgerError::AlreadyFinalized {
            booking_id: details.booking.id,
            status: BookingStatus::Confirmed,
        }
    );
    assert_eq!(h.store.ticket_count(), 2);
    assert_eq!(h.store.ticket_type(h.ticket_type.id).unwrap().quantity_sold, 2);
}

#[tokio::test]
async fn capacity_exceeded_persists_nothing() {
    let h = Harness::new(2);

    let err = h.ledger.create_booking(h.request(3)).await.unwrap_err();
    assert_eq!(err, LedgerError::CapacityExceeded { requested: 3, remaining: 2 });
    assert_eq!(h.store.booking_count(), 0);
    assert_eq!(h.store.ticket_count(), 0);
    assert_eq!(h.store.ticket_type(h.ticket_type.id).unwrap().quantity_reserved, 0);
}

#[tokio::test]
async fn pending_reservations_count_against_capacity() {
    let h = Harness::new(4);
    h.pending_booking(3).await;

    let err = h.ledger.create_booking(h.request(2)).await.unwrap_err();
    assert_eq!(err, LedgerError::CapacityExceeded { requested: 2, remaining: 1 });
}

#[tokio::test]
async fn cancel_releases_the_reservation() {
    let h = Harness::new(4);
    let booking = h.pending_booking(3).await;

    let cancelled = h.ledger.cancel_booking(booking.id).await.unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert_eq!(h.store.ticket_type(h.ticket_type.id).unwrap().quantity_reserved, 0);
    assert_ok!(h.ledger.create_booking(h.request(4)).await);

    assert!(matches!(
        h.ledger.cancel_booking(booking.id).await,
        Err(LedgerError::AlreadyFinalized { status: BookingStatus::Cancelled, .. })
    ));
    assert!(matches!(
        h.ledger.confirm_booking(booking.id, "pi_late").await,
        Err(LedgerError::AlreadyFinalized { status: BookingStatus::Cancelled, .. })
    ));
}

#[tokio::test]
async fn cancelling_a_paid_booking_is_rejected() {
    let h = Harness::new(4);
    let details = h.confirmed_booking(1).await;

    assert!(matches!(
        h.ledger.cancel_booking(details.booking.id).await,
        Err(LedgerError::AlreadyFinalized { status: BookingStatus::Confirmed, .. })
    ));
}

#[tokio::test]
async fn sale_window_and_unknown_references() {
    let h = Harness::new(4);

    let mut closed = h.ticket_type.clone();
    closed.sale_ends_at = Some(h.clock.now() - Duration::minutes(1));
    h.store.insert_ticket_type(closed.clone());
    assert_eq!(
        h.ledger.create_booking(h.request(1)).await,
        Err(LedgerError::SaleWindowClosed(closed.id))
    );

    let mut unknown_event = h.request(1);
    unknown_event.event_id = turnstile_core::types::EventId::new();
    assert!(matches!(
        h.ledger.create_booking(unknown_event).await,
        Err(LedgerError::EventNotFound(_))
    ));

    let mut unknown_type = h.request(1);
    unknown_type.ticket_type_id = Some(turnstile_core::types::TicketTypeId::new());
    assert!(matches!(
        h.ledger.create_booking(unknown_type).await,
        Err(LedgerError::TicketTypeNotFound(_))
    ));
}

#[tokio::test]
async fn successful_payment_callback_issues_tickets() {
    let h = Harness::new(10);
    let booking = h.pending_booking(2).await;

    let details = h
        .ledger
        .handle_payment_result(PaymentResult {
            booking_id: booking.id,
            success: true,
            reference: Some("pi_ok".to_string()),
        })
        .await
        .unwrap();

    assert_eq!(details.booking.status, BookingStatus::Confirmed);
    assert_eq!(details.booking.payment_reference.as_deref(), Some("pi_ok"));
    assert_eq!(details.tickets.len(), 2);

    let fetched = h.ledger.get_booking(booking.id).await.unwrap();
    assert_eq!(fetched.tickets.len(), 2);
}

#[tokio::test]
async fn successful_payment_without_reference_is_rejected_and_issues_nothing() {
    let h = Harness::new(10);
    let booking = h.pending_booking(2).await;

    for reference in [None, Some("  ".to_string())] {
        let err = h
            .ledger
            .handle_payment_result(PaymentResult {
                booking_id: booking.id,
                success: true,
                reference,
            })
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::MissingPaymentReference(booking.id));
    }

    let fetched = h.ledger.get_booking(booking.id).await.unwrap();
    assert_eq!(fetched.booking.status, BookingStatus::Pending);
    assert_eq!(fetched.booking.payment_reference, None);
    assert!(fetched.tickets.is_empty());
    assert_eq!(h.store.ticket_count(), 0);
}

#[tokio::test]
async fn failed_payment_cancels_and_releases() {
    let h = Harness::new(10);
    let booking = h.pending_booking(2).await;

    let details = h
        .ledger
        .handle_payment_result(PaymentResult {
            booking_id: booking.id,
            success: false,
            reference: Some("pi_declined".to_string()),
        })
        .await
        .unwrap();

    assert_eq!(details.booking.status, BookingStatus::Cancelled);
    assert_eq!(details.booking.payment_status, PaymentStatus::Failed);
    assert!(details.tickets.is_empty());
    assert_eq!(h.store.ticket_type(h.ticket_type.id).unwrap().quantity_reserved, 0);
}

#[tokio::test]
async fn collision_exhaustion_leaves_booking_pending_for_retry() {
    let h = Harness::new(10);
    let booking = h.pending_booking(2).await;
    h.store.force_ticket_number_collisions(5);

    let err = h.ledger.confirm_booking(booking.id, "pi_1").await.unwrap_err();
    assert!(matches!(err, LedgerError::TicketNumberExhausted { attempts: 5, .. }));
    assert!(err.is_transient());
    assert_eq!(h.store.ticket_count(), 0);

    let details = h.ledger.confirm_booking(booking.id, "pi_1").await.unwrap();
    assert_eq!(details.tickets.len(), 2);
}

// ============================================================================
// Refunds
// ============================================================================

#[tokio::test]
async fn refund_cancels_valid_tickets() {
    let h = Harness::new(10);
    let details = h.confirmed_booking(2).await;

    let refunded = h.ledger.refund_booking(details.booking.id).await.unwrap();
    assert_eq!(refunded.status, BookingStatus::Refunded);
    assert_eq!(refunded.payment_status, PaymentStatus::Refunded);
    for ticket in &details.tickets {
        assert_eq!(h.store.ticket(ticket.id).unwrap().status, TicketStatus::Cancelled);
    }

    h.open_doors();
    let result = h
        .validator
        .validate(details.tickets[0].qr_payload.as_str(), h.staff_id)
        .await;
    assert_eq!(result.outcome, CheckInOutcome::Cancelled);
}

#[tokio::test]
async fn refund_after_check_in_reports_conflict_and_keeps_ticket_used() {
    let h = Harness::new(10);
    let details = h.confirmed_booking(1).await;
    let ticket = &details.tickets[0];

    h.open_doors();
    assert!(h.validator.validate(ticket.qr_payload.as_str(), h.staff_id).await.accepted());

    let err = h.ledger.refund_booking(details.booking.id).await.unwrap_err();
    match err {
        LedgerError::RefundConflict { booking_id, used, cancelled } => {
            assert_eq!(booking_id, details.booking.id);
            assert_eq!(used.len(), 1);
            assert_eq!(used[0].ticket_id, ticket.id);
            assert_eq!(used[0].checked_in_by, Some(h.staff_id));
            assert!(cancelled.is_empty());
        }
        other => panic!("expected refund conflict, got {other:?}"),
    }

    assert_eq!(h.store.ticket(ticket.id).unwrap().status, TicketStatus::Used);
    let booking = h.ledger.get_booking(details.booking.id).await.unwrap().booking;
    assert_eq!(booking.status, BookingStatus::Confirmed);
}

#[tokio::test]
async fn partial_check_in_refund_cancels_the_rest() {
    let h = Harness::new(10);
    let details = h.confirmed_booking(3).await;

    h.open_doors();
    assert!(h.validator.validate(details.tickets[0].qr_payload.as_str(), h.staff_id).await.accepted());

    let Err(LedgerError::RefundConflict { used, cancelled, .. }) =
        h.ledger.refund_booking(details.booking.id).await
    else {
        panic!("expected refund conflict");
    };
    assert_eq!(used.len(), 1);
    assert_eq!(cancelled.len(), 2);
    assert_eq!(h.store.ticket(details.tickets[1].id).unwrap().status, TicketStatus::Cancelled);
}

#[tokio::test]
async fn pending_booking_is_not_refundable() {
    let h = Harness::new(10);
    let booking = h.pending_booking(1).await;
    assert!(matches!(
        h.ledger.refund_booking(booking.id).await,
        Err(LedgerError::NotRefundable { status: BookingStatus::Pending, .. })
    ));
}

// ============================================================================
// Check-in
// ============================================================================

#[tokio::test]
async fn fresh_payload_checks_in_inside_the_window() {
    let h = Harness::new(10);
    let details = h.confirmed_booking(1).await;
    let ticket = &details.tickets[0];

    h.open_doors();
    let result = h.validator.validate(ticket.qr_payload.as_str(), h.staff_id).await;

    assert!(result.accepted());
    assert_eq!(result.reason(), "Admitted");
    assert_eq!(result.ticket_id, Some(ticket.id));
    assert_eq!(result.ticket_number.as_ref(), Some(&ticket.ticket_number));

    let stored = h.store.ticket(ticket.id).unwrap();
    assert_eq!(stored.status, TicketStatus::Used);
    assert_eq!(stored.checked_in_by, Some(h.staff_id));
    assert_eq!(stored.checked_in_at, Some(h.event.starts_at));
}

#[tokio::test]
async fn second_scan_reports_original_check_in() {
    let h = Harness::new(10);
    let details = h.confirmed_booking(1).await;
    let payload = details.tickets[0].qr_payload.as_str();

    h.open_doors();
    assert!(h.validator.validate(payload, h.staff_id).await.accepted());

    let other_staff = StaffId::new();
    h.staff.assign(other_staff, h.event.id);
    h.clock.advance(Duration::minutes(10));
    let again = h.validator.validate(payload, other_staff).await;

    assert_eq!(
        again.outcome,
        CheckInOutcome::AlreadyUsed {
            checked_in_at: Some(h.event.starts_at),
            checked_in_by: Some(h.staff_id),
        }
    );
    assert!(!again.accepted());
}

#[tokio::test]
async fn window_boundary_is_one_second_sharp() {
    let h = Harness::new(10);
    let details = h.confirmed_booking(1).await;
    let payload = details.tickets[0].qr_payload.as_str();
    let opens_at = h.event.starts_at - Duration::minutes(GRACE_MINUTES);

    h.clock.set(opens_at - Duration::seconds(1));
    let early = h.validator.validate(payload, h.staff_id).await;
    assert_eq!(
        early.outcome,
        CheckInOutcome::OutOfWindow {
            opens_at,
            closes_at: h.event.ends_at + Duration::minutes(GRACE_MINUTES),
        }
    );
    assert_eq!(h.store.ticket(details.tickets[0].id).unwrap().status, TicketStatus::Valid);

    h.clock.set(opens_at + Duration::seconds(1));
    assert!(h.validator.validate(payload, h.staff_id).await.accepted());
}

#[tokio::test]
async fn scan_after_window_closes_is_out_of_window() {
    let h = Harness::new(10);
    let details = h.confirmed_booking(1).await;

    h.clock.set(h.event.ends_at + Duration::minutes(GRACE_MINUTES) + Duration::seconds(1));
    let late = h.validator.validate(details.tickets[0].qr_payload.as_str(), h.staff_id).await;
    assert_eq!(late.outcome.code(), OutcomeCode::OutOfWindow);
}

#[tokio::test]
async fn tampered_payload_is_rejected_before_any_lookup() {
    let h = Harness::new(10);
    let details = h.confirmed_booking(1).await;
    h.open_doors();

    let payload = details.tickets[0].qr_payload.as_str();
    let mut bytes = payload.as_bytes().to_vec();
    let last = bytes.len() - 1;
    bytes[last - 2] ^= 0b0000_0010;
    let tampered = String::from_utf8(bytes).unwrap();

    let lookups_before = h.store.ticket_lookups();
    let result = h.validator.validate(&tampered, h.staff_id).await;

    assert_eq!(result.outcome, CheckInOutcome::InvalidSignature);
    assert_eq!(result.ticket_id, None);
    assert_eq!(h.store.ticket_lookups(), lookups_before);
    assert_eq!(h.store.ticket(details.tickets[0].id).unwrap().status, TicketStatus::Valid);

    let audit = h.store.all_audit_entries();
    let last_entry = audit.last().unwrap();
    assert_eq!(last_entry.outcome, OutcomeCode::InvalidSignature);
    assert_eq!(last_entry.ticket_id, None);
}

#[tokio::test]
async fn payload_signed_with_another_key_is_rejected() {
    let h = Harness::new(10);
    h.open_doors();
    let forger = QrSigner::new([42u8; 32]).unwrap();
    let forged = forger.sign(TicketId::new(), h.event.starts_at);

    let result = h.validator.validate(forged.as_str(), h.staff_id).await;
    assert_eq!(result.outcome, CheckInOutcome::InvalidSignature);
    assert_eq!(h.store.ticket_lookups(), 0);
}

#[tokio::test]
async fn authentic_payload_for_unknown_ticket_is_not_found() {
    let h = Harness::new(10);
    h.open_doors();
    let payload = fixtures::test_signer().sign(TicketId::new(), h.event.starts_at);

    let result = h.validator.validate(payload.as_str(), h.staff_id).await;
    assert_eq!(result.outcome, CheckInOutcome::NotFound);
}

#[tokio::test]
async fn unassigned_staff_gets_wrong_event() {
    let h = Harness::new(10);
    let details = h.confirmed_booking(1).await;
    h.open_doors();

    let stranger = StaffId::new();
    let result = h.validator.validate(details.tickets[0].qr_payload.as_str(), stranger).await;
    assert_eq!(result.outcome, CheckInOutcome::WrongEvent);
    assert_eq!(h.store.ticket(details.tickets[0].id).unwrap().status, TicketStatus::Valid);
}

#[tokio::test]
async fn storage_timeout_is_transient_and_changes_nothing() {
    let h = Harness::with_storage_timeout(10, std::time::Duration::from_millis(50));
    let details = h.confirmed_booking(1).await;
    let ticket = &details.tickets[0];
    h.open_doors();

    h.store.set_latency(Some(std::time::Duration::from_millis(300)));
    let result = h.validator.validate(ticket.qr_payload.as_str(), h.staff_id).await;
    assert_eq!(result.outcome.code(), OutcomeCode::TransientFailure);
    assert!(!result.accepted());

    h.store.set_latency(None);
    assert_eq!(h.store.ticket(ticket.id).unwrap().status, TicketStatus::Valid);
    assert!(h.validator.validate(ticket.qr_payload.as_str(), h.staff_id).await.accepted());
}

#[tokio::test]
async fn every_attempt_is_audited_in_order() {
    let h = Harness::new(10);
    let details = h.confirmed_booking(1).await;
    let ticket = &details.tickets[0];
    let payload = ticket.qr_payload.as_str();

    h.clock.set(h.event.starts_at - Duration::minutes(GRACE_MINUTES + 5));
    h.validator.validate(payload, h.staff_id).await;
    h.open_doors();
    h.validator.validate(payload, StaffId::new()).await;
    h.validator.validate(payload, h.staff_id).await;
    h.validator.validate(payload, h.staff_id).await;

    let trail = assert_ok!(h.validator.audit_trail(ticket.id).await);
    let outcomes: Vec<_> = trail.iter().map(|e| e.outcome).collect();
    assert_eq!(
        outcomes,
        vec![
            OutcomeCode::OutOfWindow,
            OutcomeCode::WrongEvent,
            OutcomeCode::Admitted,
            OutcomeCode::AlreadyUsed,
        ]
    );
    assert!(trail.windows(2).all(|w| w[0].sequence < w[1].sequence));
}

// ============================================================================
// Expiry sweep
// ============================================================================

#[tokio::test]
async fn sweep_expires_only_valid_tickets_of_finished_events() {
    let h = Harness::new(10);
    let details = h.confirmed_booking(3).await;
    h.open_doors();
    assert!(h.validator.validate(details.tickets[0].qr_payload.as_str(), h.staff_id).await.accepted());

    // Window still open: nothing to do
    h.clock.set(h.event.ends_at + Duration::minutes(GRACE_MINUTES));
    assert_eq!(h.sweeper.sweep_once().await.unwrap().expired, 0);

    h.clock.set(h.event.ends_at + Duration::minutes(GRACE_MINUTES) + Duration::seconds(1));
    let report = h.sweeper.sweep_once().await.unwrap();
    assert_eq!(report.expired, 2);

    assert_eq!(h.store.ticket(details.tickets[0].id).unwrap().status, TicketStatus::Used);
    assert_eq!(h.store.ticket(details.tickets[1].id).unwrap().status, TicketStatus::Expired);

    let late = h.validator.validate(details.tickets[1].qr_payload.as_str(), h.staff_id).await;
    assert_eq!(late.outcome.code(), OutcomeCode::OutOfWindow);

    assert_eq!(h.sweeper.sweep_once().await.unwrap().expired, 0);
}

#[tokio::test]
async fn negative_grace_never_expires_before_the_event_ends() {
    let h = Harness::new(10);
    let details = h.confirmed_booking(2).await;
    let sweeper = ExpirySweeper::new(
        Arc::new(h.store.clone()),
        Arc::clone(&h.clock) as Arc<dyn Clock>,
        CheckInPolicy {
            grace: Duration::minutes(-120),
            ..CheckInPolicy::default()
        },
    );

    let report = sweeper.sweep_expired(h.event.ends_at - Duration::hours(1)).await.unwrap();
    assert_eq!(report.expired, 0);
    assert_eq!(h.store.ticket(details.tickets[0].id).unwrap().status, TicketStatus::Valid);

    let report = sweeper.sweep_expired(h.event.ends_at + Duration::seconds(1)).await.unwrap();
    assert_eq!(report.expired, 2);
}

#[tokio::test]
async fn zero_interval_sweeper_returns_instead_of_panicking() {
    let h = Harness::new(10);
    let (_tx, rx) = tokio::sync::watch::channel(false);
    tokio::time::timeout(
        std::time::Duration::from_secs(1),
        h.sweeper.clone().run(std::time::Duration::ZERO, rx),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn sweep_pages_through_large_backlogs() {
    let h = Harness::new(20);
    for _ in 0..3 {
        h.confirmed_booking(4).await;
    }
    h.clock.set(h.event.ends_at + Duration::days(1));

    let sweeper = h.sweeper.clone().with_batch_size(5);
    let report = sweeper.sweep_once().await.unwrap();
    assert_eq!(report.expired, 12);
}

#[tokio::test]
async fn sweep_surfaces_storage_errors() {
    let h = Harness::new(10);
    h.store.fail_with(turnstile_core::store::StoreError::Unavailable("down".to_string()));
    assert_err!(h.sweeper.sweep_once().await);
    h.store.clear_failure();
    assert_ok!(h.store.load_event(h.event.id).await);
}
