//! # Turnstile Core
//!
//! Functional core of the booking-to-ticket lifecycle and check-in engine.
//!
//! This crate holds everything that can be decided without I/O:
//!
//! - **Types**: bookings, tickets, ticket types, events, audit entries
//! - **State machines**: booking status/payment-status transitions and ticket transitions
//! - **Check-in classification**: the ordered checks a scan goes through before the
//!   atomic `valid → used` write
//! - **Identifiers**: ticket numbers and HMAC-signed QR payloads
//! - **Environment**: the `Clock`, `TicketingStore` and `StaffDirectory` seams that the
//!   runtime crate drives
//!
//! ## Architecture
//!
//! ```text
//! Booking Ledger ──► Ticket Issuer ──► (tickets persisted) ──► Check-in Validator
//!       │                  │                                          │
//!       └──────────────────┴──────────── TicketingStore ◄─────────────┘
//!                            (conditional writes, transactions,
//!                             unique ticket numbers)
//! ```
//!
//! Correctness under concurrent scanners rests on the store's conditional writes, never on
//! in-process locks: the core only decides *which* write to attempt and how to classify the
//! state a lost race observed.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod booking;
pub mod checkin;
pub mod environment;
pub mod identifier;
pub mod store;
pub mod ticket;
pub mod types;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub use booking::{BookingCommand, BookingTransition, LedgerError, NewBooking, UsedTicket};
pub use checkin::{AuditEntry, CheckInOutcome, CheckInResult, NewAuditEntry, OutcomeCode, ScanDecision};
pub use environment::{Clock, StaffDirectory, SystemClock};
pub use identifier::{IdentifierError, QrPayload, QrSigner, TicketNumber, VerifiedPayload};
pub use store::{BookingWrite, Confirmation, StoreError, StoreFuture, TicketWrite, TicketingStore};
pub use ticket::CheckInWindow;
pub use types::*;
