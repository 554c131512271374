//! JSON API handlers.
//!
//! - `bookings`: buyer-facing booking lifecycle
//! - `payments`: payment processor callback
//! - `check_ins`: scanner endpoint
//! - `tickets`: audit trail for staff

pub mod bookings;
pub mod check_ins;
pub mod payments;
pub mod tickets;
