//! Caller identity extractors.
//!
//! Authentication happens at the gateway in front of this service; it forwards the
//! authenticated buyer as `X-User-Id` and the authenticated scanner operator as
//! `X-Staff-Id`. Requests without the expected header are rejected with 401.

use crate::error::AppError;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use std::str::FromStr;
use turnstile_core::types::{StaffId, UserId};

/// Header carrying the authenticated buyer.
pub const USER_ID_HEADER: &str = "X-User-Id";

/// Header carrying the authenticated staff member.
pub const STAFF_ID_HEADER: &str = "X-Staff-Id";

fn header_id<T: FromStr>(parts: &Parts, header: &'static str) -> Result<T, AppError> {
    let raw = parts
        .headers
        .get(header)
        .ok_or_else(|| AppError::unauthorized(format!("missing {header} header")))?;
    raw.to_str()
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .ok_or_else(|| AppError::unauthorized(format!("malformed {header} header")))
}

/// The buyer making the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Buyer(pub UserId);

#[async_trait]
impl<S> FromRequestParts<S> for Buyer
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        header_id(parts, USER_ID_HEADER).map(Self)
    }
}

/// The staff member operating a scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scanner(pub StaffId);

#[async_trait]
impl<S> FromRequestParts<S> for Scanner
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        header_id(parts, STAFF_ID_HEADER).map(Self)
    }
}
