//! Ticket numbers and signed QR payloads.
//!
//! # Ticket numbers
//!
//! `<EVENT-PREFIX>-<SUFFIX>`: the prefix is the first eight hex digits of the event id,
//! upper-cased, so door staff can tell events apart at a glance; the suffix is ten
//! Crockford base-32 characters (50 bits) drawn from the OS CSPRNG. Generation is pure and
//! stateless. Uniqueness is enforced by storage and the issuer re-mints on collision.
//!
//! # QR payloads
//!
//! ```text
//! TKT1.<base64url(ticket id: 16 bytes ‖ issued-at: i64 BE unix seconds)>.<base64url(HMAC-SHA256)>
//! ```
//!
//! The MAC covers the version tag and the encoded body. Verification is constant-time and
//! needs only the key, so forged or tampered codes are rejected before any storage lookup.

use crate::types::{EventId, TicketId};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Minimum signing key length in bytes.
pub const MIN_KEY_LEN: usize = 32;

const PAYLOAD_VERSION: &str = "TKT1";
const PREFIX_LEN: usize = 8;
const SUFFIX_LEN: usize = 10;
const CROCKFORD: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";
const BODY_LEN: usize = 16 + 8;
const MAC_LEN: usize = 32;

/// Errors from key setup, ticket-number parsing and payload verification.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdentifierError {
    /// No signing key configured.
    #[error("QR signing key is not configured")]
    MissingKey,

    /// Signing key shorter than [`MIN_KEY_LEN`].
    #[error("QR signing key too short: {len} bytes (minimum {min})")]
    KeyTooShort {
        /// Supplied length
        len: usize,
        /// Required length
        min: usize,
    },

    /// Payload is not structurally a `TKT1` token.
    #[error("malformed QR payload: {0}")]
    Malformed(&'static str),

    /// MAC did not verify.
    #[error("QR payload signature mismatch")]
    BadSignature,

    /// String is not a well-formed ticket number.
    #[error("invalid ticket number: {0:?}")]
    InvalidTicketNumber(String),
}

// ============================================================================
// Ticket numbers
// ============================================================================

/// Human-displayable ticket number, unique system-wide.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketNumber(String);

impl TicketNumber {
    /// Mints a fresh number for a ticket of `event_id`.
    #[must_use]
    pub fn generate(event_id: EventId) -> Self {
        let mut bytes = [0u8; 8];
        OsRng.fill_bytes(&mut bytes);
        let mut bits = u64::from_be_bytes(bytes);

        let mut number = event_prefix(event_id);
        number.push('-');
        for _ in 0..SUFFIX_LEN {
            number.push(char::from(CROCKFORD[(bits & 0x1f) as usize]));
            bits >>= 5;
        }
        Self(number)
    }

    /// Parses a stored ticket number, checking its shape.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError::InvalidTicketNumber`] if the string is not
    /// `XXXXXXXX-YYYYYYYYYY` with a hex prefix and a Crockford suffix.
    pub fn parse(value: &str) -> Result<Self, IdentifierError> {
        let invalid = || IdentifierError::InvalidTicketNumber(value.to_string());
        let (prefix, suffix) = value.split_once('-').ok_or_else(invalid)?;

        let prefix_ok = prefix.len() == PREFIX_LEN
            && prefix
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b));
        let suffix_ok = suffix.len() == SUFFIX_LEN && suffix.bytes().all(|b| CROCKFORD.contains(&b));

        if prefix_ok && suffix_ok {
            Ok(Self(value.to_string()))
        } else {
            Err(invalid())
        }
    }

    /// Returns the number as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The event prefix part.
    #[must_use]
    pub fn prefix(&self) -> &str {
        self.0.split_once('-').map_or(self.0.as_str(), |(prefix, _)| prefix)
    }
}

impl fmt::Display for TicketNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Upper-cased first eight hex digits of the event id.
#[must_use]
pub fn event_prefix(event_id: EventId) -> String {
    let mut hex = event_id.as_uuid().simple().to_string();
    hex.truncate(PREFIX_LEN);
    hex.make_ascii_uppercase();
    hex
}

// ============================================================================
// QR payloads
// ============================================================================

/// Signed token rendered as a ticket's QR code.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QrPayload(String);

impl QrPayload {
    /// Wraps a payload read back from storage.
    #[must_use]
    pub const fn from_stored(value: String) -> Self {
        Self(value)
    }

    /// Returns the payload as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QrPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Contents of an authenticated payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VerifiedPayload {
    /// Ticket the payload was issued for
    pub ticket_id: TicketId,
    /// Issue time (second precision)
    pub issued_at: DateTime<Utc>,
}

/// Signs and verifies QR payloads with a shared HMAC-SHA256 key.
#[derive(Clone)]
pub struct QrSigner {
    keyed: HmacSha256,
}

impl fmt::Debug for QrSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QrSigner").field("key", &"[REDACTED]").finish()
    }
}

impl QrSigner {
    /// Creates a signer.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError::MissingKey`] for an empty key and
    /// [`IdentifierError::KeyTooShort`] below [`MIN_KEY_LEN`] bytes.
    pub fn new(key: impl AsRef<[u8]>) -> Result<Self, IdentifierError> {
        let key = key.as_ref();
        if key.is_empty() {
            return Err(IdentifierError::MissingKey);
        }
        if key.len() < MIN_KEY_LEN {
            return Err(IdentifierError::KeyTooShort {
                len: key.len(),
                min: MIN_KEY_LEN,
            });
        }
        let keyed = HmacSha256::new_from_slice(key).map_err(|_| IdentifierError::KeyTooShort {
            len: key.len(),
            min: MIN_KEY_LEN,
        })?;
        Ok(Self { keyed })
    }

    /// Issues a payload binding `ticket_id` and `issued_at`.
    #[must_use]
    pub fn sign(&self, ticket_id: TicketId, issued_at: DateTime<Utc>) -> QrPayload {
        let mut body = [0u8; BODY_LEN];
        body[..16].copy_from_slice(ticket_id.as_uuid().as_bytes());
        body[16..].copy_from_slice(&issued_at.timestamp().to_be_bytes());

        let signed = format!("{PAYLOAD_VERSION}.{}", URL_SAFE_NO_PAD.encode(body));
        let tag = self.mac(signed.as_bytes()).finalize().into_bytes();
        QrPayload(format!("{signed}.{}", URL_SAFE_NO_PAD.encode(tag)))
    }

    /// Authenticates a scanned payload and decodes its contents.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError::Malformed`] for structurally invalid input and
    /// [`IdentifierError::BadSignature`] when the MAC does not match.
    pub fn verify(&self, payload: &str) -> Result<VerifiedPayload, IdentifierError> {
        let (signed, tag) = payload
            .rsplit_once('.')
            .ok_or(IdentifierError::Malformed("missing signature"))?;
        let (version, body) = signed
            .split_once('.')
            .ok_or(IdentifierError::Malformed("missing body"))?;
        if version != PAYLOAD_VERSION {
            return Err(IdentifierError::Malformed("unknown version"));
        }

        let tag = URL_SAFE_NO_PAD
            .decode(tag)
            .map_err(|_| IdentifierError::Malformed("signature is not base64url"))?;
        if tag.len() != MAC_LEN {
            return Err(IdentifierError::Malformed("signature length"));
        }
        self.mac(signed.as_bytes())
            .verify_slice(&tag)
            .map_err(|_| IdentifierError::BadSignature)?;

        let body = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|_| IdentifierError::Malformed("body is not base64url"))?;
        let body: [u8; BODY_LEN] = body
            .try_into()
            .map_err(|_| IdentifierError::Malformed("body length"))?;

        let mut id = [0u8; 16];
        id.copy_from_slice(&body[..16]);
        let mut secs = [0u8; 8];
        secs.copy_from_slice(&body[16..]);
        let issued_at = DateTime::from_timestamp(i64::from_be_bytes(secs), 0)
            .ok_or(IdentifierError::Malformed("issued-at out of range"))?;

        Ok(VerifiedPayload {
            ticket_id: TicketId::from_uuid(Uuid::from_bytes(id)),
            issued_at,
        })
    }

    fn mac(&self, data: &[u8]) -> HmacSha256 {
        let mut mac = self.keyed.clone();
        mac.update(data);
        mac
    }
}
