//! Failure taxonomy shared across the security core.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Every variant is recoverable at the boundary layer; none should take the
/// process down. Whether `UnknownIdentity` and `BadCredential` collapse into
/// a single outward response (to avoid identity enumeration) is the boundary
/// layer's decision, not ours: the core always reports the precise reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("identity is already registered")]
    DuplicateIdentity,

    #[error("unknown identity")]
    UnknownIdentity,

    #[error("bad credential")]
    BadCredential,

    #[error("identity is locked out until {until}")]
    LockedOut { until: DateTime<Utc> },

    /// Malformed, truncated, or forged ciphertext envelope. May indicate
    /// tampering; the vault logs it at error level before returning.
    #[error("ciphertext envelope failed integrity checks")]
    Integrity,

    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
