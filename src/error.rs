// src/error.rs

use thiserror::Error;

/// The primary error type for the `tollgate` library.
///
/// Every expected verification failure is a distinct variant so that the
/// hosting layer can map the kind to a protocol response without parsing
/// messages. Bad, expired, or forged tokens are expected adversarial input
/// and are always returned as values, never panics.
#[derive(Debug, Error, PartialEq)]
pub enum VerifyError {
    /// The token does not parse as a three-segment signed JWT with the
    /// required header fields.
    #[error("malformed token: {0}")]
    Malformed(String),

    /// The algorithm declared in the token header is not in the configured
    /// allow-list. Covers unknown declarations such as `"none"`.
    #[error("token algorithm {0:?} is not allowed")]
    AlgorithmNotAllowed(String),

    /// No signing key in the current key set matches the token's `kid`,
    /// even after a refresh.
    #[error("no signing key found for kid {0:?}")]
    KeyNotFound(String),

    /// The provider's key-set endpoint could not be reached, timed out, or
    /// returned a malformed response. Transient; rejects the current
    /// request only.
    #[error("key set endpoint unreachable: {0}")]
    KeySourceUnreachable(String),

    /// Cryptographic signature verification failed.
    #[error("token signature verification failed")]
    BadSignature,

    /// The `iss` claim does not equal the configured issuer.
    #[error("issuer mismatch (expected {expected:?})")]
    IssuerMismatch { expected: String },

    /// The `aud` claim does not contain the configured audience.
    #[error("audience mismatch (expected {expected:?})")]
    AudienceMismatch { expected: String },

    /// The `exp` claim is missing or not in the future. Carries the claimed
    /// expiration when one was present.
    #[error("{}", .0.map_or_else(|| "token has no expiration claim".to_owned(), |exp| format!("token expired at {exp}")))]
    Expired(Option<u64>),

    /// The `iat` claim is in the future beyond the clock-skew tolerance.
    #[error("token issued in the future (iat {0})")]
    NotYetValid(u64),

    /// Signature and claims are valid, but the granted scopes do not cover
    /// the required set.
    #[error("insufficient scope (missing {missing:?})")]
    InsufficientScope { missing: Vec<String> },

    /// A URL supplied to the configuration builder failed to parse.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// A required configuration field is missing. Raised at startup by
    /// `ConfigBuilder::build`, never at request time.
    #[error("a required configuration field is missing: {0}")]
    MissingConfiguration(&'static str),
}
