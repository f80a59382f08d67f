//! Error types for the session layer.

/// Errors that can occur while decoding a raw token into a [`Session`](crate::Session).
///
/// Neither variant is fatal to the client: callers treat a token that
/// fails to decode as "no usable session".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The token is not three non-empty, dot-separated segments.
    #[error("malformed token: expected three non-empty segments")]
    MalformedStructure,

    /// The payload segment is not base64 or does not hold a JSON object.
    #[error("invalid token claims: {0}")]
    InvalidClaims(String),
}
