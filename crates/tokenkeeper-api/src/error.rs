//! Error types for the transport boundary.

use crate::FieldError;

/// Errors returned by an [`AuthApi`](crate::AuthApi) call.
///
/// Validation errors come from the identity service and are handed to
/// the caller verbatim. Everything else means the request did not get a
/// usable answer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The identity service rejected the request with field-level errors.
    #[error("request rejected: {}", format_fields(.0))]
    Validation(Vec<FieldError>),

    /// The request failed or the service answered with an unexpected status.
    #[error("transport error: {0}")]
    Transport(String),

    /// The response body was not the expected envelope.
    #[error("invalid response body: {0}")]
    InvalidResponse(#[source] serde_json::Error),

    /// The HTTP client failed (connect, TLS, timeout, body read).
    #[cfg(feature = "http")]
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ApiError {
    /// The field errors, if this is a validation failure.
    pub fn field_errors(&self) -> Option<&[FieldError]> {
        match self {
            Self::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}

fn format_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
