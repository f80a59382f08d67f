//! Response envelopes.
//!
//! The identity service wraps every answer in one of two JSON shapes:
//!
//! ```text
//! {"result": <value>}                                  success
//! {"errors": [{"field": "...", "message": "..."}]}     validation failure
//! ```
//!
//! Token-issuing endpoints put `{"id_token": "<raw token>"}` in `result`.
//! Transports hand the status code and body to [`decode_response`] and
//! get back either the typed result or an [`ApiError`].

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::{ApiError, FieldError};

/// The `result` of token-issuing endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IdToken {
    pub id_token: String,
}

#[derive(Deserialize)]
struct Envelope<T> {
    result: Option<T>,
    #[serde(default)]
    errors: Option<Vec<FieldError>>,
}

/// Decodes a response body into its `result`.
///
/// A non-empty `errors` list wins over everything else, whatever the
/// status code. A success status without a `result` and an error status
/// without `errors` are both transport errors.
///
/// # Errors
/// - [`ApiError::Validation`] — the body carried field errors
/// - [`ApiError::InvalidResponse`] — the body is not an envelope of `T`
/// - [`ApiError::Transport`] — anything else
pub fn decode_response<T: DeserializeOwned>(
    status: u16,
    body: &[u8],
) -> Result<T, ApiError> {
    let success = (200..300).contains(&status);

    let envelope: Envelope<T> = match serde_json::from_slice(body) {
        Ok(envelope) => envelope,
        // Proxies and load balancers answer errors with HTML or nothing.
        Err(_) if !success => {
            return Err(ApiError::Transport(format!("unexpected status {status}")));
        }
        Err(e) => return Err(ApiError::InvalidResponse(e)),
    };

    if let Some(errors) = envelope.errors.filter(|errors| !errors.is_empty()) {
        return Err(ApiError::Validation(errors));
    }

    match envelope.result {
        Some(result) if success => Ok(result),
        Some(_) => Err(ApiError::Transport(format!("unexpected status {status}"))),
        None => Err(ApiError::Transport(format!(
            "status {status} response without result"
        ))),
    }
}

/// Decodes a token-issuing response and returns the raw token.
pub fn decode_token_response(status: u16, body: &[u8]) -> Result<String, ApiError> {
    decode_response::<IdToken>(status, body).map(|result| result.id_token)
}
