//! Unified error type for Tokenkeeper.

use tokenkeeper_api::{ApiError, FieldError};
use tokenkeeper_refresh::RefreshError;
use tokenkeeper_store::StoreError;

use crate::DuplicateRequest;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` variants let `?` lift sub-crate errors, so application
/// code only ever matches on `AuthnError`.
#[derive(Debug, thiserror::Error)]
pub enum AuthnError {
    /// A session-dependent call was made before
    /// [`Authn::configure`](crate::Authn::configure).
    #[error("tokenkeeper must be configured with a session store first")]
    Unconfigured,

    /// The same operation is already in flight; this call was not sent.
    #[error(transparent)]
    Duplicate(#[from] DuplicateRequest),

    /// The identity service rejected the request or could not be reached.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The returned token could not be installed.
    #[error(transparent)]
    Refresh(#[from] RefreshError),

    /// Reading or writing the session store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AuthnError {
    /// The error as a list of field errors, the shape the identity service
    /// uses. Validation errors come back verbatim; a duplicate request is
    /// `[{message: "duplicate"}]`; anything else is a single message.
    pub fn field_errors(&self) -> Vec<FieldError> {
        match self {
            Self::Api(ApiError::Validation(errors)) => errors.clone(),
            Self::Duplicate(_) => vec![FieldError::message("duplicate")],
            other => vec![FieldError::message(other.to_string())],
        }
    }
}
