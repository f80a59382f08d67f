//! Error types for the refresh layer.

use tokenkeeper_api::ApiError;
use tokenkeeper_session::DecodeError;
use tokenkeeper_store::StoreError;

/// Errors from installing or refreshing a session.
///
/// Background refreshes never return these to application code; they
/// go to the scheduler's failure hook and the log instead.
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    /// The token handed to the scheduler could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The store failed to persist or delete the token.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The refresh call to the identity service failed.
    #[error(transparent)]
    Api(#[from] ApiError),
}
