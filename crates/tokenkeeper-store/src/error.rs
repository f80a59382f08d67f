//! Error types for the store layer.

/// Errors that can occur while persisting or reading a session token.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("session storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The entry name cannot be stored (empty, or contains `=`, `;` or
    /// whitespace).
    #[error("invalid session name: {0:?}")]
    InvalidName(String),

    /// The token contains characters the backend cannot store.
    #[error("token cannot be stored: {0}")]
    InvalidValue(String),
}
