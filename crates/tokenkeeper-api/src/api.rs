//! The transport trait between Tokenkeeper and the identity service.
//!
//! Tokenkeeper doesn't speak HTTP itself. It defines [`AuthApi`]: one
//! async method per identity service operation, each returning a raw
//! token (or a simple value) or an [`ApiError`]. [`HttpApi`](crate::HttpApi)
//! is the stock implementation; tests implement it with in-memory mocks.

use std::future::Future;
use std::sync::Arc;

use crate::{ApiError, Credentials, PasswordChange};

/// Calls into the identity service.
///
/// # Trait bounds
///
/// - `Send + Sync` → the API is shared between the client and the
///   background refresh task.
/// - `'static` → it lives as long as the client that owns it.
///
/// # Example
///
/// ```rust
/// use tokenkeeper_api::{ApiError, AuthApi, Credentials, FieldError, PasswordChange};
///
/// /// Rejects every request. Handy for exercising error paths.
/// struct ClosedForMaintenance;
///
/// fn closed<T>() -> Result<T, ApiError> {
///     Err(ApiError::Validation(vec![FieldError::message("maintenance")]))
/// }
///
/// impl AuthApi for ClosedForMaintenance {
///     async fn signup(&self, _: &Credentials) -> Result<String, ApiError> { closed() }
///     async fn login(&self, _: &Credentials) -> Result<String, ApiError> { closed() }
///     async fn refresh(&self) -> Result<String, ApiError> { closed() }
///     async fn logout(&self) -> Result<(), ApiError> { closed() }
///     async fn is_available(&self, _: &str) -> Result<bool, ApiError> { closed() }
///     async fn request_password_reset(&self, _: &str) -> Result<(), ApiError> { closed() }
///     async fn change_password(&self, _: &PasswordChange) -> Result<String, ApiError> { closed() }
/// }
/// ```
pub trait AuthApi: Send + Sync + 'static {
    /// Creates an account and returns its first session token.
    fn signup(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<String, ApiError>> + Send;

    /// Establishes a session and returns its token.
    fn login(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<String, ApiError>> + Send;

    /// Exchanges the current (still valid) session for a fresh token.
    fn refresh(&self) -> impl Future<Output = Result<String, ApiError>> + Send;

    /// Invalidates the session on the identity service.
    fn logout(&self) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Whether `username` is free to sign up with.
    fn is_available(
        &self,
        username: &str,
    ) -> impl Future<Output = Result<bool, ApiError>> + Send;

    /// Asks the identity service to send a reset email. Succeeds whether
    /// or not the username exists.
    fn request_password_reset(
        &self,
        username: &str,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Changes the password and returns a new session token.
    fn change_password(
        &self,
        change: &PasswordChange,
    ) -> impl Future<Output = Result<String, ApiError>> + Send;
}

impl<A: AuthApi> AuthApi for Arc<A> {
    fn signup(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<String, ApiError>> + Send {
        (**self).signup(credentials)
    }

    fn login(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<String, ApiError>> + Send {
        (**self).login(credentials)
    }

    fn refresh(&self) -> impl Future<Output = Result<String, ApiError>> + Send {
        (**self).refresh()
    }

    fn logout(&self) -> impl Future<Output = Result<(), ApiError>> + Send {
        (**self).logout()
    }

    fn is_available(
        &self,
        username: &str,
    ) -> impl Future<Output = Result<bool, ApiError>> + Send {
        (**self).is_available(username)
    }

    fn request_password_reset(
        &self,
        username: &str,
    ) -> impl Future<Output = Result<(), ApiError>> + Send {
        (**self).request_password_reset(username)
    }

    fn change_password(
        &self,
        change: &PasswordChange,
    ) -> impl Future<Output = Result<String, ApiError>> + Send {
        (**self).change_password(change)
    }
}
