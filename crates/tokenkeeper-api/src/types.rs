//! Request and error types exchanged with the identity service.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Username and password for signup and login.
///
/// `Debug` redacts the password so credentials can sit in traced spans.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// PasswordChange
// ---------------------------------------------------------------------------

/// A password change request.
///
/// With `token` set (a reset token from a password-reset email) the
/// change works without a session. Without it the identity service
/// authorizes the change from its own session cookie.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct PasswordChange {
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl PasswordChange {
    /// A change authorized by the current session.
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
            token: None,
        }
    }

    /// A change authorized by a reset token.
    pub fn with_token(password: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            password: password.into(),
            token: Some(token.into()),
        }
    }
}

impl fmt::Debug for PasswordChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordChange")
            .field("password", &"<redacted>")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// FieldError
// ---------------------------------------------------------------------------

/// One structured error from the identity service, e.g.
/// `{"field": "username", "message": "TAKEN"}`.
///
/// `field` is absent for errors that are not about a specific input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

impl FieldError {
    /// An error attached to a specific field.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            message: message.into(),
        }
    }

    /// An error not attached to any field.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{field}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}
