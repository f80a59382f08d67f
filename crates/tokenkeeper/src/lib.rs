//! # Tokenkeeper
//!
//! Client-side session lifecycle manager for token-based identity
//! services.
//!
//! Tokenkeeper keeps one session per application: it installs the token
//! returned by signup, login or a password change, persists it in a
//! [`SessionStore`](tokenkeeper_store::SessionStore), and refreshes it
//! in the background before it expires. Double submits of signup and login
//! are rejected locally instead of reaching the identity service twice.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tokenkeeper::prelude::*;
//!
//! # async fn run() -> Result<(), AuthnError> {
//! let api = HttpApi::new("https://authn.example.com")?;
//! let mut authn: Authn<HttpApi> = Authn::new(api, AuthnConfig::default());
//! authn.configure("authn")?;
//!
//! let token = authn.signup(&Credentials::new("alice", "secret")).await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod dedup;
mod error;

pub use client::{Authn, AuthnConfig};
pub use dedup::{DuplicateRequest, Operation, RequestDeduplicator};
pub use error::AuthnError;

pub use tokenkeeper_api as api;
pub use tokenkeeper_refresh as refresh;
pub use tokenkeeper_session as session;
pub use tokenkeeper_store as store;

/// Everything an application needs to drive a session.
pub mod prelude {
    pub use crate::{Authn, AuthnConfig, AuthnError, DuplicateRequest, Operation};
    #[cfg(feature = "http")]
    pub use tokenkeeper_api::HttpApi;
    pub use tokenkeeper_api::{ApiError, AuthApi, Credentials, FieldError, PasswordChange};
    pub use tokenkeeper_refresh::{RefreshConfig, RefreshError, RefreshState};
    pub use tokenkeeper_session::{Claims, DecodeError, Session, Subject};
    pub use tokenkeeper_store::{CookieStore, MemoryStore, SessionStore, StoreError};
}
