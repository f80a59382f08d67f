//! Identity service boundary for Tokenkeeper.
//!
//! Tokenkeeper does not care how requests reach the identity service.
//! Everything above this crate talks to an [`AuthApi`]: a handful of
//! async calls that either return a raw session token or fail with an
//! [`ApiError`].
//!
//! # Contents
//!
//! - [`AuthApi`] — the transport trait (mocked in tests)
//! - [`Credentials`], [`PasswordChange`], [`FieldError`] — wire types
//! - [`decode_response`] — the `{"result": ...}` / `{"errors": [...]}`
//!   envelope the identity service answers with
//! - [`HttpApi`] — a `reqwest` implementation (feature `http`, default)

#![allow(async_fn_in_trait)]

mod api;
mod envelope;
mod error;
#[cfg(feature = "http")]
mod http;
mod types;

pub use api::AuthApi;
pub use envelope::{IdToken, decode_response, decode_token_response};
pub use error::ApiError;
#[cfg(feature = "http")]
pub use http::HttpApi;
pub use types::{Credentials, FieldError, PasswordChange};
