//! `reqwest` implementation of [`AuthApi`].
//!
//! The identity service keeps its own long-lived refresh cookie, so the
//! client is built with a cookie store; `refresh`, `logout` and
//! session-authorized password changes depend on it.

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

use crate::{
    ApiError, AuthApi, Credentials, PasswordChange, decode_response,
    decode_token_response,
};

/// Talks to an identity service over HTTP.
///
/// # Example
///
/// ```rust,no_run
/// use tokenkeeper_api::{AuthApi, Credentials, HttpApi};
///
/// # async fn run() -> Result<(), tokenkeeper_api::ApiError> {
/// let api = HttpApi::new("https://authn.example.com")?;
/// let token = api.login(&Credentials::new("alice", "secret")).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpApi {
    host: String,
    http: Client,
}

impl HttpApi {
    /// Creates a client for the identity service at `host`
    /// (scheme and authority, e.g. `https://authn.example.com`).
    ///
    /// # Errors
    /// Returns [`ApiError::Http`] if the HTTP client cannot be built
    /// (e.g. the TLS backend fails to initialize).
    pub fn new(host: impl Into<String>) -> Result<Self, ApiError> {
        let http = Client::builder().cookie_store(true).build()?;
        Ok(Self::with_http_client(host, http))
    }

    /// Uses a custom HTTP client (for connection pool reuse or testing).
    /// The client should have a cookie store enabled.
    pub fn with_http_client(host: impl Into<String>, http: Client) -> Self {
        let host = host.into().trim_end_matches('/').to_owned();
        Self { host, http }
    }

    /// The identity service base URL.
    pub fn host(&self) -> &str {
        &self.host
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.host)
    }

    /// Sends the request and returns the status code and raw body.
    async fn send(&self, request: RequestBuilder) -> Result<(u16, Vec<u8>), ApiError> {
        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        tracing::trace!(status, bytes = body.len(), "identity service responded");
        Ok((status, body.to_vec()))
    }

    async fn token(&self, request: RequestBuilder) -> Result<String, ApiError> {
        let (status, body) = self.send(request).await?;
        decode_token_response(status, &body)
    }

    async fn result<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let (status, body) = self.send(request).await?;
        decode_response(status, &body)
    }
}

impl AuthApi for HttpApi {
    async fn signup(&self, credentials: &Credentials) -> Result<String, ApiError> {
        self.token(self.http.post(self.url("/accounts")).form(credentials))
            .await
    }

    async fn login(&self, credentials: &Credentials) -> Result<String, ApiError> {
        self.token(self.http.post(self.url("/sessions")).form(credentials))
            .await
    }

    async fn refresh(&self) -> Result<String, ApiError> {
        self.token(self.http.get(self.url("/sessions/refresh"))).await
    }

    async fn logout(&self) -> Result<(), ApiError> {
        let (status, _) = self.send(self.http.get(self.url("/sessions/logout"))).await?;
        if (200..300).contains(&status) {
            Ok(())
        } else {
            Err(ApiError::Transport(format!("logout failed with status {status}")))
        }
    }

    async fn is_available(&self, username: &str) -> Result<bool, ApiError> {
        self.result(
            self.http
                .get(self.url("/accounts/available"))
                .query(&[("username", username)]),
        )
        .await
    }

    async fn request_password_reset(&self, username: &str) -> Result<(), ApiError> {
        // The service answers the same way for known and unknown
        // usernames; only a failed request is an error.
        self.send(
            self.http
                .get(self.url("/password/reset"))
                .query(&[("username", username)]),
        )
        .await
        .map(|_| ())
    }

    async fn change_password(&self, change: &PasswordChange) -> Result<String, ApiError> {
        self.token(self.http.post(self.url("/password")).form(change))
            .await
    }
}
