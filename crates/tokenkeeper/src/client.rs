//! The `Authn` context object.
//!
//! One `Authn` per application: it owns the identity service client, the
//! refresh scheduler (once configured) and the double-submit guard. Every
//! operation that yields a token installs it before returning, so
//! [`Authn::session`] always reflects the last successful call.

use std::path::PathBuf;
use std::sync::Arc;

use tokenkeeper_api::{AuthApi, Credentials, PasswordChange};
use tokenkeeper_refresh::{
    FailureHook, RefreshConfig, RefreshError, RefreshScheduler, RefreshState,
};
use tokenkeeper_session::Session;
use tokenkeeper_store::{CookieStore, SessionStore};
use tracing::{debug, info};

use crate::{AuthnError, Operation, RequestDeduplicator};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct AuthnConfig {
    /// Cookie jar file used by [`Authn::configure`].
    pub cookie_jar: PathBuf,
    /// When to refresh relative to the token's lifetime.
    pub refresh: RefreshConfig,
}

impl Default for AuthnConfig {
    fn default() -> Self {
        Self {
            cookie_jar: PathBuf::from("tokenkeeper.cookies"),
            refresh: RefreshConfig::default(),
        }
    }
}

/// Client-side session manager for one identity service.
///
/// Created unconfigured: availability checks and password reset requests
/// work right away, everything that touches the session fails with
/// [`AuthnError::Unconfigured`] until a store is configured.
///
/// Must be used from inside a Tokio runtime once configured, because the
/// refresh timer runs as a Tokio task.
///
/// # Example
///
/// ```rust,no_run
/// use tokenkeeper::prelude::*;
///
/// # async fn run() -> Result<(), AuthnError> {
/// let api = HttpApi::new("https://authn.example.com")?;
/// let mut authn: Authn<HttpApi> = Authn::new(api, AuthnConfig::default());
/// authn.configure("authn")?;
///
/// authn.login(&Credentials::new("alice", "secret")).await?;
/// if let Some(session) = authn.session() {
///     println!("logged in as {:?}", session.subject());
/// }
/// # Ok(())
/// # }
/// ```
pub struct Authn<A: AuthApi, S: SessionStore = CookieStore> {
    api: Arc<A>,
    config: AuthnConfig,
    scheduler: Option<RefreshScheduler<S, A>>,
    dedup: RequestDeduplicator,
    on_failure: Option<FailureHook>,
}

impl<A: AuthApi> Authn<A, CookieStore> {
    /// Persists the session as cookie `session_name` in the configured
    /// cookie jar, then loads any existing session from it.
    ///
    /// # Errors
    /// Returns [`AuthnError::Store`] if the name is not a valid cookie name
    /// or the jar cannot be read.
    pub fn configure(&mut self, session_name: &str) -> Result<(), AuthnError> {
        let store = CookieStore::new(self.config.cookie_jar.clone(), session_name)?;
        self.configure_with_store(store)
    }
}

impl<A: AuthApi, S: SessionStore> Authn<A, S> {
    pub fn new(api: A, config: AuthnConfig) -> Self {
        Self {
            api: Arc::new(api),
            config,
            scheduler: None,
            dedup: RequestDeduplicator::new(),
            on_failure: None,
        }
    }

    /// Registers a hook for background refresh failures. Takes effect on
    /// the next `configure`.
    pub fn on_refresh_failure(
        mut self,
        hook: impl Fn(&RefreshError) + Send + Sync + 'static,
    ) -> Self {
        self.on_failure = Some(Arc::new(hook));
        self
    }

    /// Uses `store` for the session, loads whatever it holds and arms the
    /// refresh timer.
    ///
    /// Configuring again replaces the previous store; its timer stops.
    ///
    /// # Errors
    /// Returns [`AuthnError::Store`] if the store cannot be read.
    pub fn configure_with_store(&mut self, store: S) -> Result<(), AuthnError> {
        let mut builder = RefreshScheduler::builder(store, Arc::clone(&self.api))
            .config(self.config.refresh.clone());
        if let Some(hook) = &self.on_failure {
            let hook = Arc::clone(hook);
            builder = builder.on_refresh_failure(move |err| hook(err));
        }
        let scheduler = builder.build();
        scheduler.maintain()?;

        debug!(state = ?scheduler.state(), "session store configured");
        self.scheduler = Some(scheduler);
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.scheduler.is_some()
    }

    /// Creates an account and installs its first session.
    ///
    /// # Errors
    /// - [`AuthnError::Unconfigured`] — no store yet; nothing is sent
    /// - [`AuthnError::Duplicate`] — a signup is already in flight
    /// - [`AuthnError::Api`] — rejected by the identity service
    /// - [`AuthnError::Refresh`] — the returned token could not be installed
    pub async fn signup(&self, credentials: &Credentials) -> Result<String, AuthnError> {
        let scheduler = self.scheduler()?;
        self.dedup
            .guard(Operation::Signup, || async {
                let raw = self.api.signup(credentials).await?;
                scheduler.update_and_maintain(&raw)?;
                info!(username = %credentials.username, "signed up");
                Ok::<_, AuthnError>(raw)
            })
            .await
    }

    /// Logs in and installs the session. Errors as for [`Authn::signup`].
    pub async fn login(&self, credentials: &Credentials) -> Result<String, AuthnError> {
        let scheduler = self.scheduler()?;
        self.dedup
            .guard(Operation::Login, || async {
                let raw = self.api.login(credentials).await?;
                scheduler.update_and_maintain(&raw)?;
                info!(username = %credentials.username, "logged in");
                Ok::<_, AuthnError>(raw)
            })
            .await
    }

    /// Refreshes the session now, without waiting for the timer.
    pub async fn refresh(&self) -> Result<String, AuthnError> {
        let session = self.scheduler()?.refresh_now().await?;
        Ok(session.token().to_owned())
    }

    /// Logs out on the identity service, then forgets the local session.
    ///
    /// If the service call fails the local session is kept.
    pub async fn logout(&self) -> Result<(), AuthnError> {
        let scheduler = self.scheduler()?;
        self.api.logout().await?;
        scheduler.end_session()?;
        Ok(())
    }

    /// Changes the password and installs the session token that comes
    /// back. `change` carries either a reset token or relies on the
    /// current session.
    pub async fn change_password(&self, change: &PasswordChange) -> Result<String, AuthnError> {
        let scheduler = self.scheduler()?;
        let raw = self.api.change_password(change).await?;
        scheduler.update_and_maintain(&raw)?;
        info!("password changed");
        Ok(raw)
    }

    /// Whether `username` is free. Needs no configuration.
    pub async fn is_available(&self, username: &str) -> Result<bool, AuthnError> {
        Ok(self.api.is_available(username).await?)
    }

    /// Asks for a reset email. Needs no configuration.
    pub async fn request_password_reset(&self, username: &str) -> Result<(), AuthnError> {
        self.api.request_password_reset(username).await?;
        Ok(())
    }

    /// The current session, `None` when logged out or unconfigured.
    pub fn session(&self) -> Option<Session> {
        self.scheduler.as_ref().and_then(RefreshScheduler::session)
    }

    pub fn refresh_state(&self) -> RefreshState {
        self.scheduler
            .as_ref()
            .map_or(RefreshState::Unconfigured, RefreshScheduler::state)
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn config(&self) -> &AuthnConfig {
        &self.config
    }

    fn scheduler(&self) -> Result<&RefreshScheduler<S, A>, AuthnError> {
        self.scheduler.as_ref().ok_or(AuthnError::Unconfigured)
    }
}
