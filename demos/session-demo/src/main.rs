//! Walks one session through its whole lifecycle.
//!
//! With no arguments the demo runs against an in-process identity service
//! that issues four-second tokens, so the background refresh is visible
//! within a few seconds. Pass a base URL to talk to a real service:
//!
//! ```text
//! RUST_LOG=tokenkeeper=debug cargo run -p session-demo
//! cargo run -p session-demo -- https://authn.example.com
//! ```

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::json;
use tokenkeeper::prelude::*;
use tokenkeeper::refresh::{Clock, SystemClock};
use tracing::{info, warn};

const TOKEN_LIFETIME_SECS: i64 = 4;
const ROUND_TRIP: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// In-process identity service
// ---------------------------------------------------------------------------

/// Keeps accounts in memory and signs nothing; good enough to drive a
/// client that never verifies signatures.
#[derive(Default)]
struct LocalIdentity {
    accounts: Mutex<HashMap<String, (u64, String)>>,
    next_id: AtomicU64,
    /// Account id behind the refresh cookie, if any.
    current: Mutex<Option<u64>>,
}

impl LocalIdentity {
    fn issue(&self, account_id: u64) -> String {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(account_id);
        let iat = SystemClock.now();
        let claims = json!({
            "iss": "https://authn.local",
            "sub": account_id,
            "iat": iat,
            "exp": iat + TOKEN_LIFETIME_SECS,
        });
        format!(
            "{}.{}.{}",
            URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#),
            URL_SAFE_NO_PAD.encode(claims.to_string()),
            URL_SAFE_NO_PAD.encode(b"unsigned"),
        )
    }

    fn current(&self) -> Option<u64> {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn rejected<T>(field: &str, message: &str) -> Result<T, ApiError> {
    Err(ApiError::Validation(vec![FieldError::new(field, message)]))
}

impl AuthApi for LocalIdentity {
    async fn signup(&self, credentials: &Credentials) -> Result<String, ApiError> {
        tokio::time::sleep(ROUND_TRIP).await;
        if credentials.password.len() < 8 {
            return rejected("password", "INSECURE");
        }
        let id = {
            let mut accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
            if accounts.contains_key(&credentials.username) {
                return rejected("username", "TAKEN");
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            accounts.insert(
                credentials.username.clone(),
                (id, credentials.password.clone()),
            );
            id
        };
        Ok(self.issue(id))
    }

    async fn login(&self, credentials: &Credentials) -> Result<String, ApiError> {
        tokio::time::sleep(ROUND_TRIP).await;
        let account = self
            .accounts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&credentials.username)
            .filter(|(_, password)| *password == credentials.password)
            .map(|(id, _)| *id);
        match account {
            Some(id) => Ok(self.issue(id)),
            None => rejected("credentials", "FAILED"),
        }
    }

    async fn refresh(&self) -> Result<String, ApiError> {
        match self.current() {
            Some(id) => Ok(self.issue(id)),
            None => Err(ApiError::Transport("unexpected status 401".into())),
        }
    }

    async fn logout(&self) -> Result<(), ApiError> {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }

    async fn is_available(&self, username: &str) -> Result<bool, ApiError> {
        Ok(!self
            .accounts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(username))
    }

    async fn request_password_reset(&self, _: &str) -> Result<(), ApiError> {
        Ok(())
    }

    async fn change_password(&self, change: &PasswordChange) -> Result<String, ApiError> {
        let Some(id) = self.current() else {
            return rejected("token", "INVALID_OR_EXPIRED");
        };
        let mut accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = accounts.values_mut().find(|(account, _)| *account == id) {
            entry.1 = change.password.clone();
        }
        drop(accounts);
        Ok(self.issue(id))
    }
}

// ---------------------------------------------------------------------------
// Walkthrough
// ---------------------------------------------------------------------------

fn describe(session: Option<Session>) -> String {
    match session {
        Some(session) => {
            let remaining = session.seconds_remaining(SystemClock.now());
            match session.subject() {
                Some(subject) => format!("account {subject}, {remaining}s left"),
                None => format!("anonymous, {remaining}s left"),
            }
        }
        None => "no session".to_owned(),
    }
}

async fn walkthrough<A: AuthApi>(api: A) -> Result<(), AuthnError> {
    let mut authn = Authn::new(api, AuthnConfig::default()).on_refresh_failure(|err| {
        warn!(error = %err, "background refresh failed");
    });
    authn.configure_with_store(MemoryStore::new())?;

    let username = "demo@example.com";
    let password = "correct horse battery";

    if authn.is_available(username).await? {
        authn.signup(&Credentials::new(username, password)).await?;
        info!(session = %describe(authn.session()), "signed up");
    } else {
        authn.login(&Credentials::new(username, password)).await?;
        info!(session = %describe(authn.session()), "logged in");
    }

    // A double submit is rejected locally.
    let credentials = Credentials::new(username, password);
    let (first, second) = tokio::join!(authn.login(&credentials), authn.login(&credentials));
    for result in [first, second] {
        match result {
            Ok(_) => info!("login accepted"),
            Err(err) => info!(errors = ?err.field_errors(), "login rejected"),
        }
    }

    // Half-way through the token's life the scheduler refreshes it.
    for _ in 0..3 {
        tokio::time::sleep(Duration::from_secs(2)).await;
        info!(state = ?authn.refresh_state(), session = %describe(authn.session()), "tick");
    }

    match authn.change_password(&PasswordChange::new("tr0ub4dor&3")).await {
        Ok(_) => info!(session = %describe(authn.session()), "password changed"),
        Err(err) => info!(errors = ?err.field_errors(), "password change rejected"),
    }

    authn.logout().await?;
    info!(session = %describe(authn.session()), "logged out");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match std::env::args().nth(1) {
        Some(host) => {
            info!(%host, "using remote identity service");
            walkthrough(HttpApi::new(host)?).await?;
        }
        None => {
            info!("using in-process identity service");
            walkthrough(LocalIdentity::default()).await?;
        }
    }
    Ok(())
}
