//! Integration tests for the `Authn` context object.
//!
//! The identity service is an in-memory mock; sessions live in a
//! `MemoryStore` (shared through an `Arc` so tests can inspect it) or in a
//! cookie jar inside a `tempfile::TempDir`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;
use tempfile::TempDir;
use tokenkeeper::prelude::*;
use tokenkeeper::refresh::{Clock, SystemClock};
use tokio::sync::Notify;

// =========================================================================
// Helpers
// =========================================================================

/// A one-hour token issued `age` seconds ago, encoded the way browser
/// `btoa` does it (standard alphabet, padded).
fn id_token(sub: u64, age: i64) -> String {
    let iat = SystemClock.now() - age;
    let payload = json!({ "sub": sub, "iat": iat, "exp": iat + 3600 });
    format!(
        "{}.{}.{}",
        STANDARD.encode(b"{}"),
        STANDARD.encode(payload.to_string()),
        STANDARD.encode(b"BEEF"),
    )
}

#[derive(Default)]
struct MockApi {
    signups: AtomicUsize,
    logins: AtomicUsize,
    refreshes: AtomicUsize,
    logouts: AtomicUsize,
    password_changes: AtomicUsize,
    /// Rejects signup, login and password changes with these errors.
    reject: Mutex<Option<Vec<FieldError>>>,
    /// Holds signup and login until notified.
    gate: Mutex<Option<Arc<Notify>>>,
    fail_refresh: AtomicBool,
    fail_logout: AtomicBool,
    last_reset_token: Mutex<Option<String>>,
}

impl MockApi {
    fn reject_with(&self, errors: Vec<FieldError>) {
        *self.reject.lock().unwrap() = Some(errors);
    }

    fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    fn release_hold(&self) {
        *self.gate.lock().unwrap() = None;
    }

    fn rejection(&self) -> Result<(), ApiError> {
        match self.reject.lock().unwrap().clone() {
            Some(errors) => Err(ApiError::Validation(errors)),
            None => Ok(()),
        }
    }

    async fn wait_for_gate(&self) {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }

    fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn total_calls(&self) -> usize {
        [
            &self.signups,
            &self.logins,
            &self.refreshes,
            &self.logouts,
            &self.password_changes,
        ]
        .into_iter()
        .map(Self::count)
        .sum()
    }
}

impl AuthApi for MockApi {
    async fn signup(&self, _: &Credentials) -> Result<String, ApiError> {
        let n = self.signups.fetch_add(1, Ordering::SeqCst) + 1;
        self.wait_for_gate().await;
        self.rejection()?;
        Ok(id_token(n as u64, 0))
    }

    async fn login(&self, _: &Credentials) -> Result<String, ApiError> {
        let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
        self.wait_for_gate().await;
        self.rejection()?;
        Ok(id_token(100 + n as u64, 0))
    }

    async fn refresh(&self) -> Result<String, ApiError> {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(ApiError::Transport("503 Service Unavailable".into()));
        }
        Ok(id_token(200 + n as u64, 0))
    }

    async fn logout(&self) -> Result<(), ApiError> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        if self.fail_logout.load(Ordering::SeqCst) {
            return Err(ApiError::Transport("logout failed with status 500".into()));
        }
        Ok(())
    }

    async fn is_available(&self, username: &str) -> Result<bool, ApiError> {
        Ok(username != "taken")
    }

    async fn request_password_reset(&self, _: &str) -> Result<(), ApiError> {
        Ok(())
    }

    async fn change_password(&self, change: &PasswordChange) -> Result<String, ApiError> {
        let n = self.password_changes.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_reset_token.lock().unwrap() = change.token.clone();
        self.rejection()?;
        Ok(id_token(300 + n as u64, 0))
    }
}

fn config() -> AuthnConfig {
    AuthnConfig {
        refresh: RefreshConfig::without_jitter(),
        ..AuthnConfig::default()
    }
}

/// An `Authn` over a shared `MemoryStore`, already configured.
fn memory_authn(store: &Arc<MemoryStore>) -> Authn<MockApi, Arc<MemoryStore>> {
    let mut authn = Authn::new(MockApi::default(), config());
    authn.configure_with_store(Arc::clone(store)).unwrap();
    authn
}

fn credentials() -> Credentials {
    Credentials::new("alice", "secret")
}

/// The jar file inside `dir`; `TempDir` removes it on drop.
fn jar_path(dir: &TempDir) -> PathBuf {
    dir.path().join("authn.example.com.cookies")
}

fn read_jar(jar: &Path) -> String {
    fs::read_to_string(jar).unwrap_or_default()
}

// =========================================================================
// Signup
// =========================================================================

#[tokio::test]
async fn test_signup_installs_returned_session() {
    let store = Arc::new(MemoryStore::new());
    let authn = memory_authn(&store);

    let token = authn.signup(&credentials()).await.unwrap();

    assert_eq!(token.split('.').count(), 3);
    let session = authn.session().expect("session installed");
    assert_eq!(session.token(), token);
    assert_eq!(session.subject(), Some(&Subject::Id(1)));
    assert_eq!(store.persisted().as_deref(), Some(token.as_str()));
    assert!(matches!(authn.refresh_state(), RefreshState::Scheduled { .. }));
}

#[tokio::test]
async fn test_signup_saves_token_as_cookie() {
    let dir = TempDir::new().unwrap();
    let jar = jar_path(&dir);
    let config = AuthnConfig {
        cookie_jar: jar.clone(),
        ..config()
    };
    let mut authn: Authn<MockApi> = Authn::new(MockApi::default(), config);
    authn.configure("authn").unwrap();

    let token = authn.signup(&credentials()).await.unwrap();

    assert_eq!(authn.config().cookie_jar, jar);
    assert!(read_jar(&jar).contains(&format!("authn={token}")));
}

#[tokio::test]
async fn test_signup_rejected_passes_errors_through() {
    let store = Arc::new(MemoryStore::new());
    let authn = memory_authn(&store);
    authn.api().reject_with(vec![FieldError::new("foo", "bar")]);

    let err = authn.signup(&credentials()).await.unwrap_err();

    assert!(matches!(err, AuthnError::Api(ApiError::Validation(_))));
    assert_eq!(err.field_errors(), vec![FieldError::new("foo", "bar")]);
    assert!(authn.session().is_none());
    assert!(store.persisted().is_none());
}

#[tokio::test]
async fn test_signup_double_submit_sends_one_request() {
    let store = Arc::new(MemoryStore::new());
    let authn = memory_authn(&store);
    let gate = authn.api().hold();

    let creds = credentials();
    let first = authn.signup(&creds);
    let second = async {
        tokio::task::yield_now().await;
        let result = authn.signup(&credentials()).await;
        gate.notify_one();
        result
    };
    let (first, second) = tokio::join!(first, second);

    assert!(first.is_ok());
    let err = second.unwrap_err();
    assert!(matches!(
        err,
        AuthnError::Duplicate(DuplicateRequest(Operation::Signup))
    ));
    assert_eq!(err.field_errors(), vec![FieldError::message("duplicate")]);
    assert_eq!(MockApi::count(&authn.api().signups), 1);
}

#[tokio::test]
async fn test_signup_after_settle_is_sent_again() {
    let store = Arc::new(MemoryStore::new());
    let authn = memory_authn(&store);
    let gate = authn.api().hold();

    let creds = credentials();
    let first = authn.signup(&creds);
    let release = async {
        tokio::task::yield_now().await;
        gate.notify_one();
    };
    let (first, ()) = tokio::join!(first, release);
    authn.api().release_hold();

    let third = authn.signup(&credentials()).await.unwrap();

    assert!(first.is_ok());
    assert_eq!(MockApi::count(&authn.api().signups), 2);
    assert_eq!(authn.session().unwrap().token(), third);
}

#[tokio::test]
async fn test_signup_and_login_are_deduplicated_separately() {
    let store = Arc::new(MemoryStore::new());
    let authn = memory_authn(&store);
    let gate = authn.api().hold();

    let signup_creds = credentials();
    let login_creds = credentials();
    let signup = authn.signup(&signup_creds);
    let login = authn.login(&login_creds);
    let release = async {
        tokio::task::yield_now().await;
        gate.notify_waiters();
    };
    let (signup, login, ()) = tokio::join!(signup, login, release);

    assert!(signup.is_ok());
    assert!(login.is_ok());
    assert_eq!(MockApi::count(&authn.api().signups), 1);
    assert_eq!(MockApi::count(&authn.api().logins), 1);
}

// =========================================================================
// Availability and password reset
// =========================================================================

#[tokio::test]
async fn test_is_available_without_configure() {
    let authn: Authn<MockApi, MemoryStore> = Authn::new(MockApi::default(), config());

    assert!(authn.is_available("unique-name").await.unwrap());
    assert!(!authn.is_available("taken").await.unwrap());
}

#[tokio::test]
async fn test_request_password_reset_without_configure() {
    let authn: Authn<MockApi, MemoryStore> = Authn::new(MockApi::default(), config());

    authn.request_password_reset("anyone").await.unwrap();
}

// =========================================================================
// Configure
// =========================================================================

#[tokio::test]
async fn test_session_operations_require_configure() {
    let authn: Authn<MockApi, MemoryStore> = Authn::new(MockApi::default(), config());

    assert!(matches!(
        authn.signup(&credentials()).await,
        Err(AuthnError::Unconfigured)
    ));
    assert!(matches!(
        authn.login(&credentials()).await,
        Err(AuthnError::Unconfigured)
    ));
    assert!(matches!(authn.refresh().await, Err(AuthnError::Unconfigured)));
    assert!(matches!(authn.logout().await, Err(AuthnError::Unconfigured)));
    assert!(matches!(
        authn.change_password(&PasswordChange::new("new")).await,
        Err(AuthnError::Unconfigured)
    ));

    assert_eq!(authn.api().total_calls(), 0);
    assert!(!authn.is_configured());
    assert!(authn.session().is_none());
    assert_eq!(authn.refresh_state(), RefreshState::Unconfigured);
}

#[tokio::test]
async fn test_configure_with_empty_store_has_no_session() {
    let store = Arc::new(MemoryStore::new());
    let authn = memory_authn(&store);

    assert!(authn.is_configured());
    assert!(authn.session().is_none());
    assert_eq!(authn.refresh_state(), RefreshState::NoSession);
}

#[tokio::test]
async fn test_configure_loads_existing_session() {
    let token = id_token(7, 0);
    let store = Arc::new(MemoryStore::with_token(token.clone()));
    let authn = memory_authn(&store);

    assert_eq!(authn.session().unwrap().token(), token);
    assert_eq!(MockApi::count(&authn.api().refreshes), 0);
}

#[tokio::test]
async fn test_configure_loads_session_from_cookie_jar() {
    let dir = TempDir::new().unwrap();
    let jar = jar_path(&dir);
    let token = id_token(7, 0);
    fs::write(&jar, format!("hello=world\nauthn={token}\n")).unwrap();
    let config = AuthnConfig {
        cookie_jar: jar.clone(),
        ..config()
    };
    let mut authn: Authn<MockApi> = Authn::new(MockApi::default(), config);

    authn.configure("authn").unwrap();

    assert_eq!(authn.session().unwrap().token(), token);
}

#[tokio::test]
async fn test_configure_rejects_invalid_cookie_name() {
    let dir = TempDir::new().unwrap();
    let jar = jar_path(&dir);
    let config = AuthnConfig {
        cookie_jar: jar.clone(),
        ..config()
    };
    let mut authn: Authn<MockApi> = Authn::new(MockApi::default(), config);

    let err = authn.configure("not valid").unwrap_err();

    assert!(matches!(err, AuthnError::Store(StoreError::InvalidName(_))));
    assert!(!authn.is_configured());
}

#[tokio::test(start_paused = true)]
async fn test_configure_refreshes_aging_session() {
    let aged = id_token(7, 3000);
    let store = Arc::new(MemoryStore::with_token(aged.clone()));
    let authn = memory_authn(&store);

    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(MockApi::count(&authn.api().refreshes), 1);
    let session = authn.session().unwrap();
    assert_ne!(session.token(), aged);
    assert_eq!(session.subject(), Some(&Subject::Id(201)));
}

#[tokio::test(start_paused = true)]
async fn test_background_refresh_failure_reaches_hook() {
    let failures = Arc::new(AtomicUsize::new(0));
    let aged = id_token(7, 3000);
    let store = Arc::new(MemoryStore::with_token(aged.clone()));
    let api = MockApi::default();
    api.fail_refresh.store(true, Ordering::SeqCst);
    let mut authn = Authn::new(api, config()).on_refresh_failure({
        let failures = Arc::clone(&failures);
        move |_| {
            failures.fetch_add(1, Ordering::SeqCst);
        }
    });
    authn.configure_with_store(Arc::clone(&store)).unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(failures.load(Ordering::SeqCst), 1);
    assert_eq!(authn.refresh_state(), RefreshState::Failed);
    assert_eq!(authn.session().unwrap().token(), aged);
}

// =========================================================================
// Login, refresh, password change
// =========================================================================

#[tokio::test]
async fn test_login_installs_session() {
    let store = Arc::new(MemoryStore::new());
    let authn = memory_authn(&store);

    let token = authn.login(&credentials()).await.unwrap();

    assert_eq!(authn.session().unwrap().subject(), Some(&Subject::Id(101)));
    assert_eq!(store.persisted().as_deref(), Some(token.as_str()));
}

#[tokio::test]
async fn test_login_rejected_keeps_previous_session() {
    let previous = id_token(7, 0);
    let store = Arc::new(MemoryStore::with_token(previous.clone()));
    let authn = memory_authn(&store);
    authn
        .api()
        .reject_with(vec![FieldError::new("credentials", "FAILED")]);

    let err = authn.login(&credentials()).await.unwrap_err();

    assert_eq!(err.field_errors(), vec![FieldError::new("credentials", "FAILED")]);
    assert_eq!(authn.session().unwrap().token(), previous);
}

#[tokio::test]
async fn test_refresh_installs_new_token() {
    let store = Arc::new(MemoryStore::with_token(id_token(7, 0)));
    let authn = memory_authn(&store);

    let token = authn.refresh().await.unwrap();

    assert_eq!(authn.session().unwrap().token(), token);
    assert_eq!(store.persisted().as_deref(), Some(token.as_str()));
}

#[tokio::test]
async fn test_change_password_with_reset_token_installs_session() {
    let store = Arc::new(MemoryStore::new());
    let authn = memory_authn(&store);

    let token = authn
        .change_password(&PasswordChange::with_token("0a0b0c0d", "reset.token.sig"))
        .await
        .unwrap();

    assert_eq!(authn.session().unwrap().token(), token);
    assert_eq!(
        authn.api().last_reset_token.lock().unwrap().as_deref(),
        Some("reset.token.sig")
    );
}

#[tokio::test]
async fn test_change_password_with_session_sends_no_token() {
    let store = Arc::new(MemoryStore::with_token(id_token(7, 0)));
    let authn = memory_authn(&store);

    let token = authn
        .change_password(&PasswordChange::new("0a0b0c0d"))
        .await
        .unwrap();

    assert_eq!(authn.session().unwrap().subject(), Some(&Subject::Id(301)));
    assert_eq!(store.persisted().as_deref(), Some(token.as_str()));
    assert!(authn.api().last_reset_token.lock().unwrap().is_none());
}

#[tokio::test]
async fn test_change_password_rejected_passes_errors_through() {
    let store = Arc::new(MemoryStore::new());
    let authn = memory_authn(&store);
    authn
        .api()
        .reject_with(vec![FieldError::new("password", "INSECURE")]);

    let err = authn
        .change_password(&PasswordChange::with_token("123", "reset.token.sig"))
        .await
        .unwrap_err();

    assert_eq!(err.field_errors(), vec![FieldError::new("password", "INSECURE")]);
    assert!(authn.session().is_none());
}

// =========================================================================
// Logout
// =========================================================================

#[tokio::test]
async fn test_logout_clears_session() {
    let store = Arc::new(MemoryStore::new());
    let authn = memory_authn(&store);
    authn.login(&credentials()).await.unwrap();

    authn.logout().await.unwrap();

    assert!(authn.session().is_none());
    assert!(store.persisted().is_none());
    assert_eq!(authn.refresh_state(), RefreshState::NoSession);
    assert_eq!(MockApi::count(&authn.api().logouts), 1);
}

#[tokio::test]
async fn test_logout_removes_only_session_cookie() {
    let dir = TempDir::new().unwrap();
    let jar = jar_path(&dir);
    fs::write(&jar, "hello=world\nfoo=bar\n").unwrap();
    let config = AuthnConfig {
        cookie_jar: jar.clone(),
        ..config()
    };
    let mut authn: Authn<MockApi> = Authn::new(MockApi::default(), config);
    authn.configure("authn").unwrap();
    authn.login(&credentials()).await.unwrap();

    authn.logout().await.unwrap();

    let contents = read_jar(&jar);
    assert!(!contents.contains("authn="));
    assert!(contents.contains("hello=world"));
    assert!(contents.contains("foo=bar"));
}

#[tokio::test]
async fn test_logout_failure_keeps_session() {
    let store = Arc::new(MemoryStore::new());
    let authn = memory_authn(&store);
    let token = authn.login(&credentials()).await.unwrap();
    authn.api().fail_logout.store(true, Ordering::SeqCst);

    let err = authn.logout().await.unwrap_err();

    assert!(matches!(err, AuthnError::Api(ApiError::Transport(_))));
    assert_eq!(authn.session().unwrap().token(), token);
    assert_eq!(store.persisted().as_deref(), Some(token.as_str()));
}
