//! Proactive session refresh for Tokenkeeper.
//!
//! The [`RefreshScheduler`] keeps the persisted session fresh: every time a
//! session is installed it plans a single refresh at the token's half-life
//! (configurable), well before `exp`, and arms one cancellable timer task
//! for it. When the timer fires, the scheduler calls the identity service's
//! refresh endpoint and installs the new token, which arms the next timer.
//!
//! ```text
//!   maintain() / update_and_maintain()
//!        │
//!        ▼
//!   plan_refresh(now, claims) ──Expired──→ [Expired]   (nothing armed)
//!        │
//!        └─RefreshIn(d)──→ [Scheduled] ──(timer)──→ [Refreshing]
//!                              ▲                       │      │
//!                              └──────(success)────────┘      └─(failure)─→ [Failed]
//! ```
//!
//! At most one timer is ever armed: every (re)arm aborts the previous
//! timer task first. Planning is a pure function of `(now, claims)`
//! ([`plan_refresh`]) so it can be tested without waiting.

mod error;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;
use tokenkeeper_api::AuthApi;
use tokenkeeper_session::{Claims, Session};
use tokenkeeper_store::{SessionStore, StoreError};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use error::RefreshError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Refresh timing policy.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Fraction of the token's validity window (`exp - iat`) after which
    /// it is refreshed. Default: 0.5 (the half-life).
    pub refresh_fraction: f64,
    /// Upper bound of the random amount taken off each delay, to spread
    /// out many clients that logged in together. Jitter only ever makes
    /// a refresh earlier. Default: 2 s.
    pub max_jitter: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            refresh_fraction: 0.5,
            max_jitter: Duration::from_secs(2),
        }
    }
}

impl RefreshConfig {
    /// Largest allowed `refresh_fraction`. Keeps a margin before `exp` for
    /// clock skew and network latency.
    pub const MAX_REFRESH_FRACTION: f64 = 0.9;

    /// A config without jitter. Delays are exactly what [`plan_refresh`]
    /// returns.
    pub fn without_jitter() -> Self {
        Self {
            max_jitter: Duration::ZERO,
            ..Default::default()
        }
    }

    /// Clamp any out-of-range values so the config is safe to use.
    ///
    /// Called automatically when building a [`RefreshScheduler`].
    /// `refresh_fraction` is clamped to `0.0..=MAX_REFRESH_FRACTION`; NaN
    /// falls back to the default.
    pub fn validated(mut self) -> Self {
        if self.refresh_fraction.is_nan() {
            warn!("refresh_fraction is NaN, using default");
            self.refresh_fraction = Self::default().refresh_fraction;
        }
        let clamped = self
            .refresh_fraction
            .clamp(0.0, Self::MAX_REFRESH_FRACTION);
        if clamped != self.refresh_fraction {
            warn!(
                fraction = self.refresh_fraction,
                clamped, "refresh_fraction out of range, clamping"
            );
            self.refresh_fraction = clamped;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Source of "now" in unix seconds, compared against token claims.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> i64;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs() as i64)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self(AtomicI64::new(now))
    }

    pub fn set(&self, now: i64) {
        self.0.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.0.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

impl<C: Clock> Clock for Arc<C> {
    fn now(&self) -> i64 {
        (**self).now()
    }
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// What to do about a session at a given moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPlan {
    /// `exp` is missing or not in the future. Nothing should be armed.
    Expired,
    /// Refresh after this delay. Always shorter than the time left
    /// until `exp`.
    RefreshIn(Duration),
}

/// Longest delay [`plan_refresh`] ever returns. Tokens valid for longer
/// are refreshed early rather than armed past what a timer can hold.
pub const MAX_REFRESH_DELAY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Plans the next refresh for `claims` at `now` (unix seconds).
///
/// The refresh point is `start + (exp - start) * refresh_fraction`, where
/// `start` is `iat` (or `now` when `iat` is missing or not before `exp`).
/// A refresh point in the past means "refresh right away".
///
/// Claims come from untrusted storage, so any `i64` is accepted: the
/// arithmetic saturates and the delay is capped at [`MAX_REFRESH_DELAY`].
pub fn plan_refresh(now: i64, claims: &Claims, config: &RefreshConfig) -> RefreshPlan {
    let Some(exp) = claims.expires_at else {
        return RefreshPlan::Expired;
    };
    if exp <= now {
        return RefreshPlan::Expired;
    }

    let start = claims.issued_at.filter(|iat| *iat < exp).unwrap_or(now);
    let window = exp.saturating_sub(start) as f64;
    let refresh_at = start as f64 + window * config.refresh_fraction;
    let delay_ms = ((refresh_at - now as f64) * 1000.0).max(0.0);

    // Never later than one millisecond before expiry.
    let remaining_ms = exp.saturating_sub(now) as f64 * 1000.0;
    let delay_ms = delay_ms
        .min(remaining_ms - 1.0)
        .min(MAX_REFRESH_DELAY.as_millis() as f64);

    RefreshPlan::RefreshIn(Duration::from_millis(delay_ms as u64))
}

/// Takes a random amount in `0..=max_jitter` off `delay`, never going
/// below zero.
fn apply_jitter(delay: Duration, max_jitter: Duration) -> Duration {
    let bound = max_jitter.min(delay).as_millis() as u64;
    if bound == 0 {
        return delay;
    }
    let jitter = rand::rng().random_range(0..=bound);
    delay.saturating_sub(Duration::from_millis(jitter))
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Where the scheduler is in the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    /// Built, but [`RefreshScheduler::maintain`] has not run yet.
    Unconfigured,
    /// No session is installed.
    NoSession,
    /// A session is installed and a refresh timer is armed.
    Scheduled {
        /// When the timer fires (Tokio instant).
        at: Instant,
    },
    /// The timer fired and the refresh call is in flight.
    Refreshing,
    /// The last background refresh failed. The session is kept as-is and
    /// nothing is armed until the next install or explicit refresh.
    Failed,
    /// The installed session is already past `exp`. It stays in the store
    /// and nothing is armed.
    Expired,
}

/// Called with every background refresh failure.
pub type FailureHook = Arc<dyn Fn(&RefreshError) + Send + Sync>;

struct Timer {
    state: RefreshState,
    handle: Option<AbortHandle>,
    /// Incremented on every arm; a firing task only acts if it is still
    /// the armed one.
    armed: u64,
}

impl Timer {
    fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Builder for a [`RefreshScheduler`].
pub struct RefreshSchedulerBuilder<S: SessionStore, A: AuthApi> {
    store: S,
    api: Arc<A>,
    config: RefreshConfig,
    clock: Arc<dyn Clock>,
    on_failure: Option<FailureHook>,
}

impl<S: SessionStore, A: AuthApi> RefreshSchedulerBuilder<S, A> {
    /// Overrides the refresh policy.
    pub fn config(mut self, config: RefreshConfig) -> Self {
        self.config = config;
        self
    }

    /// Overrides the clock used to compare against claims.
    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Registers a hook for background refresh failures.
    pub fn on_refresh_failure(
        mut self,
        hook: impl Fn(&RefreshError) + Send + Sync + 'static,
    ) -> Self {
        self.on_failure = Some(Arc::new(hook));
        self
    }

    /// Builds the scheduler. Nothing is loaded or armed until
    /// [`RefreshScheduler::maintain`] runs.
    pub fn build(self) -> RefreshScheduler<S, A> {
        let config = self.config.validated();
        debug!(
            fraction = config.refresh_fraction,
            max_jitter_ms = config.max_jitter.as_millis() as u64,
            "refresh scheduler created"
        );

        RefreshScheduler {
            inner: Arc::new(Inner {
                store: self.store,
                api: self.api,
                clock: self.clock,
                config,
                on_failure: self.on_failure,
                timer: Mutex::new(Timer {
                    state: RefreshState::Unconfigured,
                    handle: None,
                    armed: 0,
                }),
            }),
        }
    }
}

/// Keeps one session fresh by refreshing it before it expires.
///
/// Owns the [`SessionStore`] and shares the [`AuthApi`] with the client
/// that built it. Cheap to clone; clones drive the same timer.
///
/// Arming spawns a Tokio task, so the scheduler must be used from inside
/// a Tokio runtime.
pub struct RefreshScheduler<S: SessionStore, A: AuthApi> {
    inner: Arc<Inner<S, A>>,
}

impl<S: SessionStore, A: AuthApi> Clone for RefreshScheduler<S, A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<S: SessionStore, A: AuthApi> {
    store: S,
    api: Arc<A>,
    clock: Arc<dyn Clock>,
    config: RefreshConfig,
    on_failure: Option<FailureHook>,
    timer: Mutex<Timer>,
}

impl<S: SessionStore, A: AuthApi> RefreshScheduler<S, A> {
    /// Starts building a scheduler over `store`, refreshing through `api`.
    pub fn builder(store: S, api: Arc<A>) -> RefreshSchedulerBuilder<S, A> {
        RefreshSchedulerBuilder {
            store,
            api,
            config: RefreshConfig::default(),
            clock: Arc::new(SystemClock),
            on_failure: None,
        }
    }

    /// Creates a scheduler with the default policy and the system clock.
    pub fn new(store: S, api: Arc<A>) -> Self {
        Self::builder(store, api).build()
    }

    /// Loads the persisted token (if any), installs it and arms the next
    /// refresh.
    ///
    /// Safe to call any number of times: each call cancels the previous
    /// timer first. A persisted token that does not decode is logged and
    /// treated as no session; it is left in storage.
    ///
    /// # Errors
    /// Returns the store's error if reading or writing the token fails.
    pub fn maintain(&self) -> Result<(), StoreError> {
        self.inner.maintain()
    }

    /// Installs `raw` as the current session, replacing any previous one,
    /// and re-arms the timer against its expiry.
    ///
    /// Called after every successful signup, login, refresh and password
    /// change.
    ///
    /// # Errors
    /// - [`RefreshError::Decode`] — `raw` is not a valid token; the
    ///   previous session and timer are left untouched
    /// - [`RefreshError::Store`] — persisting failed
    pub fn update_and_maintain(&self, raw: &str) -> Result<Session, RefreshError> {
        self.inner.update_and_maintain(raw)
    }

    /// Refreshes right now through the same path as a timer firing, but
    /// returns the outcome to the caller instead of the failure hook.
    pub async fn refresh_now(&self) -> Result<Session, RefreshError> {
        let raw = self.inner.api.refresh().await?;
        self.inner.update_and_maintain(&raw)
    }

    /// Cancels the timer and deletes the stored session.
    pub fn end_session(&self) -> Result<(), StoreError> {
        let mut timer = self.inner.lock_timer();
        timer.cancel();
        self.inner.store.delete()?;
        timer.state = RefreshState::NoSession;
        info!("session ended");
        Ok(())
    }

    /// The currently installed session.
    pub fn session(&self) -> Option<Session> {
        self.inner.store.session()
    }

    /// The current lifecycle state.
    pub fn state(&self) -> RefreshState {
        self.inner.lock_timer().state
    }

    /// Whether a refresh timer is armed.
    pub fn is_scheduled(&self) -> bool {
        self.inner.lock_timer().handle.is_some()
    }

    /// The store this scheduler writes through.
    pub fn store(&self) -> &S {
        &self.inner.store
    }
}

impl<S: SessionStore, A: AuthApi> Inner<S, A> {
    fn lock_timer(&self) -> MutexGuard<'_, Timer> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn maintain(self: &Arc<Self>) -> Result<(), StoreError> {
        let mut timer = self.lock_timer();
        timer.cancel();

        let Some(raw) = self.store.load()? else {
            if self.store.session().is_some() {
                // Cleared out of band; drop the cached copy too.
                self.store.delete()?;
            }
            timer.state = RefreshState::NoSession;
            debug!("no persisted session");
            return Ok(());
        };

        match Session::decode(&raw) {
            Ok(session) => {
                self.store.write(session.clone())?;
                self.arm(&mut timer, &session);
            }
            Err(error) => {
                warn!(%error, "ignoring unusable persisted session token");
                timer.state = RefreshState::NoSession;
            }
        }
        Ok(())
    }

    fn update_and_maintain(self: &Arc<Self>, raw: &str) -> Result<Session, RefreshError> {
        let session = Session::decode(raw)?;

        let mut timer = self.lock_timer();
        timer.cancel();
        self.store.write(session.clone())?;
        self.arm(&mut timer, &session);
        Ok(session)
    }

    /// Plans and arms the timer for `session`. The caller holds the timer
    /// lock and has already cancelled the previous timer.
    fn arm(self: &Arc<Self>, timer: &mut Timer, session: &Session) {
        info!(
            subject = ?session.subject(),
            expires_at = ?session.expires_at(),
            "session installed"
        );

        let now = self.clock.now();
        let delay = match plan_refresh(now, session.claims(), &self.config) {
            RefreshPlan::Expired => {
                info!(
                    expires_at = ?session.expires_at(),
                    now,
                    "session already expired, not scheduling refresh"
                );
                timer.state = RefreshState::Expired;
                return;
            }
            RefreshPlan::RefreshIn(delay) => apply_jitter(delay, self.config.max_jitter),
        };

        timer.armed += 1;
        let armed = timer.armed;
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire(weak, armed).await;
        });

        timer.handle = Some(task.abort_handle());
        timer.state = RefreshState::Scheduled {
            at: Instant::now() + delay,
        };
        debug!(delay_ms = delay.as_millis() as u64, "refresh scheduled");
    }

    fn report(&self, error: RefreshError) {
        warn!(%error, "background session refresh failed");
        if let Some(hook) = &self.on_failure {
            hook(&error);
        }
    }
}

/// Timer body: refresh and install the new token.
///
/// Holds only a weak reference while sleeping, so dropping every
/// scheduler handle ends the loop.
async fn fire<S: SessionStore, A: AuthApi>(weak: Weak<Inner<S, A>>, armed: u64) {
    let Some(inner) = weak.upgrade() else {
        return;
    };

    {
        let mut timer = inner.lock_timer();
        if timer.armed != armed {
            return;
        }
        // The timer is spent; from here on nothing is armed until the
        // new token is installed.
        timer.handle = None;
        timer.state = RefreshState::Refreshing;
    }
    debug!("refreshing session");

    let outcome = match inner.api.refresh().await {
        Ok(raw) => inner.update_and_maintain(&raw).map(|_| ()),
        Err(e) => Err(RefreshError::Api(e)),
    };

    if let Err(error) = outcome {
        {
            let mut timer = inner.lock_timer();
            // A concurrent install may already have re-armed.
            if timer.state == RefreshState::Refreshing {
                timer.state = RefreshState::Failed;
            }
        }
        inner.report(error);
    }
}

impl<S: SessionStore, A: AuthApi> Drop for Inner<S, A> {
    fn drop(&mut self) {
        self.timer
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }
}
