//! Session persistence for Tokenkeeper.
//!
//! The store is the only shared mutable state in the client: it holds at
//! most one raw token on disk (or wherever the backend puts it) plus the
//! decoded [`Session`] for that token in memory.
//!
//! - [`SessionStore`] — the capability every backend implements
//! - [`CookieStore`] — persists the token as a named entry in a cookie jar
//!   file, with no expiry of its own
//! - [`MemoryStore`] — keeps everything in process memory
//!
//! Stores are not expiry-aware. A token stays persisted until it is
//! explicitly deleted or cleared out of band; the refresh layer is the
//! one that reads `exp`.

mod cookie;
mod error;
mod memory;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use cookie::CookieStore;
pub use error::StoreError;
pub use memory::MemoryStore;
pub use tokenkeeper_session::Session;

/// Persistence boundary for the current session token.
///
/// Implementations must keep the persisted raw token and the in-memory
/// [`Session`] consistent: [`write`](Self::write) and
/// [`delete`](Self::delete) update both under one lock, so no caller can
/// observe one without the other.
///
/// # Trait bounds
///
/// `Send + Sync + 'static` because the store is shared between the
/// application-facing client and the background refresh task.
pub trait SessionStore: Send + Sync + 'static {
    /// Reads the persisted raw token, if any. Does not touch the cached
    /// session.
    fn load(&self) -> Result<Option<String>, StoreError>;

    /// Persists `session`'s raw token and makes it the current session.
    fn write(&self, session: Session) -> Result<(), StoreError>;

    /// Removes the persisted token and forgets the current session.
    fn delete(&self) -> Result<(), StoreError>;

    /// The currently loaded session, if any.
    fn session(&self) -> Option<Session>;
}

impl<S: SessionStore> SessionStore for Arc<S> {
    fn load(&self) -> Result<Option<String>, StoreError> {
        (**self).load()
    }

    fn write(&self, session: Session) -> Result<(), StoreError> {
        (**self).write(session)
    }

    fn delete(&self) -> Result<(), StoreError> {
        (**self).delete()
    }

    fn session(&self) -> Option<Session> {
        (**self).session()
    }
}

/// In-memory session slot shared by the store implementations.
///
/// Holding the guard while persisting is what makes a write atomic from
/// the caller's point of view.
#[derive(Debug, Default)]
pub(crate) struct SessionSlot(Mutex<Option<Session>>);

impl SessionSlot {
    pub(crate) fn lock(&self) -> MutexGuard<'_, Option<Session>> {
        // A panic while holding the lock cannot leave a half-written
        // `Option`, so the poisoned value is still usable.
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
