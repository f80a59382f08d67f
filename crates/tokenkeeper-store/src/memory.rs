//! Process-local store. Useful for tests, CLIs and anything that should
//! forget the session when the process exits.

use std::sync::{Mutex, PoisonError};

use tokenkeeper_session::Session;

use crate::{SessionSlot, SessionStore, StoreError};

/// A [`SessionStore`] that "persists" into a plain in-memory slot.
///
/// The persisted slot and the cached session are separate on purpose:
/// [`with_token`](Self::with_token) seeds only the persisted value, just
/// like a cookie left behind by a previous page load, and the refresh
/// layer has to decode it.
#[derive(Debug, Default)]
pub struct MemoryStore {
    persisted: Mutex<Option<String>>,
    current: SessionSlot,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store whose persisted slot already holds `raw`.
    pub fn with_token(raw: impl Into<String>) -> Self {
        Self {
            persisted: Mutex::new(Some(raw.into())),
            current: SessionSlot::default(),
        }
    }

    /// Replaces the persisted value without touching the cached session,
    /// simulating an out-of-band write (another page, devtools, ...).
    pub fn set_persisted(&self, raw: Option<String>) {
        *self.persisted.lock().unwrap_or_else(PoisonError::into_inner) = raw;
    }

    /// The raw persisted value.
    pub fn persisted(&self) -> Option<String> {
        self.persisted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SessionStore for MemoryStore {
    fn load(&self) -> Result<Option<String>, StoreError> {
        Ok(self.persisted())
    }

    fn write(&self, session: Session) -> Result<(), StoreError> {
        let mut current = self.current.lock();
        self.set_persisted(Some(session.token().to_owned()));
        *current = Some(session);
        Ok(())
    }

    fn delete(&self) -> Result<(), StoreError> {
        let mut current = self.current.lock();
        self.set_persisted(None);
        *current = None;
        Ok(())
    }

    fn session(&self) -> Option<Session> {
        self.current.lock().clone()
    }
}
