//! Suppresses double submits.
//!
//! Signup and login are each allowed one request in flight. A second call
//! with the same [`Operation`] while the first is pending is rejected
//! immediately with [`DuplicateRequest`] and never reaches the network.
//! The slot is released when the first request settles (success, failure
//! or cancellation) and before its caller sees the result.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::trace;

/// A deduplicated identity service operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Signup,
    Login,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signup => f.write_str("signup"),
            Self::Login => f.write_str("login"),
        }
    }
}

/// A second request for an operation that is already in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("duplicate {0} request")]
pub struct DuplicateRequest(pub Operation);

/// Tracks which operations have a request in flight.
#[derive(Debug, Default)]
pub struct RequestDeduplicator {
    inflight: Mutex<HashSet<Operation>>,
}

impl RequestDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `request` unless `op` is already in flight.
    ///
    /// `request` is only invoked once the slot is claimed, so a duplicate
    /// costs nothing.
    ///
    /// # Errors
    /// Returns `DuplicateRequest` (converted into `E`) if `op` is pending,
    /// otherwise whatever `request` returns.
    pub async fn guard<T, E, F, Fut>(&self, op: Operation, request: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<DuplicateRequest>,
    {
        if !self.lock().insert(op) {
            trace!(%op, "rejecting duplicate request");
            return Err(DuplicateRequest(op).into());
        }

        let slot = InflightSlot { owner: self, op };
        trace!(%op, "request in flight");
        let result = request().await;
        drop(slot);
        result
    }

    /// Whether `op` currently has a request in flight.
    pub fn is_inflight(&self, op: Operation) -> bool {
        self.lock().contains(&op)
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<Operation>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases the slot on drop, so cancelling the request future frees it
/// too.
struct InflightSlot<'a> {
    owner: &'a RequestDeduplicator,
    op: Operation,
}

impl Drop for InflightSlot<'_> {
    fn drop(&mut self) {
        self.owner.lock().remove(&self.op);
        trace!(op = %self.op, "request settled");
    }
}
