//! Session model for Tokenkeeper.
//!
//! A session is the client's decoded view of a signed claims token issued
//! by the identity service. This crate only reads tokens:
//!
//! 1. **Structure** — a token is three base64url segments,
//!    `header.payload.signature`
//! 2. **Claims** — the payload segment is a JSON object carrying at least
//!    `sub`, `iat` and `exp` ([`Claims`])
//! 3. **Trust** — the signature segment is never checked here. The identity
//!    service verifies signatures; the client trusts its own storage.
//!
//! # How it fits in the stack
//!
//! ```text
//! Refresh Layer (above)  ← reads expiry claims to plan refreshes
//!     ↕
//! Store Layer (above)    ← persists the raw token, caches the Session
//!     ↕
//! Session Layer (this crate)  ← decodes raw tokens into Sessions
//! ```

mod error;
mod session;

pub use error::DecodeError;
pub use session::{Claims, Session, Subject, decode};
