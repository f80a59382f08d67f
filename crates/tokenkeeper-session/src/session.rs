//! Session types: the decoded view of a signed claims token.
//!
//! A `Session` pairs the raw token text (what gets persisted and sent back
//! to the identity service) with the claims read from its payload:
//! - WHO the token is for (`sub`)
//! - WHEN it was issued (`iat`)
//! - WHEN it stops being valid (`exp`)

use std::fmt;

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde_json::{Map, Value};

use crate::DecodeError;

/// Base64url engine that accepts segments with or without `=` padding.
///
/// Identity services emit unpadded base64url, but tokens minted by
/// browser code (`btoa`) are padded and use the standard alphabet. The
/// standard alphabet is translated before decoding; padding is optional.
const SEGMENT_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

// ---------------------------------------------------------------------------
// Subject
// ---------------------------------------------------------------------------

/// The `sub` claim. Identity services use either numeric account IDs or
/// opaque string identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subject {
    /// A numeric account ID, e.g. `"sub": 42`.
    Id(i64),
    /// A string identifier, e.g. `"sub": "user-42"`.
    Name(String),
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

// ---------------------------------------------------------------------------
// Claims
// ---------------------------------------------------------------------------

/// Claims read from a token's payload segment.
///
/// Only `sub`, `iat` and `exp` are interpreted. Anything else the identity
/// service puts in the payload is kept in `extra`, untouched.
///
/// Missing or non-numeric `iat`/`exp` values decode to `None` instead of
/// failing: a token without a usable `exp` is simply treated as already
/// expired by the refresh layer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Claims {
    /// The `sub` claim, if present and a string or integer.
    pub subject: Option<Subject>,
    /// The `iat` claim in unix seconds.
    pub issued_at: Option<i64>,
    /// The `exp` claim in unix seconds.
    pub expires_at: Option<i64>,
    /// All other claims, uninterpreted.
    pub extra: Map<String, Value>,
}

impl Claims {
    /// Builds claims from a decoded payload object.
    fn from_object(mut object: Map<String, Value>) -> Self {
        let subject = object.remove("sub").and_then(|v| match v {
            Value::Number(n) => n.as_i64().map(Subject::Id),
            Value::String(s) => Some(Subject::Name(s)),
            _ => None,
        });
        let issued_at = object.remove("iat").as_ref().and_then(unix_seconds);
        let expires_at = object.remove("exp").as_ref().and_then(unix_seconds);

        Self {
            subject,
            issued_at,
            expires_at,
            extra: object,
        }
    }

    /// Total validity window (`exp - iat`), when both claims are present.
    pub fn lifetime(&self) -> Option<i64> {
        Some(self.expires_at?.saturating_sub(self.issued_at?))
    }
}

/// Reads a JSON number as whole unix seconds. Fractional seconds are
/// truncated toward the past.
fn unix_seconds(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite())
                .map(|f| f.floor() as i64)
        }),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A decoded session token.
///
/// Immutable once built: a new token always produces a new `Session`.
/// The only way to get one is [`decode`], so holding a `Session` means
/// the raw token was structurally valid.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    token: String,
    claims: Claims,
}

impl Session {
    /// Decodes a raw token. See [`decode`].
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        decode(raw)
    }

    /// The raw token text, exactly as issued.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The decoded claims.
    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    /// Shorthand for `claims().subject`.
    pub fn subject(&self) -> Option<&Subject> {
        self.claims.subject.as_ref()
    }

    /// Shorthand for `claims().issued_at`.
    pub fn issued_at(&self) -> Option<i64> {
        self.claims.issued_at
    }

    /// Shorthand for `claims().expires_at`.
    pub fn expires_at(&self) -> Option<i64> {
        self.claims.expires_at
    }

    /// Seconds until `exp`, relative to `now` (unix seconds).
    ///
    /// Zero or negative means expired. A token without `exp` reports
    /// zero remaining seconds.
    pub fn seconds_remaining(&self, now: i64) -> i64 {
        self.claims.expires_at.map_or(0, |exp| exp.saturating_sub(now))
    }

    /// Whether the session is expired at `now`.
    pub fn is_expired(&self, now: i64) -> bool {
        self.seconds_remaining(now) <= 0
    }
}

/// Decodes a raw `header.payload.signature` token into a [`Session`].
///
/// The signature segment is not verified.
///
/// # Errors
/// - [`DecodeError::MalformedStructure`] — not exactly three non-empty segments
/// - [`DecodeError::InvalidClaims`] — the payload is not base64, not JSON,
///   or not a JSON object
pub fn decode(raw: &str) -> Result<Session, DecodeError> {
    let segments: Vec<&str> = raw.split('.').collect();
    if segments.len() != 3 || segments.iter().any(|s| s.is_empty()) {
        return Err(DecodeError::MalformedStructure);
    }

    let payload = decode_segment(segments[1])?;
    let value: Value = serde_json::from_slice(&payload)
        .map_err(|e| DecodeError::InvalidClaims(e.to_string()))?;

    let Value::Object(object) = value else {
        return Err(DecodeError::InvalidClaims(
            "payload is not a JSON object".into(),
        ));
    };

    Ok(Session {
        token: raw.to_owned(),
        claims: Claims::from_object(object),
    })
}

fn decode_segment(segment: &str) -> Result<Vec<u8>, DecodeError> {
    let normalized: String = segment
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();

    SEGMENT_ENGINE
        .decode(normalized)
        .map_err(|e| DecodeError::InvalidClaims(e.to_string()))
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
    use serde_json::json;

    use super::*;

    // -- Helpers ----------------------------------------------------------

    /// Builds an unsigned-looking token the way identity services do
    /// (unpadded base64url segments).
    fn token(payload: &Value) -> String {
        format!(
            "{}.{}.{}",
            URL_SAFE_NO_PAD.encode(b"{\"alg\":\"HS256\"}"),
            URL_SAFE_NO_PAD.encode(payload.to_string()),
            URL_SAFE_NO_PAD.encode(b"BEEF"),
        )
    }

    /// Builds a token the way browser code does with `btoa` (padded,
    /// standard alphabet).
    fn btoa_token(payload: &Value) -> String {
        format!(
            "{}.{}.{}",
            STANDARD.encode(b"{}"),
            STANDARD.encode(payload.to_string()),
            STANDARD.encode(b"BEEF"),
        )
    }

    // =====================================================================
    // decode(): structure
    // =====================================================================

    #[test]
    fn test_decode_wrong_segment_count_returns_malformed() {
        let payload = URL_SAFE_NO_PAD.encode(b"{\"exp\":1}");
        let cases = [
            String::new(),
            "onlyone".to_string(),
            format!("a.{payload}"),
            format!("a.{payload}.c.d"),
            format!("a.{payload}.c.d.e"),
        ];

        for raw in cases {
            assert_eq!(
                decode(&raw),
                Err(DecodeError::MalformedStructure),
                "{raw:?} should be malformed"
            );
        }
    }

    #[test]
    fn test_decode_empty_segment_returns_malformed() {
        let payload = URL_SAFE_NO_PAD.encode(b"{\"exp\":1}");

        assert_eq!(
            decode(&format!(".{payload}.sig")),
            Err(DecodeError::MalformedStructure)
        );
        assert_eq!(
            decode(&format!("head.{payload}.")),
            Err(DecodeError::MalformedStructure)
        );
        assert_eq!(decode("head..sig"), Err(DecodeError::MalformedStructure));
    }

    // =====================================================================
    // decode(): claims
    // =====================================================================

    #[test]
    fn test_decode_non_base64_payload_returns_invalid_claims() {
        let result = decode("head.!!not-base64!!.sig");

        assert!(matches!(result, Err(DecodeError::InvalidClaims(_))));
    }

    #[test]
    fn test_decode_non_json_payload_returns_invalid_claims() {
        let raw = format!("head.{}.sig", URL_SAFE_NO_PAD.encode(b"not json"));

        assert!(matches!(decode(&raw), Err(DecodeError::InvalidClaims(_))));
    }

    #[test]
    fn test_decode_non_object_payload_returns_invalid_claims() {
        let raw = token(&json!([1, 2, 3]));

        assert!(matches!(decode(&raw), Err(DecodeError::InvalidClaims(_))));
    }

    #[test]
    fn test_decode_valid_token_reads_claims() {
        let raw = token(&json!({ "sub": 1, "iat": 1_700_000_000, "exp": 1_700_003_600 }));

        let session = decode(&raw).expect("should decode");

        assert_eq!(session.token(), raw);
        assert_eq!(session.subject(), Some(&Subject::Id(1)));
        assert_eq!(session.issued_at(), Some(1_700_000_000));
        assert_eq!(session.expires_at(), Some(1_700_003_600));
        assert_eq!(session.claims().lifetime(), Some(3600));
    }

    #[test]
    fn test_decode_expiry_round_trips_exactly() {
        for exp in [0_i64, 1, 1_700_003_600, i64::from(u32::MAX) + 7] {
            let session = decode(&token(&json!({ "exp": exp }))).unwrap();
            assert_eq!(session.expires_at(), Some(exp));
        }
    }

    #[test]
    fn test_decode_btoa_token_is_accepted() {
        // Padded standard-alphabet segments, as produced by `btoa`.
        let raw = btoa_token(&json!({ "sub": "alice", "iat": 10, "exp": 3610 }));

        let session = decode(&raw).expect("should decode");

        assert_eq!(session.subject(), Some(&Subject::Name("alice".into())));
        assert_eq!(session.expires_at(), Some(3610));
    }

    #[test]
    fn test_decode_missing_expiry_is_not_an_error() {
        let session = decode(&token(&json!({ "foo": "bar" }))).expect("should decode");

        assert_eq!(session.expires_at(), None);
        assert!(session.is_expired(0), "no exp means already expired");
        assert_eq!(session.claims().extra.get("foo"), Some(&json!("bar")));
    }

    #[test]
    fn test_decode_non_numeric_expiry_is_absent() {
        let session = decode(&token(&json!({ "exp": "tomorrow" }))).unwrap();

        assert_eq!(session.expires_at(), None);
    }

    #[test]
    fn test_decode_fractional_expiry_is_truncated() {
        let session = decode(&token(&json!({ "exp": 100.9 }))).unwrap();

        assert_eq!(session.expires_at(), Some(100));
    }

    #[test]
    fn test_decode_signature_is_not_verified() {
        let payload = URL_SAFE_NO_PAD.encode(b"{\"exp\":5}");
        let raw = format!("garbage-header.{payload}.garbage-signature");

        assert!(decode(&raw).is_ok());
    }

    // =====================================================================
    // Session expiry helpers
    // =====================================================================

    #[test]
    fn test_seconds_remaining_counts_down_to_expiry() {
        let session = decode(&token(&json!({ "exp": 1000 }))).unwrap();

        assert_eq!(session.seconds_remaining(400), 600);
        assert!(!session.is_expired(999));
        assert!(session.is_expired(1000));
        assert!(session.is_expired(2000));
    }

    #[test]
    fn test_expiry_helpers_saturate_on_extreme_claims() {
        let session = decode(&token(&json!({ "iat": i64::MIN, "exp": i64::MIN }))).unwrap();

        assert_eq!(session.seconds_remaining(1000), i64::MIN);
        assert!(session.is_expired(1000));
        assert_eq!(session.claims().lifetime(), Some(0));

        let session = decode(&token(&json!({ "iat": -1e300, "exp": i64::MAX }))).unwrap();

        assert_eq!(session.issued_at(), Some(i64::MIN));
        assert_eq!(session.claims().lifetime(), Some(i64::MAX));
        assert_eq!(session.seconds_remaining(-10), i64::MAX);
        assert!(!session.is_expired(0));
    }

    #[test]
    fn test_subject_display() {
        assert_eq!(Subject::Id(7).to_string(), "7");
        assert_eq!(Subject::Name("bob".into()).to_string(), "bob");
    }
}
