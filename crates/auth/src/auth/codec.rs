//! Token structure decoding
//!
//! Decodes `header.payload.signature` tokens into JSON maps and checks
//! expiry. Signatures are never verified here; that belongs to the issuer or
//! an external verifier. A decoded token only tells you what the token
//! *claims*.

use std::fmt;

use base64::alphabet;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use crate::error::{AuthError, AuthResult};

/// Default clock-skew tolerance in seconds
pub const DEFAULT_SKEW_SECONDS: u64 = 10;

/// Base64url decoder that accepts both padded and unpadded segments
const SEGMENT_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decoding options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Require all three segments with a non-empty signature
    pub strict: bool,
}

impl DecodeOptions {
    #[must_use]
    pub fn strict() -> Self {
        Self { strict: true }
    }
}

/// Structural view of a token
///
/// Immutable once produced.
#[derive(Clone, PartialEq)]
pub struct DecodedToken {
    header: Map<String, Value>,
    payload: Map<String, Value>,
    raw: String,
    signature_present: bool,
}

impl DecodedToken {
    #[must_use]
    pub fn header(&self) -> &Map<String, Value> {
        &self.header
    }

    #[must_use]
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// The exact string that was decoded
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn signature_present(&self) -> bool {
        self.signature_present
    }

    /// Look up a single payload claim
    #[must_use]
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }

    /// `sub` claim when it is a string
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.payload.get("sub").and_then(Value::as_str)
    }

    /// Numeric `exp` claim in seconds since the epoch
    ///
    /// Fractional values are truncated. Strings, booleans and missing claims
    /// yield `None`.
    #[must_use]
    pub fn expires_at(&self) -> Option<i64> {
        match self.payload.get("exp")? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            _ => None,
        }
    }

    /// `exp` as a UTC timestamp
    #[must_use]
    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        self.expires_at().and_then(|secs| DateTime::from_timestamp(secs, 0))
    }

    /// Check that the token is usable (has a numeric expiry)
    ///
    /// # Errors
    /// Returns [`AuthError::MalformedToken`] when `exp` is missing or not a
    /// number
    pub fn validate(&self) -> AuthResult<DateTime<Utc>> {
        match self.payload.get("exp") {
            None => Err(AuthError::malformed("missing exp claim")),
            Some(_) => self
                .expires_at_utc()
                .ok_or_else(|| AuthError::malformed("exp claim is not a valid numeric date")),
        }
    }
}

impl fmt::Debug for DecodedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedToken")
            .field("header", &self.header)
            .field("payload", &self.payload)
            .field("signature_present", &self.signature_present)
            .finish_non_exhaustive()
    }
}

/// Decode a token in lenient mode
///
/// # Errors
/// Returns [`AuthError::MalformedToken`] on structural failure
pub fn decode(raw: &str) -> AuthResult<DecodedToken> {
    decode_with(raw, DecodeOptions::default())
}

/// Decode a token with explicit options
///
/// Lenient mode accepts `header.payload` and `header.payload.` in addition to
/// the full three-segment form. Strict mode requires a non-empty signature
/// segment.
///
/// # Errors
/// Returns [`AuthError::MalformedToken`] if the token has the wrong number of
/// segments, a segment is not base64url, or the header/payload is not a JSON
/// object
pub fn decode_with(raw: &str, options: DecodeOptions) -> AuthResult<DecodedToken> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AuthError::malformed("empty token"));
    }

    let parts: Vec<&str> = trimmed.split('.').collect();
    let signature_present = match parts.len() {
        3 => !parts[2].is_empty(),
        2 => false,
        n => return Err(AuthError::malformed(format!("expected 3 segments, found {n}"))),
    };
    if options.strict && !signature_present {
        return Err(AuthError::malformed("signature segment required in strict mode"));
    }

    let header = decode_segment(parts[0], "header")?;
    let payload = decode_segment(parts[1], "payload")?;

    Ok(DecodedToken { header, payload, raw: trimmed.to_string(), signature_present })
}

fn decode_segment(segment: &str, name: &str) -> AuthResult<Map<String, Value>> {
    if segment.is_empty() {
        return Err(AuthError::malformed(format!("empty {name} segment")));
    }
    let bytes = SEGMENT_ENGINE
        .decode(segment)
        .map_err(|e| AuthError::malformed(format!("failed to decode {name}: {e}")))?;
    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::malformed(format!("failed to parse {name}: {e}")))?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(AuthError::malformed(format!("{name} is not a JSON object"))),
    }
}

/// Whether the token is expired at `now` given a skew tolerance
///
/// Returns `true` when `now + skew_seconds >= exp`, and for tokens without a
/// numeric `exp`.
#[must_use]
pub fn is_expired(token: &DecodedToken, now: i64, skew_seconds: u64) -> bool {
    let skew = i64::try_from(skew_seconds).unwrap_or(i64::MAX);
    match token.expires_at() {
        Some(exp) => now.saturating_add(skew) >= exp,
        None => true,
    }
}

/// Encode an unsigned token (`alg: none`, empty signature segment)
///
/// Produces a structurally valid token for local tooling and tests. `header`
/// defaults to `{"alg": "none", "typ": "JWT"}`.
#[must_use]
pub fn encode_unsigned(header: Option<&Value>, payload: &Value) -> String {
    let default_header = json!({ "alg": "none", "typ": "JWT" });
    let header = header.unwrap_or(&default_header);
    format!(
        "{}.{}.",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(payload.to_string())
    )
}
