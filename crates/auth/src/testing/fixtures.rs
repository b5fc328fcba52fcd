//! Token fixtures
//!
//! Unsigned tokens with controllable claims. Every minted token carries a
//! unique `jti`, so two tokens with the same subject and expiry still differ.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{json, Value};

use crate::auth::codec::encode_unsigned;
use crate::auth::types::TokenResponse;

/// Reference instant used by deterministic tests
pub const FIXTURE_NOW: i64 = 1_700_000_000;

static SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_jti() -> u64 {
    SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

/// Unsigned token for an arbitrary payload (a `jti` is added to objects)
#[must_use]
pub fn unsigned_token(mut payload: Value) -> String {
    if let Value::Object(map) = &mut payload {
        map.entry("jti").or_insert_with(|| json!(next_jti().to_string()));
    }
    encode_unsigned(None, &payload)
}

/// Access token with `sub`, `exp` and a `read` permission
#[must_use]
pub fn access_token(sub: &str, exp: i64) -> String {
    unsigned_token(json!({
        "sub": sub,
        "exp": exp,
        "permissions": ["read"],
        "org_code": "org_test",
    }))
}

/// ID token with profile claims derived from `sub`
#[must_use]
pub fn id_token(sub: &str, exp: i64) -> String {
    unsigned_token(json!({
        "sub": sub,
        "exp": exp,
        "email": format!("{sub}@example.com"),
        "given_name": "Test",
        "family_name": "User",
    }))
}

/// Token response with access and ID tokens for `sub`, expiring at `exp`
#[must_use]
pub fn token_response(sub: &str, exp: i64, refresh_token: Option<&str>) -> TokenResponse {
    let mut response = TokenResponse::new(access_token(sub, exp))
        .with_id_token(id_token(sub, exp))
        .with_expires_in(3600);
    response.refresh_token = refresh_token.map(str::to_owned);
    response
}
