//! Shared helpers for integration tests
//!
//! Transports and base fixtures come from `tokenward_auth::testing`; this
//! module adds tracing setup and tokens with a richer claim set.

#![allow(dead_code)]

use std::sync::{Arc, Once};

use serde_json::json;
use tokenward_auth::auth::TokenResponse;
use tokenward_auth::storage::StorageAdapter;
use tokenward_auth::testing::fixtures::{self, FIXTURE_NOW};
use tokenward_auth::testing::MockTransport;
use tokenward_auth::ManualClock;

/// Reference instant for deterministic clocks
pub const NOW: i64 = FIXTURE_NOW;

static TRACING: Once = Once::new();

/// Route `tracing` output to the test harness (`RUST_LOG` filters it)
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Access token carrying permissions, roles, a feature flag and scopes
pub fn access_token(sub: &str, exp: i64) -> String {
    fixtures::unsigned_token(json!({
        "jti": uuid::Uuid::new_v4().to_string(),
        "sub": sub,
        "exp": exp,
        "permissions": ["read", "write"],
        "roles": [{ "key": "admin" }],
        "feature_flags": { "theme": { "t": "s", "v": "dark" } },
        "org_code": "org_1",
        "scope": "openid offline",
    }))
}

pub fn id_token(sub: &str, exp: i64) -> String {
    fixtures::unsigned_token(json!({
        "sub": sub,
        "exp": exp,
        "email": format!("{sub}@example.com"),
        "given_name": "Ada",
        "family_name": "Lovelace",
    }))
}

pub fn response(sub: &str, exp: i64, refresh: &str) -> TokenResponse {
    TokenResponse::new(access_token(sub, exp))
        .with_id_token(id_token(sub, exp))
        .with_refresh_token(refresh)
        .with_expires_in(exp - NOW)
}

/// Transport minting one-hour tokens against `clock`
pub fn transport(clock: &ManualClock) -> MockTransport {
    MockTransport::minting(Arc::new(clock.clone()), 3600)
}

/// Seed storage with an expired access token and a refresh token
pub async fn seed_expired(storage: &dyn StorageAdapter, namespace: &str) {
    let exp = NOW - 120;
    storage.set(&format!("{namespace}.access_token"), &access_token("user-42", exp)).await.unwrap();
    storage.set(&format!("{namespace}.refresh_token"), "seeded-refresh").await.unwrap();
    storage.set(&format!("{namespace}.expires_at"), &exp.to_string()).await.unwrap();
}
