//! Integration tests for the token manager lifecycle
//!
//! Exercises the public API end to end: hydration, single-flight refresh,
//! revocation, sign-out and claims extraction.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{seed_expired, NOW};
use futures::future::join_all;
use tokenward_auth::auth::{FlagValue, TokenManager, TokenManagerConfig, TokenManagerSettings};
use tokenward_auth::storage::{MemoryStorage, StorageAdapter};
use tokenward_auth::testing::MockTransport;
use tokenward_auth::{AnomalyKind, AuthError, ManualClock, MemorySink, TokenState, TransportError};

fn manager(
    storage: Arc<MemoryStorage>,
    transport: &MockTransport,
    clock: &ManualClock,
) -> TokenManager {
    TokenManager::new(
        TokenManagerConfig::new("app", storage)
            .with_transport(Arc::new(transport.clone()))
            .with_clock(Arc::new(clock.clone())),
    )
    .unwrap()
}

/// Tests concurrent access during expiry.
///
/// # Test Steps
/// 1. Seed storage with an expired access token and a refresh token
/// 2. Issue 50 concurrent `get_access_token` calls from spawned tasks
/// 3. Verify the transport saw exactly one refresh
/// 4. Verify every caller received the same token and it was persisted
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_flight_refresh_under_concurrency() {
    common::init_tracing();
    let clock = ManualClock::at_unix(NOW);
    let storage = Arc::new(MemoryStorage::new());
    seed_expired(storage.as_ref(), "app").await;
    let transport = common::transport(&clock);
    transport.set_delay(Duration::from_millis(50));
    let manager = manager(storage.clone(), &transport, &clock);

    let tasks = (0..50).map(|_| {
        let manager = manager.clone();
        tokio::spawn(async move { manager.get_access_token().await })
    });
    let tokens: Vec<String> =
        join_all(tasks).await.into_iter().map(|r| r.unwrap().unwrap()).collect();

    assert_eq!(transport.refresh_calls(), 1);
    assert_eq!(transport.refresh_tokens_seen(), vec!["seeded-refresh"]);
    assert!(tokens.iter().all(|t| t == &tokens[0]));
    assert_eq!(storage.get("app.access_token").await.unwrap().as_deref(), Some(tokens[0].as_str()));
    assert_eq!(storage.get("app.refresh_token").await.unwrap().as_deref(), Some("refresh-1"));
}

/// Tests that a later expiry triggers exactly one further refresh.
///
/// # Test Steps
/// 1. Refresh once from an expired seed
/// 2. Serve repeated calls from cache
/// 3. Advance the clock past expiry and call again
#[tokio::test]
async fn test_refresh_cycle_follows_clock() {
    let clock = ManualClock::at_unix(NOW);
    let storage = Arc::new(MemoryStorage::new());
    seed_expired(storage.as_ref(), "app").await;
    let transport = common::transport(&clock);
    let manager = manager(storage, &transport, &clock);

    let first = manager.get_access_token().await.unwrap();
    for _ in 0..5 {
        assert_eq!(manager.get_access_token().await.unwrap(), first);
    }
    assert_eq!(transport.refresh_calls(), 1);

    clock.advance_seconds(3600);
    assert_eq!(manager.state().await, TokenState::Expired);
    let second = manager.get_access_token().await.unwrap();

    assert_ne!(first, second);
    assert_eq!(transport.refresh_calls(), 2);
}

/// Tests revocation handling.
///
/// # Test Steps
/// 1. Seed an expired session and make the transport revoke
/// 2. Verify the caller sees a revoked `RefreshFailed`
/// 3. Verify all token keys are gone and the state is `Empty`
#[tokio::test]
async fn test_revoked_refresh_token_signs_out() {
    let clock = ManualClock::at_unix(NOW);
    let storage = Arc::new(MemoryStorage::new());
    seed_expired(storage.as_ref(), "app").await;
    let transport = common::transport(&clock);
    transport.push_failure(TransportError::Revoked("invalid_grant".to_string()));
    let manager = manager(storage.clone(), &transport, &clock);

    let err = manager.get_access_token().await.unwrap_err();

    assert!(matches!(err, AuthError::RefreshFailed { revoked: true, .. }));
    assert!(storage.is_empty());
    assert_eq!(manager.state().await, TokenState::Empty);
    assert!(!manager.is_authenticated().await);
}

/// Tests claims and profile access after login.
///
/// # Test Steps
/// 1. Store a token response directly
/// 2. Read typed claims from the access token
/// 3. Read the user profile from the ID token
#[tokio::test]
async fn test_claims_and_profile_after_store() {
    let clock = ManualClock::at_unix(NOW);
    let sink = Arc::new(MemorySink::new());
    let manager = TokenManager::new(
        TokenManagerConfig::new("app", Arc::new(MemoryStorage::new()))
            .with_clock(Arc::new(clock))
            .with_diagnostics(sink.clone()),
    )
    .unwrap();

    manager.store_tokens(common::response("user-42", NOW + 600, "r")).await.unwrap();

    let claims = manager.get_claims().await.unwrap();
    assert!(claims.has_permission("write"));
    assert!(claims.has_role("admin"));
    assert_eq!(claims.flag("theme"), Some(&FlagValue::String("dark".to_string())));
    assert_eq!(claims.organization_code.as_deref(), Some("org_1"));
    assert!(claims.scopes.contains("offline"));

    let profile = manager.get_user_profile().await.unwrap();
    assert_eq!(profile.id.as_deref(), Some("user-42"));
    assert_eq!(profile.given_name.as_deref(), Some("Ada"));
    assert!(sink.is_empty());
}

/// Tests degraded claims extraction.
///
/// # Test Steps
/// 1. Store an access token whose `permissions` claim is a string
/// 2. Verify extraction yields an empty permission set
/// 3. Verify exactly one diagnostic record was produced
#[tokio::test]
async fn test_wrong_typed_claim_produces_one_diagnostic() {
    let sink = Arc::new(MemorySink::new());
    let manager = TokenManager::new(
        TokenManagerConfig::new("app", Arc::new(MemoryStorage::new()))
            .with_clock(Arc::new(ManualClock::at_unix(NOW)))
            .with_diagnostics(sink.clone()),
    )
    .unwrap();
    let access = tokenward_auth::testing::fixtures::unsigned_token(serde_json::json!({
        "exp": NOW + 600,
        "permissions": "not-a-list",
    }));

    manager
        .store_tokens(tokenward_auth::TokenResponse::new(access))
        .await
        .unwrap();
    let claims = manager.get_claims().await.unwrap();

    assert!(claims.permissions.is_empty());
    assert_eq!(sink.count(AnomalyKind::UnexpectedClaimType), 1);
    assert_eq!(sink.records().len(), 1);
}

/// Tests sign-out.
///
/// # Test Steps
/// 1. Store tokens and confirm the manager is authenticated
/// 2. Sign out
/// 3. Verify storage is empty and a new manager over it starts `Empty`
#[tokio::test]
async fn test_sign_out_clears_storage_for_new_managers() {
    let clock = ManualClock::at_unix(NOW);
    let storage = Arc::new(MemoryStorage::new());
    let transport = common::transport(&clock);
    let first = manager(storage.clone(), &transport, &clock);

    first.store_tokens(common::response("user-42", NOW + 600, "r")).await.unwrap();
    assert!(first.is_authenticated().await);

    first.sign_out().await.unwrap();

    assert!(storage.is_empty());
    let second = manager(storage, &transport, &clock);
    assert_eq!(second.state().await, TokenState::Empty);
    assert_eq!(second.get_access_token().await, Err(AuthError::NoCredentials));
    assert_eq!(transport.refresh_calls(), 0);
}

#[tokio::test]
async fn test_managers_with_different_namespaces_are_isolated() {
    let clock = ManualClock::at_unix(NOW);
    let storage = Arc::new(MemoryStorage::new());
    let transport = common::transport(&clock);
    let settings = |namespace: &str| TokenManagerSettings {
        namespace: namespace.to_string(),
        ..TokenManagerSettings::default()
    };
    let a = TokenManager::new(
        TokenManagerConfig::from_settings(settings("a"), storage.clone())
            .with_transport(Arc::new(transport.clone()))
            .with_clock(Arc::new(clock.clone())),
    )
    .unwrap();
    let b = TokenManager::new(
        TokenManagerConfig::from_settings(settings("b"), storage.clone())
            .with_clock(Arc::new(clock.clone())),
    )
    .unwrap();

    a.store_tokens(common::response("user-a", NOW + 600, "ra")).await.unwrap();

    assert_eq!(a.state().await, TokenState::Valid);
    assert_eq!(b.state().await, TokenState::Empty);
    b.sign_out().await.unwrap();
    assert!(storage.contains("a.access_token"));
}

#[test]
fn test_settings_from_toml() {
    let settings = TokenManagerSettings::from_toml_str(
        r#"
        namespace = "desktop"
        skew_seconds = 30
        "#,
    )
    .unwrap();

    assert_eq!(settings.namespace, "desktop");
    assert_eq!(settings.skew_seconds, 30);
    assert!(!settings.strict_decoding);
}
