//! Verifier and key-cache behavior against a live (local) JWKS endpoint.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use llm_relay::auth::{AuthError, KeySetCache, TokenVerifier};
use llm_relay::config::AuthConfig;
use pretty_assertions::assert_eq;

use common::{TEST_ISSUER, mint_token, mint_token_with_kid, spawn_jwks_server, unix_now};

fn test_auth_config(jwks_url: &str) -> AuthConfig {
    AuthConfig {
        jwks_url: jwks_url.to_string(),
        issuer: TEST_ISSUER.to_string(),
        ..AuthConfig::default()
    }
}

fn verifier_for(config: &AuthConfig) -> TokenVerifier {
    let keys = Arc::new(KeySetCache::new(
        config.jwks_url.clone(),
        Duration::from_secs(config.cache_ttl_secs),
    ));
    TokenVerifier::new(keys, config)
}

#[tokio::test]
async fn valid_token_returns_claims_with_subject_unchanged() {
    let jwks = spawn_jwks_server().await;
    let verifier = verifier_for(&test_auth_config(&jwks.url));

    let token = mint_token(TEST_ISSUER, unix_now() + 600);
    let claims = verifier.verify(&token).await.unwrap();

    assert_eq!(claims.sub, "u1");
    assert_eq!(claims.iss, TEST_ISSUER);
    assert_eq!(
        claims.entitlements.get("plan"),
        Some(&serde_json::json!("pro"))
    );
    assert_eq!(jwks.fetch_count(), 1);
}

#[tokio::test]
async fn second_verification_hits_the_cache() {
    let jwks = spawn_jwks_server().await;
    let verifier = verifier_for(&test_auth_config(&jwks.url));

    let token = mint_token(TEST_ISSUER, unix_now() + 600);
    verifier.verify(&token).await.unwrap();
    verifier.verify(&token).await.unwrap();

    assert_eq!(jwks.fetch_count(), 1);
}

#[tokio::test]
async fn unknown_kid_triggers_exactly_one_refresh_before_failing() {
    let jwks = spawn_jwks_server().await;
    let verifier = verifier_for(&test_auth_config(&jwks.url));

    // Warm the cache with a known key.
    let token = mint_token(TEST_ISSUER, unix_now() + 600);
    verifier.verify(&token).await.unwrap();
    assert_eq!(jwks.fetch_count(), 1);

    // A kid the provider never published: one refresh, then a terminal error.
    let rogue = mint_token_with_kid(TEST_ISSUER, unix_now() + 600, Some("ghost-key"));
    let err = verifier.verify(&rogue).await.unwrap_err();

    assert!(matches!(err, AuthError::UnknownKey(kid) if kid == "ghost-key"));
    assert_eq!(jwks.fetch_count(), 2);
}

#[tokio::test]
async fn expired_token_is_rejected_despite_valid_signature() {
    let jwks = spawn_jwks_server().await;
    let verifier = verifier_for(&test_auth_config(&jwks.url));

    let token = mint_token(TEST_ISSUER, unix_now() - 3600);
    let err = verifier.verify(&token).await.unwrap_err();

    assert!(matches!(err, AuthError::Expired));
}

#[tokio::test]
async fn wrong_issuer_is_rejected() {
    let jwks = spawn_jwks_server().await;
    let verifier = verifier_for(&test_auth_config(&jwks.url));

    let token = mint_token("https://rogue-idp.test", unix_now() + 600);
    let err = verifier.verify(&token).await.unwrap_err();

    assert!(matches!(
        err,
        AuthError::WrongIssuer { actual, .. } if actual == "https://rogue-idp.test"
    ));
}

#[tokio::test]
async fn token_without_kid_is_rejected_before_any_fetch() {
    let jwks = spawn_jwks_server().await;
    let verifier = verifier_for(&test_auth_config(&jwks.url));

    let token = mint_token_with_kid(TEST_ISSUER, unix_now() + 600, None);
    let err = verifier.verify(&token).await.unwrap_err();

    assert!(matches!(err, AuthError::MissingKeyId));
    assert_eq!(jwks.fetch_count(), 0);
}

#[tokio::test]
async fn garbage_token_is_malformed() {
    let jwks = spawn_jwks_server().await;
    let verifier = verifier_for(&test_auth_config(&jwks.url));

    let err = verifier.verify("not-a-jwt").await.unwrap_err();
    assert!(matches!(err, AuthError::Malformed(_)));
}

#[tokio::test]
async fn audience_restriction_applies_when_configured() {
    let jwks = spawn_jwks_server().await;
    let config = AuthConfig {
        audiences: vec!["relay-frontend".to_string()],
        ..test_auth_config(&jwks.url)
    };
    let verifier = verifier_for(&config);

    // Minted tokens carry no aud claim at all.
    let token = mint_token(TEST_ISSUER, unix_now() + 600);
    let err = verifier.verify(&token).await.unwrap_err();

    assert!(matches!(err, AuthError::BadAudience));
}

#[tokio::test]
async fn failed_refresh_retains_last_good_key_set() {
    let jwks = spawn_jwks_server().await;

    // TTL of zero: every lookup considers the cache stale and re-fetches.
    let config = AuthConfig {
        cache_ttl_secs: 0,
        ..test_auth_config(&jwks.url)
    };
    let verifier = verifier_for(&config);

    let token = mint_token(TEST_ISSUER, unix_now() + 600);
    verifier.verify(&token).await.unwrap();

    // The provider goes dark; the stale snapshot keeps verification working.
    jwks.fail.store(true, Ordering::SeqCst);
    let claims = verifier.verify(&token).await.unwrap();
    assert_eq!(claims.sub, "u1");

    // And recovers once the endpoint is healthy again.
    jwks.fail.store(false, Ordering::SeqCst);
    verifier.verify(&token).await.unwrap();
}
