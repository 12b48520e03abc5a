//! JWKS cache with refresh-on-miss and copy-on-write snapshots.
//!
//! Readers grab the current snapshot by `Arc` and never block on an in-flight
//! refresh; a successful refresh swaps in a new immutable generation. Refreshes
//! are serialized through an async mutex so concurrent misses cause one fetch,
//! not a stampede. A failed refresh keeps the last good snapshot in service.

use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::DecodingKey;
use jsonwebtoken::jwk::{AlgorithmParameters, JwkSet};
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::verifier::AuthError;

/// One fetched key-set generation. Immutable once built; superseded,
/// never mutated, on refresh.
struct KeySet {
    jwks: JwkSet,
    fetched_at: Instant,
}

/// Cache of the identity provider's public signing keys, keyed by `kid`.
pub struct KeySetCache {
    snapshot: RwLock<Option<Arc<KeySet>>>,
    refresh_lock: tokio::sync::Mutex<()>,
    http: reqwest::Client,
    jwks_url: String,
    ttl: Duration,
}

impl KeySetCache {
    /// Create an empty cache. Keys are fetched on first use.
    pub fn new(jwks_url: String, ttl: Duration) -> Self {
        if !jwks_url.starts_with("https://") {
            warn!(url = %jwks_url, "JWKS URL is not HTTPS");
        }

        Self {
            snapshot: RwLock::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            jwks_url,
            ttl,
        }
    }

    /// Resolve the decoding key for `kid`.
    ///
    /// A fresh-cache hit does no I/O. A miss (or a stale cache) triggers one
    /// refresh and a recheck; if the key is still absent it truly does not
    /// exist and verification must fail.
    pub async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        if let Some(set) = self.current() {
            if !self.is_stale(&set) {
                if let Some(key) = find_key(&set.jwks, kid) {
                    return Ok(key);
                }
                debug!(kid = %kid, "Key not in cached set, refreshing");
            }
        }

        if let Err(e) = self.refresh_for(kid).await {
            // Keep serving the last good snapshot; only escalate when no
            // usable key exists at all.
            if let Some(set) = self.current() {
                if let Some(key) = find_key(&set.jwks, kid) {
                    warn!(error = %e, "JWKS refresh failed, using last good key set");
                    return Ok(key);
                }
            }
            return Err(e);
        }

        let set = self
            .current()
            .ok_or_else(|| AuthError::UnknownKey(kid.to_string()))?;
        find_key(&set.jwks, kid).ok_or_else(|| AuthError::UnknownKey(kid.to_string()))
    }

    /// Force a fetch of the full key set, replacing the current snapshot.
    pub async fn refresh(&self) -> Result<(), AuthError> {
        let _guard = self.refresh_lock.lock().await;
        self.fetch_and_swap().await
    }

    /// Refresh unless a concurrent refresh already brought `kid` in.
    async fn refresh_for(&self, kid: &str) -> Result<(), AuthError> {
        let _guard = self.refresh_lock.lock().await;

        if let Some(set) = self.current() {
            if !self.is_stale(&set) && find_key(&set.jwks, kid).is_some() {
                return Ok(());
            }
        }

        self.fetch_and_swap().await
    }

    async fn fetch_and_swap(&self) -> Result<(), AuthError> {
        let jwks: JwkSet = self
            .http
            .get(&self.jwks_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        debug!(keys = jwks.keys.len(), "Fetched key set");
        *self.snapshot.write() = Some(Arc::new(KeySet {
            jwks,
            fetched_at: Instant::now(),
        }));
        Ok(())
    }

    fn current(&self) -> Option<Arc<KeySet>> {
        self.snapshot.read().clone()
    }

    fn is_stale(&self, set: &KeySet) -> bool {
        set.fetched_at.elapsed() >= self.ttl
    }
}

/// Find a JWK by `kid` and convert it to a [`DecodingKey`].
fn find_key(jwks: &JwkSet, kid: &str) -> Option<DecodingKey> {
    for jwk in &jwks.keys {
        if jwk.common.key_id.as_deref() != Some(kid) {
            continue;
        }

        return match &jwk.algorithm {
            AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok(),
            AlgorithmParameters::EllipticCurve(ec) => {
                DecodingKey::from_ec_components(&ec.x, &ec.y).ok()
            }
            AlgorithmParameters::OctetKey(_) | AlgorithmParameters::OctetKeyPair(_) => None,
        };
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_JWKS: &str = r#"{
        "keys": [
            {
                "kty": "RSA",
                "kid": "rotation-2026-01",
                "use": "sig",
                "alg": "RS256",
                "n": "qLWF1EmMtGyfjsa9yJX8qRni_XzgM-FSAkTyVR-392ZV0Wgw-xMvRNcCOiGwmeI8D6RTqUkZfjSZbIhVmeODRm1gkRdSySdydjuq5px7GKGxlDJNg7360zG7vt9rbnXowxCQvgv6mEiuGbGZMbPHtPCPs1RzCTL8ehBsN-yLqgTONzUS6--ljLBNpAoH3XNs_d5ptrNYe45l2lrqQ6MYk-11taAWPrRpvQmYgz_zNc1XY1fl9pxbxeqJLhyVDBu81__2JI-fTPpLgWdf53-TMcT0T5slYY4ae2OOBP3nMglfY8GUFksJbIQQWzm3xj6nATgOT-iFQIRjrIQSY9e9vQ",
                "e": "AQAB"
            }
        ]
    }"#;

    #[test]
    fn find_key_resolves_known_kid() {
        let jwks: JwkSet = serde_json::from_str(TEST_JWKS).unwrap();
        assert!(find_key(&jwks, "rotation-2026-01").is_some());
    }

    #[test]
    fn find_key_rejects_unknown_kid() {
        let jwks: JwkSet = serde_json::from_str(TEST_JWKS).unwrap();
        assert!(find_key(&jwks, "rotation-2025-12").is_none());
    }

    #[tokio::test]
    async fn empty_cache_miss_reports_fetch_error() {
        // Nothing cached, nothing fetchable: the fetch error surfaces
        // rather than a misleading unknown-key error.
        let cache = KeySetCache::new(
            "http://127.0.0.1:9/jwks".to_string(),
            Duration::from_secs(3600),
        );
        let err = cache.decoding_key("any").await.unwrap_err();
        assert!(matches!(err, AuthError::KeySetFetch(_)));
    }
}
