//! Bearer-token verification.

use std::sync::Arc;

use jsonwebtoken::{Algorithm, Header, TokenData, Validation, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::keys::KeySetCache;
use crate::config::AuthConfig;

/// Error variants for verification failures.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No bearer token in the Authorization header.
    #[error("Missing bearer token")]
    MissingToken,

    /// The JWT header carries no `kid` field.
    #[error("JWT missing 'kid' field in header")]
    MissingKeyId,

    /// The `kid` is absent from the key set even after a refresh.
    #[error("Unknown key ID: {0}")]
    UnknownKey(String),

    /// Signature verification failed against the resolved key.
    #[error("Bad token signature")]
    BadSignature(#[source] jsonwebtoken::errors::Error),

    /// The `exp` claim is in the past.
    #[error("Token expired")]
    Expired,

    /// The `iss` claim does not match the configured identity provider.
    #[error("Issuer mismatch: expected {expected}, got {actual}")]
    WrongIssuer {
        /// Configured issuer.
        expected: String,
        /// Issuer found in the token.
        actual: String,
    },

    /// The `aud` claim matches none of the accepted audiences.
    #[error("Audience not accepted")]
    BadAudience,

    /// Network or HTTP error while fetching the key set.
    #[error("Key-set fetch failed: {0}")]
    KeySetFetch(#[from] reqwest::Error),

    /// The token does not parse as a JWT at all.
    #[error("Malformed token: {0}")]
    Malformed(#[source] jsonwebtoken::errors::Error),
}

/// Verified claims extracted from a valid bearer token.
///
/// Only trusted once signature verification succeeds, `exp` is in the
/// future, and the issuer matches the configured identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (opaque user id).
    pub sub: String,
    /// Issuer URL.
    pub iss: String,
    /// Expiry (Unix timestamp).
    pub exp: u64,
    /// Provider-specific entitlement fields, captured verbatim and passed
    /// through uninterpreted. Downstream policy decides what they mean.
    #[serde(flatten)]
    pub entitlements: serde_json::Map<String, serde_json::Value>,
}

/// Token verifier: resolves signing keys through the cache and validates
/// signature, expiry, issuer, and (optionally) audience.
pub struct TokenVerifier {
    keys: Arc<KeySetCache>,
    issuer: String,
    audiences: Vec<String>,
    leeway: u64,
}

impl TokenVerifier {
    /// Create from the auth configuration and a shared key cache.
    pub fn new(keys: Arc<KeySetCache>, config: &AuthConfig) -> Self {
        Self {
            keys,
            issuer: config.issuer.clone(),
            audiences: config.audiences.clone(),
            leeway: config.leeway_secs,
        }
    }

    /// Verify a raw bearer token and return its claims.
    ///
    /// No retries: a malformed or invalid token is a terminal failure for
    /// that request.
    pub async fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let header = jsonwebtoken::decode_header(token).map_err(AuthError::Malformed)?;
        let kid = header.kid.clone().ok_or(AuthError::MissingKeyId)?;

        // Triggers a single refresh when the kid is not cached (key rotation).
        let key = self.keys.decoding_key(&kid).await?;

        let mut validation = build_validation(&header);
        validation.leeway = self.leeway;
        // Audience is checked manually below to support both single-string
        // and array forms, and to give a clear error.
        validation.validate_aud = false;

        let token_data: TokenData<Claims> =
            jsonwebtoken::decode(token, &key, &validation).map_err(map_decode_error)?;
        let claims = token_data.claims;

        if claims.iss != self.issuer {
            return Err(AuthError::WrongIssuer {
                expected: self.issuer.clone(),
                actual: claims.iss,
            });
        }

        if !self.audiences.is_empty() {
            check_audience(claims.entitlements.get("aud"), &self.audiences)?;
        }

        Ok(claims)
    }
}

/// Build a [`Validation`] from the JWT header algorithm.
fn build_validation(header: &Header) -> Validation {
    let alg = match header.alg {
        Algorithm::RS256 => Algorithm::RS256,
        Algorithm::RS384 => Algorithm::RS384,
        Algorithm::RS512 => Algorithm::RS512,
        Algorithm::ES256 => Algorithm::ES256,
        Algorithm::ES384 => Algorithm::ES384,
        other => {
            warn!(alg = ?other, "Unsupported JWT algorithm, defaulting to RS256");
            Algorithm::RS256
        }
    };

    Validation::new(alg)
}

/// Map `jsonwebtoken` decode errors onto the auth taxonomy.
fn map_decode_error(e: jsonwebtoken::errors::Error) -> AuthError {
    match e.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => AuthError::BadSignature(e),
        _ => AuthError::Malformed(e),
    }
}

/// Validate that the token's `aud` claim contains one of the accepted values.
fn check_audience(
    aud_claim: Option<&serde_json::Value>,
    accepted: &[String],
) -> Result<(), AuthError> {
    let matches = match aud_claim {
        Some(serde_json::Value::String(s)) => accepted.iter().any(|a| a == s),
        Some(serde_json::Value::Array(arr)) => arr
            .iter()
            .any(|v| v.as_str().is_some_and(|s| accepted.iter().any(|a| a == s))),
        _ => false,
    };

    if matches { Ok(()) } else { Err(AuthError::BadAudience) }
}
