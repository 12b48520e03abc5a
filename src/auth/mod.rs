//! Bearer-token authentication against a remotely published key set.
//!
//! # Verification flow
//!
//! 1. Decode the JWT header (no verification) to extract `kid` and `alg`.
//! 2. Resolve the signing key from the cached JWKS; an unknown `kid` triggers
//!    exactly one cache refresh before failing (supports key rotation).
//! 3. Verify the signature and `exp` claim.
//! 4. Compare the `iss` claim against the configured issuer, then apply the
//!    optional audience restriction.
//! 5. Return [`Claims`] with the subject id and any entitlement fields
//!    extracted verbatim from the payload.
//!
//! The gate middleware runs before any handler; a request either carries
//! verified [`Claims`] in its extensions or never reaches downstream code.

pub mod keys;
pub mod middleware;
pub mod verifier;

pub use keys::KeySetCache;
pub use middleware::auth_middleware;
pub use verifier::{AuthError, Claims, TokenVerifier};
