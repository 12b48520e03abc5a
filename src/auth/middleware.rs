//! Authentication gate middleware.
//!
//! Every request either leaves here with verified [`Claims`] attached to its
//! extensions or is short-circuited with a 401 before any downstream work.
//! Token contents are never logged; only the failure kind is.

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{debug, warn};

use super::verifier::{AuthError, TokenVerifier};

/// Authentication middleware
pub async fn auth_middleware(
    State(verifier): State<Arc<TokenVerifier>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    let Some(token) = bearer_token(request.headers()) else {
        warn!(path = %path, "Missing Authorization header");
        return unauthorized_response(&AuthError::MissingToken);
    };

    match verifier.verify(token).await {
        Ok(claims) => {
            debug!(subject = %claims.sub, path = %path, "Authenticated request");
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        Err(e) => {
            warn!(path = %path, error = %e, "Rejected bearer token");
            unauthorized_response(&e)
        }
    }
}

/// Extract the bearer token from the Authorization header.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.strip_prefix("Bearer ")
                .or_else(|| v.strip_prefix("bearer "))
        })
}

/// Create a 401 Unauthorized response
fn unauthorized_response(error: &AuthError) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Bearer")],
        Json(json!({ "error": error.to_string() })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn extracts_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc.def.ghi"),
        );
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi"));
    }

    #[test]
    fn accepts_lowercase_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("bearer abc.def.ghi"),
        );
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi"));
    }

    #[test]
    fn rejects_other_schemes() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Basic dXNlcjpwYXNz"),
        );
        assert_eq!(bearer_token(&headers), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn unauthorized_response_sets_challenge_header() {
        let response = unauthorized_response(&AuthError::Expired);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer"
        );
    }
}
