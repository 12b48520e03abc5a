//! Error types for the relay

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Result type alias for the relay
pub type Result<T> = std::result::Result<T, Error>;

/// Relay errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Authentication failure
    #[error(transparent)]
    Auth(#[from] crate::auth::AuthError),

    /// Request body failed boundary validation
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The provider stream ended without its end-of-stream signal
    #[error("Upstream stream ended before completion")]
    UpstreamAborted,

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Http(_) | Self::UpstreamAborted => StatusCode::BAD_GATEWAY,
            Self::Config(_) | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_input_maps_to_unprocessable_entity() {
        let response = Error::InvalidInput("field 'prompt' must be non-empty".to_string())
            .into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn upstream_abort_maps_to_bad_gateway() {
        let response = Error::UpstreamAborted.into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
