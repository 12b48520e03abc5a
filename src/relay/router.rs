//! HTTP router and the relay endpoint.
//!
//! Per-request lifecycle: the auth gate authenticates (or rejects) the
//! request, the handler validates the body and opens the upstream stream,
//! and the transcoded frames are flushed to the client until the stream
//! completes or aborts.

use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::State,
    http::{HeaderValue, header},
    middleware,
    response::{IntoResponse, Response, Sse},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

use super::transcode::sse_stream;
use super::upstream::{ChatMessage, CompletionBackend, CompletionRequest};
use crate::auth::{Claims, TokenVerifier, auth_middleware};
use crate::config::PromptConfig;
use crate::{Error, Result};

/// Shared application state
pub struct AppState {
    /// Completion provider client
    pub backend: Arc<dyn CompletionBackend>,
    /// Bearer-token verifier
    pub verifier: Arc<TokenVerifier>,
    /// Model identifier for upstream requests
    pub model: String,
    /// Prompt configuration
    pub prompt: PromptConfig,
}

/// Create the router
pub fn create_router(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    let verifier = Arc::clone(&state.verifier);

    // Everything under /api sits behind the auth gate; /health does not.
    let api = Router::new()
        .route("/api/completions", post(completion_handler))
        .layer(middleware::from_fn_with_state(verifier, auth_middleware));

    Router::new()
        .route("/health", get(health_handler))
        .merge(api)
        .layer(CatchPanicLayer::new())
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build the CORS layer for the browser frontend.
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

/// Completion input: free-form prompt or a structured brief.
/// The schema is caller-defined; every required field must be non-empty.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CompletionInput {
    /// Free-form prompt
    Prompt {
        /// The prompt text
        prompt: String,
    },
    /// Structured brief rendered into a user prompt
    Brief {
        /// Who or what the brief is about
        subject: String,
        /// Date of the brief
        date: String,
        /// Free-text notes
        notes: String,
    },
}

impl CompletionInput {
    /// Boundary validation: all required fields present and non-empty.
    fn validate(&self) -> Result<()> {
        let empty = |field: &str| Error::InvalidInput(format!("field '{field}' must be non-empty"));

        match self {
            Self::Prompt { prompt } => {
                if prompt.trim().is_empty() {
                    return Err(empty("prompt"));
                }
            }
            Self::Brief { subject, date, notes } => {
                if subject.trim().is_empty() {
                    return Err(empty("subject"));
                }
                if date.trim().is_empty() {
                    return Err(empty("date"));
                }
                if notes.trim().is_empty() {
                    return Err(empty("notes"));
                }
            }
        }
        Ok(())
    }

    /// Render the user message for the completion request.
    fn user_prompt(&self) -> String {
        match self {
            Self::Prompt { prompt } => prompt.clone(),
            Self::Brief { subject, date, notes } => format!(
                "Create the summary, next steps and draft reply for:\nSubject: {subject}\nDate: {date}\nNotes:\n{notes}"
            ),
        }
    }
}

/// POST /api/completions: validate input, open the upstream stream, and
/// relay transcoded frames. Authentication already happened in the gate.
async fn completion_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(input): Json<CompletionInput>,
) -> Result<Response> {
    input.validate()?;

    let request = CompletionRequest {
        model: state.model.clone(),
        messages: vec![
            ChatMessage::system(state.prompt.system.clone()),
            ChatMessage::user(input.user_prompt()),
        ],
        stream: true,
    };

    debug!(subject = %claims.sub, model = %state.model, "Opening upstream completion stream");
    let fragments = state.backend.stream_completion(request).await.map_err(|e| {
        warn!(error = %e, "Failed to open upstream completion stream");
        e
    })?;

    info!(subject = %claims.sub, "Streaming completion");
    Ok(Sse::new(sse_stream(fragments)).into_response())
}

/// GET /health: liveness probe, outside the auth gate
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn deserializes_free_form_prompt() {
        let input: CompletionInput =
            serde_json::from_str(r#"{"prompt": "new ideas for agents"}"#).unwrap();
        assert!(matches!(input, CompletionInput::Prompt { .. }));
        input.validate().unwrap();
    }

    #[test]
    fn deserializes_structured_brief() {
        let input: CompletionInput = serde_json::from_str(
            r#"{"subject": "Quarterly sync", "date": "2026-08-25", "notes": "went well"}"#,
        )
        .unwrap();
        assert!(matches!(input, CompletionInput::Brief { .. }));
        input.validate().unwrap();
    }

    #[test]
    fn rejects_blank_prompt() {
        let input: CompletionInput = serde_json::from_str(r#"{"prompt": "   "}"#).unwrap();
        let err = input.validate().unwrap_err();
        assert!(err.to_string().contains("prompt"));
    }

    #[test]
    fn rejects_brief_with_empty_notes() {
        let input: CompletionInput =
            serde_json::from_str(r#"{"subject": "s", "date": "d", "notes": ""}"#).unwrap();
        let err = input.validate().unwrap_err();
        assert!(err.to_string().contains("notes"));
    }

    #[test]
    fn brief_renders_all_fields_into_user_prompt() {
        let input = CompletionInput::Brief {
            subject: "Quarterly sync".to_string(),
            date: "2026-08-25".to_string(),
            notes: "action items pending".to_string(),
        };
        let prompt = input.user_prompt();
        assert!(prompt.contains("Subject: Quarterly sync"));
        assert!(prompt.contains("Date: 2026-08-25"));
        assert!(prompt.contains("action items pending"));
    }

    #[test]
    fn free_form_prompt_passes_through_unchanged() {
        let input = CompletionInput::Prompt {
            prompt: "Come up with a new business idea".to_string(),
        };
        assert_eq!(input.user_prompt(), "Come up with a new business idea");
    }
}
