//! Completion adapter: turns a validated request into an upstream call and
//! exposes the provider's output as a lazy sequence of text fragments.
//!
//! The provider speaks the OpenAI-compatible streaming protocol: an SSE byte
//! stream of `data: {json}` lines terminated by `data: [DONE]`. Fragment
//! boundaries are provider-determined; a fragment may contain zero, one, or
//! several line breaks.

use std::pin::Pin;
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::UpstreamConfig;
use crate::{Error, Result};

/// One role-tagged message in a completion request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    /// Message role (`system` or `user`).
    pub role: String,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// Build a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Build a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Request sent to the completion provider. Constructed per inbound call,
/// never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    /// Model identifier.
    pub model: String,
    /// Ordered role-tagged messages.
    pub messages: Vec<ChatMessage>,
    /// Always true in this relay.
    pub stream: bool,
}

/// Lazy, finite, non-restartable sequence of text fragments.
///
/// Ends with `Ok` items exhausted on clean completion; yields a terminal
/// `Err` when the upstream aborts mid-stream, so callers can tell the two
/// apart.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Seam between the relay endpoint and the completion provider.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Open the upstream stream for one request.
    async fn stream_completion(&self, request: CompletionRequest) -> Result<FragmentStream>;
}

/// One parsed chunk of the provider's streaming response.
#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// Extract the delta text from one upstream `data:` payload.
fn delta_text(data: &str) -> serde_json::Result<Option<String>> {
    let chunk: StreamChunk = serde_json::from_str(data)?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|text| !text.is_empty()))
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiBackend {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl OpenAiBackend {
    /// Create from the upstream configuration and a resolved API key.
    pub fn new(config: &UpstreamConfig, api_key: String) -> Result<Self> {
        // Only the connect phase is bounded; a total timeout would cut
        // long-running streams short.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(Error::Http)?;

        Ok(Self {
            http,
            api_url: config.api_url.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    async fn stream_completion(&self, request: CompletionRequest) -> Result<FragmentStream> {
        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        let mut bytes = response.bytes_stream();

        let fragments = stream! {
            let mut buf = BytesMut::new();
            let mut done = false;

            'read: while let Some(chunk) = bytes.next().await {
                let chunk: Bytes = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(Error::from(e));
                        return;
                    }
                };
                buf.extend_from_slice(&chunk);

                // Lines are delimited by raw b'\n'; a multi-byte character
                // can straddle two body chunks, so only complete lines are
                // decoded as UTF-8.
                while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                    let line = buf.split_to(pos + 1);
                    let Ok(line) = std::str::from_utf8(&line[..pos]) else {
                        warn!("Skipping non-UTF-8 upstream line");
                        continue;
                    };
                    let line = line.trim_end_matches('\r');

                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim_start();
                    if data.is_empty() {
                        continue;
                    }
                    if data == "[DONE]" {
                        done = true;
                        break 'read;
                    }

                    match delta_text(data) {
                        Ok(Some(text)) => yield Ok(text),
                        Ok(None) => {}
                        Err(e) => {
                            warn!(error = %e, "Skipping unparseable upstream chunk");
                        }
                    }
                }
            }

            if !done {
                // The provider never sent its end-of-stream signal.
                yield Err(Error::UpstreamAborted);
            }
        };

        Ok(Box::pin(fragments))
    }
}
