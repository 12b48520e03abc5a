//! LLM Relay Library
//!
//! Authenticated streaming relay between a browser client and a
//! chat-completion provider.
//!
//! # Features
//!
//! - **Bearer authentication**: JWT verification against a remotely published,
//!   rotating JWKS (refresh-on-miss supports key rotation)
//! - **Streaming**: upstream completion fragments re-framed as Server-Sent
//!   Events, delivered incrementally with no whole-response buffering
//! - **Transcoding**: line breaks inside a fragment become single-space
//!   placeholder frames, since an SSE payload cannot carry a literal newline

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod relay;
pub mod server;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
