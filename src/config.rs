//! Configuration management

use std::{env, path::Path};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before resolving `env:VAR` references.
    /// Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Authentication configuration
    pub auth: AuthConfig,
    /// Completion provider configuration
    pub upstream: UpstreamConfig,
    /// Prompt configuration
    pub prompt: PromptConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Browser origins allowed by CORS. Empty = permissive.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            cors_origins: Vec::new(),
        }
    }
}

/// Bearer-token verification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// URL of the identity provider's published JWKS document
    pub jwks_url: String,
    /// Expected `iss` claim; tokens from any other issuer are rejected
    pub issuer: String,
    /// Accepted `aud` values. Empty disables the audience check.
    pub audiences: Vec<String>,
    /// How long a fetched key set stays fresh, in seconds
    pub cache_ttl_secs: u64,
    /// Clock-skew tolerance for `exp`, in seconds
    pub leeway_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwks_url: String::new(),
            issuer: String::new(),
            audiences: Vec::new(),
            cache_ttl_secs: 3600,
            leeway_secs: 60,
        }
    }
}

/// Completion provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Chat-completions endpoint (OpenAI-compatible)
    pub api_url: String,
    /// API key. Supports a literal value or `env:VAR_NAME`.
    pub api_key: String,
    /// Model identifier sent with every completion request
    pub model: String,
    /// Connect timeout in seconds. A total request timeout would cut
    /// long-running streams short, so only the connect phase is bounded.
    pub connect_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.groq.com/openai/v1/chat/completions".to_string(),
            api_key: "env:UPSTREAM_API_KEY".to_string(),
            model: "llama-3.1-8b-instant".to_string(),
            connect_timeout_secs: 10,
        }
    }
}

impl UpstreamConfig {
    /// Resolve the API key (expand `env:VAR_NAME` references)
    pub fn resolve_api_key(&self) -> Result<String> {
        let key = if let Some(var) = self.api_key.strip_prefix("env:") {
            env::var(var)
                .map_err(|_| Error::Config(format!("environment variable {var} is not set")))?
        } else {
            self.api_key.clone()
        };

        if key.is_empty() {
            return Err(Error::Config("upstream.api_key resolved to empty".to_string()));
        }
        Ok(key)
    }
}

/// Prompt configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// System prompt prepended to every completion request
    pub system: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system: "You are a helpful assistant. \
                     Keep answers concise and well-structured."
                .to_string(),
        }
    }
}

impl Config {
    /// Load configuration from an optional YAML file merged with
    /// `LLM_RELAY_*` environment variables (e.g. `LLM_RELAY_SERVER__PORT`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }

        let config: Self = figment
            .merge(Env::prefixed("LLM_RELAY_").split("__"))
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        Ok(config)
    }

    /// Load configured env files into the process environment
    fn load_env_files(&self) {
        for file in &self.env_files {
            match dotenvy::from_path(file) {
                Ok(()) => debug!(file = %file, "Loaded environment file"),
                Err(e) => debug!(file = %file, error = %e, "Skipping environment file"),
            }
        }
    }

    /// Check that the settings the relay cannot run without are present
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwks_url.is_empty() {
            return Err(Error::Config("auth.jwks_url is required".to_string()));
        }
        if self.auth.issuer.is_empty() {
            return Err(Error::Config("auth.issuer is required".to_string()));
        }
        if self.upstream.api_url.is_empty() {
            return Err(Error::Config("upstream.api_url is required".to_string()));
        }
        if self.upstream.model.is_empty() {
            return Err(Error::Config("upstream.model is required".to_string()));
        }
        Ok(())
    }
}
