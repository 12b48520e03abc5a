//! Command-line interface

use std::path::PathBuf;

use clap::Parser;

/// Authenticated streaming relay for chat completions
#[derive(Parser, Debug)]
#[command(name = "llm-relay")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "LLM_RELAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "LLM_RELAY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "LLM_RELAY_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LLM_RELAY_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "LLM_RELAY_LOG_FORMAT")]
    pub log_format: Option<String>,
}
