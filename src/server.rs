//! Relay server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use crate::auth::{KeySetCache, TokenVerifier};
use crate::config::Config;
use crate::relay::router::{AppState, create_router};
use crate::relay::upstream::OpenAiBackend;
use crate::{Error, Result};

/// Authenticated streaming relay server
pub struct Relay {
    config: Config,
}

impl Relay {
    /// Create a new relay from validated configuration
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Run the relay until a shutdown signal arrives
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let keys = Arc::new(KeySetCache::new(
            self.config.auth.jwks_url.clone(),
            Duration::from_secs(self.config.auth.cache_ttl_secs),
        ));
        let verifier = Arc::new(TokenVerifier::new(Arc::clone(&keys), &self.config.auth));

        let api_key = self.config.upstream.resolve_api_key()?;
        let backend = Arc::new(OpenAiBackend::new(&self.config.upstream, api_key)?);

        let state = Arc::new(AppState {
            backend,
            verifier,
            model: self.config.upstream.model.clone(),
            prompt: self.config.prompt.clone(),
        });
        let app = create_router(state, &self.config.server.cors_origins);

        let listener = TcpListener::bind(addr).await?;

        info!(host = %self.config.server.host, port = self.config.server.port, "Listening");
        info!(issuer = %self.config.auth.issuer, jwks = %self.config.auth.jwks_url, "Bearer tokens required on /api");
        info!(model = %self.config.upstream.model, "Relaying completions");
        if self.config.server.cors_origins.is_empty() {
            warn!("CORS is permissive - set server.cors_origins to restrict browser origins");
        }

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("Server stopped");
        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
