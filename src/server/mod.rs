//! Token exchange server
//!
//! Holds the OAuth client secret and the provider refresh token. The
//! refresh token lives only in an HTTP-only cookie; the browser side only
//! ever sees short-lived access tokens.

pub mod audit;
mod cookie;
mod handler;
mod provider;

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub use cookie::{
    REFRESH_COOKIE_MAX_AGE, REFRESH_COOKIE_NAME, clear_cookie, refresh_cookie, refresh_token_from,
};
pub use handler::{ExchangeRequest, ExchangeResponse, RefreshResponse};
pub use provider::{GoogleTokenEndpoint, ProviderError, ProviderTokens, TokenEndpoint};

use crate::config::Config;
use crate::{Error, Result};

/// Shared state of the exchange endpoints
pub struct AuthServer {
    endpoint: Arc<dyn TokenEndpoint>,
    secure_cookies: bool,
}

impl AuthServer {
    /// Create a server over `endpoint`. `secure_cookies` adds the `Secure`
    /// attribute (production deployments).
    #[must_use]
    pub fn new(endpoint: Arc<dyn TokenEndpoint>, secure_cookies: bool) -> Self {
        Self {
            endpoint,
            secure_cookies,
        }
    }

    /// Create a server talking to Google with the configured credentials
    pub fn from_config(config: &Config) -> Result<Self> {
        let endpoint = GoogleTokenEndpoint::new(&config.oauth)?;
        Ok(Self::new(Arc::new(endpoint), config.oauth.production))
    }

    /// Whether client credentials are present
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.endpoint.is_configured()
    }
}

/// Full router: auth routes plus tracing and panic recovery
pub fn routes(server: Arc<AuthServer>) -> Router {
    handler::auth_routes(server)
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
}

/// Bind and serve until Ctrl+C or SIGTERM
pub async fn run(config: &Config) -> Result<()> {
    let server = Arc::new(AuthServer::from_config(config)?);
    if !server.is_configured() {
        warn!("GOOGLE_CLIENT_ID / GOOGLE_CLIENT_SECRET not set, endpoints will answer 500");
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::Config(format!("Failed to bind {addr}: {e}")))?;

    info!("Context Viewer auth server listening on http://{addr}");
    info!("  Exchange: POST http://{addr}/api/auth/exchange");
    info!("  Refresh:  POST http://{addr}/api/auth/refresh");
    info!("  Revoke:   POST http://{addr}/api/auth/revoke");
    info!("  Health:   GET  http://{addr}/health");
    if config.oauth.production {
        info!("  Cookies:  Secure");
    }

    axum::serve(listener, routes(server))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::Internal(e.to_string()))?;

    info!("Server stopped");
    Ok(())
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
