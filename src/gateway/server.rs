//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

use super::router::{AppState, create_router};
use crate::activation::ActivationEngine;
use crate::auth::{TokenExchanger, TokenVerifier};
use crate::catalog::ServerCatalog;
use crate::config::Config;
use crate::dispatch::ProxyDispatcher;
use crate::downstream::DownstreamClient;
use crate::registry::ProxyToolRegistry;
use crate::session::SessionStore;
use crate::{Error, Result};

/// Authenticated MCP gateway server
pub struct Gateway {
    config: Config,
    state: Arc<AppState>,
    verifier: Arc<TokenVerifier>,
}

impl Gateway {
    /// Create a new gateway: load the catalog and wire all components
    pub fn new(config: Config) -> Result<Self> {
        let catalog = Arc::new(ServerCatalog::load(&config.catalog_path)?);
        Self::with_catalog(config, catalog)
    }

    /// Create a gateway over an already-loaded catalog
    pub fn with_catalog(config: Config, catalog: Arc<ServerCatalog>) -> Result<Self> {
        let verifier = Arc::new(TokenVerifier::new(&config.idp)?);
        let exchanger = Arc::new(TokenExchanger::new(&config.idp, &config.exchange_cache)?);
        let downstream = Arc::new(DownstreamClient::new(&config.downstream)?);
        let registry = Arc::new(ProxyToolRegistry::new());
        let sessions = Arc::new(SessionStore::new());

        let engine = ActivationEngine::new(
            Arc::clone(&catalog),
            Arc::clone(&registry),
            Arc::clone(&exchanger),
            Arc::clone(&downstream),
        );
        let dispatcher = ProxyDispatcher::new(
            Arc::clone(&catalog),
            Arc::clone(&registry),
            exchanger,
            downstream,
        );

        for server in catalog.iter() {
            info!(
                server = %server.name,
                audience = %server.audience,
                required_role = %server.required_role,
                "Registered catalog server"
            );
        }

        let state = Arc::new(AppState {
            engine,
            dispatcher,
            sessions,
            registry,
            catalog,
        });

        Ok(Self {
            config,
            state,
            verifier,
        })
    }

    /// The axum router serving this gateway (used directly by tests)
    #[must_use]
    pub fn router(&self) -> Router {
        create_router(Arc::clone(&self.state), Arc::clone(&self.verifier))
    }

    /// Run the gateway until ctrl-c / SIGTERM
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.listen_port,
        );

        let app = self.router();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Config(format!("Failed to bind {addr}: {e}")))?;

        info!("============================================================");
        info!("MCP AUTH GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.listen_port, "Listening");
        info!(issuer = %self.config.idp.issuer_url, audience = %self.config.idp.gateway_audience, "IdP");
        info!(servers = self.state.catalog.len(), "Catalog loaded");
        info!("Built-in tools: search_servers, enable_server, _reset_gateway");
        info!("Use enable_server to dynamically load more tools");
        info!("============================================================");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        info!("Gateway shutdown complete");
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
