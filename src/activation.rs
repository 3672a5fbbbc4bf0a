//! Activation engine: per-session server activation over the global
//! proxy-tool registry.
//!
//! `search` and `enable` back the gateway's built-in tools; `reset` clears
//! one session. Activating a server runs the full chain - role pre-check,
//! RFC 8693 exchange, downstream discovery, global registration - while the
//! caller's session mutex is held, which serializes enables within a session
//! and prevents duplicate discovery of the same server.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::auth::{AuthenticatedPrincipal, TokenExchanger};
use crate::catalog::ServerCatalog;
use crate::downstream::DownstreamClient;
use crate::registry::ProxyToolRegistry;
use crate::session::McpSession;
use crate::{Error, Result};

/// One row of `search_servers` output
#[derive(Debug, Clone, Serialize)]
pub struct ServerSummary {
    /// Catalog name
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// Whether the calling session has activated this server
    pub enabled: bool,
    /// Whether the calling principal holds the required role
    pub accessible: bool,
    /// Realm role required to activate this server
    pub required_role: String,
}

/// Outcome of a successful `enable`
#[derive(Debug, Clone)]
pub struct Activation {
    /// False when the server was already active in this session
    pub newly_enabled: bool,
    /// Tool names now callable, in discovery order
    pub tools: Vec<String>,
}

/// Owns activation flow and search over the catalog
pub struct ActivationEngine {
    catalog: Arc<ServerCatalog>,
    registry: Arc<ProxyToolRegistry>,
    exchanger: Arc<TokenExchanger>,
    downstream: Arc<DownstreamClient>,
}

impl ActivationEngine {
    /// Wire the engine to its collaborators
    #[must_use]
    pub fn new(
        catalog: Arc<ServerCatalog>,
        registry: Arc<ProxyToolRegistry>,
        exchanger: Arc<TokenExchanger>,
        downstream: Arc<DownstreamClient>,
    ) -> Self {
        Self {
            catalog,
            registry,
            exchanger,
            downstream,
        }
    }

    /// Case-insensitive substring search over server names and
    /// descriptions; an empty query matches everything. The full catalog is
    /// always returned, in catalog order, with per-session `enabled` and
    /// per-principal `accessible` flags.
    pub async fn search(
        &self,
        query: &str,
        session: &McpSession,
        principal: &AuthenticatedPrincipal,
    ) -> Vec<ServerSummary> {
        let query = query.to_lowercase();
        let state = session.state.lock().await;

        self.catalog
            .iter()
            .filter(|server| {
                query.is_empty()
                    || server.name.to_lowercase().contains(&query)
                    || server.description.to_lowercase().contains(&query)
            })
            .map(|server| ServerSummary {
                name: server.name.clone(),
                description: server.description.clone(),
                enabled: state.enabled.contains_key(&server.name),
                accessible: principal.has_role(&server.required_role),
                required_role: server.required_role.clone(),
            })
            .collect()
    }

    /// Activate `server_name` for the calling session.
    ///
    /// Idempotent: a second enable returns the recorded tool list unchanged.
    /// A failure anywhere before the session record leaves no session state
    /// and no registry change.
    pub async fn enable(
        &self,
        session: &McpSession,
        server_name: &str,
        principal: &AuthenticatedPrincipal,
    ) -> Result<Activation> {
        let server = self
            .catalog
            .get(server_name)
            .ok_or_else(|| Error::ServerNotFound(server_name.to_string()))?;

        // Holding the session lock across the network calls below is the
        // single-flight guarantee for (session, server).
        let mut state = session.state.lock().await;

        if let Some(tools) = state.enabled.get(server_name) {
            debug!(session = %session.id, server = %server_name, "Server already enabled");
            return Ok(Activation {
                newly_enabled: false,
                tools: tools.clone(),
            });
        }

        // Fast path; the IdP still enforces authoritatively on exchange
        if !principal.has_role(&server.required_role) {
            return Err(Error::PermissionDenied(format!(
                "user '{}' lacks role '{}' required for server '{}'",
                principal.username, server.required_role, server.name
            )));
        }

        let token = self
            .exchanger
            .exchange(&principal.raw_token, &server.audience)
            .await?;

        let discovered = self
            .downstream
            .list_tools(&server.mcp_endpoint(), &token)
            .await?;

        let tools = self.registry.register_batch(&server.name, &discovered)?;

        state
            .enabled
            .insert(server.name.clone(), tools.clone());

        info!(
            session = %session.id,
            server = %server.name,
            tools = tools.len(),
            "Server enabled"
        );

        Ok(Activation {
            newly_enabled: true,
            tools,
        })
    }

    /// Drop the caller session's activations and the principal's cached
    /// exchanged tokens. Global proxies stay registered - other sessions may
    /// still need them.
    pub async fn reset(&self, session: &McpSession, principal: &AuthenticatedPrincipal) {
        let mut state = session.state.lock().await;
        let dropped = state.enabled.len();
        state.enabled.clear();
        drop(state);

        self.exchanger.invalidate_subject(&principal.raw_token);

        info!(session = %session.id, dropped, "Session reset");
    }
}
