//! Proxy tool dispatcher.
//!
//! Runs every call to a dynamically registered tool: registry lookup,
//! per-session activation check, argument validation against the discovered
//! schema, token exchange for the owning server's audience, and the
//! downstream invocation. A downstream 401 invalidates the cached grant and
//! retries the exchange and call exactly once.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::{AuthenticatedPrincipal, TokenExchanger};
use crate::catalog::ServerCatalog;
use crate::downstream::DownstreamClient;
use crate::error::AuthError;
use crate::registry::ProxyToolRegistry;
use crate::schema::validate_arguments;
use crate::session::McpSession;
use crate::{Error, Result};

/// Per-call dispatch logic for dynamic tools
pub struct ProxyDispatcher {
    catalog: Arc<ServerCatalog>,
    registry: Arc<ProxyToolRegistry>,
    exchanger: Arc<TokenExchanger>,
    downstream: Arc<DownstreamClient>,
}

impl ProxyDispatcher {
    /// Wire the dispatcher to its collaborators
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

    /// Forward a `tools/call` for tool `name` to its owning server.
    ///
    /// Returns the downstream `tools/call` result verbatim so content
    /// blocks pass through unchanged.
    pub async fn dispatch(
        &self,
        session: &McpSession,
        principal: &AuthenticatedPrincipal,
        name: &str,
        arguments: &Value,
    ) -> Result<Value> {
        let tool = self
            .registry
            .get(name)
            .ok_or_else(|| Error::ToolNotFound(name.to_string()))?;

        // Session gate; the lock is released before any network call
        {
            let state = session.state.lock().await;
            if !state.enabled.contains_key(&tool.server) {
                return Err(Error::NotEnabled {
                    server: tool.server.clone(),
                });
            }
        }

        let server = self.catalog.get(&tool.server).ok_or_else(|| {
            Error::Internal(format!(
                "registered tool '{name}' references unknown server '{}'",
                tool.server
            ))
        })?;

        // Fast path; the IdP still enforces authoritatively on exchange
        if !principal.has_role(&server.required_role) {
            return Err(Error::PermissionDenied(format!(
                "user '{}' lacks role '{}' required for tool '{name}'",
                principal.username, server.required_role
            )));
        }

        let arguments =
            validate_arguments(arguments, &tool.input_schema).map_err(Error::InvalidArgument)?;

        let token = self
            .exchanger
            .exchange(&principal.raw_token, &server.audience)
            .await?;

        debug!(tool = %name, server = %server.name, "Dispatching proxied call");

        let endpoint = server.mcp_endpoint();
        match self
            .downstream
            .call_tool(&endpoint, &token, name, &arguments)
            .await
        {
            Err(Error::Unauthenticated(AuthError::DownstreamRejected)) => {
                // Stale or revoked grant: force one fresh exchange and retry
                warn!(tool = %name, server = %server.name, "Downstream rejected token, re-exchanging once");
                self.exchanger
                    .invalidate(&principal.raw_token, &server.audience);
                let fresh = self
                    .exchanger
                    .exchange(&principal.raw_token, &server.audience)
                    .await?;
                self.downstream
                    .call_tool(&endpoint, &fresh, name, &arguments)
                    .await
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DownstreamConfig, ExchangeCacheConfig, IdpConfig};
    use crate::protocol::Tool;
    use crate::session::SessionStore;
    use serde_json::json;
    use std::collections::HashSet;

    const CATALOG: &str = r"
servers:
  weather:
    description: Weather conditions and forecasts
    url: http://localhost:8011
    audience: mcp-weather
    required_role: access:weather
";

    fn dispatcher() -> (ProxyDispatcher, Arc<ProxyToolRegistry>) {
        let registry = Arc::new(ProxyToolRegistry::new());
        let dispatcher = ProxyDispatcher::new(
            Arc::new(ServerCatalog::from_yaml(CATALOG).unwrap()),
            Arc::clone(&registry),
            Arc::new(
                TokenExchanger::new(&IdpConfig::default(), &ExchangeCacheConfig::default())
                    .unwrap(),
            ),
            Arc::new(DownstreamClient::new(&DownstreamConfig::default()).unwrap()),
        );
        (dispatcher, registry)
    }

    fn principal(roles: &[&str]) -> AuthenticatedPrincipal {
        AuthenticatedPrincipal {
            subject: "user-1".to_string(),
            username: "alice".to_string(),
            roles: roles.iter().map(|r| (*r).to_string()).collect::<HashSet<_>>(),
            raw_token: "raw-jwt".to_string(),
            expires_at: u64::MAX,
        }
    }

    fn weather_tool() -> Tool {
        Tool {
            name: "get_weather".to_string(),
            title: None,
            description: None,
            input_schema: json!({
                "type": "object",
                "properties": {"location": {"type": "string"}},
                "required": ["location"]
            }),
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let (dispatcher, _registry) = dispatcher();
        let store = SessionStore::new();
        let session = store.create();

        let err = dispatcher
            .dispatch(&session, &principal(&[]), "bogus", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ToolNotFound(_)));
    }

    #[tokio::test]
    async fn call_without_activation_is_precondition_failed() {
        let (dispatcher, registry) = dispatcher();
        registry
            .register_batch("weather", &[weather_tool()])
            .unwrap();
        let store = SessionStore::new();
        let session = store.create();

        let err = dispatcher
            .dispatch(
                &session,
                &principal(&["access:weather"]),
                "get_weather",
                &json!({"location": "Warsaw"}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotEnabled { .. }));
        assert!(err.to_string().contains("enable_server"));
    }

    #[tokio::test]
    async fn schema_violation_is_invalid_argument() {
        let (dispatcher, registry) = dispatcher();
        registry
            .register_batch("weather", &[weather_tool()])
            .unwrap();
        let store = SessionStore::new();
        let session = store.create();
        session
            .state
            .lock()
            .await
            .enabled
            .insert("weather".to_string(), vec!["get_weather".to_string()]);

        let err = dispatcher
            .dispatch(
                &session,
                &principal(&["access:weather"]),
                "get_weather",
                &json!({}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(err.to_string().contains("location"));
    }

    #[tokio::test]
    async fn missing_role_is_denied_before_exchange() {
        let (dispatcher, registry) = dispatcher();
        registry
            .register_batch("weather", &[weather_tool()])
            .unwrap();
        let store = SessionStore::new();
        let session = store.create();
        session
            .state
            .lock()
            .await
            .enabled
            .insert("weather".to_string(), vec!["get_weather".to_string()]);

        let err = dispatcher
            .dispatch(
                &session,
                &principal(&[]),
                "get_weather",
                &json!({"location": "Warsaw"}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
    }
}
