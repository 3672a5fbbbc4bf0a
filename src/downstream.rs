//! Downstream MCP client (Streamable HTTP).
//!
//! Speaks the minimum MCP exchange the gateway needs against a downstream
//! server: `initialize` → `notifications/initialized` → one operation
//! (`tools/list` or `tools/call`) → best-effort session DELETE. Every request
//! carries `Authorization: Bearer <exchanged token>`; the downstream's
//! assigned `Mcp-Session-Id` is echoed once received. Sessions are
//! short-lived: one logical operation each.

use std::time::Duration;

use reqwest::{Client, StatusCode, header};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::DownstreamConfig;
use crate::error::AuthError;
use crate::protocol::{
    JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION, RequestId, Tool, ToolsListResult,
};
use crate::{Error, Result};

/// Thin MCP client for downstream tool servers
pub struct DownstreamClient {
    http: Client,
    call_timeout: Duration,
    list_timeout: Duration,
}

impl DownstreamClient {
    /// Create a client with pooled connections
    pub fn new(config: &DownstreamConfig) -> Result<Self> {
        let http = Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            call_timeout: config.call_timeout,
            list_timeout: config.list_timeout,
        })
    }

    /// Discover the tools a downstream server advertises.
    ///
    /// # Errors
    ///
    /// `Unauthenticated/DownstreamRejected` if the server answers 401,
    /// `DownstreamUnavailable` on 5xx or network failure.
    pub async fn list_tools(&self, endpoint: &str, token: &str) -> Result<Vec<Tool>> {
        let mut session = self
            .open_session(endpoint, token, self.list_timeout)
            .await?;
        let result = session.request("tools/list", Some(json!({}))).await?;
        session.close().await;

        let list: ToolsListResult = serde_json::from_value(result)
            .map_err(|e| Error::Protocol(format!("Invalid tools/list response: {e}")))?;
        Ok(list.tools)
    }

    /// Invoke a tool on a downstream server, returning the raw `tools/call`
    /// result so content blocks pass through unchanged.
    pub async fn call_tool(
        &self,
        endpoint: &str,
        token: &str,
        name: &str,
        arguments: &Value,
    ) -> Result<Value> {
        let mut session = self
            .open_session(endpoint, token, self.call_timeout)
            .await?;
        let result = session
            .request(
                "tools/call",
                Some(json!({"name": name, "arguments": arguments})),
            )
            .await?;
        session.close().await;
        Ok(result)
    }

    async fn open_session<'a>(
        &'a self,
        endpoint: &str,
        token: &str,
        timeout: Duration,
    ) -> Result<DownstreamSession<'a>> {
        let mut session = DownstreamSession {
            http: &self.http,
            endpoint: endpoint.to_string(),
            token: token.to_string(),
            timeout,
            session_id: None,
            next_id: 1,
        };

        let response = session
            .send(&JsonRpcRequest {
                jsonrpc: "2.0".to_string(),
                id: RequestId::Number(0),
                method: "initialize".to_string(),
                params: Some(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "mcp-auth-gateway",
                        "version": env!("CARGO_PKG_VERSION")
                    }
                })),
            })
            .await?;

        if let Some(error) = response.error {
            return Err(Error::Protocol(format!(
                "Downstream initialize failed: {}",
                error.message
            )));
        }

        session.notify("notifications/initialized").await;
        debug!(endpoint = %session.endpoint, "Downstream session opened");

        Ok(session)
    }
}

/// One short-lived conversation with a downstream server
struct DownstreamSession<'a> {
    http: &'a Client,
    endpoint: String,
    token: String,
    timeout: Duration,
    session_id: Option<String>,
    next_id: i64,
}

impl DownstreamSession<'_> {
    /// Send a request and return its `result`, passing JSON-RPC errors
    /// through unchanged.
    async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id;
        self.next_id += 1;

        let response = self
            .send(&JsonRpcRequest {
                jsonrpc: "2.0".to_string(),
                id: RequestId::Number(id),
                method: method.to_string(),
                params,
            })
            .await?;

        if let Some(error) = response.error {
            return Err(Error::JsonRpc {
                code: error.code,
                message: error.message,
                data: error.data,
            });
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    async fn send(&mut self, request: &JsonRpcRequest) -> Result<JsonRpcResponse> {
        let response = self
            .http
            .post(&self.endpoint)
            .headers(self.headers())
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(map_transport_error)?;

        // Adopt the session id the downstream assigns on initialize
        if let Some(session_id) = response.headers().get("mcp-session-id") {
            if let Ok(id) = session_id.to_str() {
                self.session_id = Some(id.to_string());
            }
        }

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(AuthError::DownstreamRejected.into());
        }
        if status.is_server_error() {
            return Err(Error::DownstreamUnavailable(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(Error::Protocol(format!(
                "Downstream returned HTTP {status}"
            )));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let body = response
            .text()
            .await
            .map_err(|e| Error::DownstreamUnavailable(e.to_string()))?;

        if content_type.contains("text/event-stream") {
            parse_sse_response(&body)
        } else {
            serde_json::from_str(&body)
                .map_err(|e| Error::Protocol(format!("Invalid downstream response: {e}")))
        }
    }

    /// Fire-and-forget notification; failures are logged, not surfaced.
    async fn notify(&mut self, method: &str) {
        let notification = json!({"jsonrpc": "2.0", "method": method});
        let result = self
            .http
            .post(&self.endpoint)
            .headers(self.headers())
            .timeout(self.timeout)
            .json(&notification)
            .send()
            .await;

        if let Err(e) = result {
            warn!(endpoint = %self.endpoint, error = %e, "Downstream notification failed");
        }
    }

    /// Terminate the downstream session (best effort).
    async fn close(&self) {
        if let Some(ref id) = self.session_id {
            let _ = self
                .http
                .delete(&self.endpoint)
                .header("Mcp-Session-Id", id)
                .bearer_auth(&self.token)
                .send()
                .await;
        }
    }

    fn headers(&self) -> header::HeaderMap {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        headers.insert(
            header::ACCEPT,
            "application/json, text/event-stream".parse().unwrap(),
        );
        headers.insert("MCP-Protocol-Version", PROTOCOL_VERSION.parse().unwrap());
        if let Ok(value) = format!("Bearer {}", self.token).parse() {
            headers.insert(header::AUTHORIZATION, value);
        }
        if let Some(ref session_id) = self.session_id {
            if let Ok(value) = session_id.parse() {
                headers.insert("Mcp-Session-Id", value);
            }
        }
        headers
    }
}

fn map_transport_error(err: reqwest::Error) -> Error {
    Error::DownstreamUnavailable(err.to_string())
}

/// Parse a single-event SSE body into a JSON-RPC response
fn parse_sse_response(body: &str) -> Result<JsonRpcResponse> {
    for line in body.lines() {
        if let Some(data) = line.strip_prefix("data: ") {
            return serde_json::from_str(data)
                .map_err(|e| Error::Protocol(format!("Invalid SSE payload: {e}")));
        }
    }
    Err(Error::Protocol("No data in SSE response".to_string()))
}
