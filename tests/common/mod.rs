//! Shared test harness: RSA fixtures, a mock IdP, mock downstream MCP
//! servers, and a gateway spawned on an ephemeral port.
//!
//! The fixtures under `tests/fixtures/` hold a JWKS and RS256-signed JWTs
//! for issuer `https://idp.example.test/realms/gateway` with audience
//! `mcp-gateway` (kid `gw-test-key-1`). The mock IdP serves that JWKS and a
//! scriptable token-exchange endpoint; mock downstream servers accept only
//! the token the IdP mints for their audience.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::{
    Json, Router,
    extract::{Form, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use parking_lot::RwLock;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use mcp_auth_gateway::catalog::ServerCatalog;
use mcp_auth_gateway::config::Config;
use mcp_auth_gateway::gateway::Gateway;

/// Issuer baked into the signed fixture tokens
pub const ISSUER: &str = "https://idp.example.test/realms/gateway";
/// Audience baked into the signed fixture tokens
pub const GATEWAY_AUDIENCE: &str = "mcp-gateway";

pub const JWKS_JSON: &str = include_str!("../fixtures/jwks.json");
const TOKENS_JSON: &str = include_str!("../fixtures/tokens.json");

/// A pre-signed fixture token by name: `valid`, `two_roles`, `no_roles`,
/// `expired`, `wrong_aud`, `wrong_iss`, `no_username`, `aud_array`.
pub fn token(name: &str) -> String {
    let tokens: HashMap<String, String> =
        serde_json::from_str(TOKENS_JSON).expect("fixture tokens parse");
    tokens
        .get(name)
        .unwrap_or_else(|| panic!("no fixture token named '{name}'"))
        .clone()
}

/// The `valid` token with its last signature byte flipped
pub fn tampered_token() -> String {
    let mut t = token("valid");
    let last = t.pop().expect("token not empty");
    t.push(if last == 'A' { 'B' } else { 'A' });
    t
}

/// The exchanged token the mock IdP mints for an audience
pub fn exchanged_token_for(audience: &str) -> String {
    format!("xt-{audience}")
}

// ============================================================================
// Mock IdP
// ============================================================================

#[derive(Default)]
struct IdpState {
    /// JWKS document currently served
    jwks: RwLock<Value>,
    /// Number of JWKS fetches observed
    jwks_fetches: AtomicUsize,
    /// Number of token-exchange requests observed
    exchanges: AtomicUsize,
    /// Audiences answered with 403
    denied_audiences: RwLock<HashSet<String>>,
    /// Answer the next N exchanges with HTTP 500
    fail_exchanges: AtomicUsize,
    /// Answer every exchange with 400 invalid_grant
    invalid_grant: RwLock<bool>,
    /// `expires_in` reported on minted tokens
    expires_in: RwLock<Option<u64>>,
}

/// A scriptable OIDC IdP: JWKS endpoint plus RFC 8693 token endpoint
#[derive(Clone)]
pub struct MockIdp {
    state: Arc<IdpState>,
    /// Base URL (http://127.0.0.1:port)
    pub base_url: String,
}

impl MockIdp {
    /// Spawn the IdP serving the fixture JWKS
    pub async fn spawn() -> Self {
        Self::spawn_with_jwks(serde_json::from_str(JWKS_JSON).expect("fixture jwks parse")).await
    }

    /// Spawn the IdP serving an arbitrary JWKS document
    pub async fn spawn_with_jwks(jwks: Value) -> Self {
        let state = Arc::new(IdpState {
            jwks: RwLock::new(jwks),
            expires_in: RwLock::new(Some(300)),
            ..Default::default()
        });

        let app = Router::new()
            .route("/certs", get(jwks_handler))
            .route("/token", post(token_handler))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind idp");
        let addr = listener.local_addr().expect("idp addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve idp");
        });

        Self {
            state,
            base_url: format!("http://{addr}"),
        }
    }

    pub fn jwks_uri(&self) -> String {
        format!("{}/certs", self.base_url)
    }

    pub fn token_endpoint(&self) -> String {
        format!("{}/token", self.base_url)
    }

    pub fn jwks_fetches(&self) -> usize {
        self.state.jwks_fetches.load(Ordering::SeqCst)
    }

    pub fn exchanges(&self) -> usize {
        self.state.exchanges.load(Ordering::SeqCst)
    }

    /// Replace the served JWKS (key rotation)
    pub fn set_jwks(&self, jwks: Value) {
        *self.state.jwks.write() = jwks;
    }

    /// Deny exchanges for one audience with HTTP 403
    pub fn deny_audience(&self, audience: &str) {
        self.state.denied_audiences.write().insert(audience.to_string());
    }

    /// Answer the next `n` exchanges with HTTP 500
    pub fn fail_next_exchanges(&self, n: usize) {
        self.state.fail_exchanges.store(n, Ordering::SeqCst);
    }

    /// Answer every exchange with 400 `invalid_grant`
    pub fn set_invalid_grant(&self, on: bool) {
        *self.state.invalid_grant.write() = on;
    }

    /// Control the `expires_in` reported on minted tokens
    pub fn set_expires_in(&self, secs: Option<u64>) {
        *self.state.expires_in.write() = secs;
    }
}

async fn jwks_handler(State(state): State<Arc<IdpState>>) -> impl IntoResponse {
    state.jwks_fetches.fetch_add(1, Ordering::SeqCst);
    Json(state.jwks.read().clone())
}

async fn token_handler(
    State(state): State<Arc<IdpState>>,
    Form(form): Form<HashMap<String, String>>,
) -> impl IntoResponse {
    state.exchanges.fetch_add(1, Ordering::SeqCst);

    if state
        .fail_exchanges
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
    {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "server_error"})),
        );
    }

    if *state.invalid_grant.read() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "invalid_grant",
                "error_description": "Invalid subject token"
            })),
        );
    }

    assert_eq!(
        form.get("grant_type").map(String::as_str),
        Some("urn:ietf:params:oauth:grant-type:token-exchange"),
        "exchange must use the RFC 8693 grant type"
    );
    assert_eq!(
        form.get("subject_token_type").map(String::as_str),
        Some("urn:ietf:params:oauth:token-type:access_token"),
    );
    assert!(form.contains_key("subject_token"));

    let audience = form.get("audience").cloned().unwrap_or_default();

    if state.denied_audiences.read().contains(&audience) {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({
                "error": "access_denied",
                "error_description": "Client not allowed to exchange for this audience"
            })),
        );
    }

    let mut body = json!({
        "access_token": exchanged_token_for(&audience),
        "token_type": "Bearer",
    });
    if let Some(secs) = *state.expires_in.read() {
        body["expires_in"] = json!(secs);
    }

    (StatusCode::OK, Json(body))
}

// ============================================================================
// Mock downstream MCP server
// ============================================================================

#[derive(Default)]
struct DownstreamState {
    /// Bearer token this server accepts
    required_token: String,
    /// Tools advertised on tools/list
    tools: Vec<Value>,
    /// Reject the next N authenticated requests with 401
    reject_next: AtomicUsize,
    /// Every bearer token observed, in order
    seen_tokens: RwLock<Vec<String>>,
    /// Number of 401 responses produced
    rejections: AtomicUsize,
    /// tools/call invocations: (tool name, arguments)
    calls: RwLock<Vec<(String, Value)>>,
    /// Total POST /mcp requests observed
    requests: AtomicUsize,
}

/// A bearer-checked downstream MCP server speaking Streamable HTTP
#[derive(Clone)]
pub struct MockDownstream {
    state: Arc<DownstreamState>,
    /// Base URL, suitable for a catalog `url` field
    pub base_url: String,
}

impl MockDownstream {
    /// Spawn a downstream accepting `required_token` and advertising `tools`
    pub async fn spawn(required_token: &str, tools: Vec<Value>) -> Self {
        let state = Arc::new(DownstreamState {
            required_token: required_token.to_string(),
            tools,
            ..Default::default()
        });

        let app = Router::new()
            .route(
                "/mcp",
                post(downstream_handler).delete(|| async { StatusCode::NO_CONTENT }),
            )
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind downstream");
        let addr = listener.local_addr().expect("downstream addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve downstream");
        });

        Self {
            state,
            base_url: format!("http://{addr}"),
        }
    }

    /// Reject the next `n` requests with 401 regardless of token
    pub fn reject_next(&self, n: usize) {
        self.state.reject_next.store(n, Ordering::SeqCst);
    }

    /// Every bearer token observed so far
    pub fn seen_tokens(&self) -> Vec<String> {
        self.state.seen_tokens.read().clone()
    }

    /// Number of 401 responses produced
    pub fn rejections(&self) -> usize {
        self.state.rejections.load(Ordering::SeqCst)
    }

    /// Recorded tools/call invocations
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.state.calls.read().clone()
    }

    /// Total POST /mcp requests observed
    pub fn requests(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }
}

async fn downstream_handler(
    State(state): State<Arc<DownstreamState>>,
    headers: HeaderMap,
    Json(request): Json<Value>,
) -> impl IntoResponse {
    state.requests.fetch_add(1, Ordering::SeqCst);

    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("")
        .to_string();
    state.seen_tokens.write().push(bearer.clone());

    let forced_reject = state
        .reject_next
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();

    if forced_reject || bearer != state.required_token {
        state.rejections.fetch_add(1, Ordering::SeqCst);
        return (StatusCode::UNAUTHORIZED, HeaderMap::new(), Json(json!({"error": "invalid_token"})))
            .into_response();
    }

    let method = request.get("method").and_then(Value::as_str).unwrap_or("");
    let id = request.get("id").cloned().unwrap_or(Value::Null);

    let mut headers = HeaderMap::new();
    headers.insert("mcp-session-id", "downstream-session-1".parse().unwrap());

    let response = match method {
        "initialize" => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "protocolVersion": "2025-03-26",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "mock-downstream", "version": "0.0.1"}
            }
        }),
        "notifications/initialized" => {
            return (StatusCode::ACCEPTED, headers, Json(json!({}))).into_response();
        }
        "tools/list" => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {"tools": state.tools.clone()}
        }),
        "tools/call" => {
            let name = request
                .pointer("/params/name")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            let arguments = request
                .pointer("/params/arguments")
                .cloned()
                .unwrap_or(json!({}));
            state.calls.write().push((name.clone(), arguments.clone()));

            if name == "failing_tool" {
                json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": -32050, "message": "downstream exploded"}
                })
            } else {
                json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {
                        "content": [{"type": "text", "text": format!("{name} ok")}],
                        "isError": false
                    }
                })
            }
        }
        _ => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": -32601, "message": format!("Method not found: {method}")}
        }),
    };

    (StatusCode::OK, headers, Json(response)).into_response()
}

/// Tool definitions a mock weather server advertises
pub fn weather_tools() -> Vec<Value> {
    vec![
        json!({
            "name": "get_weather",
            "description": "Get current weather for a location",
            "inputSchema": {
                "type": "object",
                "properties": {"location": {"type": "string"}},
                "required": ["location"]
            }
        }),
        json!({
            "name": "get_forecast",
            "description": "Get weather forecast for a location",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "location": {"type": "string"},
                    "days": {"type": "integer"}
                },
                "required": ["location"]
            }
        }),
    ]
}

// ============================================================================
// Gateway under test
// ============================================================================

/// A gateway wired to the mock IdP, listening on an ephemeral port
pub struct TestGateway {
    /// Base URL of the gateway
    pub base_url: String,
    http: reqwest::Client,
}

impl TestGateway {
    /// Spawn a gateway over `catalog_yaml`, trusting `idp`
    pub async fn spawn(idp: &MockIdp, catalog_yaml: &str) -> Self {
        Self::spawn_with(idp, catalog_yaml, true).await
    }

    /// Spawn with explicit control over the exchange cache
    pub async fn spawn_with(idp: &MockIdp, catalog_yaml: &str, cache_enabled: bool) -> Self {
        let mut config = Config::default();
        config.idp.issuer_url = ISSUER.to_string();
        config.idp.gateway_audience = GATEWAY_AUDIENCE.to_string();
        config.idp.gateway_client_id = "mcp-gateway".to_string();
        config.idp.gateway_client_secret = "mcp-gateway-secret".to_string();
        config.idp.jwks_uri = Some(idp.jwks_uri());
        config.idp.token_endpoint = Some(idp.token_endpoint());
        config.exchange_cache.enabled = cache_enabled;

        let catalog = Arc::new(ServerCatalog::from_yaml(catalog_yaml).expect("test catalog"));
        let gateway = Gateway::with_catalog(config, catalog).expect("gateway");
        let app = gateway.router();

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind gateway");
        let addr = listener.local_addr().expect("gateway addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve gateway");
        });

        Self {
            base_url: format!("http://{addr}"),
            http: reqwest::Client::new(),
        }
    }

    fn mcp_url(&self) -> String {
        format!("{}/mcp", self.base_url)
    }

    /// Raw POST /mcp with optional bearer and session headers
    pub async fn post(
        &self,
        bearer: Option<&str>,
        session: Option<&str>,
        body: Value,
    ) -> reqwest::Response {
        let mut request = self
            .http
            .post(self.mcp_url())
            .header("Accept", "application/json, text/event-stream")
            .json(&body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        if let Some(id) = session {
            request = request.header("Mcp-Session-Id", id);
        }
        request.send().await.expect("gateway request")
    }

    /// Run `initialize` and return the assigned session id
    pub async fn initialize(&self, bearer: &str) -> String {
        let response = self
            .post(
                Some(bearer),
                None,
                json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "method": "initialize",
                    "params": {
                        "protocolVersion": "2025-03-26",
                        "capabilities": {},
                        "clientInfo": {"name": "test-client", "version": "0.0.1"}
                    }
                }),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK, "initialize failed");
        response
            .headers()
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
            .expect("initialize must return Mcp-Session-Id")
            .to_string()
    }

    /// JSON-RPC request returning (HTTP status, body)
    pub async fn rpc(
        &self,
        bearer: &str,
        session: &str,
        method: &str,
        params: Value,
    ) -> (StatusCode, Value) {
        let response = self
            .post(
                Some(bearer),
                Some(session),
                json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": params}),
            )
            .await;
        let status = response.status();
        let body = response.json().await.unwrap_or(Value::Null);
        (status, body)
    }

    /// tools/call returning the JSON-RPC `result` member
    pub async fn tool_call(&self, bearer: &str, session: &str, name: &str, args: Value) -> Value {
        let (status, body) = self
            .rpc(
                bearer,
                session,
                "tools/call",
                json!({"name": name, "arguments": args}),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "tools/call transport failure: {body}");
        body["result"].clone()
    }

    /// Names in the gateway's tools/list
    pub async fn tool_names(&self, bearer: &str, session: &str) -> Vec<String> {
        let (status, body) = self.rpc(bearer, session, "tools/list", json!({})).await;
        assert_eq!(status, StatusCode::OK);
        body["result"]["tools"]
            .as_array()
            .expect("tools array")
            .iter()
            .map(|t| t["name"].as_str().unwrap_or("").to_string())
            .collect()
    }
}

/// Parse the JSON payload a built-in tool wrapped in its text content
pub fn builtin_payload(result: &Value) -> Value {
    let text = result["content"][0]["text"]
        .as_str()
        .expect("built-in result carries a text block");
    serde_json::from_str(text).expect("built-in payload is JSON")
}

/// A catalog with one weather server pointed at `downstream`
pub fn weather_catalog(downstream: &MockDownstream) -> String {
    format!(
        r"
servers:
  weather:
    description: Weather conditions and forecasts
    url: {}
    audience: mcp-weather
    required_role: access:weather
",
        downstream.base_url
    )
}
