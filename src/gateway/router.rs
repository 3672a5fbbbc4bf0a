//! HTTP router and handlers for the inbound MCP surface.
//!
//! One Streamable-HTTP endpoint (`POST /mcp`) carries all JSON-RPC traffic.
//! `initialize` mints a fresh `Mcp-Session-Id`; every other method requires
//! the header and a live session. Transport-level failures (bad JSON,
//! missing session) come back as HTTP errors; failures during tool
//! execution come back as MCP tool-errors so agents can reason about them.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::{catch_panic::CatchPanicLayer, compression::CompressionLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

use super::auth::auth_middleware;
use super::builtins;
use crate::activation::ActivationEngine;
use crate::auth::{AuthenticatedPrincipal, TokenVerifier};
use crate::catalog::ServerCatalog;
use crate::dispatch::ProxyDispatcher;
use crate::error::rpc_codes;
use crate::protocol::{JsonRpcResponse, RequestId, ToolsCallResult};
use crate::registry::ProxyToolRegistry;
use crate::session::{McpSession, SessionStore};

/// Maximum accepted request body size
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Shared application state
pub struct AppState {
    /// Activation engine backing the built-in tools
    pub engine: ActivationEngine,
    /// Dispatcher for dynamic proxy tools
    pub dispatcher: ProxyDispatcher,
    /// Live inbound sessions
    pub sessions: Arc<SessionStore>,
    /// Global proxy-tool registry
    pub registry: Arc<ProxyToolRegistry>,
    /// Server catalog (for /health)
    pub catalog: Arc<ServerCatalog>,
}

/// Create the router
pub fn create_router(state: Arc<AppState>, verifier: Arc<TokenVerifier>) -> Router {
    Router::new()
        .route(
            "/mcp",
            post(mcp_handler)
                .get(mcp_get_handler)
                .delete(mcp_delete_handler),
        )
        // Bearer authentication for the MCP endpoint only
        .route_layer(middleware::from_fn_with_state(verifier, auth_middleware))
        .route("/health", get(health_handler))
        .layer(CatchPanicLayer::new())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "catalog_servers": state.catalog.len(),
        "dynamic_tools": state.registry.len(),
        "sessions": state.sessions.len(),
    }))
}

/// GET /mcp - the gateway does not push server-to-client notifications
async fn mcp_get_handler() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({
            "jsonrpc": "2.0",
            "error": {
                "code": rpc_codes::INVALID_REQUEST,
                "message": "Streaming not supported. Use POST to send JSON-RPC requests to /mcp"
            },
            "id": null
        })),
    )
}

/// DELETE /mcp - explicit session termination
async fn mcp_delete_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let session_id = headers.get("mcp-session-id").and_then(|v| v.to_str().ok());

    match session_id {
        Some(id) if state.sessions.remove(id) => {
            info!(session_id = %id, "Session terminated by client");
            StatusCode::NO_CONTENT
        }
        Some(id) => {
            debug!(session_id = %id, "Session not found for DELETE");
            StatusCode::NOT_FOUND
        }
        None => StatusCode::BAD_REQUEST,
    }
}

/// POST /mcp - the JSON-RPC endpoint
async fn mcp_handler(
    State(state): State<Arc<AppState>>,
    http_request: axum::http::Request<axum::body::Body>,
) -> impl IntoResponse {
    let headers = http_request.headers().clone();
    let Some(principal) = http_request
        .extensions()
        .get::<AuthenticatedPrincipal>()
        .cloned()
    else {
        // The auth middleware always sets this; treat absence as a defect
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "jsonrpc": "2.0",
                "error": {"code": rpc_codes::INTERNAL_ERROR, "message": "No request principal"},
                "id": null
            })),
        )
            .into_response();
    };

    // Parse JSON body
    let body_bytes = match axum::body::to_bytes(http_request.into_body(), MAX_BODY_SIZE).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "jsonrpc": "2.0",
                    "error": {"code": rpc_codes::PARSE_ERROR, "message": format!("Failed to read body: {e}")},
                    "id": null
                })),
            )
                .into_response();
        }
    };

    let request: Value = match serde_json::from_slice(&body_bytes) {
        Ok(v) => v,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "jsonrpc": "2.0",
                    "error": {"code": rpc_codes::PARSE_ERROR, "message": format!("Invalid JSON: {e}")},
                    "id": null
                })),
            )
                .into_response();
        }
    };

    // Parse request
    let (id, method, params) = match parse_request(&request) {
        Ok(parsed) => parsed,
        Err(response) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::to_value(response).unwrap()),
            )
                .into_response();
        }
    };

    debug!(method = %method, user = %principal.username, "MCP request");

    // initialize is the only method that does not require a session header
    if method == "initialize" {
        let Some(id) = id else {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "jsonrpc": "2.0",
                    "error": {"code": rpc_codes::INVALID_REQUEST, "message": "Missing id"},
                    "id": null
                })),
            )
                .into_response();
        };
        let session = state.sessions.create();
        info!(session_id = %session.id, user = %principal.username, "Session initialized");
        let response = builtins::handle_initialize(id, params.as_ref());
        return build_response(response, &session.id, StatusCode::OK);
    }

    // Everything else: resolve the session from the header
    let session_id = headers
        .get("mcp-session-id")
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let Some(session_id) = session_id else {
        warn!(method = %method, "Request without Mcp-Session-Id");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "jsonrpc": "2.0",
                "error": {
                    "code": rpc_codes::INVALID_PARAMS,
                    "message": "Missing Mcp-Session-Id header; call initialize first"
                },
                "id": null
            })),
        )
            .into_response();
    };

    let Some(session) = state.sessions.get(&session_id) else {
        warn!(session_id = %session_id, "Unknown session");
        return (
            StatusCode::NOT_FOUND,
            Json(json!({
                "jsonrpc": "2.0",
                "error": {
                    "code": rpc_codes::INVALID_REQUEST,
                    "message": "Unknown session; call initialize to start a new one"
                },
                "id": null
            })),
        )
            .into_response();
    };

    // Notifications: acknowledge without a body
    if method.starts_with("notifications/") {
        debug!(notification = %method, "Handling notification");
        let mut resp = Json(json!({})).into_response();
        insert_session_header(&mut resp, &session.id);
        return (StatusCode::ACCEPTED, resp).into_response();
    }

    // For requests, id is guaranteed to exist (checked in parse_request)
    let id = id.expect("id should exist for non-notification requests");

    let response = match method.as_str() {
        "tools/list" => builtins::handle_tools_list(id, &state.registry),
        "tools/call" => {
            let (tool_name, arguments) = extract_tools_call_params(params.as_ref());
            handle_tools_call(&state, &session, &principal, id, tool_name, &arguments).await
        }
        "ping" => JsonRpcResponse::success(id, json!({})),
        _ => JsonRpcResponse::error(
            Some(id),
            rpc_codes::METHOD_NOT_FOUND,
            format!("Method not found: {method}"),
        ),
    };

    build_response(response, &session.id, StatusCode::OK)
}

/// Route a `tools/call` to a built-in or through the proxy dispatcher
async fn handle_tools_call(
    state: &Arc<AppState>,
    session: &McpSession,
    principal: &AuthenticatedPrincipal,
    id: RequestId,
    tool_name: &str,
    arguments: &Value,
) -> JsonRpcResponse {
    if builtins::is_builtin(tool_name) {
        return builtins::handle_builtin_call(state, session, principal, id, tool_name, arguments)
            .await;
    }

    match state
        .dispatcher
        .dispatch(session, principal, tool_name, arguments)
        .await
    {
        // Downstream result passes through verbatim
        Ok(result) => JsonRpcResponse::success(id, result),
        // Tool execution failures surface as MCP tool-errors, with the
        // original message preserved for downstream JSON-RPC errors
        Err(crate::Error::JsonRpc { message, .. }) => {
            tool_error_response(id, &message)
        }
        Err(e) => tool_error_response(id, &e.to_string()),
    }
}

fn tool_error_response(id: RequestId, message: &str) -> JsonRpcResponse {
    let result = ToolsCallResult::tool_error(message);
    JsonRpcResponse::success(id, serde_json::to_value(result).unwrap())
}

/// Build an HTTP response with a `mcp-session-id` header and a given status.
fn build_response(
    rpc: JsonRpcResponse,
    session_id: &str,
    status: StatusCode,
) -> axum::response::Response {
    let mut resp = Json(serde_json::to_value(rpc).unwrap()).into_response();
    insert_session_header(&mut resp, session_id);
    (status, resp).into_response()
}

fn insert_session_header(resp: &mut axum::response::Response, session_id: &str) {
    if let Ok(value) = session_id.parse() {
        resp.headers_mut().insert(
            axum::http::header::HeaderName::from_static("mcp-session-id"),
            value,
        );
    }
}

/// Extract a `RequestId` from a JSON value.
///
/// Supports string and integer ID values per JSON-RPC 2.0 spec.
fn extract_request_id(value: &Value) -> Option<RequestId> {
    if value.is_string() {
        Some(RequestId::String(value.as_str().unwrap().to_string()))
    } else if value.is_i64() {
        Some(RequestId::Number(value.as_i64().unwrap()))
    } else if value.is_u64() {
        #[allow(clippy::cast_possible_wrap)]
        Some(RequestId::Number(value.as_u64().unwrap() as i64))
    } else {
        None
    }
}

/// Check whether a method name represents a notification (no response expected).
fn is_notification_method(method: &str) -> bool {
    method.starts_with("notifications/")
}

/// Extract the `tools/call` parameters (tool name and arguments).
///
/// Returns `("", {})` when the expected fields are absent so callers never
/// need to deal with `Option`.
fn extract_tools_call_params(params: Option<&Value>) -> (&str, Value) {
    let tool_name = params
        .and_then(|p| p.get("name"))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let arguments = params
        .and_then(|p| p.get("arguments"))
        .cloned()
        .unwrap_or(json!({}));
    (tool_name, arguments)
}

/// Parse JSON-RPC request or notification
/// Returns (Option<RequestId>, method, params) - id is None for notifications
#[allow(clippy::result_large_err)] // JsonRpcResponse used directly as HTTP error body
fn parse_request(
    value: &Value,
) -> Result<(Option<RequestId>, String, Option<Value>), JsonRpcResponse> {
    // Check jsonrpc version
    let jsonrpc = value.get("jsonrpc").and_then(|v| v.as_str());
    if jsonrpc != Some("2.0") {
        return Err(JsonRpcResponse::error(
            None,
            rpc_codes::INVALID_REQUEST,
            "Invalid JSON-RPC version",
        ));
    }

    // Get ID (required for requests, missing for notifications)
    let id = value.get("id").and_then(extract_request_id);

    // Get method
    let method = value
        .get("method")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            JsonRpcResponse::error(id.clone(), rpc_codes::INVALID_REQUEST, "Missing method")
        })?;

    // Get params (optional)
    let params = value.get("params").cloned();

    // For requests, id is required
    if !is_notification_method(method) && id.is_none() {
        return Err(JsonRpcResponse::error(
            None,
            rpc_codes::INVALID_REQUEST,
            "Missing id",
        ));
    }

    Ok((id, method.to_string(), params))
}
