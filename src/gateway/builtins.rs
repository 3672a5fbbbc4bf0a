//! Built-in gateway tools: `search_servers`, `enable_server` and
//! `_reset_gateway`.
//!
//! Built-ins report failures inside their JSON payload (`success: false`
//! with an error kind and message) so agents can reason about them; only
//! dynamic proxy tools use the MCP `isError` flag.

use std::sync::Arc;

use serde_json::{Value, json};

use crate::auth::AuthenticatedPrincipal;
use crate::protocol::{
    Info, InitializeResult, JsonRpcResponse, RequestId, ServerCapabilities, Tool, ToolsCallResult,
    ToolsCapability, ToolsListResult, negotiate_version,
};
use crate::registry::ProxyToolRegistry;
use crate::session::McpSession;

use super::router::AppState;

/// Name of the server-search built-in
pub const SEARCH_SERVERS: &str = "search_servers";
/// Name of the activation built-in
pub const ENABLE_SERVER: &str = "enable_server";
/// Name of the testing-only reset built-in
pub const RESET_GATEWAY: &str = "_reset_gateway";

/// Whether `name` is one of the three built-ins
#[must_use]
pub fn is_builtin(name: &str) -> bool {
    matches!(name, SEARCH_SERVERS | ENABLE_SERVER | RESET_GATEWAY)
}

/// Handle an `initialize` request with version negotiation
pub fn handle_initialize(id: RequestId, params: Option<&Value>) -> JsonRpcResponse {
    let client_version = params
        .and_then(|p| p.get("protocolVersion"))
        .and_then(|v| v.as_str())
        .unwrap_or("2024-11-05");

    let result = InitializeResult {
        protocol_version: negotiate_version(client_version).to_string(),
        capabilities: ServerCapabilities {
            tools: Some(ToolsCapability { list_changed: true }),
        },
        server_info: Info {
            name: "mcp-auth-gateway".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: Some("MCP Auth Gateway".to_string()),
            description: Some(
                "Authenticated MCP gateway with per-session dynamic tool discovery".to_string(),
            ),
        },
        instructions: Some(
            "Use search_servers to discover downstream servers and \
             enable_server to activate one; its tools then appear in \
             tools/list for this session."
                .to_string(),
        ),
    };

    JsonRpcResponse::success(id, serde_json::to_value(result).unwrap())
}

/// Handle `tools/list`: the three built-ins first, then every registered
/// dynamic tool in registration order
pub fn handle_tools_list(id: RequestId, registry: &ProxyToolRegistry) -> JsonRpcResponse {
    let mut tools = builtin_tools();

    tools.extend(registry.all().into_iter().map(|t| Tool {
        name: t.name,
        title: None,
        description: t.description,
        input_schema: t.input_schema,
    }));

    let result = ToolsListResult {
        tools,
        next_cursor: None,
    };

    JsonRpcResponse::success(id, serde_json::to_value(result).unwrap())
}

/// Handle a call to one of the built-in tools
pub async fn handle_builtin_call(
    state: &Arc<AppState>,
    session: &McpSession,
    principal: &AuthenticatedPrincipal,
    id: RequestId,
    tool_name: &str,
    arguments: &Value,
) -> JsonRpcResponse {
    let payload = match tool_name {
        SEARCH_SERVERS => {
            let query = arguments
                .get("query")
                .and_then(Value::as_str)
                .unwrap_or("");
            let servers = state.engine.search(query, session, principal).await;
            let total = servers.len();
            json!({
                "servers": servers,
                "total": total,
            })
        }
        ENABLE_SERVER => {
            let Some(server_name) = arguments.get("server_name").and_then(Value::as_str) else {
                return tool_payload_response(
                    id,
                    &json!({
                        "success": false,
                        "error": "InvalidArgument",
                        "message": "Missing required parameter 'server_name'",
                    }),
                );
            };

            match state.engine.enable(session, server_name, principal).await {
                Ok(activation) => {
                    let message = if activation.newly_enabled {
                        format!("Server '{server_name}' enabled successfully")
                    } else {
                        format!("Server '{server_name}' is already enabled")
                    };
                    json!({
                        "success": true,
                        "message": message,
                        "tools": activation.tools,
                    })
                }
                Err(e) => json!({
                    "success": false,
                    "error": e.kind(),
                    "message": e.to_string(),
                }),
            }
        }
        RESET_GATEWAY => {
            state.engine.reset(session, principal).await;
            json!({
                "success": true,
                "message": "Gateway state reset",
            })
        }
        _ => {
            return JsonRpcResponse::error(
                Some(id),
                crate::error::rpc_codes::METHOD_NOT_FOUND,
                format!("Unknown tool: {tool_name}"),
            );
        }
    };

    tool_payload_response(id, &payload)
}

fn tool_payload_response(id: RequestId, payload: &Value) -> JsonRpcResponse {
    let result = ToolsCallResult::json_text(payload);
    JsonRpcResponse::success(id, serde_json::to_value(result).unwrap())
}

/// Definitions of the three built-in tools
#[must_use]
pub fn builtin_tools() -> Vec<Tool> {
    vec![
        Tool {
            name: SEARCH_SERVERS.to_string(),
            title: Some("Search Servers".to_string()),
            description: Some(
                "Search for available MCP servers by name or description".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Case-insensitive substring; empty matches all"
                    }
                },
                "required": []
            }),
        },
        Tool {
            name: ENABLE_SERVER.to_string(),
            title: Some("Enable Server".to_string()),
            description: Some(
                "Enable an MCP server for this session and load its tools dynamically"
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "server_name": {
                        "type": "string",
                        "description": "Name of the server to enable"
                    }
                },
                "required": ["server_name"]
            }),
        },
        Tool {
            name: RESET_GATEWAY.to_string(),
            title: Some("Reset Gateway".to_string()),
            description: Some(
                "Reset this session's gateway state, disabling all enabled servers (testing only)"
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        },
    ]
}
