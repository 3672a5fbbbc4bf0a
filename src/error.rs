//! Error types for the MCP gateway

use thiserror::Error;

/// Result type alias for the MCP gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Authentication failure modes
///
/// Pre-tool failures map to HTTP 401 at the transport layer; failures during
/// tool execution (downstream rejection) surface as MCP tool-errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No bearer token on the request
    #[error("missing bearer token; use: Authorization: Bearer <token>")]
    MissingToken,

    /// Token could not be decoded at all
    #[error("malformed token: {0}")]
    Malformed(String),

    /// Signature did not verify against any cached key
    #[error("token signature verification failed")]
    BadSignature,

    /// `aud` claim does not contain the gateway audience
    #[error("token audience does not include '{0}'")]
    BadAudience(String),

    /// `exp` is in the past
    #[error("token has expired")]
    Expired,

    /// `nbf` is in the future
    #[error("token is not yet valid")]
    NotYetValid,

    /// `iss` claim does not match the configured issuer
    #[error("token issuer mismatch: expected '{expected}', got '{actual}'")]
    IssuerMismatch {
        /// Issuer the gateway is configured to trust
        expected: String,
        /// Issuer found in the token
        actual: String,
    },

    /// Header `alg` is not in the configured allow-list
    #[error("token algorithm '{0}' is not allowed")]
    AlgorithmNotAllowed(String),

    /// `kid` not present in the JWKS even after a forced refresh
    #[error("unknown signing key: {0}")]
    UnknownKey(String),

    /// IdP rejected the subject token during RFC 8693 exchange
    #[error("subject token rejected by the identity provider")]
    SubjectTokenInvalid,

    /// Downstream server returned 401 for the exchanged token
    #[error("downstream server rejected the exchanged token")]
    DownstreamRejected,
}

/// MCP gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Authentication failure
    #[error("Unauthenticated: {0}")]
    Unauthenticated(#[from] AuthError),

    /// Caller lacks a required role, or the IdP refused the exchange
    #[error("Access denied: {0}")]
    PermissionDenied(String),

    /// Server name not present in the catalog
    #[error("Server '{0}' not found. Use search_servers to find available servers.")]
    ServerNotFound(String),

    /// Tool name not present in the proxy registry
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Tool called in a session that did not activate its server
    #[error("Server '{server}' is not enabled in this session. Call enable_server(\"{server}\") first.")]
    NotEnabled {
        /// Owning server of the tool that was called
        server: String,
    },

    /// Missing session id or schema-invalid tool arguments
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Two downstream servers advertise a tool with the same name
    #[error("Tool name collision: '{tool}' is already registered for server '{existing}', also advertised by '{offender}'")]
    ToolNameCollision {
        /// The colliding tool name
        tool: String,
        /// Server that registered the name first
        existing: String,
        /// Server whose discovery produced the collision
        offender: String,
    },

    /// IdP returned 5xx or was unreachable
    #[error("Identity provider unavailable: {0}")]
    IdpUnavailable(String),

    /// Downstream server returned 5xx or was unreachable
    #[error("Downstream server unavailable: {0}")]
    DownstreamUnavailable(String),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON-RPC error (downstream errors pass through with code and message intact)
    #[error("JSON-RPC error {code}: {message}")]
    JsonRpc {
        /// Error code
        code: i32,
        /// Error message
        message: String,
        /// Optional data
        data: Option<serde_json::Value>,
    },

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a JSON-RPC error
    pub fn json_rpc(code: i32, message: impl Into<String>) -> Self {
        Self::JsonRpc {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Convert to JSON-RPC error code
    #[must_use]
    pub fn to_rpc_code(&self) -> i32 {
        match self {
            Self::JsonRpc { code, .. } => *code,
            Self::Json(_) => rpc_codes::PARSE_ERROR,
            Self::Protocol(_) => rpc_codes::INVALID_REQUEST,
            Self::InvalidArgument(_) => rpc_codes::INVALID_PARAMS,
            Self::ToolNotFound(_) => rpc_codes::METHOD_NOT_FOUND,
            Self::ServerNotFound(_) => -32001,
            Self::Unauthenticated(_) => -32000,
            Self::PermissionDenied(_) => -32003,
            Self::IdpUnavailable(_) | Self::DownstreamUnavailable(_) => -32000,
            _ => rpc_codes::INTERNAL_ERROR,
        }
    }

    /// Short taxonomy label used in built-in tool payloads
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthenticated(_) => "Unauthenticated",
            Self::PermissionDenied(_) => "PermissionDenied",
            Self::ServerNotFound(_) | Self::ToolNotFound(_) => "NotFound",
            Self::NotEnabled { .. } => "PreconditionFailed",
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::ToolNameCollision { .. } => "Conflict",
            Self::IdpUnavailable(_) | Self::DownstreamUnavailable(_) => "Upstream",
            _ => "Internal",
        }
    }
}

/// Standard JSON-RPC error codes
pub mod rpc_codes {
    /// Parse error - Invalid JSON
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid Request - Not a valid Request object
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid params
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error
    pub const INTERNAL_ERROR: i32 = -32603;
}
