//! Authentication middleware for the inbound MCP surface.
//!
//! Every `/mcp` request must carry `Authorization: Bearer <jwt>`; the token
//! is validated offline against the IdP's JWKS before any session lookup,
//! state mutation or downstream call. The derived
//! [`AuthenticatedPrincipal`] is injected into the request extensions for
//! the handlers.

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{debug, warn};

use crate::Error;
use crate::auth::TokenVerifier;

/// Bearer-validate the request and attach the principal
pub async fn auth_middleware(
    State(verifier): State<Arc<TokenVerifier>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")));

    let Some(token) = token else {
        warn!("Missing Authorization header");
        return unauthorized_response(
            "Missing Authorization header. Use: Authorization: Bearer <token>",
        );
    };

    match verifier.validate(token).await {
        Ok(principal) => {
            debug!(user = %principal.username, "Authenticated request");
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(Error::IdpUnavailable(reason)) => {
            warn!(reason = %reason, "Cannot validate token, IdP unavailable");
            error_response(StatusCode::SERVICE_UNAVAILABLE, &reason)
        }
        Err(e) => {
            warn!(error = %e, "Rejected token");
            unauthorized_response(&e.to_string())
        }
    }
}

/// Create a 401 Unauthorized response
fn unauthorized_response(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [("WWW-Authenticate", "Bearer")],
        Json(json!({
            "jsonrpc": "2.0",
            "error": {
                "code": -32000,
                "message": message
            },
            "id": null
        })),
    )
        .into_response()
}

/// Create a non-401 transport-level error response
fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({
            "jsonrpc": "2.0",
            "error": {
                "code": -32000,
                "message": message
            },
            "id": null
        })),
    )
        .into_response()
}
