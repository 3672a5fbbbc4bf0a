//! Authenticated MCP Gateway Library
//!
//! A Model Context Protocol (MCP) gateway that sits between AI agent clients
//! and a fleet of downstream MCP tool servers, gating every request through
//! an OAuth2/OIDC identity provider.
//!
//! # Features
//!
//! - **Offline JWT validation**: JWKS fetched once and cached, with forced
//!   refresh on key rotation
//! - **RFC 8693 token exchange**: downstream calls carry narrowly-scoped
//!   tokens minted per target audience, never the user's original token
//! - **Dynamic tool discovery**: downstream servers are activated per MCP
//!   session; their tools are registered once globally and gated per session
//!   at dispatch time
//! - **Streamable HTTP**: MCP Streamable HTTP transport on both the inbound
//!   and outbound side
//!
//! # Protocol Version
//!
//! Implements MCP protocol versions 2024-11-05 through 2025-03-26.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod activation;
pub mod auth;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod downstream;
pub mod error;
pub mod gateway;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod session;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
