//! Configuration management
//!
//! Settings are merged from a YAML file and `MCP_GATEWAY_`-prefixed
//! environment variables (nested keys separated with `__`, e.g.
//! `MCP_GATEWAY_IDP__ISSUER_URL`). The server catalog lives in a separate
//! document referenced by `catalog_path` and is loaded once at startup.

use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Inbound listener configuration
    pub server: ServerConfig,
    /// Identity provider configuration
    pub idp: IdpConfig,
    /// Outbound downstream MCP call configuration
    pub downstream: DownstreamConfig,
    /// Exchanged-token cache configuration
    pub exchange_cache: ExchangeCacheConfig,
    /// Path to the server catalog document
    pub catalog_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            idp: IdpConfig::default(),
            downstream: DownstreamConfig::default(),
            exchange_cache: ExchangeCacheConfig::default(),
            catalog_path: PathBuf::from("servers.yaml"),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (MCP_GATEWAY_ prefix)
        figment = figment.merge(Env::prefixed("MCP_GATEWAY_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Expand ${VAR} in the confidential client credentials
        config.expand_env_vars();

        Ok(config)
    }

    /// Expand ${VAR} patterns in secret-bearing fields
    fn expand_env_vars(&mut self) {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("static pattern");

        for value in [
            &mut self.idp.gateway_client_id,
            &mut self.idp.gateway_client_secret,
        ] {
            let expanded = re.replace_all(value, |caps: &regex::Captures| {
                let var_name = &caps[1];
                env::var(var_name).unwrap_or_default()
            });
            *value = expanded.into_owned();
        }
    }
}

/// Inbound listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub listen_port: u16,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            listen_port: 8010,
            max_body_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Identity provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdpConfig {
    /// Issuer URL; `iss` on inbound tokens must match this exactly
    pub issuer_url: String,
    /// Required `aud` value on inbound tokens
    pub gateway_audience: String,
    /// Confidential client id used for RFC 8693 exchange
    pub gateway_client_id: String,
    /// Confidential client secret used for RFC 8693 exchange
    pub gateway_client_secret: String,
    /// Override the JWKS URI (defaults to the OIDC certs path under the issuer)
    pub jwks_uri: Option<String>,
    /// Override the token endpoint (defaults to the OIDC token path under the issuer)
    pub token_endpoint: Option<String>,
    /// How long a fetched JWKS stays fresh
    #[serde(with = "humantime_serde")]
    pub jwks_refresh_ttl: Duration,
    /// Per-call timeout for IdP requests
    #[serde(with = "humantime_serde")]
    pub idp_timeout: Duration,
    /// Permitted JWS algorithms on inbound tokens
    pub algorithm_allowlist: Vec<String>,
}

impl Default for IdpConfig {
    fn default() -> Self {
        Self {
            issuer_url: "http://localhost:8080/realms/mcp-poc".to_string(),
            gateway_audience: "mcp-gateway".to_string(),
            gateway_client_id: "mcp-gateway".to_string(),
            gateway_client_secret: String::new(),
            jwks_uri: None,
            token_endpoint: None,
            jwks_refresh_ttl: Duration::from_secs(600),
            idp_timeout: Duration::from_secs(5),
            algorithm_allowlist: vec!["RS256".to_string()],
        }
    }
}

impl IdpConfig {
    /// JWKS URI to fetch signing keys from (explicit override, or the OIDC
    /// certs path under the issuer)
    #[must_use]
    pub fn jwks_endpoint(&self) -> String {
        self.jwks_uri.clone().unwrap_or_else(|| {
            format!(
                "{}/protocol/openid-connect/certs",
                self.issuer_url.trim_end_matches('/')
            )
        })
    }

    /// Token endpoint for RFC 8693 exchange (explicit override, or the OIDC
    /// token path under the issuer)
    #[must_use]
    pub fn token_exchange_endpoint(&self) -> String {
        self.token_endpoint.clone().unwrap_or_else(|| {
            format!(
                "{}/protocol/openid-connect/token",
                self.issuer_url.trim_end_matches('/')
            )
        })
    }
}

/// Outbound downstream MCP call configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownstreamConfig {
    /// Per-call timeout for `tools/call`
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,
    /// Per-call timeout for discovery (`tools/list`)
    #[serde(with = "humantime_serde")]
    pub list_timeout: Duration,
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            list_timeout: Duration::from_secs(60),
        }
    }
}

/// Exchanged-token cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeCacheConfig {
    /// Enable the exchanged-token cache
    pub enabled: bool,
    /// Upper bound on cache entry lifetime; entries never outlive the
    /// token's own expiry
    #[serde(with = "humantime_serde")]
    pub max_ttl: Duration,
}

impl Default for ExchangeCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_ttl: Duration::from_secs(300),
        }
    }
}
