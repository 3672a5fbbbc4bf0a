//! RFC 8693 token exchange against the IdP token endpoint.
//!
//! Every downstream call is made with a token minted for that server's
//! audience; the user's original token never leaves the gateway. Exchanged
//! tokens are optionally cached keyed by `(sha256(subject_token), audience)`
//! with a TTL bounded by the token's own `expires_in`, and invalidated when
//! a downstream server answers 401.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use reqwest::StatusCode;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::{ExchangeCacheConfig, IdpConfig};
use crate::error::AuthError;
use crate::{Error, Result};

const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
const SUBJECT_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:access_token";

/// Successful token endpoint response
#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    access_token: String,
    #[serde(default)]
    #[allow(dead_code)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Error body from the token endpoint
#[derive(Debug, Default, Deserialize)]
struct ExchangeErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

struct CachedGrant {
    token: String,
    expires_at: Instant,
}

/// RFC 8693 token-exchange client with an optional per-(subject, audience)
/// grant cache.
pub struct TokenExchanger {
    http: reqwest::Client,
    token_endpoint: String,
    client_id: String,
    client_secret: String,
    cache: Option<DashMap<String, CachedGrant>>,
    max_ttl: Duration,
}

impl TokenExchanger {
    /// Create an exchanger from the IdP and cache configuration
    pub fn new(idp: &IdpConfig, cache: &ExchangeCacheConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(idp.idp_timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            token_endpoint: idp.token_exchange_endpoint(),
            client_id: idp.gateway_client_id.clone(),
            client_secret: idp.gateway_client_secret.clone(),
            cache: cache.enabled.then(DashMap::new),
            max_ttl: cache.max_ttl,
        })
    }

    /// Exchange `subject_token` for a token whose `aud` is `audience`.
    ///
    /// Transient IdP failures (5xx, network) are retried once before
    /// surfacing `Error::IdpUnavailable`.
    pub async fn exchange(&self, subject_token: &str, audience: &str) -> Result<String> {
        let key = cache_key(subject_token, audience);

        if let Some(token) = self.cached(&key) {
            debug!(audience = %audience, "Using cached exchanged token");
            return Ok(token);
        }

        let response = match self.request_exchange(subject_token, audience).await {
            Err(Error::IdpUnavailable(reason)) => {
                warn!(audience = %audience, reason = %reason, "Token exchange failed, retrying once");
                self.request_exchange(subject_token, audience).await?
            }
            other => other?,
        };

        info!(audience = %audience, "Token exchanged");

        if let Some(cache) = &self.cache {
            // TTL never exceeds the token's own lifetime
            let ttl = response
                .expires_in
                .map_or(self.max_ttl, |secs| {
                    self.max_ttl.min(Duration::from_secs(secs))
                });
            if !ttl.is_zero() {
                cache.insert(
                    key,
                    CachedGrant {
                        token: response.access_token.clone(),
                        expires_at: Instant::now() + ttl,
                    },
                );
            }
        }

        Ok(response.access_token)
    }

    /// Drop the cached grant for one (subject, audience) pair.
    ///
    /// Called by the dispatcher when a downstream server rejects the token,
    /// forcing a fresh exchange on the retry.
    pub fn invalidate(&self, subject_token: &str, audience: &str) {
        if let Some(cache) = &self.cache {
            cache.remove(&cache_key(subject_token, audience));
        }
    }

    /// Drop every cached grant minted from this subject token (all
    /// audiences). Used by session reset.
    pub fn invalidate_subject(&self, subject_token: &str) {
        if let Some(cache) = &self.cache {
            let prefix = format!("{}:", subject_hash(subject_token));
            cache.retain(|key, _| !key.starts_with(&prefix));
        }
    }

    fn cached(&self, key: &str) -> Option<String> {
        let cache = self.cache.as_ref()?;
        let entry = cache.get(key)?;
        if entry.expires_at <= Instant::now() {
            drop(entry);
            cache.remove(key);
            return None;
        }
        Some(entry.token.clone())
    }

    async fn request_exchange(
        &self,
        subject_token: &str,
        audience: &str,
    ) -> Result<ExchangeResponse> {
        let params = [
            ("grant_type", GRANT_TYPE),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("subject_token", subject_token),
            ("subject_token_type", SUBJECT_TOKEN_TYPE),
            ("audience", audience),
        ];

        let response = self
            .http
            .post(&self.token_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| Error::IdpUnavailable(format!("Token exchange request failed: {e}")))?;

        let status = response.status();

        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| Error::Protocol(format!("Invalid token response: {e}")));
        }

        if status.is_server_error() {
            return Err(Error::IdpUnavailable(format!(
                "Token endpoint returned HTTP {status}"
            )));
        }

        let body: ExchangeErrorBody = response.json().await.unwrap_or_default();

        if status == StatusCode::BAD_REQUEST && body.error.as_deref() == Some("invalid_grant") {
            return Err(AuthError::SubjectTokenInvalid.into());
        }

        // 401/403 (and any other 4xx) map to the IdP's RFC 8693 denial
        // semantics: the subject lacks a role required for this audience.
        Err(Error::PermissionDenied(format!(
            "token exchange for audience '{audience}' was denied{}",
            body.error_description
                .map(|d| format!(": {d}"))
                .unwrap_or_default()
        )))
    }
}

/// Cache key: SHA-256 of the subject token, then the audience.
fn cache_key(subject_token: &str, audience: &str) -> String {
    format!("{}:{audience}", subject_hash(subject_token))
}

fn subject_hash(subject_token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(subject_token.as_bytes());
    format!("{:x}", hasher.finalize())
}
