//! Offline JWT verification against the IdP's published JWKS.
//!
//! # Verification flow
//!
//! 1. Decode the JWT header (no verification) to extract `kid` and `alg`.
//! 2. Check `alg` against the configured allow-list.
//! 3. Resolve `kid` in the cached JWKS; a stale cache or an unknown `kid`
//!    triggers a single-flight refetch, so key rotation is picked up without
//!    hammering the IdP.
//! 4. Verify the signature and `exp`, then check `iss` (exact match), `aud`
//!    (must contain the gateway audience) and `nbf` manually.
//! 5. Return an [`AuthenticatedPrincipal`] carrying the realm roles and the
//!    raw compact JWT (needed later as the RFC 8693 subject token).
//!
//! Validation is entirely offline on the hot path; the IdP is only contacted
//! when the JWKS cache is cold, stale, or missing the token's key id.

use std::collections::HashSet;
use std::str::FromStr;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{
    Algorithm, DecodingKey, Validation,
    jwk::{AlgorithmParameters, JwkSet},
};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::IdpConfig;
use crate::error::AuthError;
use crate::{Error, Result};

/// Clock skew tolerated on `nbf` (seconds); `exp` leeway is applied by
/// `jsonwebtoken` with the same value.
const CLOCK_SKEW_LEEWAY_SECS: u64 = 60;

/// The authenticated subject derived from a validated JWT.
///
/// Lives for the duration of one inbound request.
#[derive(Debug, Clone)]
pub struct AuthenticatedPrincipal {
    /// OIDC `sub` claim
    pub subject: String,
    /// `preferred_username` claim, falling back to `sub`
    pub username: String,
    /// Realm roles parsed from `realm_access.roles`
    pub roles: HashSet<String>,
    /// The original compact JWT; used as the RFC 8693 subject token
    pub raw_token: String,
    /// `exp` claim (Unix timestamp)
    pub expires_at: u64,
}

impl AuthenticatedPrincipal {
    /// Whether the subject holds the given realm role
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

#[derive(Debug, Default, Deserialize)]
struct RealmAccess {
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GatewayClaims {
    iss: String,
    sub: String,
    #[serde(default)]
    aud: Value,
    exp: u64,
    #[serde(default)]
    nbf: Option<u64>,
    #[serde(default)]
    preferred_username: Option<String>,
    #[serde(default)]
    realm_access: Option<RealmAccess>,
}

struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
}

/// JWT verifier with a TTL-bounded JWKS cache.
pub struct TokenVerifier {
    http: reqwest::Client,
    issuer: String,
    audience: String,
    jwks_uri: String,
    refresh_ttl: Duration,
    allowed_algs: Vec<Algorithm>,
    keys: RwLock<Option<CachedJwks>>,
    /// Serializes JWKS fetches so concurrent cache misses produce one request
    refresh_guard: tokio::sync::Mutex<()>,
}

impl TokenVerifier {
    /// Create a verifier from the IdP configuration
    pub fn new(config: &IdpConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.idp_timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        let mut allowed_algs = Vec::with_capacity(config.algorithm_allowlist.len());
        for name in &config.algorithm_allowlist {
            let alg = Algorithm::from_str(name).map_err(|_| {
                Error::Config(format!("Unknown algorithm in allowlist: {name}"))
            })?;
            allowed_algs.push(alg);
        }
        if allowed_algs.is_empty() {
            return Err(Error::Config(
                "algorithm_allowlist must not be empty".to_string(),
            ));
        }

        Ok(Self {
            http,
            issuer: config.issuer_url.clone(),
            audience: config.gateway_audience.clone(),
            jwks_uri: config.jwks_endpoint(),
            refresh_ttl: config.jwks_refresh_ttl,
            allowed_algs,
            keys: RwLock::new(None),
            refresh_guard: tokio::sync::Mutex::new(()),
        })
    }

    /// Validate a compact JWT and derive the request principal.
    ///
    /// # Errors
    ///
    /// Returns `Error::Unauthenticated` for every token defect, and
    /// `Error::IdpUnavailable` when the JWKS cannot be fetched.
    pub async fn validate(&self, raw_token: &str) -> Result<AuthenticatedPrincipal> {
        let header = jsonwebtoken::decode_header(raw_token)
            .map_err(|e| AuthError::Malformed(e.to_string()))?;

        if !self.allowed_algs.contains(&header.alg) {
            return Err(AuthError::AlgorithmNotAllowed(format!("{:?}", header.alg)).into());
        }

        let kid = header
            .kid
            .ok_or_else(|| AuthError::Malformed("token header missing 'kid'".to_string()))?;

        let decoding_key = self.decoding_key(&kid).await?;

        let mut validation = Validation::new(header.alg);
        validation.leeway = CLOCK_SKEW_LEEWAY_SECS;
        // `iss`, `aud` and `nbf` are checked manually below for precise errors
        validation.validate_aud = false;
        validation.validate_nbf = false;
        validation.set_required_spec_claims(&["exp"]);

        let token_data =
            jsonwebtoken::decode::<GatewayClaims>(raw_token, &decoding_key, &validation)
                .map_err(map_jwt_error)?;
        let claims = token_data.claims;

        if claims.iss != self.issuer {
            return Err(AuthError::IssuerMismatch {
                expected: self.issuer.clone(),
                actual: claims.iss,
            }
            .into());
        }

        if !aud_contains(&claims.aud, &self.audience) {
            return Err(AuthError::BadAudience(self.audience.clone()).into());
        }

        if let Some(nbf) = claims.nbf {
            if nbf > now_secs() + CLOCK_SKEW_LEEWAY_SECS {
                return Err(AuthError::NotYetValid.into());
            }
        }

        let roles: HashSet<String> = claims
            .realm_access
            .unwrap_or_default()
            .roles
            .into_iter()
            .collect();

        debug!(subject = %claims.sub, roles = roles.len(), "Token validated");

        Ok(AuthenticatedPrincipal {
            username: claims
                .preferred_username
                .unwrap_or_else(|| claims.sub.clone()),
            subject: claims.sub,
            roles,
            raw_token: raw_token.to_string(),
            expires_at: claims.exp,
        })
    }

    /// Find a decoding key by `kid`, fetching or refreshing the JWKS as
    /// needed. The refresh is single-flight; a fetch triggered by an unknown
    /// `kid` is bounded to one attempt.
    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey> {
        if let Some(key) = self.cached_key(kid, false) {
            return Ok(key);
        }

        let _guard = self.refresh_guard.lock().await;

        // Another task may have refreshed while we waited for the guard
        if let Some(key) = self.cached_key(kid, false) {
            return Ok(key);
        }

        debug!(kid = %kid, uri = %self.jwks_uri, "Fetching JWKS");
        let jwks: JwkSet = self
            .http
            .get(&self.jwks_uri)
            .send()
            .await
            .map_err(|e| Error::IdpUnavailable(format!("JWKS fetch failed: {e}")))?
            .error_for_status()
            .map_err(|e| Error::IdpUnavailable(format!("JWKS fetch failed: {e}")))?
            .json()
            .await
            .map_err(|e| Error::IdpUnavailable(format!("Invalid JWKS response: {e}")))?;

        *self.keys.write() = Some(CachedJwks {
            keys: jwks,
            fetched_at: Instant::now(),
        });

        self.cached_key(kid, true).ok_or_else(|| {
            warn!(kid = %kid, "Key id not present in refreshed JWKS");
            AuthError::UnknownKey(kid.to_string()).into()
        })
    }

    /// Look up `kid` in the cache. Unless `ignore_ttl` is set, a stale cache
    /// counts as a miss so rotation is noticed within the refresh TTL.
    fn cached_key(&self, kid: &str, ignore_ttl: bool) -> Option<DecodingKey> {
        let guard = self.keys.read();
        let cached = guard.as_ref()?;
        if !ignore_ttl && cached.fetched_at.elapsed() >= self.refresh_ttl {
            return None;
        }
        find_key_in_jwks(&cached.keys, kid)
    }
}

/// Find a JWK by `kid` in a `JwkSet` and convert it to a `DecodingKey`.
fn find_key_in_jwks(jwks: &JwkSet, kid: &str) -> Option<DecodingKey> {
    for jwk in &jwks.keys {
        let jwk_kid = jwk.common.key_id.as_deref().unwrap_or("");
        if jwk_kid != kid {
            continue;
        }

        return match &jwk.algorithm {
            AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok(),
            AlgorithmParameters::EllipticCurve(ec) => {
                DecodingKey::from_ec_components(&ec.x, &ec.y).ok()
            }
            AlgorithmParameters::OctetKey(_) | AlgorithmParameters::OctetKeyPair(_) => None,
        };
    }
    None
}

/// Map `jsonwebtoken` failures onto the gateway's auth error kinds.
fn map_jwt_error(err: jsonwebtoken::errors::Error) -> Error {
    use jsonwebtoken::errors::ErrorKind;

    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired.into(),
        ErrorKind::InvalidSignature => AuthError::BadSignature.into(),
        ErrorKind::InvalidAlgorithm => {
            AuthError::AlgorithmNotAllowed("signature/key mismatch".to_string()).into()
        }
        _ => AuthError::Malformed(err.to_string()).into(),
    }
}

/// Whether the token's `aud` claim (string or array) contains `expected`.
fn aud_contains(aud_claim: &Value, expected: &str) -> bool {
    match aud_claim {
        Value::String(s) => s == expected,
        Value::Array(arr) => arr
            .iter()
            .any(|v| v.as_str().is_some_and(|s| s == expected)),
        _ => false,
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}
