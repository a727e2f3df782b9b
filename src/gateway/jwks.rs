//! Signing-key cache for token verification
//!
//! Keys come from the identity provider's JWKS endpoint, discovered from the
//! configured authority, or from a static key set supplied up front.
//!
//! # Caching
//!
//! - A key set is kept for the `Cache-Control: max-age` the provider sends,
//!   clamped to `[min_ttl, max_ttl]`, or `default_ttl` without the header.
//! - A token naming an unknown `kid` triggers one refresh, at most once per
//!   `min_refresh_interval`, so key rotation is picked up without letting
//!   forged `kid`s hammer the provider.
//! - When keys cannot be loaded the lookup fails. Callers must treat that as
//!   "cannot verify" and reject the request.
//! - A failed load is remembered: until `min_refresh_interval` has passed,
//!   lookups fail with the recorded error instead of calling the provider
//!   again.
//!
//! # Examples
//!
//! ```no_run
//! use forge_gate::gateway::jwks::{KeySource, SigningKeyCache, SigningKeyCacheConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let authority = "https://sso.example.com/realms/forge".parse()?;
//! let cache = SigningKeyCache::new(
//!     KeySource::Discovery { authority },
//!     SigningKeyCacheConfig::default(),
//! )?;
//!
//! let keys = cache.keys_for(Some("key-1")).await?;
//! assert_eq!(keys.len(), 1);
//! # Ok(())
//! # }
//! ```

use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{Jwk, JwkSet, KeyAlgorithm, PublicKeyUse};
use jsonwebtoken::{Algorithm, DecodingKey};
use tokio::sync::{Mutex, RwLock};
use url::Url;

use crate::client::discovery::fetch_provider_metadata;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Cache tuning.
#[derive(Debug, Clone)]
pub struct SigningKeyCacheConfig {
    /// TTL used when the provider sends no `max-age`.
    pub default_ttl: Duration,
    pub min_ttl: Duration,
    pub max_ttl: Duration,
    /// Minimum spacing between refreshes caused by unknown `kid`s, and
    /// between retries after a failed load.
    pub min_refresh_interval: Duration,
    pub request_timeout: Duration,
    pub max_response_size: usize,
    /// Permit plain-HTTP key endpoints (local development).
    pub allow_http: bool,
}

impl Default for SigningKeyCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),
            min_ttl: Duration::from_secs(300),
            max_ttl: Duration::from_secs(86400),
            min_refresh_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
            max_response_size: 1024 * 1024,
            allow_http: false,
        }
    }
}

impl SigningKeyCacheConfig {
    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }
}

// ---------------------------------------------------------------------------
// Keys and errors
// ---------------------------------------------------------------------------

/// Why a key lookup failed.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    /// The provider could not be reached or answered garbage.
    #[error("signing keys unavailable: {0}")]
    Unavailable(String),

    /// The key set does not contain the requested `kid`.
    #[error("unknown signing key: {0}")]
    UnknownKey(String),

    #[error("no signing keys in key set")]
    NoSigningKeys,

    #[error("key endpoint must use HTTPS: {0}")]
    InsecureScheme(String),
}

/// Where keys come from.
#[derive(Debug, Clone)]
pub enum KeySource {
    /// Discover `jwks_uri` from the authority's OpenID configuration.
    Discovery { authority: Url },
    /// Fetch a known JWKS URL.
    Remote { jwks_uri: Url },
    /// A fixed key set; never refreshed.
    Static(JwkSet),
}

/// A key usable for signature verification.
#[derive(Clone, Debug)]
pub struct VerificationKey {
    pub kid: Option<String>,
    /// Algorithm pinned by the JWK's `alg`, if any.
    pub algorithm: Option<Algorithm>,
    pub key: DecodingKey,
}

impl VerificationKey {
    /// Whether this key can check a signature made with `algorithm`.
    pub fn supports(&self, algorithm: Algorithm) -> bool {
        self.key.family() == algorithm.family()
            && self.algorithm.map_or(true, |pinned| pinned == algorithm)
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

struct CachedKeys {
    keys: JwkSet,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct CacheState {
    cached: Option<CachedKeys>,
    jwks_uri: Option<Url>,
    /// Last load attempt, successful or not.
    last_attempt: Option<Instant>,
    /// Error of the last attempt, if it failed.
    last_error: Option<String>,
}

impl CacheState {
    fn recorded_failure(&self, min_interval: Duration) -> Option<KeyError> {
        match (self.last_attempt, &self.last_error) {
            (Some(at), Some(error)) if at.elapsed() < min_interval => {
                Some(KeyError::Unavailable(error.clone()))
            }
            _ => None,
        }
    }
}

/// Shared, refreshable view of the issuer's signing keys.
pub struct SigningKeyCache {
    http: reqwest::Client,
    source: KeySource,
    config: SigningKeyCacheConfig,
    state: RwLock<CacheState>,
    refresh_gate: Mutex<()>,
}

impl SigningKeyCache {
    /// Creates a cache that loads keys from `source`.
    pub fn new(source: KeySource, config: SigningKeyCacheConfig) -> Result<Self, KeyError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| KeyError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        let state = match &source {
            KeySource::Static(keys) => CacheState {
                cached: Some(CachedKeys {
                    keys: keys.clone(),
                    expires_at: None,
                }),
                ..CacheState::default()
            },
            _ => CacheState::default(),
        };

        Ok(Self {
            http,
            source,
            config,
            state: RwLock::new(state),
            refresh_gate: Mutex::new(()),
        })
    }

    /// Creates a cache over a fixed key set.
    pub fn from_static(keys: JwkSet) -> Self {
        Self {
            http: reqwest::Client::new(),
            source: KeySource::Static(keys.clone()),
            config: SigningKeyCacheConfig::default(),
            state: RwLock::new(CacheState {
                cached: Some(CachedKeys {
                    keys,
                    expires_at: None,
                }),
                ..CacheState::default()
            }),
            refresh_gate: Mutex::new(()),
        }
    }

    /// Keys a token may have been signed with.
    ///
    /// With a `kid` this is the single matching key, refreshing once if it is
    /// unknown. Without one it is every signing key in the set.
    pub async fn keys_for(&self, kid: Option<&str>) -> Result<Vec<VerificationKey>, KeyError> {
        self.ensure_fresh().await?;

        let Some(kid) = kid else {
            return self.signing_keys().await;
        };

        if let Some(key) = self.cached_key(kid).await {
            tracing::trace!(kid = %kid, "Signing key cache hit");
            return Ok(vec![key]);
        }

        if self.refresh_allowed().await {
            tracing::debug!(kid = %kid, "Unknown kid, refreshing signing keys");
            self.refresh().await?;
            if let Some(key) = self.cached_key(kid).await {
                return Ok(vec![key]);
            }
        }

        Err(KeyError::UnknownKey(kid.to_string()))
    }

    async fn cached_key(&self, kid: &str) -> Option<VerificationKey> {
        let state = self.state.read().await;
        state.cached.as_ref().and_then(|cached| {
            cached
                .keys
                .keys
                .iter()
                .filter(|jwk| is_signing_key(jwk))
                .find(|jwk| jwk.common.key_id.as_deref() == Some(kid))
                .and_then(to_verification_key)
        })
    }

    async fn signing_keys(&self) -> Result<Vec<VerificationKey>, KeyError> {
        let state = self.state.read().await;
        let keys: Vec<_> = state
            .cached
            .as_ref()
            .map(|cached| {
                cached
                    .keys
                    .keys
                    .iter()
                    .filter(|jwk| is_signing_key(jwk))
                    .filter_map(to_verification_key)
                    .collect()
            })
            .unwrap_or_default();

        if keys.is_empty() {
            Err(KeyError::NoSigningKeys)
        } else {
            Ok(keys)
        }
    }

    async fn ensure_fresh(&self) -> Result<(), KeyError> {
        {
            let state = self.state.read().await;
            if let Some(cached) = &state.cached {
                match cached.expires_at {
                    None => return Ok(()),
                    Some(expires_at) if Instant::now() < expires_at => return Ok(()),
                    Some(_) => {}
                }
            }
            if let Some(err) = state.recorded_failure(self.config.min_refresh_interval) {
                tracing::trace!("Signing keys unavailable, backing off");
                return Err(err);
            }
        }

        self.refresh().await
    }

    async fn refresh_allowed(&self) -> bool {
        if matches!(self.source, KeySource::Static(_)) {
            return false;
        }
        let state = self.state.read().await;
        state
            .last_attempt
            .map_or(true, |at| at.elapsed() >= self.config.min_refresh_interval)
    }

    /// Reloads the key set from the provider.
    ///
    /// Concurrent callers share one fetch: whoever waited on the gate finds
    /// the attempt already made and gets its outcome.
    pub async fn refresh(&self) -> Result<(), KeyError> {
        if matches!(self.source, KeySource::Static(_)) {
            return Ok(());
        }

        let requested_at = Instant::now();
        let _gate = self.refresh_gate.lock().await;

        {
            let state = self.state.read().await;
            if state.last_attempt.is_some_and(|last| last >= requested_at) {
                return match &state.last_error {
                    Some(error) => Err(KeyError::Unavailable(error.clone())),
                    None => Ok(()),
                };
            }
        }

        let result = self.load().await;

        let mut state = self.state.write().await;
        state.last_attempt = Some(Instant::now());
        match result {
            Ok((jwks_uri, keys, ttl)) => {
                tracing::debug!(
                    jwks_uri = %jwks_uri,
                    keys = keys.keys.len(),
                    ttl_secs = ttl.as_secs(),
                    "Cached signing keys"
                );
                state.last_error = None;
                state.cached = Some(CachedKeys {
                    keys,
                    expires_at: Some(Instant::now() + ttl),
                });
                Ok(())
            }
            Err(e) => {
                state.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    async fn load(&self) -> Result<(Url, JwkSet, Duration), KeyError> {
        let jwks_uri = self.jwks_uri().await?;
        let (keys, ttl) = self.fetch(&jwks_uri).await?;
        Ok((jwks_uri, keys, ttl))
    }

    async fn jwks_uri(&self) -> Result<Url, KeyError> {
        match &self.source {
            KeySource::Remote { jwks_uri } => Ok(jwks_uri.clone()),
            KeySource::Static(_) => Err(KeyError::Unavailable(
                "static key set has no endpoint".to_string(),
            )),
            KeySource::Discovery { authority } => {
                if let Some(uri) = &self.state.read().await.jwks_uri {
                    return Ok(uri.clone());
                }

                self.validate_scheme(authority)?;
                let meta = fetch_provider_metadata(&self.http, authority)
                    .await
                    .map_err(|e| KeyError::Unavailable(format!("{e:#}")))?;
                let uri = meta
                    .jwks_url()
                    .map_err(|e| KeyError::Unavailable(format!("{e:#}")))?;

                self.state.write().await.jwks_uri = Some(uri.clone());
                Ok(uri)
            }
        }
    }

    async fn fetch(&self, jwks_uri: &Url) -> Result<(JwkSet, Duration), KeyError> {
        self.validate_scheme(jwks_uri)?;

        tracing::debug!(jwks_uri = %jwks_uri, "Fetching signing keys");
        let mut response = self
            .http
            .get(jwks_uri.as_str())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(jwks_uri = %jwks_uri, error = %e, "Failed to fetch signing keys");
                KeyError::Unavailable(e.to_string())
            })?;

        if !response.status().is_success() {
            tracing::warn!(jwks_uri = %jwks_uri, status = %response.status(), "Key endpoint returned an error");
            return Err(KeyError::Unavailable(format!(
                "key endpoint returned {}",
                response.status()
            )));
        }

        let limit = self.config.max_response_size;
        if response.content_length().is_some_and(|len| len > limit as u64) {
            return Err(KeyError::Unavailable(format!("key set exceeds {limit} bytes")));
        }

        let ttl = self.ttl_from_headers(response.headers());

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| {
            tracing::warn!(jwks_uri = %jwks_uri, error = %e, "Failed to read signing keys");
            KeyError::Unavailable(e.to_string())
        })? {
            if body.len() + chunk.len() > limit {
                return Err(KeyError::Unavailable(format!("key set exceeds {limit} bytes")));
            }
            body.extend_from_slice(&chunk);
        }

        let keys: JwkSet = serde_json::from_slice(&body).map_err(|e| {
            tracing::warn!(jwks_uri = %jwks_uri, error = %e, "Failed to parse signing keys");
            KeyError::Unavailable(format!("invalid key set: {e}"))
        })?;

        Ok((keys, ttl))
    }

    fn validate_scheme(&self, uri: &Url) -> Result<(), KeyError> {
        match uri.scheme() {
            "https" => Ok(()),
            "http" if self.config.allow_http => Ok(()),
            _ => Err(KeyError::InsecureScheme(uri.to_string())),
        }
    }

    fn ttl_from_headers(&self, headers: &reqwest::header::HeaderMap) -> Duration {
        let ttl = headers
            .get(reqwest::header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_max_age)
            .map(Duration::from_secs)
            .unwrap_or(self.config.default_ttl);

        ttl.min(self.config.max_ttl).max(self.config.min_ttl)
    }
}

// ---------------------------------------------------------------------------
// JWK helpers
// ---------------------------------------------------------------------------

fn parse_max_age(cache_control: &str) -> Option<u64> {
    cache_control.split(',').find_map(|directive| {
        directive
            .trim()
            .strip_prefix("max-age=")
            .and_then(|v| v.parse().ok())
    })
}

fn is_signing_key(jwk: &Jwk) -> bool {
    !matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption))
}

fn to_verification_key(jwk: &Jwk) -> Option<VerificationKey> {
    DecodingKey::from_jwk(jwk).ok().map(|key| VerificationKey {
        kid: jwk.common.key_id.clone(),
        algorithm: jwk_algorithm(jwk),
        key,
    })
}

fn jwk_algorithm(jwk: &Jwk) -> Option<Algorithm> {
    jwk.common.key_algorithm.as_ref().and_then(|alg| match alg {
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trusted_jwks() -> JwkSet {
        serde_json::from_str(include_str!("../../tests/fixtures/trusted_jwks.json")).unwrap()
    }

    #[test]
    fn test_parse_max_age() {
        assert_eq!(parse_max_age("public, max-age=1800"), Some(1800));
        assert_eq!(parse_max_age("no-cache"), None);
        assert_eq!(parse_max_age("max-age=abc"), None);
    }

    #[test]
    fn test_ttl_is_clamped() {
        let cache = SigningKeyCache::new(
            KeySource::Static(JwkSet { keys: vec![] }),
            SigningKeyCacheConfig::default(),
        )
        .unwrap();

        let headers = |value: &str| {
            let mut h = reqwest::header::HeaderMap::new();
            h.insert(reqwest::header::CACHE_CONTROL, value.parse().unwrap());
            h
        };

        assert_eq!(
            cache.ttl_from_headers(&reqwest::header::HeaderMap::new()),
            Duration::from_secs(3600)
        );
        assert_eq!(
            cache.ttl_from_headers(&headers("max-age=1800")),
            Duration::from_secs(1800)
        );
        assert_eq!(
            cache.ttl_from_headers(&headers("max-age=10")),
            Duration::from_secs(300)
        );
        assert_eq!(
            cache.ttl_from_headers(&headers("max-age=999999")),
            Duration::from_secs(86400)
        );
    }

    #[test]
    fn test_validate_scheme() {
        let cache = SigningKeyCache::from_static(trusted_jwks());
        let http = Url::parse("http://sso.local/certs").unwrap();
        assert!(cache.validate_scheme(&http).is_err());
        assert!(cache
            .validate_scheme(&Url::parse("https://sso.example.com/certs").unwrap())
            .is_ok());
    }

    #[tokio::test]
    async fn test_static_keys_by_kid() {
        let cache = SigningKeyCache::from_static(trusted_jwks());
        let keys = cache.keys_for(Some("trusted-key-1")).await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].algorithm, Some(Algorithm::RS256));
    }

    #[tokio::test]
    async fn test_static_unknown_kid_is_not_refreshed() {
        let cache = SigningKeyCache::from_static(trusted_jwks());
        let err = cache.keys_for(Some("nope")).await.err().unwrap();
        assert!(matches!(err, KeyError::UnknownKey(_)));
    }

    #[tokio::test]
    async fn test_missing_kid_returns_all_signing_keys() {
        let cache = SigningKeyCache::from_static(trusted_jwks());
        let keys = cache.keys_for(None).await.unwrap();
        assert!(!keys.is_empty());
    }

    #[tokio::test]
    async fn test_empty_static_set_has_no_signing_keys() {
        let cache = SigningKeyCache::from_static(JwkSet { keys: vec![] });
        assert!(matches!(
            cache.keys_for(None).await.err().unwrap(),
            KeyError::NoSigningKeys
        ));
    }
}
