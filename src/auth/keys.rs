//! Signing key set fetching and caching.
//!
//! Holds the identity provider's public keys (a JWKS document) behind a TTL
//! cache. A refresh happens on TTL expiry or on a miss of a requested `kid`
//! (key rotation); after one forced refresh a still-missing `kid` is a hard
//! `KeyNotFound`. Refreshes are single-flight: concurrent callers share one
//! in-flight fetch instead of issuing N redundant ones.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::config::DEFAULT_KEY_CACHE_TTL_SECS;

/// Maximum stale cache age in seconds (24 hours). Only relevant when stale
/// fallback is enabled and the provider endpoint is down.
pub const MAX_STALE_CACHE_SECONDS: u64 = 86400;

/// A single JSON Web Key from the provider's key-set document.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type (e.g., "RSA")
    pub kty: String,
    /// Key ID, matched against the assertion header's kid
    pub kid: Option<String>,
    /// Algorithm (e.g., "RS256")
    pub alg: Option<String>,
    /// Key use ("sig" for signature keys)
    #[serde(rename = "use")]
    pub key_use: Option<String>,
    /// RSA modulus (base64url encoded)
    pub n: Option<String>,
    /// RSA exponent (base64url encoded)
    pub e: Option<String>,
    /// X.509 certificate chain
    pub x5c: Option<Vec<String>>,
}

/// A key-set document containing multiple keys.
#[derive(Debug, Clone, Deserialize)]
pub struct KeySetDocument {
    pub keys: Vec<Jwk>,
}

#[derive(Clone)]
struct CachedKey {
    decoding_key: DecodingKey,
    /// Statically installed keys survive fetch-driven replacement.
    pinned: bool,
}

/// Thread-safe signing key cache with single-flight refresh.
pub struct KeyCache {
    /// Provider key-set endpoint. `None` means only pinned keys exist.
    jwks_url: Option<String>,
    cache_ttl: Duration,
    /// Whether a stale set may serve when the endpoint is unreachable.
    allow_stale: bool,
    keys: Arc<RwLock<HashMap<String, CachedKey>>>,
    last_fetch: Arc<RwLock<Option<Instant>>>,
    /// Serializes refreshes; waiters re-check the cache after acquiring it
    /// so only the first caller actually fetches.
    refresh_lock: Mutex<()>,
    client: reqwest::Client,
}

impl KeyCache {
    pub fn new(jwks_url: Option<String>, cache_ttl_seconds: u64, allow_stale: bool) -> Self {
        Self {
            jwks_url,
            cache_ttl: Duration::from_secs(cache_ttl_seconds),
            allow_stale,
            keys: Arc::new(RwLock::new(HashMap::new())),
            last_fetch: Arc::new(RwLock::new(None)),
            refresh_lock: Mutex::new(()),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Cache for a provider endpoint with default TTL.
    pub fn for_endpoint(jwks_url: String) -> Self {
        Self::new(Some(jwks_url), DEFAULT_KEY_CACHE_TTL_SECS, true)
    }

    /// Install a pinned key that never expires with the fetched set. Used
    /// for closed deployments with a static provider key, and by tests.
    pub async fn install_static_key(&self, kid: impl Into<String>, key: DecodingKey) {
        let mut keys = self.keys.write().await;
        keys.insert(
            kid.into(),
            CachedKey {
                decoding_key: key,
                pinned: true,
            },
        );
    }

    /// Get a decoding key by key ID.
    ///
    /// If `kid` is None, returns the first available key. Refreshes from the
    /// provider when the cache is past its TTL or the kid is unknown; a kid
    /// still unknown after that one forced refresh fails `KeyNotFound`.
    pub async fn get_key(&self, kid: Option<&str>) -> Result<DecodingKey, KeyCacheError> {
        let should_refresh = {
            let last_fetch = self.last_fetch.read().await;
            match *last_fetch {
                Some(t) => t.elapsed() > self.cache_ttl,
                None => self.jwks_url.is_some(),
            }
        };

        if !should_refresh
            && let Some(key) = self.get_from_cache(kid).await
        {
            return Ok(key);
        }

        if self.jwks_url.is_none() {
            // Pinned-keys-only mode: nothing to refresh from.
            return self.get_from_cache(kid).await.ok_or_else(|| miss(kid));
        }

        match self.refresh(should_refresh).await {
            Ok(()) => self.get_from_cache(kid).await.ok_or_else(|| miss(kid)),
            Err(e) => {
                if self.allow_stale {
                    let last_fetch = self.last_fetch.read().await;
                    let stale_ok = last_fetch
                        .map(|t| t.elapsed() < Duration::from_secs(MAX_STALE_CACHE_SECONDS))
                        .unwrap_or(false);

                    if stale_ok {
                        warn!("Key set fetch failed, using stale cache: {}", e);
                        if let Some(key) = self.get_from_cache(kid).await {
                            return Ok(key);
                        }
                    }
                }

                Err(e)
            }
        }
    }

    async fn get_from_cache(&self, kid: Option<&str>) -> Option<DecodingKey> {
        let keys = self.keys.read().await;

        match kid {
            Some(k) => keys.get(k).map(|c| c.decoding_key.clone()),
            None => keys.values().next().map(|c| c.decoding_key.clone()),
        }
    }

    /// Single-flight refresh. `entered_stale` is the caller's view of the
    /// cache age before queueing; if another caller refreshed while we
    /// waited for the lock, the fetch is skipped.
    async fn refresh(&self, entered_stale: bool) -> Result<(), KeyCacheError> {
        let entered_at = Instant::now();
        let _guard = self.refresh_lock.lock().await;

        {
            let last_fetch = self.last_fetch.read().await;
            if let Some(t) = *last_fetch {
                let refreshed_while_waiting = t.elapsed() < entered_at.elapsed();
                let fresh_enough = t.elapsed() <= self.cache_ttl;
                if refreshed_while_waiting && (fresh_enough || !entered_stale) {
                    debug!("Key set refreshed by concurrent caller, skipping fetch");
                    return Ok(());
                }
            }
        }

        self.fetch_keys().await
    }

    /// One outbound call to the provider's key-set endpoint. Replaces all
    /// non-pinned keys with the fetched set.
    async fn fetch_keys(&self) -> Result<(), KeyCacheError> {
        let url = self
            .jwks_url
            .as_ref()
            .ok_or(KeyCacheError::NoEndpointConfigured)?;

        debug!("Fetching signing keys from {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| KeyCacheError::FetchError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(KeyCacheError::FetchError(format!(
                "HTTP {} from key-set endpoint",
                response.status()
            )));
        }

        let document: KeySetDocument = response
            .json()
            .await
            .map_err(|e| KeyCacheError::ParseError(e.to_string()))?;

        let mut new_keys = HashMap::new();

        for jwk in document.keys {
            if jwk.kty != "RSA" {
                debug!("Skipping non-RSA key: {:?}", jwk.kty);
                continue;
            }

            if jwk.key_use.as_deref() == Some("enc") {
                debug!("Skipping encryption key");
                continue;
            }

            match Self::jwk_to_decoding_key(&jwk) {
                Ok(decoding_key) => {
                    let kid = jwk.kid.clone().unwrap_or_else(|| "default".to_string());
                    debug!("Cached key with kid: {}", kid);
                    new_keys.insert(
                        kid,
                        CachedKey {
                            decoding_key,
                            pinned: false,
                        },
                    );
                }
                Err(e) => {
                    warn!("Failed to parse JWK: {}", e);
                }
            }
        }

        if new_keys.is_empty() {
            return Err(KeyCacheError::NoValidKeys);
        }

        {
            let mut keys = self.keys.write().await;
            // Retired kids drop out here; pinned keys stay.
            keys.retain(|_, cached| cached.pinned);
            keys.extend(new_keys);
        }

        {
            let mut last_fetch = self.last_fetch.write().await;
            *last_fetch = Some(Instant::now());
        }

        debug!("Cached {} signing keys", self.keys.read().await.len());
        Ok(())
    }

    fn jwk_to_decoding_key(jwk: &Jwk) -> Result<DecodingKey, KeyCacheError> {
        // Try the X.509 certificate chain first.
        if let Some(x5c) = &jwk.x5c
            && let Some(cert) = x5c.first()
        {
            // x5c carries standard (not URL-safe) base64 DER.
            let cert_der = base64::engine::general_purpose::STANDARD
                .decode(cert)
                .map_err(|e| KeyCacheError::ParseError(format!("Invalid x5c: {}", e)))?;
            return Ok(DecodingKey::from_rsa_der(&cert_der));
        }

        // Fall back to n and e components, the common case for JWKS.
        let n = jwk
            .n
            .as_ref()
            .ok_or_else(|| KeyCacheError::ParseError("Missing 'n' in RSA key".to_string()))?;
        let e = jwk
            .e
            .as_ref()
            .ok_or_else(|| KeyCacheError::ParseError("Missing 'e' in RSA key".to_string()))?;

        DecodingKey::from_rsa_components(n, e)
            .map_err(|e| KeyCacheError::ParseError(format!("Invalid RSA components: {}", e)))
    }

    pub async fn has_keys(&self) -> bool {
        !self.keys.read().await.is_empty()
    }

    pub async fn key_count(&self) -> usize {
        self.keys.read().await.len()
    }

    /// Drop all cached keys, pinned included.
    pub async fn clear(&self) {
        let mut keys = self.keys.write().await;
        keys.clear();
        let mut last_fetch = self.last_fetch.write().await;
        *last_fetch = None;
    }
}

fn miss(kid: Option<&str>) -> KeyCacheError {
    match kid {
        Some(k) => KeyCacheError::KeyNotFound(k.to_string()),
        None => KeyCacheError::NoKeysAvailable,
    }
}

/// Errors from the signing key cache.
#[derive(Debug, Clone)]
pub enum KeyCacheError {
    /// Failed to fetch the key set from the endpoint.
    FetchError(String),
    /// Failed to parse the key-set response.
    ParseError(String),
    /// No valid keys found in the fetched document.
    NoValidKeys,
    /// Key with the requested kid not found after a forced refresh.
    KeyNotFound(String),
    /// No keys available in the cache at all.
    NoKeysAvailable,
    /// Neither an endpoint nor pinned keys were configured.
    NoEndpointConfigured,
}

impl fmt::Display for KeyCacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FetchError(msg) => write!(f, "Failed to fetch key set: {}", msg),
            Self::ParseError(msg) => write!(f, "Failed to parse key set: {}", msg),
            Self::NoValidKeys => write!(f, "No valid keys found in key set"),
            Self::KeyNotFound(kid) => write!(f, "Key not found: {}", kid),
            Self::NoKeysAvailable => write!(f, "No keys available in cache"),
            Self::NoEndpointConfigured => write!(f, "No key-set endpoint configured"),
        }
    }
}

impl std::error::Error for KeyCacheError {}
