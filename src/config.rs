//! Environment-level configuration for the gateway.
//!
//! All settings come from `GATEWAY_*` environment variables with sensible
//! defaults for local development (in-memory stores, no external services).
//! There is no configuration file; deployments set the environment.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Default key-cache TTL in seconds (1 hour).
pub const DEFAULT_KEY_CACHE_TTL_SECS: u64 = 3600;

/// Default identity-cache TTL in seconds (5 minutes).
pub const DEFAULT_IDENTITY_CACHE_TTL_SECS: u64 = 300;

/// Default bound on the whole authentication check, in seconds. Past this
/// the request fails closed as unauthenticated.
pub const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 10;

/// Default header carrying the signed assertion.
pub const DEFAULT_ASSERTION_HEADER: &str = "x-auth-assertion";

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u64_or(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Connection parameters for one of the record-oriented stores (catalog,
/// document, graph). Each is independently owned and independently addressed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub url: String,
    pub namespace: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl StoreConfig {
    fn from_env(prefix: &str, default_db: &str) -> Self {
        Self {
            url: env_or(&format!("{prefix}_URL"), "memory"),
            namespace: env_or(&format!("{prefix}_NAMESPACE"), "gateway"),
            database: env_or(&format!("{prefix}_DATABASE"), default_db),
            username: env::var(format!("{prefix}_USERNAME")).ok(),
            password: env::var(format!("{prefix}_PASSWORD")).ok(),
        }
    }

    /// In-memory store, used by tests and local development.
    pub fn memory(database: &str) -> Self {
        Self {
            url: "memory".to_string(),
            namespace: "gateway".to_string(),
            database: database.to_string(),
            username: None,
            password: None,
        }
    }
}

/// Assertion validation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionConfig {
    /// Issuer domain the `iss` claim must equal.
    pub issuer: String,
    /// Audience tag the `aud` claim must include.
    pub audience: String,
    /// JWKS endpoint of the identity provider. `None` means only statically
    /// installed keys are accepted (closed deployments, tests).
    pub jwks_url: Option<String>,
    /// Signing algorithm expected on assertions.
    pub algorithm: jsonwebtoken::Algorithm,
    /// Key-cache TTL in seconds.
    pub key_cache_ttl_secs: u64,
    /// Whether a stale key set may be used when the provider endpoint is
    /// unreachable (bounded at 24h in the cache itself).
    pub allow_stale_keys: bool,
}

impl Default for AssertionConfig {
    fn default() -> Self {
        Self {
            issuer: String::new(),
            audience: String::new(),
            jwks_url: None,
            algorithm: jsonwebtoken::Algorithm::RS256,
            key_cache_ttl_secs: DEFAULT_KEY_CACHE_TTL_SECS,
            allow_stale_keys: true,
        }
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub assertion: AssertionConfig,
    /// Header name carrying the signed assertion.
    pub assertion_header: String,
    /// Trusted-identity header honored without signature checks. Only for
    /// service-to-service calls inside a closed network boundary; never
    /// enable across an open network.
    pub trusted_header: Option<String>,
    /// Identity-cache TTL in seconds.
    pub identity_cache_ttl_secs: u64,
    /// Bound on the whole authentication check.
    pub auth_timeout_secs: u64,
    /// System-of-record store (holds `role`/`tier`).
    pub catalog: StoreConfig,
    /// Document store.
    pub document: StoreConfig,
    /// Graph store.
    pub graph: StoreConfig,
    /// Object store base URL. `None` disables the backend (development).
    pub object_store_url: Option<String>,
    /// Media-identity service base URL. `None` disables the backend.
    pub media_service_url: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl GatewayConfig {
    /// Read the full configuration from `GATEWAY_*` environment variables.
    pub fn from_env() -> Self {
        let internal_bypass = env::var("GATEWAY_INTERNAL_BYPASS")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        // The trusted header is only honored when the bypass is explicitly
        // switched on; a configured header name alone is not enough.
        let trusted_header = if internal_bypass {
            Some(env_or("GATEWAY_TRUSTED_HEADER", "x-internal-identity"))
        } else {
            None
        };

        Self {
            assertion: AssertionConfig {
                issuer: env_or("GATEWAY_ISSUER", ""),
                audience: env_or("GATEWAY_AUDIENCE", ""),
                jwks_url: env::var("GATEWAY_JWKS_URL").ok(),
                algorithm: jsonwebtoken::Algorithm::RS256,
                key_cache_ttl_secs: env_u64_or(
                    "GATEWAY_KEY_CACHE_TTL_SECS",
                    DEFAULT_KEY_CACHE_TTL_SECS,
                ),
                allow_stale_keys: env::var("GATEWAY_ALLOW_STALE_KEYS")
                    .map(|v| v != "0")
                    .unwrap_or(true),
            },
            assertion_header: env_or("GATEWAY_ASSERTION_HEADER", DEFAULT_ASSERTION_HEADER),
            trusted_header,
            identity_cache_ttl_secs: env_u64_or(
                "GATEWAY_IDENTITY_CACHE_TTL_SECS",
                DEFAULT_IDENTITY_CACHE_TTL_SECS,
            ),
            auth_timeout_secs: env_u64_or("GATEWAY_AUTH_TIMEOUT_SECS", DEFAULT_AUTH_TIMEOUT_SECS),
            catalog: StoreConfig::from_env("GATEWAY_CATALOG", "catalog"),
            document: StoreConfig::from_env("GATEWAY_DOCUMENT", "documents"),
            graph: StoreConfig::from_env("GATEWAY_GRAPH", "graph"),
            object_store_url: env::var("GATEWAY_OBJECT_STORE_URL").ok(),
            media_service_url: env::var("GATEWAY_MEDIA_SERVICE_URL").ok(),
        }
    }

    /// Fully in-memory configuration for tests.
    pub fn for_tests(issuer: &str, audience: &str) -> Self {
        Self {
            assertion: AssertionConfig {
                issuer: issuer.to_string(),
                audience: audience.to_string(),
                jwks_url: None,
                algorithm: jsonwebtoken::Algorithm::HS256,
                key_cache_ttl_secs: DEFAULT_KEY_CACHE_TTL_SECS,
                allow_stale_keys: false,
            },
            assertion_header: DEFAULT_ASSERTION_HEADER.to_string(),
            trusted_header: None,
            identity_cache_ttl_secs: DEFAULT_IDENTITY_CACHE_TTL_SECS,
            auth_timeout_secs: DEFAULT_AUTH_TIMEOUT_SECS,
            catalog: StoreConfig::memory("catalog"),
            document: StoreConfig::memory("documents"),
            graph: StoreConfig::memory("graph"),
            object_store_url: None,
            media_service_url: None,
        }
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    pub fn identity_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.identity_cache_ttl_secs)
    }
}
