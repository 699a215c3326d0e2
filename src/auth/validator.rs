//! Assertion validation.
//!
//! Verifies an inbound signed assertion in a fixed order, each step a hard
//! failure: structure, key resolution, signature, audience, issuer, time
//! window. Signature verification runs with claim validation disabled so the
//! claim checks happen in that order with their own error taxonomy. On
//! success the claimed email is returned; privilege is never taken from the
//! assertion.

use chrono::Utc;
use jsonwebtoken::{Validation, decode, decode_header, errors::ErrorKind};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use crate::auth::keys::{KeyCache, KeyCacheError};
use crate::config::AssertionConfig;
use crate::errors::AuthenticationError;
use crate::types::Email;

/// `aud` may be a single string or an array of strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    fn contains(&self, tag: &str) -> bool {
        match self {
            Self::One(value) => value == tag,
            Self::Many(values) => values.iter().any(|v| v == tag),
        }
    }
}

/// Raw claim set as decoded from the assertion payload.
#[derive(Debug, Deserialize)]
struct RawClaims {
    email: Option<String>,
    sub: Option<String>,
    iss: Option<String>,
    aud: Option<Audience>,
    exp: Option<i64>,
    nbf: Option<i64>,
}

/// Validated claims handed to identity resolution.
#[derive(Debug, Clone)]
pub struct Claims {
    /// Provider-asserted email, normalized. The join key for resolution.
    pub email: Email,
    /// Provider subject, kept for audit logging.
    pub subject: Option<String>,
    /// Expiry (Unix seconds); the assertion is the session, so this bounds it.
    pub expires_at: i64,
}

pub struct AssertionValidator {
    config: AssertionConfig,
    keys: Arc<KeyCache>,
}

impl AssertionValidator {
    pub fn new(config: AssertionConfig, keys: Arc<KeyCache>) -> Self {
        Self { config, keys }
    }

    pub fn key_cache(&self) -> &Arc<KeyCache> {
        &self.keys
    }

    /// Validate a raw assertion and extract its claims. Never partially
    /// succeeds: any failed step rejects the assertion outright.
    pub async fn validate(&self, raw: &str) -> Result<Claims, AuthenticationError> {
        // 1. Structure.
        let header = decode_header(raw)
            .map_err(|e| AuthenticationError::MalformedAssertion(e.to_string()))?;

        // 2. Key resolution, with one forced refresh on an unknown kid.
        let decoding_key = self
            .keys
            .get_key(header.kid.as_deref())
            .await
            .map_err(|e| match e {
                KeyCacheError::KeyNotFound(kid) => AuthenticationError::KeyNotFound(kid),
                KeyCacheError::NoKeysAvailable | KeyCacheError::NoEndpointConfigured => {
                    AuthenticationError::KeyNotFound("(none)".to_string())
                }
                other => AuthenticationError::KeySetUnavailable(other.to_string()),
            })?;

        // 3. Signature only; claim checks are done by hand below so each
        // failure surfaces as its own error.
        let mut validation = Validation::new(self.config.algorithm);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let token = decode::<RawClaims>(raw, &decoding_key, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature => AuthenticationError::InvalidSignature,
                ErrorKind::InvalidAlgorithm => AuthenticationError::MalformedAssertion(
                    "unexpected signing algorithm".to_string(),
                ),
                _ => AuthenticationError::MalformedAssertion(e.to_string()),
            }
        })?;
        let claims = token.claims;

        // 4. Audience.
        let audience_ok = claims
            .aud
            .as_ref()
            .map(|aud| aud.contains(&self.config.audience))
            .unwrap_or(false);
        if !audience_ok {
            return Err(AuthenticationError::AudienceMismatch);
        }

        // 5. Issuer.
        if claims.iss.as_deref() != Some(self.config.issuer.as_str()) {
            return Err(AuthenticationError::IssuerMismatch);
        }

        // 6. Time window.
        let now = Utc::now().timestamp();
        if let Some(nbf) = claims.nbf
            && now < nbf
        {
            return Err(AuthenticationError::NotYetValid);
        }
        let expires_at = claims.exp.ok_or_else(|| {
            AuthenticationError::MalformedAssertion("missing exp claim".to_string())
        })?;
        if expires_at < now {
            return Err(AuthenticationError::Expired);
        }

        let email = claims.email.as_deref().filter(|e| !e.trim().is_empty()).ok_or_else(
            || AuthenticationError::MalformedAssertion("missing email claim".to_string()),
        )?;

        debug!(email = %email, "Assertion validated");

        Ok(Claims {
            email: Email::normalized(email),
            subject: claims.sub,
            expires_at,
        })
    }
}
