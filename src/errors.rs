//! Error taxonomy for the gateway.
//!
//! Four families, matching how failures propagate:
//!
//! - [`AuthenticationError`]: the assertion itself is unacceptable. Always
//!   surfaced to the caller immediately, never retried.
//! - [`AuthorizationError`]: valid identity, insufficient privilege. Rejects
//!   the specific operation only.
//! - [`ProvisioningError`]: one backend failed to provision. Logged with
//!   backend id and cause, swallowed at the orchestration boundary, retried
//!   lazily on next on-demand use.
//! - [`BackendUnavailableError`]: a backend is unreachable at scoping time.
//!   The capability depending on it degrades; authentication still succeeds.

use std::fmt;

use crate::provision::BackendId;

/// Reasons an inbound assertion is rejected. Every variant maps to a
/// 401-equivalent outcome at the service boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationError {
    /// The assertion header was absent from the request.
    MissingAssertion,
    /// The assertion could not be parsed as a signed token.
    MalformedAssertion(String),
    /// No signing key matched the assertion's `kid`, even after a forced
    /// key-set refresh.
    KeyNotFound(String),
    /// The signature did not verify against the provider's key.
    InvalidSignature,
    /// The `aud` claim did not include the configured audience tag.
    AudienceMismatch,
    /// The `iss` claim did not match the configured issuer.
    IssuerMismatch,
    /// The assertion's expiry is in the past.
    Expired,
    /// The assertion's `nbf` is in the future.
    NotYetValid,
    /// The signing key set could not be obtained.
    KeySetUnavailable(String),
    /// The overall authentication check exceeded its bounded timeout; the
    /// request fails closed.
    Timeout,
    /// Identity resolution against the system-of-record failed.
    Resolver(String),
}

impl fmt::Display for AuthenticationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingAssertion => write!(f, "No identity assertion presented"),
            Self::MalformedAssertion(msg) => write!(f, "Malformed assertion: {}", msg),
            Self::KeyNotFound(kid) => write!(f, "Signing key not found: {}", kid),
            Self::InvalidSignature => write!(f, "Assertion signature verification failed"),
            Self::AudienceMismatch => write!(f, "Assertion audience does not match"),
            Self::IssuerMismatch => write!(f, "Assertion issuer does not match"),
            Self::Expired => write!(f, "Assertion has expired"),
            Self::NotYetValid => write!(f, "Assertion is not yet valid"),
            Self::KeySetUnavailable(msg) => write!(f, "Signing key set unavailable: {}", msg),
            Self::Timeout => write!(f, "Authentication check timed out"),
            Self::Resolver(msg) => write!(f, "Identity resolution failed: {}", msg),
        }
    }
}

impl std::error::Error for AuthenticationError {}

/// Valid identity, insufficient privilege.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationError {
    /// The operation requires the admin role.
    AdminRequired,
}

impl fmt::Display for AuthorizationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AdminRequired => write!(f, "Administrator role required"),
        }
    }
}

impl std::error::Error for AuthorizationError {}

/// A single backend failed to provision an identity. Scoped to that backend
/// only; never blocks the other backends or the authentication outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningError {
    pub backend: BackendId,
    pub reason: String,
}

impl ProvisioningError {
    pub fn new(backend: BackendId, reason: impl Into<String>) -> Self {
        Self {
            backend,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ProvisioningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Provisioning failed on {}: {}", self.backend, self.reason)
    }
}

impl std::error::Error for ProvisioningError {}

/// A backend could not be reached at scoping or query time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendUnavailableError {
    pub backend: BackendId,
    pub reason: String,
}

impl BackendUnavailableError {
    pub fn new(backend: BackendId, reason: impl Into<String>) -> Self {
        Self {
            backend,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for BackendUnavailableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Backend {} unavailable: {}", self.backend, self.reason)
    }
}

impl std::error::Error for BackendUnavailableError {}
