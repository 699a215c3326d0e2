//! Just-in-time provisioning of identities across the five backends.
//!
//! Each backend owns its creation semantics behind the uniform
//! [`BackendProvisioner`] contract; the [`orchestrator`] fans out over the
//! fixed set and tolerates per-backend failure.

mod catalog;
mod document;
mod graph;
mod media;
mod object;
pub mod orchestrator;
#[cfg(test)]
pub(crate) mod testing;

pub use catalog::CatalogProvisioner;
pub use document::DocumentProvisioner;
pub use graph::GraphProvisioner;
pub use media::MediaProvisioner;
pub use object::ObjectProvisioner;
pub use orchestrator::ProvisioningOrchestrator;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::errors::ProvisioningError;
use crate::types::{Email, ExternalRef, OwnerToken};

/// The five independently-owned backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendId {
    /// Relational/catalog store, the system-of-record for `role`/`tier`.
    Catalog,
    /// Document store.
    Document,
    /// Graph store.
    Graph,
    /// Object store.
    Object,
    /// External media-identity service.
    Media,
}

impl BackendId {
    /// All backends, in orchestration order. The fan-out is bounded by the
    /// length of this set.
    pub const ALL: [BackendId; 5] = [
        Self::Catalog,
        Self::Document,
        Self::Graph,
        Self::Object,
        Self::Media,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Catalog => "catalog",
            Self::Document => "document",
            Self::Graph => "graph",
            Self::Object => "object",
            Self::Media => "media",
        }
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reference to a provisioned identity inside one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendIdentityRef {
    pub backend: BackendId,
    pub external_ref: ExternalRef,
}

impl BackendIdentityRef {
    pub fn new(backend: BackendId, external_ref: impl Into<String>) -> Self {
        Self {
            backend,
            external_ref: ExternalRef::new(external_ref),
        }
    }
}

/// Uniform provisioning contract, one implementation per backend.
///
/// `ensure` must be idempotent under concurrent invocation with the same
/// email: check-then-create, with the create path treating a duplicate-key
/// outcome as success by falling back to a re-read.
#[async_trait]
pub trait BackendProvisioner: Send + Sync {
    fn id(&self) -> BackendId;

    async fn ensure(&self, email: &Email) -> Result<BackendIdentityRef, ProvisioningError>;
}

/// Stable per-user ownership token for prefix-scoped backends, derived from
/// the normalized email. The token, not the raw email, goes into object keys
/// so that addresses with unusual characters stay out of key space.
pub fn owner_token(email: &Email) -> OwnerToken {
    let mut hasher = Sha256::new();
    hasher.update(email.as_str().as_bytes());
    let digest = hasher.finalize();
    OwnerToken::new(format!("{:x}", digest)[..32].to_string())
}
