// Core modules
mod config;
mod errors;
mod types;

pub mod auth;
pub mod gateway;
pub mod identity;
pub mod provision;
pub mod scope;
pub mod server;
pub mod store;

// Re-export key types and functions
pub use auth::{AssertionValidator, AuthContext, Claims, KeyCache};
pub use config::{AssertionConfig, GatewayConfig, StoreConfig};
pub use errors::{
    AuthenticationError, AuthorizationError, BackendUnavailableError, ProvisioningError,
};
pub use gateway::Gateway;
pub use identity::{AdminResolver, IdentityCache, IdentityResolver};
pub use provision::{BackendId, BackendIdentityRef, BackendProvisioner, ProvisioningOrchestrator};
pub use scope::{IsolationEnforcer, ScopePredicate, ScopeSet};
pub use store::{ProvisionStatus, Role, User, UserStore};
pub use types::{Email, UserId};

use std::sync::Arc;

use anyhow::Result;

/// Convenience function to connect every configured backend and return a
/// ready gateway.
pub async fn create_gateway(config: GatewayConfig) -> Result<Arc<Gateway>> {
    Gateway::connect(config).await
}
