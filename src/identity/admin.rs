//! Administrative-privilege resolution.
//!
//! Privilege is read fresh from the system-of-record on every request. The
//! assertion proves identity, never privilege, and the identity cache is
//! deliberately bypassed so a demotion takes effect on the very next
//! request.

use std::sync::Arc;
use tracing::debug;

use crate::errors::BackendUnavailableError;
use crate::provision::BackendId;
use crate::store::{Role, UserStore};
use crate::types::Email;

pub struct AdminResolver {
    store: Arc<UserStore>,
}

impl AdminResolver {
    pub fn new(store: Arc<UserStore>) -> Self {
        Self { store }
    }

    /// Current role from the store. An email with no row reads as `User`;
    /// an unreachable store is an error, never a silent non-admin.
    pub async fn role_of(&self, email: &Email) -> Result<Role, BackendUnavailableError> {
        let role = self
            .store
            .role_of(email)
            .await
            .map_err(|e| BackendUnavailableError::new(BackendId::Catalog, e.to_string()))?
            .unwrap_or(Role::User);

        debug!(email = email.as_str(), role = role.as_str(), "resolved role");
        Ok(role)
    }

    pub async fn is_admin(&self, email: &Email) -> Result<bool, BackendUnavailableError> {
        Ok(self.role_of(email).await? == Role::Admin)
    }
}
