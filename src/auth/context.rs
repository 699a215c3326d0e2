//! Request-scoped authentication context.

use serde::Serialize;

use crate::provision::BackendId;
use crate::scope::{ScopePredicate, ScopeSet};
use crate::store::{Role, User};

/// Everything downstream handlers need about the caller, assembled once per
/// request by the gateway and passed explicitly. Never cached across
/// requests: the admin flag and scopes are re-derived every time.
#[derive(Debug, Clone, Serialize)]
pub struct AuthContext {
    pub user: User,
    pub is_admin: bool,
    pub scopes: ScopeSet,
    /// The assertion `sub`, kept for audit logging.
    pub subject: Option<String>,
}

impl AuthContext {
    pub fn new(user: User, role: Role, scopes: ScopeSet, subject: Option<String>) -> Self {
        Self {
            user,
            is_admin: role == Role::Admin,
            scopes,
            subject,
        }
    }

    pub fn scope(&self, backend: BackendId) -> &ScopePredicate {
        self.scopes.get(backend)
    }

    /// Backends with no usable identity for this request. The request still
    /// succeeds; the affected capabilities report unavailability.
    pub fn degraded_backends(&self) -> Vec<BackendId> {
        self.scopes.degraded_backends()
    }
}
