//! System-of-record provisioner.
//!
//! "Provisioning" here is the canonical user row itself; the backend ref is
//! the generated `uid`. This is the one provisioner the identity resolver
//! awaits synchronously, because every later step (role, scoping) reads from
//! this store.

use async_trait::async_trait;
use std::sync::Arc;

use crate::errors::ProvisioningError;
use crate::provision::{BackendId, BackendIdentityRef, BackendProvisioner};
use crate::store::UserStore;
use crate::types::Email;

pub struct CatalogProvisioner {
    store: Arc<UserStore>,
}

impl CatalogProvisioner {
    pub fn new(store: Arc<UserStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BackendProvisioner for CatalogProvisioner {
    fn id(&self) -> BackendId {
        BackendId::Catalog
    }

    async fn ensure(&self, email: &Email) -> Result<BackendIdentityRef, ProvisioningError> {
        let user = self
            .store
            .get_or_create(email)
            .await
            .map_err(|e| ProvisioningError::new(BackendId::Catalog, e.to_string()))?;

        Ok(BackendIdentityRef::new(BackendId::Catalog, user.uid))
    }
}
