//! Fan-out coordinator for first-seen identities.
//!
//! Runs every registered provisioner concurrently, records each outcome in
//! the system-of-record provisioning ledger, and never lets one backend's
//! failure block another backend or the authentication flow. Callers that
//! need a specific backend inspect its entry in the returned map and retry
//! lazily through [`ProvisioningOrchestrator::ensure_backend`].

use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::errors::ProvisioningError;
use crate::provision::{BackendId, BackendIdentityRef, BackendProvisioner};
use crate::store::{ProvisionStatus, UserStore};
use crate::types::Email;

/// Per-backend outcome map returned by a fan-out.
pub type ProvisionOutcome = BTreeMap<BackendId, Result<BackendIdentityRef, ProvisioningError>>;

pub struct ProvisioningOrchestrator {
    ledger: Arc<UserStore>,
    provisioners: Vec<Arc<dyn BackendProvisioner>>,
}

impl ProvisioningOrchestrator {
    pub fn new(ledger: Arc<UserStore>, provisioners: Vec<Arc<dyn BackendProvisioner>>) -> Self {
        Self {
            ledger,
            provisioners,
        }
    }

    pub fn backends(&self) -> Vec<BackendId> {
        self.provisioners.iter().map(|p| p.id()).collect()
    }

    /// Provision an identity in every registered backend.
    ///
    /// The fan-out is concurrent and bounded by the fixed provisioner count.
    /// Each failure is caught individually; this method itself never fails.
    pub async fn provision_all(&self, email: &Email) -> ProvisionOutcome {
        let futures = self
            .provisioners
            .iter()
            .map(|provisioner| self.provision_one(provisioner.clone(), email));

        join_all(futures).await.into_iter().collect()
    }

    /// On-demand provisioning of a single backend, used for lazy retry at
    /// point of use when the first-seen fan-out skipped or failed it.
    pub async fn ensure_backend(
        &self,
        backend: BackendId,
        email: &Email,
    ) -> Result<BackendIdentityRef, ProvisioningError> {
        let provisioner = self
            .provisioners
            .iter()
            .find(|p| p.id() == backend)
            .cloned()
            .ok_or_else(|| ProvisioningError::new(backend, "backend not registered"))?;

        self.provision_one(provisioner, email).await.1
    }

    async fn provision_one(
        &self,
        provisioner: Arc<dyn BackendProvisioner>,
        email: &Email,
    ) -> (BackendId, Result<BackendIdentityRef, ProvisioningError>) {
        let backend = provisioner.id();

        self.record_status(backend, email, ProvisionStatus::Provisioning, None, None)
            .await;

        let result = provisioner.ensure(email).await;

        match &result {
            Ok(identity) => {
                debug!(backend = %backend, email = %email, "Backend provisioned");
                self.record_status(
                    backend,
                    email,
                    ProvisionStatus::Provisioned,
                    Some(identity.external_ref.as_str().to_string()),
                    None,
                )
                .await;
            }
            Err(e) => {
                warn!(backend = %backend, email = %email, error = %e.reason, "Backend provisioning failed");
                self.record_status(
                    backend,
                    email,
                    ProvisionStatus::Failed,
                    None,
                    Some(e.reason.clone()),
                )
                .await;
            }
        }

        (backend, result)
    }

    /// Ledger writes are best-effort; a ledger hiccup must not turn a
    /// successful provisioning into a failure.
    async fn record_status(
        &self,
        backend: BackendId,
        email: &Email,
        status: ProvisionStatus,
        external_ref: Option<String>,
        last_error: Option<String>,
    ) {
        if let Err(e) = self
            .ledger
            .set_provision_status(backend.as_str(), email, status, external_ref, last_error)
            .await
        {
            warn!(backend = %backend, email = %email, error = %e, "Failed to record provisioning status");
        }
    }
}
