//! Shared in-memory backends for orchestrator, resolver, and gateway tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::errors::ProvisioningError;
use crate::provision::{BackendId, BackendIdentityRef, BackendProvisioner};
use crate::types::Email;

/// In-memory backend with a simulated unique constraint: a concurrent
/// create that loses the race sees a duplicate row and recovers by
/// re-reading, like the real provisioners.
pub(crate) struct FakeBackend {
    id: BackendId,
    rows: Mutex<HashMap<String, String>>,
    creates: Mutex<u32>,
    ensures: Mutex<u32>,
}

impl FakeBackend {
    pub(crate) fn new(id: BackendId) -> Self {
        Self {
            id,
            rows: Mutex::new(HashMap::new()),
            creates: Mutex::new(0),
            ensures: Mutex::new(0),
        }
    }

    pub(crate) fn create_count(&self) -> u32 {
        *self.creates.lock().unwrap()
    }

    pub(crate) fn ensure_count(&self) -> u32 {
        *self.ensures.lock().unwrap()
    }
}

#[async_trait]
impl BackendProvisioner for FakeBackend {
    fn id(&self) -> BackendId {
        self.id
    }

    async fn ensure(&self, email: &Email) -> Result<BackendIdentityRef, ProvisioningError> {
        *self.ensures.lock().unwrap() += 1;

        // Check phase.
        if let Some(existing) = self.rows.lock().unwrap().get(email.as_str()) {
            return Ok(BackendIdentityRef::new(self.id, existing.clone()));
        }

        // Create phase, racing against concurrent callers.
        tokio::task::yield_now().await;
        let candidate = format!("{}-{}", self.id, uuid::Uuid::new_v4());
        let mut rows = self.rows.lock().unwrap();
        if let Some(winner) = rows.get(email.as_str()) {
            // Duplicate-key outcome, treated as success via re-read.
            return Ok(BackendIdentityRef::new(self.id, winner.clone()));
        }
        rows.insert(email.as_str().to_string(), candidate.clone());
        *self.creates.lock().unwrap() += 1;
        Ok(BackendIdentityRef::new(self.id, candidate))
    }
}

/// Backend that is permanently down.
pub(crate) struct BrokenBackend {
    id: BackendId,
}

impl BrokenBackend {
    pub(crate) fn new(id: BackendId) -> Self {
        Self { id }
    }
}

#[async_trait]
impl BackendProvisioner for BrokenBackend {
    fn id(&self) -> BackendId {
        self.id
    }

    async fn ensure(&self, _email: &Email) -> Result<BackendIdentityRef, ProvisioningError> {
        Err(ProvisioningError::new(self.id, "simulated outage"))
    }
}
