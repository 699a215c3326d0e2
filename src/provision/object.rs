//! Object store provisioner: one key prefix per identity.
//!
//! The store is addressed over HTTP (S3-style). Provisioning writes a marker
//! object under the user's prefix; the prefix itself, derived from the
//! owner token, is the backend identity and the scoping boundary.

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::errors::ProvisioningError;
use crate::provision::{BackendId, BackendIdentityRef, BackendProvisioner, owner_token};
use crate::types::Email;

pub struct ObjectProvisioner {
    base_url: String,
    client: reqwest::Client,
}

impl ObjectProvisioner {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()?,
        })
    }

    /// Key prefix under which all of this identity's objects live.
    pub fn prefix_for(email: &Email) -> String {
        format!("users/{}/", owner_token(email))
    }

    fn marker_url(&self, email: &Email) -> String {
        format!("{}/{}.keep", self.base_url, Self::prefix_for(email))
    }
}

#[async_trait]
impl BackendProvisioner for ObjectProvisioner {
    fn id(&self) -> BackendId {
        BackendId::Object
    }

    async fn ensure(&self, email: &Email) -> Result<BackendIdentityRef, ProvisioningError> {
        let fail = |msg: String| ProvisioningError::new(BackendId::Object, msg);
        let prefix = Self::prefix_for(email);
        let url = self.marker_url(email);

        // Check: the marker already existing means a previous ensure won.
        let head = self
            .client
            .head(&url)
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;

        if head.status().is_success() {
            return Ok(BackendIdentityRef::new(BackendId::Object, prefix));
        }

        let put = self
            .client
            .put(&url)
            .body(Vec::new())
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;

        let status = put.status();
        // 409/412 mean a concurrent ensure created the marker first, which
        // is the outcome we wanted anyway.
        if status.is_success()
            || status == reqwest::StatusCode::CONFLICT
            || status == reqwest::StatusCode::PRECONDITION_FAILED
        {
            debug!(email = %email, prefix = %prefix, "Object store prefix provisioned");
            return Ok(BackendIdentityRef::new(BackendId::Object, prefix));
        }

        Err(fail(format!("HTTP {} writing prefix marker", status)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_is_stable_and_opaque() {
        let alice = ObjectProvisioner::prefix_for(&Email::new("alice@example.com"));
        let alice_again = ObjectProvisioner::prefix_for(&Email::new("alice@example.com"));
        let bob = ObjectProvisioner::prefix_for(&Email::new("bob@example.com"));

        assert_eq!(alice, alice_again);
        assert_ne!(alice, bob);
        assert!(alice.starts_with("users/"));
        assert!(alice.ends_with('/'));
        // Raw email characters never reach key space.
        assert!(!alice.contains('@'));
    }

    #[test]
    fn test_marker_url_shape() {
        let provisioner = ObjectProvisioner::new("http://objects.internal:9000/").unwrap();
        let url = provisioner.marker_url(&Email::new("alice@example.com"));
        assert!(url.starts_with("http://objects.internal:9000/users/"));
        assert!(url.ends_with("/.keep"));
    }
}
