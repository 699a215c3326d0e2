//! Media-identity service provisioner: one external account per identity.
//!
//! The media service is a separate product with its own account namespace;
//! provisioning registers the email there and records the account id it
//! assigns. A 409 from the create endpoint means the account already exists,
//! so the provisioner looks it up instead of failing.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::errors::ProvisioningError;
use crate::provision::{BackendId, BackendIdentityRef, BackendProvisioner};
use crate::types::Email;

#[derive(Debug, Deserialize)]
struct MediaAccount {
    id: String,
}

pub struct MediaProvisioner {
    base_url: String,
    client: reqwest::Client,
}

impl MediaProvisioner {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()?,
        })
    }

    async fn lookup_account(&self, email: &Email) -> Result<Option<MediaAccount>, reqwest::Error> {
        let accounts: Vec<MediaAccount> = self
            .client
            .get(format!("{}/v1/accounts", self.base_url))
            .query(&[("email", email.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(accounts.into_iter().next())
    }
}

#[async_trait]
impl BackendProvisioner for MediaProvisioner {
    fn id(&self) -> BackendId {
        BackendId::Media
    }

    async fn ensure(&self, email: &Email) -> Result<BackendIdentityRef, ProvisioningError> {
        let fail = |msg: String| ProvisioningError::new(BackendId::Media, msg);

        let response = self
            .client
            .post(format!("{}/v1/accounts", self.base_url))
            .json(&serde_json::json!({ "email": email.as_str() }))
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;

        let status = response.status();

        if status.is_success() {
            let account: MediaAccount =
                response.json().await.map_err(|e| fail(e.to_string()))?;
            debug!(email = %email, account = %account.id, "Media account created");
            return Ok(BackendIdentityRef::new(BackendId::Media, account.id));
        }

        if status == reqwest::StatusCode::CONFLICT {
            // Already registered, by us or by a concurrent ensure.
            return self
                .lookup_account(email)
                .await
                .map_err(|e| fail(e.to_string()))?
                .map(|account| BackendIdentityRef::new(BackendId::Media, account.id))
                .ok_or_else(|| {
                    fail("account reported as existing but lookup found none".to_string())
                });
        }

        Err(fail(format!("HTTP {} creating account", status)))
    }
}
