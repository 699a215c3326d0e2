//! Document store provisioner: one workspace document per identity.
//!
//! Everything the user later writes into the document store hangs off the
//! `owner` column; the workspace row is the first owned document and proves
//! the ownership column is queryable for this identity.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use surrealdb::RecordId;
use tracing::debug;

use crate::config::StoreConfig;
use crate::errors::ProvisioningError;
use crate::provision::{BackendId, BackendIdentityRef, BackendProvisioner};
use crate::store::{Db, connect};
use crate::types::Email;

#[derive(Debug, Clone, Deserialize)]
struct WorkspaceRow {
    id: RecordId,
    #[allow(dead_code)]
    owner: String,
}

pub struct DocumentProvisioner {
    db: Db,
}

impl DocumentProvisioner {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Connect to the document store and make sure its schema exists.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let db = connect(config).await?;
        ensure_document_schema(&db).await?;
        Ok(Self::new(db))
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    async fn find_workspace(&self, email: &Email) -> Result<Option<WorkspaceRow>> {
        let email = email.as_str().to_string();

        let mut res = self
            .db
            .query("SELECT * FROM workspace WHERE owner = $owner LIMIT 1")
            .bind(("owner", email))
            .await?;

        let rows: Vec<WorkspaceRow> = res.take(0)?;
        Ok(rows.into_iter().next())
    }

    async fn create_workspace(&self, email: &Email) -> Result<Option<WorkspaceRow>> {
        let owner = email.as_str().to_string();

        let mut res = self
            .db
            .query("CREATE workspace CONTENT { owner: $owner, title: 'Home' }")
            .bind(("owner", owner))
            .await?;

        let rows: Vec<WorkspaceRow> = res.take(0)?;
        Ok(rows.into_iter().next())
    }
}

/// Workspace table with a unique owner index; the index is the idempotence
/// guarantee under concurrent first-seen provisioning.
pub async fn ensure_document_schema(db: &Db) -> Result<()> {
    db.query(
        "DEFINE TABLE workspace SCHEMALESS;
         DEFINE FIELD owner ON TABLE workspace TYPE string;
         DEFINE FIELD title ON TABLE workspace TYPE string;
         DEFINE FIELD created_at ON TABLE workspace VALUE time::now() READONLY;
         DEFINE INDEX workspace_owner ON TABLE workspace FIELDS owner UNIQUE;",
    )
    .await?;
    Ok(())
}

#[async_trait]
impl BackendProvisioner for DocumentProvisioner {
    fn id(&self) -> BackendId {
        BackendId::Document
    }

    async fn ensure(&self, email: &Email) -> Result<BackendIdentityRef, ProvisioningError> {
        let fail = |e: anyhow::Error| ProvisioningError::new(BackendId::Document, e.to_string());

        if let Some(row) = self.find_workspace(email).await.map_err(fail)? {
            return Ok(BackendIdentityRef::new(BackendId::Document, row.id.to_string()));
        }

        match self.create_workspace(email).await {
            Ok(Some(row)) => {
                debug!(email = %email, "Created document workspace");
                Ok(BackendIdentityRef::new(BackendId::Document, row.id.to_string()))
            }
            Ok(None) | Err(_) => {
                // Duplicate-key outcome: a concurrent ensure created the
                // workspace first. Re-read and treat it as ours.
                self.find_workspace(email)
                    .await
                    .map_err(fail)?
                    .map(|row| BackendIdentityRef::new(BackendId::Document, row.id.to_string()))
                    .ok_or_else(|| {
                        ProvisioningError::new(
                            BackendId::Document,
                            "workspace create failed and no existing row found",
                        )
                    })
            }
        }
    }
}
