//! Graph store provisioner: one anchor node per identity.
//!
//! All of a user's graph data is reachable from their `principal` node, so
//! scoping a traversal to the anchor is equivalent to scoping to the user.

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
struct PrincipalNode {
    id: RecordId,
    #[allow(dead_code)]
    email: String,
}

pub struct GraphProvisioner {
    db: Db,
}

impl GraphProvisioner {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Connect to the graph store and make sure its schema exists.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let db = connect(config).await?;
        ensure_graph_schema(&db).await?;
        Ok(Self::new(db))
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    async fn find_principal(&self, email: &Email) -> Result<Option<PrincipalNode>> {
        let email = email.as_str().to_string();

        let mut res = self
            .db
            .query("SELECT * FROM principal WHERE email = $email LIMIT 1")
            .bind(("email", email))
            .await?;

        let nodes: Vec<PrincipalNode> = res.take(0)?;
        Ok(nodes.into_iter().next())
    }

    async fn create_principal(&self, email: &Email) -> Result<Option<PrincipalNode>> {
        let email = email.as_str().to_string();

        let mut res = self
            .db
            .query("CREATE principal CONTENT { email: $email }")
            .bind(("email", email))
            .await?;

        let nodes: Vec<PrincipalNode> = res.take(0)?;
        Ok(nodes.into_iter().next())
    }
}

/// Anchor node table; unique on email so concurrent first-seen provisioning
/// converges on one node.
pub async fn ensure_graph_schema(db: &Db) -> Result<()> {
    db.query(
        "DEFINE TABLE principal SCHEMAFULL;
         DEFINE FIELD email ON TABLE principal TYPE string;
         DEFINE FIELD created_at ON TABLE principal VALUE time::now() READONLY;
         DEFINE INDEX principal_email ON TABLE principal FIELDS email UNIQUE;",
    )
    .await?;
    Ok(())
}

#[async_trait]
impl BackendProvisioner for GraphProvisioner {
    fn id(&self) -> BackendId {
        BackendId::Graph
    }

    async fn ensure(&self, email: &Email) -> Result<BackendIdentityRef, ProvisioningError> {
        let fail = |e: anyhow::Error| ProvisioningError::new(BackendId::Graph, e.to_string());

        if let Some(node) = self.find_principal(email).await.map_err(fail)? {
            return Ok(BackendIdentityRef::new(BackendId::Graph, node.id.to_string()));
        }

        match self.create_principal(email).await {
            Ok(Some(node)) => {
                debug!(email = %email, anchor = %node.id, "Created graph anchor node");
                Ok(BackendIdentityRef::new(BackendId::Graph, node.id.to_string()))
            }
            Ok(None) | Err(_) => {
                // Unique index rejected the insert; the winner's node is ours.
                self.find_principal(email)
                    .await
                    .map_err(fail)?
                    .map(|node| BackendIdentityRef::new(BackendId::Graph, node.id.to_string()))
                    .ok_or_else(|| {
                        ProvisioningError::new(
                            BackendId::Graph,
                            "anchor create failed and no existing node found",
                        )
                    })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn setup() -> GraphProvisioner {
        GraphProvisioner::connect(&StoreConfig::memory("graph"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_ensure_single_anchor() {
        let provisioner = setup().await;
        let email = Email::new("alice@example.com");

        let first = provisioner.ensure(&email).await.unwrap();
        let second = provisioner.ensure(&email).await.unwrap();

        assert_eq!(first.external_ref, second.external_ref);
        assert!(first.external_ref.as_str().starts_with("principal:"));
    }

    #[tokio::test]
    async fn test_concurrent_ensure_single_anchor() {
        let provisioner = Arc::new(setup().await);
        let email = Email::new("race@example.com");

        let mut handles = Vec::new();
        for _ in 0..50 {
            let provisioner = provisioner.clone();
            let email = email.clone();
            handles.push(tokio::spawn(async move { provisioner.ensure(&email).await }));
        }

        let mut refs = std::collections::HashSet::new();
        for handle in handles {
            refs.insert(handle.await.unwrap().unwrap().external_ref);
        }

        assert_eq!(refs.len(), 1);
    }
}
