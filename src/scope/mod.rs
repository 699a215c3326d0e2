//! Per-request data-isolation scoping.
//!
//! The enforcer turns a resolved identity into one [`ScopePredicate`] per
//! backend, computed once per request and passed explicitly to every
//! downstream access. Capabilities never derive ownership filters ad hoc, so
//! a call site cannot forget the admin check or leak across users.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::errors::BackendUnavailableError;
use crate::provision::{BackendId, ObjectProvisioner};
use crate::store::{ProvisionStatus, User, UserStore};
use crate::types::Email;

/// How one backend restricts visible data to the authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ScopePredicate {
    /// Admin bypass: no restriction.
    Unrestricted,
    /// Ownership-column filter (catalog and document stores).
    OwnerField { field: String, value: String },
    /// Graph traversals start at (and never leave) this anchor node.
    Anchor { node: String },
    /// Object keys must live under this prefix.
    KeyPrefix { prefix: String },
    /// Media-service calls are made against this account only.
    Account { account: String },
    /// The backend has no provisioned identity for this user; the owning
    /// capability reports unavailability instead of running unscoped.
    Degraded { reason: String },
}

impl ScopePredicate {
    pub fn is_unrestricted(&self) -> bool {
        matches!(self, Self::Unrestricted)
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }

    /// Whether a row/node with the given ownership value is visible.
    pub fn allows_owner(&self, owner: &str) -> bool {
        match self {
            Self::Unrestricted => true,
            Self::OwnerField { value, .. } => value == owner,
            Self::Anchor { node } => node == owner,
            Self::Account { account } => account == owner,
            Self::KeyPrefix { prefix } => owner.starts_with(prefix.as_str()),
            Self::Degraded { .. } => false,
        }
    }

    /// WHERE fragment for record-oriented stores. `None` means no clause
    /// (admin); degraded scopes yield a clause matching nothing.
    pub fn where_clause(&self, bind_name: &str) -> Option<String> {
        match self {
            Self::Unrestricted => None,
            Self::OwnerField { field, .. } => Some(format!("{field} = ${bind_name}")),
            Self::Anchor { .. } => Some(format!("anchor = ${bind_name}")),
            // No row can match; fail closed rather than open.
            Self::Degraded { .. } => Some("false".to_string()),
            Self::KeyPrefix { .. } | Self::Account { .. } => Some("false".to_string()),
        }
    }

    /// The value to bind alongside [`Self::where_clause`].
    pub fn bind_value(&self) -> Option<String> {
        match self {
            Self::OwnerField { value, .. } => Some(value.clone()),
            Self::Anchor { node } => Some(node.clone()),
            _ => None,
        }
    }
}

/// All five predicates for one request. Serializes as the bare
/// backend-to-predicate map.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct ScopeSet {
    scopes: BTreeMap<BackendId, ScopePredicate>,
}

impl ScopeSet {
    pub fn get(&self, backend: BackendId) -> &ScopePredicate {
        // Every registered backend gets a predicate at construction; an
        // unregistered backend is permanently degraded.
        static UNREGISTERED: ScopePredicate = ScopePredicate::Degraded {
            reason: String::new(),
        };
        self.scopes.get(&backend).unwrap_or(&UNREGISTERED)
    }

    pub fn degraded_backends(&self) -> Vec<BackendId> {
        self.scopes
            .iter()
            .filter(|(_, predicate)| predicate.is_degraded())
            .map(|(backend, _)| *backend)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BackendId, &ScopePredicate)> {
        self.scopes.iter()
    }
}

/// Computes scoping predicates from the resolved identity and the
/// provisioning ledger.
pub struct IsolationEnforcer {
    ledger: Arc<UserStore>,
}

impl IsolationEnforcer {
    pub fn new(ledger: Arc<UserStore>) -> Self {
        Self { ledger }
    }

    /// Predicate for a single backend. Admins bypass scoping everywhere;
    /// for everyone else the predicate is keyed by a stable per-backend
    /// ownership token and degrades when the backend holds no provisioned
    /// identity for the user.
    pub async fn scope_for(
        &self,
        backend: BackendId,
        user: &User,
        is_admin: bool,
    ) -> Result<ScopePredicate, BackendUnavailableError> {
        if is_admin {
            return Ok(ScopePredicate::Unrestricted);
        }

        // The canonical row always exists once resolution has run; scoping
        // the system-of-record needs no ledger read.
        if backend == BackendId::Catalog {
            return Ok(ScopePredicate::OwnerField {
                field: "owner_uid".to_string(),
                value: user.uid.as_str().to_string(),
            });
        }

        let record = self
            .ledger
            .provisioning_record(backend.as_str(), &user.email)
            .await
            .map_err(|e| BackendUnavailableError::new(backend, e.to_string()))?;

        let (status, external_ref) = match record {
            Some(record) => (record.status(), record.external_ref.clone()),
            None => (ProvisionStatus::Absent, None),
        };

        if status != ProvisionStatus::Provisioned {
            return Ok(ScopePredicate::Degraded {
                reason: format!("identity {} in {}", status.as_str(), backend),
            });
        }

        Ok(match backend {
            BackendId::Catalog => unreachable!("handled above"),
            BackendId::Document => ScopePredicate::OwnerField {
                field: "owner".to_string(),
                value: user.email.as_str().to_string(),
            },
            BackendId::Graph => match external_ref {
                Some(node) => ScopePredicate::Anchor { node },
                None => ScopePredicate::Degraded {
                    reason: "graph anchor reference missing".to_string(),
                },
            },
            BackendId::Object => ScopePredicate::KeyPrefix {
                prefix: external_ref
                    .unwrap_or_else(|| ObjectProvisioner::prefix_for(&user.email)),
            },
            BackendId::Media => match external_ref {
                Some(account) => ScopePredicate::Account { account },
                None => ScopePredicate::Degraded {
                    reason: "media account reference missing".to_string(),
                },
            },
        })
    }

    /// All predicates for one request, computed once and carried on the
    /// request context.
    pub async fn scope_set(
        &self,
        user: &User,
        is_admin: bool,
    ) -> Result<ScopeSet, BackendUnavailableError> {
        let mut scopes = BTreeMap::new();
        for backend in BackendId::ALL {
            scopes.insert(backend, self.scope_for(backend, user, is_admin).await?);
        }
        Ok(ScopeSet { scopes })
    }
}

/// Scope an email into the predicate owner value used by tests and fakes.
pub fn object_prefix(email: &Email) -> String {
    ObjectProvisioner::prefix_for(email)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::store::{Role, connect, ensure_catalog_schema};
    use crate::types::UserId;

    fn user(email: &str) -> User {
        User {
            uid: UserId::generate(),
            email: Email::new(email),
            role: Role::User,
            tier: "standard".to_string(),
            services_enabled: Vec::new(),
        }
    }

    async fn enforcer() -> (IsolationEnforcer, Arc<UserStore>) {
        let db = connect(&StoreConfig::memory("catalog")).await.unwrap();
        ensure_catalog_schema(&db).await.unwrap();
        let ledger = Arc::new(UserStore::new(db));
        (IsolationEnforcer::new(ledger.clone()), ledger)
    }

    async fn mark_provisioned(ledger: &UserStore, backend: &str, email: &Email, ext: Option<&str>) {
        ledger
            .set_provision_status(
                backend,
                email,
                ProvisionStatus::Provisioned,
                ext.map(|s| s.to_string()),
                None,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_scope_set_serializes_as_flat_map() {
        let (enforcer, ledger) = enforcer().await;
        let alice = user("alice@example.com");
        mark_provisioned(&ledger, "document", &alice.email, Some("owner-abc")).await;

        let scopes = enforcer.scope_set(&alice, false).await.unwrap();
        let value = serde_json::to_value(&scopes).unwrap();

        // One top-level key per backend, no intermediate wrapper object.
        assert_eq!(value["catalog"]["kind"], "owner_field");
        assert_eq!(value["document"]["kind"], "owner_field");
        assert_eq!(value["document"]["value"], "alice@example.com");
        assert_eq!(value["graph"]["kind"], "degraded");
        assert!(value.get("scopes").is_none());
    }

    #[tokio::test]
    async fn test_admin_bypass_everywhere() {
        let (enforcer, _) = enforcer().await;
        let admin = user("root@example.com");

        let scopes = enforcer.scope_set(&admin, true).await.unwrap();
        for (_, predicate) in scopes.iter() {
            assert!(predicate.is_unrestricted());
        }
        assert!(scopes.degraded_backends().is_empty());
    }

    #[tokio::test]
    async fn test_catalog_scope_keyed_by_uid() {
        let (enforcer, _) = enforcer().await;
        let alice = user("alice@example.com");

        let predicate = enforcer
            .scope_for(BackendId::Catalog, &alice, false)
            .await
            .unwrap();

        assert_eq!(
            predicate,
            ScopePredicate::OwnerField {
                field: "owner_uid".to_string(),
                value: alice.uid.as_str().to_string(),
            }
        );
        assert!(predicate.allows_owner(alice.uid.as_str()));
        assert!(!predicate.allows_owner("someone-else"));
    }

    #[tokio::test]
    async fn test_unprovisioned_backend_degrades() {
        let (enforcer, _) = enforcer().await;
        let alice = user("alice@example.com");

        let predicate = enforcer
            .scope_for(BackendId::Graph, &alice, false)
            .await
            .unwrap();

        assert!(predicate.is_degraded());
        assert!(!predicate.allows_owner("principal:anything"));
        // Degraded scope fails closed at query level too.
        assert_eq!(predicate.where_clause("owner"), Some("false".to_string()));
    }

    #[tokio::test]
    async fn test_provisioned_scopes_use_ledger_refs() {
        let (enforcer, ledger) = enforcer().await;
        let alice = user("alice@example.com");

        mark_provisioned(&ledger, "document", &alice.email, Some("workspace:a")).await;
        mark_provisioned(&ledger, "graph", &alice.email, Some("principal:a")).await;
        mark_provisioned(&ledger, "object", &alice.email, Some("users/aaaa/")).await;
        mark_provisioned(&ledger, "media", &alice.email, Some("acct_1")).await;

        let scopes = enforcer.scope_set(&alice, false).await.unwrap();
        assert!(scopes.degraded_backends().is_empty());

        assert_eq!(
            scopes.get(BackendId::Graph),
            &ScopePredicate::Anchor {
                node: "principal:a".to_string()
            }
        );
        assert_eq!(
            scopes.get(BackendId::Object),
            &ScopePredicate::KeyPrefix {
                prefix: "users/aaaa/".to_string()
            }
        );
        assert_eq!(
            scopes.get(BackendId::Media),
            &ScopePredicate::Account {
                account: "acct_1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_isolation_between_two_users_in_document_store() {
        let (enforcer, ledger) = enforcer().await;
        let alice = user("alice@example.com");
        let bob = user("bob@example.com");

        mark_provisioned(&ledger, "document", &alice.email, Some("workspace:a")).await;
        mark_provisioned(&ledger, "document", &bob.email, Some("workspace:b")).await;

        // Shared document store holding both users' data.
        let docs = connect(&StoreConfig::memory("documents")).await.unwrap();
        docs.query(
            "CREATE note:a1 SET owner = 'alice@example.com', body = 'a-1';
             CREATE note:a2 SET owner = 'alice@example.com', body = 'a-2';
             CREATE note:b1 SET owner = 'bob@example.com', body = 'b-1';",
        )
        .await
        .unwrap();

        let scope_a = enforcer
            .scope_for(BackendId::Document, &alice, false)
            .await
            .unwrap();

        #[derive(serde::Deserialize)]
        struct NoteRow {
            owner: String,
        }

        let clause = scope_a.where_clause("scope_owner").unwrap();
        let mut res = docs
            .query(format!("SELECT * FROM note WHERE {clause}"))
            .bind(("scope_owner", scope_a.bind_value().unwrap()))
            .await
            .unwrap();
        let rows: Vec<NoteRow> = res.take(0).unwrap();

        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| row.owner == "alice@example.com"));

        // Admin sees the union of both users' data.
        let scope_admin = enforcer
            .scope_for(BackendId::Document, &alice, true)
            .await
            .unwrap();
        assert!(scope_admin.where_clause("scope_owner").is_none());

        let mut res = docs.query("SELECT * FROM note").await.unwrap();
        let rows: Vec<NoteRow> = res.take(0).unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[tokio::test]
    async fn test_object_prefix_isolation() {
        let (enforcer, ledger) = enforcer().await;
        let alice = user("alice@example.com");
        let bob = user("bob@example.com");

        mark_provisioned(&ledger, "object", &alice.email, None).await;
        mark_provisioned(&ledger, "object", &bob.email, None).await;

        let scope_a = enforcer
            .scope_for(BackendId::Object, &alice, false)
            .await
            .unwrap();
        let bob_key = format!("{}media/clip.mp4", object_prefix(&bob.email));
        let alice_key = format!("{}media/clip.mp4", object_prefix(&alice.email));

        assert!(scope_a.allows_owner(&alice_key));
        assert!(!scope_a.allows_owner(&bob_key));
    }
}
