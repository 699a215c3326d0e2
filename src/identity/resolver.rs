//! Email to canonical-user resolution.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::AuthenticationError;
use crate::identity::cache::IdentityCache;
use crate::provision::{BackendId, ProvisioningOrchestrator};
use crate::store::{User, UserStore};
use crate::types::Email;

/// Outcome of one resolution. `background` carries the provisioning task
/// spawned for a first-seen identity so callers that care (tests, graceful
/// shutdown) can await it; the request path ignores it.
pub struct Resolution {
    pub user: User,
    pub cache_hit: bool,
    pub background: Option<JoinHandle<()>>,
}

/// Resolves a validated email to its [`User`], creating the canonical record
/// on first sight and fanning provisioning out to the remaining backends.
pub struct IdentityResolver {
    cache: Arc<IdentityCache>,
    store: Arc<UserStore>,
    orchestrator: Arc<ProvisioningOrchestrator>,
}

impl IdentityResolver {
    pub fn new(
        cache: Arc<IdentityCache>,
        store: Arc<UserStore>,
        orchestrator: Arc<ProvisioningOrchestrator>,
    ) -> Self {
        Self {
            cache,
            store,
            orchestrator,
        }
    }

    pub fn cache(&self) -> &Arc<IdentityCache> {
        &self.cache
    }

    /// Cache hit returns immediately. On a miss the system-of-record row is
    /// looked up or created synchronously; provisioning for the remaining
    /// backends runs in the background. A request cancelled mid-flight does
    /// not cancel provisioning: every provisioner is idempotent and the
    /// result benefits the next request for the same identity.
    pub async fn resolve(&self, email: &Email) -> Result<Resolution, AuthenticationError> {
        if let Some(user) = self.cache.get(email).await {
            debug!(email = email.as_str(), "identity cache hit");
            return Ok(Resolution {
                user,
                cache_hit: true,
                background: None,
            });
        }

        // The system-of-record backend is awaited; authentication cannot
        // proceed without a canonical uid.
        let record = self
            .store
            .get_or_create(email)
            .await
            .map_err(|e| AuthenticationError::Resolver(e.to_string()))?;
        let user = record.to_user();

        info!(
            email = email.as_str(),
            uid = user.uid.as_str(),
            "resolved identity"
        );

        let background = self.spawn_provisioning(email.clone());
        self.cache.insert(user.clone()).await;

        Ok(Resolution {
            user,
            cache_hit: false,
            background: Some(background),
        })
    }

    /// Lazy retry for one degraded backend, invoked at point of use.
    pub async fn ensure_backend(
        &self,
        backend: BackendId,
        email: &Email,
    ) -> Result<(), crate::errors::ProvisioningError> {
        self.orchestrator.ensure_backend(backend, email).await?;
        Ok(())
    }

    fn spawn_provisioning(&self, email: Email) -> JoinHandle<()> {
        let orchestrator = self.orchestrator.clone();
        tokio::spawn(async move {
            let outcome = orchestrator.provision_all(&email).await;
            for (backend, result) in &outcome {
                if let Err(e) = result {
                    warn!(
                        backend = backend.as_str(),
                        email = email.as_str(),
                        error = %e,
                        "backend provisioning failed; will retry on demand"
                    );
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::provision::{CatalogProvisioner, testing::FakeBackend};
    use crate::store::{ProvisionStatus, connect, ensure_catalog_schema};

    async fn resolver_with_fakes() -> (IdentityResolver, Arc<UserStore>, Arc<FakeBackend>) {
        let db = connect(&StoreConfig::memory("catalog")).await.unwrap();
        ensure_catalog_schema(&db).await.unwrap();
        let store = Arc::new(UserStore::new(db));

        let fake = Arc::new(FakeBackend::new(BackendId::Document));
        let orchestrator = Arc::new(ProvisioningOrchestrator::new(
            store.clone(),
            vec![
                Arc::new(CatalogProvisioner::new(store.clone())),
                fake.clone(),
            ],
        ));

        let resolver = IdentityResolver::new(
            Arc::new(IdentityCache::new(300)),
            store.clone(),
            orchestrator,
        );
        (resolver, store, fake)
    }

    #[tokio::test]
    async fn test_first_resolution_creates_user_and_provisions() {
        let (resolver, store, fake) = resolver_with_fakes().await;
        let email = Email::new("alice@example.com");

        let resolution = resolver.resolve(&email).await.unwrap();
        assert!(!resolution.cache_hit);
        assert_eq!(resolution.user.email, email);

        resolution.background.unwrap().await.unwrap();

        let record = store
            .provisioning_record("document", &email)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status(), ProvisionStatus::Provisioned);
        assert_eq!(fake.create_count(), 1);
    }

    #[tokio::test]
    async fn test_second_resolution_is_cache_hit_without_provisioner_calls() {
        let (resolver, _, fake) = resolver_with_fakes().await;
        let email = Email::new("alice@example.com");

        let first = resolver.resolve(&email).await.unwrap();
        first.background.unwrap().await.unwrap();
        let calls_after_first = fake.ensure_count();

        let second = resolver.resolve(&email).await.unwrap();
        assert!(second.cache_hit);
        assert!(second.background.is_none());
        assert_eq!(second.user.uid, first.user.uid);
        assert_eq!(fake.ensure_count(), calls_after_first);
    }

    #[tokio::test]
    async fn test_uid_is_stable_across_cache_expiry() {
        let (resolver, store, _) = resolver_with_fakes().await;
        let email = Email::new("alice@example.com");

        let first = resolver.resolve(&email).await.unwrap();
        first.background.unwrap().await.unwrap();

        resolver.cache().invalidate(&email).await;
        let again = resolver.resolve(&email).await.unwrap();
        assert!(!again.cache_hit);
        assert_eq!(again.user.uid, first.user.uid);

        let users = store.list_users().await.unwrap();
        assert_eq!(users.len(), 1);
    }
}
