//! The authentication gateway itself.
//!
//! Wires the key cache, validator, resolver, admin resolver, and isolation
//! enforcer into one front door. Every inbound request passes through
//! [`Gateway::authenticate`], which runs the whole chain under a bounded
//! timeout and fails closed.

use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::context::AuthContext;
use crate::auth::keys::KeyCache;
use crate::auth::validator::{AssertionValidator, Claims};
use crate::config::GatewayConfig;
use crate::errors::{AuthenticationError, AuthorizationError, ProvisioningError};
use crate::identity::{AdminResolver, IdentityCache, IdentityResolver};
use crate::provision::{
    BackendId, BackendProvisioner, CatalogProvisioner, DocumentProvisioner, GraphProvisioner,
    MediaProvisioner, ObjectProvisioner, ProvisioningOrchestrator,
};
use crate::scope::{IsolationEnforcer, ScopePredicate};
use crate::store::{UserStore, connect, ensure_catalog_schema};
use crate::types::Email;

pub struct Gateway {
    config: GatewayConfig,
    validator: AssertionValidator,
    resolver: IdentityResolver,
    admin: AdminResolver,
    enforcer: IsolationEnforcer,
    store: Arc<UserStore>,
}

impl Gateway {
    /// Connect to every configured backend and assemble the gateway.
    /// Backends without a configured endpoint are left unregistered; they
    /// surface as degraded scopes rather than preventing startup.
    pub async fn connect(config: GatewayConfig) -> anyhow::Result<Arc<Self>> {
        let catalog = connect(&config.catalog).await?;
        ensure_catalog_schema(&catalog).await?;
        let store = Arc::new(UserStore::new(catalog));

        let mut provisioners: Vec<Arc<dyn BackendProvisioner>> =
            vec![Arc::new(CatalogProvisioner::new(store.clone()))];

        provisioners.push(Arc::new(DocumentProvisioner::connect(&config.document).await?));
        provisioners.push(Arc::new(GraphProvisioner::connect(&config.graph).await?));

        match &config.object_store_url {
            Some(url) => provisioners.push(Arc::new(ObjectProvisioner::new(url.clone())?)),
            None => warn!("object store not configured; backend will report degraded"),
        }
        match &config.media_service_url {
            Some(url) => provisioners.push(Arc::new(MediaProvisioner::new(url.clone())?)),
            None => warn!("media service not configured; backend will report degraded"),
        }

        Ok(Arc::new(Self::assemble(config, store, provisioners)))
    }

    /// Assemble from pre-built parts. Used by [`Gateway::connect`] and by
    /// tests that inject in-memory backends.
    pub fn assemble(
        config: GatewayConfig,
        store: Arc<UserStore>,
        provisioners: Vec<Arc<dyn BackendProvisioner>>,
    ) -> Self {
        let keys = Arc::new(KeyCache::new(
            config.assertion.jwks_url.clone(),
            config.assertion.key_cache_ttl_secs,
            config.assertion.allow_stale_keys,
        ));
        let validator = AssertionValidator::new(config.assertion.clone(), keys);

        let orchestrator = Arc::new(ProvisioningOrchestrator::new(store.clone(), provisioners));
        let cache = Arc::new(IdentityCache::new(config.identity_cache_ttl_secs));
        let resolver = IdentityResolver::new(cache, store.clone(), orchestrator);

        let admin = AdminResolver::new(store.clone());
        let enforcer = IsolationEnforcer::new(store.clone());

        Self {
            config,
            validator,
            resolver,
            admin,
            enforcer,
            store,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<UserStore> {
        &self.store
    }

    pub fn key_cache(&self) -> &Arc<KeyCache> {
        self.validator.key_cache()
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    /// Authenticate one request from its assertion header (and, when the
    /// internal bypass is configured, the trusted-identity header).
    ///
    /// The whole chain runs under the configured timeout; on expiry the
    /// request fails closed as unauthenticated rather than hanging.
    pub async fn authenticate(
        &self,
        assertion: Option<&str>,
        trusted_identity: Option<&str>,
    ) -> Result<AuthContext, AuthenticationError> {
        tokio::time::timeout(
            self.config.auth_timeout(),
            self.authenticate_inner(assertion, trusted_identity),
        )
        .await
        .map_err(|_| AuthenticationError::Timeout)?
    }

    async fn authenticate_inner(
        &self,
        assertion: Option<&str>,
        trusted_identity: Option<&str>,
    ) -> Result<AuthContext, AuthenticationError> {
        let claims = match (self.config.trusted_header.as_ref(), trusted_identity) {
            // Closed-network service-to-service path; identity is taken on
            // trust, privilege and scoping still apply.
            (Some(_), Some(identity)) if !identity.trim().is_empty() => {
                info!(identity, "trusted-identity bypass");
                Claims {
                    email: Email::normalized(identity),
                    subject: None,
                    expires_at: 0,
                }
            }
            _ => {
                let raw = assertion.ok_or(AuthenticationError::MissingAssertion)?;
                self.validator.validate(raw).await?
            }
        };

        let resolution = self.resolver.resolve(&claims.email).await?;

        // Privilege is read fresh on every request; the cached identity is
        // never trusted for the role.
        let role = self
            .admin
            .role_of(&claims.email)
            .await
            .map_err(|e| AuthenticationError::Resolver(e.to_string()))?;

        let scopes = self
            .enforcer
            .scope_set(&resolution.user, role == crate::store::Role::Admin)
            .await
            .map_err(|e| AuthenticationError::Resolver(e.to_string()))?;

        Ok(AuthContext::new(
            resolution.user,
            role,
            scopes,
            claims.subject,
        ))
    }

    /// Reject non-admin callers of admin-only surfaces.
    pub fn require_admin(&self, ctx: &AuthContext) -> Result<(), AuthorizationError> {
        if ctx.is_admin {
            Ok(())
        } else {
            Err(AuthorizationError::AdminRequired)
        }
    }

    /// Point-of-use scope for one backend, retrying provisioning lazily if
    /// the request-time scope was degraded. Capabilities call this before
    /// touching a backend the context marks degraded.
    pub async fn ensure_capability(
        &self,
        ctx: &AuthContext,
        backend: BackendId,
    ) -> Result<ScopePredicate, ProvisioningError> {
        let current = ctx.scope(backend);
        if !current.is_degraded() {
            return Ok(current.clone());
        }

        self.resolver.ensure_backend(backend, &ctx.user.email).await?;

        self.enforcer
            .scope_for(backend, &ctx.user, ctx.is_admin)
            .await
            .map_err(|e| ProvisioningError::new(backend, e.to_string()))
    }
}
