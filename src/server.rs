//! HTTP surface for the gateway.

use axum::{
    Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::get,
};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::AuthContext;
use crate::errors::AuthenticationError;
use crate::gateway::Gateway;

pub type AppState = Arc<Gateway>;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/v1/whoami", get(whoami))
        .route("/v1/admin/users", get(list_users))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

pub async fn serve(gateway: AppState, bind: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "gateway listening");
    axum::serve(listener, create_router(gateway)).await?;
    Ok(())
}

/// Run the authentication chain for one request's headers. Unauthenticated
/// outcomes map to 401; internal resolution faults map to 503 so callers can
/// tell a bad credential from a backend outage.
async fn authenticate(state: &Gateway, headers: &HeaderMap) -> Result<AuthContext, StatusCode> {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
    };

    let assertion = header_value(&state.config().assertion_header);
    let trusted = state
        .config()
        .trusted_header
        .as_ref()
        .and_then(|name| header_value(name));

    state
        .authenticate(assertion.as_deref(), trusted.as_deref())
        .await
        .map_err(|e| {
            warn!(error = %e, "authentication rejected");
            match e {
                // Backend fault, not a bad credential.
                AuthenticationError::Resolver(_) => StatusCode::SERVICE_UNAVAILABLE,
                // Includes Timeout: fail closed as unauthenticated.
                _ => StatusCode::UNAUTHORIZED,
            }
        })
}

async fn health_check(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    Ok(Json(serde_json::json!({
        "status": "healthy",
        "keys_cached": state.key_cache().key_count().await,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

/// The caller's resolved identity, scopes, and any degraded backends.
/// Partial provisioning is reported here, never turned into a failure.
async fn whoami(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    let ctx = authenticate(&state, &headers).await?;

    let records = state
        .store()
        .provisioning_records(&ctx.user.email)
        .await
        .map_err(|_e| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(serde_json::json!({
        "user": ctx.user,
        "is_admin": ctx.is_admin,
        "scopes": ctx.scopes,
        "degraded_backends": ctx.degraded_backends(),
        "provisioning": records
            .iter()
            .map(|r| serde_json::json!({
                "backend": r.backend,
                "status": r.status(),
                "external_ref": r.external_ref,
            }))
            .collect::<Vec<_>>(),
    })))
}

async fn list_users(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    let ctx = authenticate(&state, &headers).await?;
    state
        .require_admin(&ctx)
        .map_err(|_e| StatusCode::FORBIDDEN)?;

    let users = state
        .store()
        .list_users()
        .await
        .map_err(|_e| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(serde_json::json!({
        "users": users.iter().map(|u| u.to_user()).collect::<Vec<_>>(),
        "count": users.len(),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_ASSERTION_HEADER, GatewayConfig, StoreConfig};
    use crate::provision::{BackendId, BackendProvisioner, CatalogProvisioner, testing::FakeBackend};
    use crate::store::{Role, UserStore, connect, ensure_catalog_schema};
    use axum::body::Body;
    use axum::http::Request;
    use jsonwebtoken::{DecodingKey, EncodingKey, Header, encode};
    use serde::Serialize;
    use tower::ServiceExt;

    const SECRET: &[u8] = b"server-test-secret";
    const ISSUER: &str = "https://id.example.com";
    const AUDIENCE: &str = "gateway-tag";

    #[derive(Serialize)]
    struct TestClaims {
        email: String,
        iss: String,
        aud: String,
        exp: i64,
    }

    fn assertion_for(email: &str) -> String {
        let claims = TestClaims {
            email: email.to_string(),
            iss: ISSUER.to_string(),
            aud: AUDIENCE.to_string(),
            exp: chrono::Utc::now().timestamp() + 600,
        };
        let mut header = Header::new(jsonwebtoken::Algorithm::HS256);
        header.kid = Some("test-key".to_string());
        encode(&header, &claims, &EncodingKey::from_secret(SECRET)).unwrap()
    }

    async fn app() -> (Router, Arc<UserStore>) {
        let db = connect(&StoreConfig::memory("catalog")).await.unwrap();
        ensure_catalog_schema(&db).await.unwrap();
        let store = Arc::new(UserStore::new(db));

        let mut provisioners: Vec<Arc<dyn BackendProvisioner>> =
            vec![Arc::new(CatalogProvisioner::new(store.clone()))];
        for id in [
            BackendId::Document,
            BackendId::Graph,
            BackendId::Object,
            BackendId::Media,
        ] {
            provisioners.push(Arc::new(FakeBackend::new(id)));
        }

        let gateway = Gateway::assemble(
            GatewayConfig::for_tests(ISSUER, AUDIENCE),
            store.clone(),
            provisioners,
        );
        gateway
            .key_cache()
            .install_static_key("test-key", DecodingKey::from_secret(SECRET))
            .await;

        (create_router(Arc::new(gateway)), store)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get_with_assertion(uri: &str, assertion: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(DEFAULT_ASSERTION_HEADER, assertion)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_healthz_is_unauthenticated() {
        let (app, _) = app().await;
        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_whoami_requires_assertion() {
        let (app, _) = app().await;
        let response = app
            .oneshot(Request::builder().uri("/v1/whoami").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_whoami_returns_identity_and_scopes() {
        let (app, _) = app().await;
        let assertion = assertion_for("alice@example.com");

        let response = app
            .oneshot(get_with_assertion("/v1/whoami", &assertion))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["user"]["email"], "alice@example.com");
        assert_eq!(body["is_admin"], false);
        assert_eq!(body["scopes"]["catalog"]["kind"], "owner_field");
        assert!(body["degraded_backends"].is_array());
    }

    #[tokio::test]
    async fn test_garbage_assertion_is_rejected() {
        let (app, _) = app().await;
        let response = app
            .oneshot(get_with_assertion("/v1/whoami", "not-a-jwt"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_admin_users_forbidden_for_plain_user() {
        let (app, _) = app().await;
        let assertion = assertion_for("alice@example.com");

        let response = app
            .oneshot(get_with_assertion("/v1/admin/users", &assertion))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_admin_users_lists_for_admin() {
        let (app, store) = app().await;
        let alice = assertion_for("alice@example.com");
        let root = assertion_for("root@example.com");

        // Seed both users, then promote root.
        app.clone()
            .oneshot(get_with_assertion("/v1/whoami", &alice))
            .await
            .unwrap();
        app.clone()
            .oneshot(get_with_assertion("/v1/whoami", &root))
            .await
            .unwrap();
        store
            .set_role(&crate::types::Email::new("root@example.com"), Role::Admin)
            .await
            .unwrap();

        let response = app
            .oneshot(get_with_assertion("/v1/admin/users", &root))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["count"], 2);
    }
}
