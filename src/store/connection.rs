use anyhow::Result;
use surrealdb::Surreal;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;

use crate::config::StoreConfig;

pub type Db = Surreal<Any>;

/// Open a connection to one of the record-oriented stores.
pub async fn connect(config: &StoreConfig) -> Result<Db> {
    let db = surrealdb::engine::any::connect(config.url.clone()).await?;

    // Sign in if credentials are provided
    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        db.signin(Root { username, password }).await?;
    }

    db.use_ns(config.namespace.clone())
        .use_db(config.database.clone())
        .await?;

    Ok(db)
}

/// Define the system-of-record schema: the canonical `user` table and the
/// per-backend `provisioning` ledger.
///
/// The UNIQUE index on `user.email` is what guarantees at most one `uid` per
/// email: concurrent creates race onto the index and the losers fall back to
/// a re-read.
pub async fn ensure_catalog_schema(db: &Db) -> Result<()> {
    let schema_queries = vec![
        "DEFINE TABLE user SCHEMAFULL;
         DEFINE FIELD uid ON TABLE user TYPE string;
         DEFINE FIELD email ON TABLE user TYPE string;
         DEFINE FIELD role ON TABLE user TYPE string DEFAULT 'user';
         DEFINE FIELD tier ON TABLE user TYPE string DEFAULT 'standard';
         DEFINE FIELD services_enabled ON TABLE user TYPE array<string> DEFAULT [];
         DEFINE FIELD created_at ON TABLE user VALUE time::now() READONLY;
         DEFINE FIELD updated_at ON TABLE user VALUE time::now();
         DEFINE FIELD last_seen_at ON TABLE user TYPE option<datetime>;
         DEFINE INDEX user_email ON TABLE user FIELDS email UNIQUE;",
        "DEFINE TABLE provisioning SCHEMAFULL;
         DEFINE FIELD backend ON TABLE provisioning TYPE string;
         DEFINE FIELD email ON TABLE provisioning TYPE string;
         DEFINE FIELD status ON TABLE provisioning TYPE string;
         DEFINE FIELD external_ref ON TABLE provisioning TYPE option<string>;
         DEFINE FIELD last_error ON TABLE provisioning TYPE option<string>;
         DEFINE FIELD last_attempt_at ON TABLE provisioning TYPE option<datetime>;
         DEFINE INDEX provisioning_backend_email ON TABLE provisioning FIELDS backend, email UNIQUE;",
    ];

    for query in schema_queries {
        db.query(query).await?;
    }

    Ok(())
}
