//! System-of-record operations: canonical users and the provisioning ledger.

use anyhow::Result;
use tracing::debug;

use crate::store::Db;
use crate::store::schema::{ProvisionStatus, ProvisioningRecord, Role, UserRecord};
use crate::types::{Email, UserId};

/// Store for canonical user rows and per-backend provisioning records.
pub struct UserStore {
    db: Db,
}

impl UserStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Get or create the canonical user row for an email.
    ///
    /// This is the one place a `uid` is assigned. The create path tolerates a
    /// concurrent winner: if the unique email index rejects the insert, the
    /// row that beat us is re-read and returned as success.
    pub async fn get_or_create(&self, email: &Email) -> Result<UserRecord> {
        if let Some(user) = self.get_by_email(email).await? {
            self.touch_last_seen(email).await?;
            return Ok(user);
        }

        let uid = UserId::generate();
        match self.create_user(email, &uid).await {
            Ok(user) => {
                debug!(email = %email, uid = %uid, "Created canonical user");
                Ok(user)
            }
            Err(e) => {
                // Duplicate-key outcome from a concurrent create: re-read
                // and treat the existing row as success.
                if let Some(user) = self.get_by_email(email).await? {
                    debug!(email = %email, "Lost create race, using existing user");
                    return Ok(user);
                }
                Err(e)
            }
        }
    }

    /// Look up a user row by email.
    pub async fn get_by_email(&self, email: &Email) -> Result<Option<UserRecord>> {
        let email = email.as_str().to_string();

        let mut res = self
            .db
            .query("SELECT * FROM user WHERE email = $email LIMIT 1")
            .bind(("email", email))
            .await?;

        let users: Vec<UserRecord> = res.take(0)?;
        Ok(users.into_iter().next())
    }

    async fn create_user(&self, email: &Email, uid: &UserId) -> Result<UserRecord> {
        let email = email.as_str().to_string();
        let uid = uid.as_str().to_string();

        let query = r#"
            CREATE user CONTENT {
                uid: $uid,
                email: $email,
                role: 'user',
                tier: 'standard',
                services_enabled: [],
                last_seen_at: time::now()
            }
        "#;

        let mut res = self
            .db
            .query(query)
            .bind(("uid", uid))
            .bind(("email", email))
            .await?;

        let users: Vec<UserRecord> = res.take(0)?;
        users
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Failed to create user"))
    }

    async fn touch_last_seen(&self, email: &Email) -> Result<()> {
        let email = email.as_str().to_string();

        self.db
            .query("UPDATE user SET last_seen_at = time::now() WHERE email = $email")
            .bind(("email", email))
            .await?;

        Ok(())
    }

    /// Fresh read of the authoritative role column. Never served from any
    /// cache so a demotion takes effect on the very next request.
    pub async fn role_of(&self, email: &Email) -> Result<Option<Role>> {
        Ok(self
            .get_by_email(email)
            .await?
            .map(|user| Role::parse(&user.role)))
    }

    /// Privileged administrative operation: change a user's role.
    pub async fn set_role(&self, email: &Email, role: Role) -> Result<()> {
        let email = email.as_str().to_string();
        let role = role.as_str().to_string();

        self.db
            .query("UPDATE user SET role = $role WHERE email = $email")
            .bind(("email", email))
            .bind(("role", role))
            .await?;

        Ok(())
    }

    /// List all canonical users (admin surface).
    pub async fn list_users(&self) -> Result<Vec<UserRecord>> {
        let mut res = self.db.query("SELECT * FROM user ORDER BY email").await?;
        let users: Vec<UserRecord> = res.take(0)?;
        Ok(users)
    }

    /// Read one backend's provisioning record for an email. A missing row
    /// reads as `Absent`.
    pub async fn provisioning_record(
        &self,
        backend: &str,
        email: &Email,
    ) -> Result<Option<ProvisioningRecord>> {
        let backend = backend.to_string();
        let email = email.as_str().to_string();

        let mut res = self
            .db
            .query("SELECT * FROM provisioning WHERE backend = $backend AND email = $email LIMIT 1")
            .bind(("backend", backend))
            .bind(("email", email))
            .await?;

        let records: Vec<ProvisioningRecord> = res.take(0)?;
        Ok(records.into_iter().next())
    }

    /// All provisioning records for an email, for the whoami surface.
    pub async fn provisioning_records(&self, email: &Email) -> Result<Vec<ProvisioningRecord>> {
        let email = email.as_str().to_string();

        let mut res = self
            .db
            .query("SELECT * FROM provisioning WHERE email = $email ORDER BY backend")
            .bind(("email", email))
            .await?;

        let records: Vec<ProvisioningRecord> = res.take(0)?;
        Ok(records)
    }

    /// Transition a (backend, email) record to a new status, creating the
    /// row lazily on first touch. Rows are never deleted.
    pub async fn set_provision_status(
        &self,
        backend: &str,
        email: &Email,
        status: ProvisionStatus,
        external_ref: Option<String>,
        last_error: Option<String>,
    ) -> Result<()> {
        if self.provisioning_record(backend, email).await?.is_some() {
            let query = r#"
                UPDATE provisioning SET
                    status = $status,
                    external_ref = $external_ref,
                    last_error = $last_error,
                    last_attempt_at = time::now()
                WHERE backend = $backend AND email = $email
            "#;

            self.db
                .query(query)
                .bind(("backend", backend.to_string()))
                .bind(("email", email.as_str().to_string()))
                .bind(("status", status.as_str().to_string()))
                .bind(("external_ref", external_ref))
                .bind(("last_error", last_error))
                .await?;

            return Ok(());
        }

        let query = r#"
            CREATE provisioning CONTENT {
                backend: $backend,
                email: $email,
                status: $status,
                external_ref: $external_ref,
                last_error: $last_error,
                last_attempt_at: time::now()
            }
        "#;

        let created = self
            .db
            .query(query)
            .bind(("backend", backend.to_string()))
            .bind(("email", email.as_str().to_string()))
            .bind(("status", status.as_str().to_string()))
            .bind(("external_ref", external_ref.clone()))
            .bind(("last_error", last_error.clone()))
            .await?
            .check();

        if created.is_err() {
            // Concurrent first touch on the unique (backend, email) index:
            // fall through to an update of the winner's row.
            let query = r#"
                UPDATE provisioning SET
                    status = $status,
                    external_ref = $external_ref,
                    last_error = $last_error,
                    last_attempt_at = time::now()
                WHERE backend = $backend AND email = $email
            "#;

            self.db
                .query(query)
                .bind(("backend", backend.to_string()))
                .bind(("email", email.as_str().to_string()))
                .bind(("status", status.as_str().to_string()))
                .bind(("external_ref", external_ref))
                .bind(("last_error", last_error))
                .await?;
        }

        Ok(())
    }
}
