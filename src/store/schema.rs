//! Row types for the system-of-record store and the canonical `User` model.

use serde::{Deserialize, Serialize};
use surrealdb::{RecordId, sql::Datetime};

use crate::types::{Email, UserId};

/// Privilege level of a user. Authoritative only from the system-of-record
/// store; copies held by other backends are advisory at best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "admin" => Self::Admin,
            _ => Self::User,
        }
    }
}

/// Canonical resolved identity, as seen by every downstream capability.
///
/// Created on first successful identity resolution; `uid` is assigned once
/// and never regenerated. Mutated only by privileged administrative
/// operations; never deleted by this subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub uid: UserId,
    pub email: Email,
    pub role: Role,
    pub tier: String,
    pub services_enabled: Vec<String>,
}

/// A `user` row in the system-of-record store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: RecordId,
    pub uid: String,
    pub email: String,
    pub role: String,
    pub tier: String,
    #[serde(default)]
    pub services_enabled: Vec<String>,
    pub created_at: Option<Datetime>,
    pub updated_at: Option<Datetime>,
    pub last_seen_at: Option<Datetime>,
}

impl UserRecord {
    /// Project the row into the canonical model handed to capabilities.
    pub fn to_user(&self) -> User {
        User {
            uid: UserId::new(self.uid.clone()),
            email: Email::new(self.email.clone()),
            role: Role::parse(&self.role),
            tier: self.tier.clone(),
            services_enabled: self.services_enabled.clone(),
        }
    }
}

/// Lifecycle of one backend's copy of an identity. `Absent` is the implicit
/// state of a missing row; rows are created lazily and never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisionStatus {
    Absent,
    Provisioning,
    Provisioned,
    Failed,
}

impl ProvisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Provisioning => "provisioning",
            Self::Provisioned => "provisioned",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "provisioning" => Self::Provisioning,
            "provisioned" => Self::Provisioned,
            "failed" => Self::Failed,
            _ => Self::Absent,
        }
    }
}

/// A `provisioning` ledger row, one per (backend, email).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningRecord {
    pub id: RecordId,
    pub backend: String,
    pub email: String,
    pub status: String,
    pub external_ref: Option<String>,
    pub last_error: Option<String>,
    pub last_attempt_at: Option<Datetime>,
}

impl ProvisioningRecord {
    pub fn status(&self) -> ProvisionStatus {
        ProvisionStatus::parse(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        assert_eq!(Role::parse("admin"), Role::Admin);
        assert_eq!(Role::parse("user"), Role::User);
        // Unknown roles degrade to the least privilege.
        assert_eq!(Role::parse("superuser"), Role::User);
        assert_eq!(Role::Admin.as_str(), "admin");
    }

    #[test]
    fn test_provision_status_parse() {
        assert_eq!(ProvisionStatus::parse("provisioned"), ProvisionStatus::Provisioned);
        assert_eq!(ProvisionStatus::parse("failed"), ProvisionStatus::Failed);
        assert_eq!(ProvisionStatus::parse("anything"), ProvisionStatus::Absent);
    }

    #[test]
    fn test_user_record_projection() {
        let record = UserRecord {
            id: RecordId::from_table_key("user", "abc"),
            uid: "11111111-1111-1111-1111-111111111111".to_string(),
            email: "alice@example.com".to_string(),
            role: "admin".to_string(),
            tier: "standard".to_string(),
            services_enabled: vec!["search".to_string()],
            created_at: None,
            updated_at: None,
            last_seen_at: None,
        };

        let user = record.to_user();
        assert_eq!(user.role, Role::Admin);
        assert_eq!(user.email.as_str(), "alice@example.com");
        assert_eq!(user.services_enabled, vec!["search".to_string()]);
    }
}
