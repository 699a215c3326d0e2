//! NewType wrappers for strong typing throughout the gateway.
//!
//! These types prevent accidental mixing of semantically different strings
//! (e.g., passing an email where a generated user id is expected).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to generate a NewType wrapper with standard trait implementations.
macro_rules! newtype_string {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner String.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(
    /// Provider-asserted email address, the stable join key across all
    /// backends. Always stored normalized (trimmed, lowercased) so that the
    /// catalog's unique index sees one spelling per identity.
    Email
);

newtype_string!(
    /// Internal canonical user identifier (UUID v4), generated exactly once
    /// on first provisioning and never reused or regenerated.
    UserId
);

newtype_string!(
    /// Backend-assigned reference for a provisioned identity: a row id, a
    /// graph node id, a key prefix, or an external account id depending on
    /// the backend.
    ExternalRef
);

newtype_string!(
    /// Stable per-user ownership token derived from the email, used where a
    /// backend scopes data by key prefix rather than by column.
    OwnerToken
);

impl Email {
    /// Normalize a raw claim value into the canonical spelling.
    pub fn normalized(raw: &str) -> Self {
        Self(raw.trim().to_ascii_lowercase())
    }
}

impl UserId {
    /// Generate a fresh user id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_normalized() {
        let email = Email::normalized("  Alice@Example.COM ");
        assert_eq!(email.as_str(), "alice@example.com");
    }

    #[test]
    fn test_email_serde_transparent() {
        let email = Email::new("alice@example.com");
        let json = serde_json::to_string(&email).unwrap();
        assert_eq!(json, "\"alice@example.com\"");

        let parsed: Email = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, email);
    }

    #[test]
    fn test_user_id_generate_unique() {
        let a = UserId::generate();
        let b = UserId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn test_type_hash() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(Email::new("a@example.com"));
        assert!(set.contains(&Email::new("a@example.com")));
        assert!(!set.contains(&Email::new("b@example.com")));
    }

    #[test]
    fn test_display_and_borrow() {
        use std::borrow::Borrow;
        let uid = UserId::new("uid-1");
        assert_eq!(uid.to_string(), "uid-1");
        let s: &str = uid.borrow();
        assert_eq!(s, "uid-1");
    }
}
