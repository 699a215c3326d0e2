//! Short-lived identity cache.
//!
//! Maps a validated email to its canonical [`User`] so the steady-state
//! request path skips the system-of-record lookup. Eviction is purely
//! time-based; identity volume is small relative to request volume, so no
//! size bound is kept. Privilege is deliberately NOT served from here: the
//! admin check always reads the store fresh.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::DEFAULT_IDENTITY_CACHE_TTL_SECS;
use crate::store::User;
use crate::types::Email;

struct CacheEntry {
    user: User,
    cached_at: Instant,
}

pub struct IdentityCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl IdentityCache {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: Duration::from_secs(ttl_seconds),
        }
    }

    pub fn with_default_ttl() -> Self {
        Self::new(DEFAULT_IDENTITY_CACHE_TTL_SECS)
    }

    /// Fresh entry or `None`. Expired entries are dropped on read.
    pub async fn get(&self, email: &Email) -> Option<User> {
        {
            let entries = self.entries.read().await;
            match entries.get(email.as_str()) {
                Some(entry) if entry.cached_at.elapsed() < self.ttl => {
                    return Some(entry.user.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }

        debug!(email = email.as_str(), "identity cache entry expired");
        self.entries.write().await.remove(email.as_str());
        None
    }

    pub async fn insert(&self, user: User) {
        let mut entries = self.entries.write().await;
        entries.insert(
            user.email.as_str().to_string(),
            CacheEntry {
                user,
                cached_at: Instant::now(),
            },
        );
    }

    /// Drop one entry, e.g. after an administrative role change.
    pub async fn invalidate(&self, email: &Email) {
        self.entries.write().await.remove(email.as_str());
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Role;
    use crate::types::UserId;

    fn sample_user(email: &str) -> User {
        User {
            uid: UserId::generate(),
            email: Email::new(email),
            role: Role::User,
            tier: "standard".to_string(),
            services_enabled: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_hit_within_ttl() {
        let cache = IdentityCache::new(300);
        let user = sample_user("alice@example.com");
        cache.insert(user.clone()).await;

        let hit = cache.get(&user.email).await.unwrap();
        assert_eq!(hit.uid, user.uid);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_miss_for_unknown_email() {
        let cache = IdentityCache::new(300);
        assert!(cache.get(&Email::new("nobody@example.com")).await.is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_evicted_on_read() {
        let cache = IdentityCache::new(0);
        let user = sample_user("alice@example.com");
        cache.insert(user.clone()).await;

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(cache.get(&user.email).await.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_invalidate_drops_entry() {
        let cache = IdentityCache::new(300);
        let user = sample_user("alice@example.com");
        cache.insert(user.clone()).await;

        cache.invalidate(&user.email).await;
        assert!(cache.get(&user.email).await.is_none());
    }
}
