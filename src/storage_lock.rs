use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::config::MAX_STORAGE_LOCK_TTL_SECS;

/// Per-client cool-down between URL Metric submissions.
pub struct StorageLock {
    ttl_secs: i64,
    locked_until: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl StorageLock {
    /// A TTL of zero or less disables locking. Longer TTLs are clamped to
    /// `MAX_STORAGE_LOCK_TTL_SECS`.
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            ttl_secs: ttl_secs.min(MAX_STORAGE_LOCK_TTL_SECS),
            locked_until: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl_secs(&self) -> i64 {
        self.ttl_secs.max(0)
    }

    pub async fn is_locked(&self, client: &str) -> bool {
        self.is_locked_at(client, Utc::now()).await
    }

    pub async fn is_locked_at(&self, client: &str, now: DateTime<Utc>) -> bool {
        if self.ttl_secs <= 0 {
            return false;
        }
        let locks = self.locked_until.read().await;
        locks.get(client).is_some_and(|until| *until > now)
    }

    pub async fn lock(&self, client: &str) {
        self.lock_at(client, Utc::now()).await;
    }

    pub async fn lock_at(&self, client: &str, now: DateTime<Utc>) {
        if self.ttl_secs <= 0 {
            return;
        }
        let mut locks = self.locked_until.write().await;
        locks.insert(client.to_string(), now + Duration::seconds(self.ttl_secs));
    }

    /// Forgets expired entries; returns how many were dropped.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut locks = self.locked_until.write().await;
        let before = locks.len();
        locks.retain(|_, until| *until > now);
        before - locks.len()
    }
}
