//! Persistence port for the scheduled-poll registry.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::Result;

/// Key-value persistence contract the registry service is written against.
///
/// Lock operations must be atomic read-modify-write against the shared store,
/// not process-local: the scheduler may run as multiple cooperating workers.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Returns false without mutation when the key already exists.
    async fn put_if_absent(&self, key: &str, value: &str) -> Result<bool>;

    /// All values whose key starts with `prefix`.
    async fn values_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Compare-and-set lock acquisition. Returns true when this caller now
    /// holds the lock; an unreleased lock becomes acquirable again after
    /// `ttl` (crash recovery).
    async fn acquire_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool>;

    /// Releases the lock only if `token` still owns it. Returns false when
    /// the lock expired or belongs to someone else.
    async fn release_lock(&self, key: &str, token: &str) -> Result<bool>;
}

/// In-memory store used by tests and dev mode. Lock expiry mirrors the
/// redis TTL behaviour.
#[derive(Debug, Default)]
pub struct MemoryRegistryStore {
    values: Mutex<HashMap<String, String>>,
    locks: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RegistryStore for MemoryRegistryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: &str) -> Result<bool> {
        let mut values = self.values.lock().await;
        if values.contains_key(key) {
            return Ok(false);
        }
        values.insert(key.to_string(), value.to_string());
        Ok(true)
    }

    async fn values_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let values = self.values.lock().await;
        Ok(values
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(_, value)| value.clone())
            .collect())
    }

    async fn acquire_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let mut locks = self.locks.lock().await;
        let now = Instant::now();
        if let Some((_, expires_at)) = locks.get(key) {
            if *expires_at > now {
                return Ok(false);
            }
        }
        locks.insert(key.to_string(), (token.to_string(), now + ttl));
        Ok(true)
    }

    async fn release_lock(&self, key: &str, token: &str) -> Result<bool> {
        let mut locks = self.locks.lock().await;
        match locks.get(key) {
            Some((owner, expires_at)) if owner == token && *expires_at > Instant::now() => {
                locks.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_if_absent_rejects_existing_keys() {
        let store = MemoryRegistryStore::new();
        assert!(store.put_if_absent("a", "1").await.unwrap());
        assert!(!store.put_if_absent("a", "2").await.unwrap());
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn expired_locks_are_reacquirable() {
        let store = MemoryRegistryStore::new();
        assert!(
            store
                .acquire_lock("l", "t1", Duration::from_millis(0))
                .await
                .unwrap()
        );
        // TTL of zero expires immediately
        assert!(
            store
                .acquire_lock("l", "t2", Duration::from_secs(10))
                .await
                .unwrap()
        );
        // t1 no longer owns the lock
        assert!(!store.release_lock("l", "t1").await.unwrap());
        assert!(store.release_lock("l", "t2").await.unwrap());
    }
}
