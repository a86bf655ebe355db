use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::errors::SchedulerError;

use super::{LockOutcome, StoreBackend};

struct LockEntry {
    token: String,
    expires_at: Instant,
}

/// [`InMemoryStoreBackend`] is an in-process fake of [`StoreBackend`], backed by two
/// [`DashMap`]s (one for `task:*` values, one for `lock:*` entries). It has no cross-process
/// durability and exists solely so the execution state machine can be exercised deterministically
/// in tests without a live Redis instance.
///
/// # See Also
/// - [`StoreBackend`]
/// - [`super::RedisStoreBackend`]
#[derive(Debug, Default)]
pub struct InMemoryStoreBackend {
    values: DashMap<String, Vec<u8>>,
    locks: DashMap<String, LockEntry>,
}

impl std::fmt::Debug for LockEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockEntry")
            .field("token", &self.token)
            .finish()
    }
}

impl InMemoryStoreBackend {
    /// Creates an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_is_live(entry: &LockEntry) -> bool {
        Instant::now() < entry.expires_at
    }
}

#[async_trait]
impl StoreBackend for InMemoryStoreBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SchedulerError> {
        Ok(self.values.get(key).map(|v| v.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), SchedulerError> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), SchedulerError> {
        self.values.remove(key);
        Ok(())
    }

    async fn acquire_lock(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<LockOutcome, SchedulerError> {
        if let Some(existing) = self.locks.get(key) {
            if Self::lock_is_live(&existing) {
                return Ok(LockOutcome::AlreadyHeld);
            }
        }
        self.locks.insert(
            key.to_string(),
            LockEntry {
                token: token.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(LockOutcome::Acquired)
    }

    async fn release_lock(&self, key: &str, token: &str) -> Result<(), SchedulerError> {
        if let Some(entry) = self.locks.get(key) {
            if entry.token != token {
                return Ok(());
            }
        } else {
            return Ok(());
        }
        self.locks.remove(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, SchedulerError> {
        Ok(self
            .values
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|k| k.starts_with(prefix))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_and_get_round_trip() {
        let store = InMemoryStoreBackend::new();
        store.set("task:1", b"hello".to_vec()).await.unwrap();
        assert_eq!(store.get("task:1").await.unwrap(), Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn del_is_idempotent_on_missing_key() {
        let store = InMemoryStoreBackend::new();
        store.del("task:missing").await.unwrap();
    }

    #[tokio::test]
    async fn second_lock_acquisition_is_contended() {
        let store = InMemoryStoreBackend::new();
        let first = store
            .acquire_lock("lock:1", "token-a", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(first, LockOutcome::Acquired);

        let second = store
            .acquire_lock("lock:1", "token-b", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(second, LockOutcome::AlreadyHeld);
    }

    #[tokio::test]
    async fn release_requires_matching_token() {
        let store = InMemoryStoreBackend::new();
        store
            .acquire_lock("lock:1", "token-a", Duration::from_secs(5))
            .await
            .unwrap();

        store.release_lock("lock:1", "token-b").await.unwrap();
        let still_held = store
            .acquire_lock("lock:1", "token-c", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(still_held, LockOutcome::AlreadyHeld);

        store.release_lock("lock:1", "token-a").await.unwrap();
        let now_free = store
            .acquire_lock("lock:1", "token-c", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(now_free, LockOutcome::Acquired);
    }

    #[tokio::test]
    async fn keys_filters_by_prefix() {
        let store = InMemoryStoreBackend::new();
        store.set("task:1", b"a".to_vec()).await.unwrap();
        store.set("task:2", b"b".to_vec()).await.unwrap();
        store.set("other:3", b"c".to_vec()).await.unwrap();

        let mut keys = store.keys("task:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["task:1".to_string(), "task:2".to_string()]);
    }
}
