use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

use crate::errors::SchedulerError;

use super::{LockOutcome, StoreBackend};

/// Lua script for a compare-and-delete release: only deletes `KEYS[1]` if its current value
/// still equals `ARGV[1]`, so a holder can never release a lock it does not own (e.g. one whose
/// TTL already expired and was re-acquired by another instance).
const RELEASE_IF_OWNER_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// [`RedisStoreBackend`] is the production [`StoreBackend`], backed by a real Redis server via
/// the `redis` crate's async, tokio-comp-enabled [`ConnectionManager`] (which reconnects
/// transparently on transient connection loss but, per `schedkeeper`'s configuration scope, is
/// held for the process lifetime (there is no explicit reconnect/failover policy beyond what
/// `ConnectionManager` already does).
///
/// Lock acquisition (`acquire_lock`) uses Redis's `SET key value NX PX <ttl_ms>`, which is
/// atomic. Lock release (`release_lock`) uses a Lua script evaluated server-side so the
/// compare-and-delete is also atomic, rather than a separate `GET` then `DEL` that could race
/// with another instance's acquisition after this holder's TTL expired.
///
/// # See Also
/// - [`StoreBackend`]
/// - [`super::InMemoryStoreBackend`]
#[derive(Clone)]
pub struct RedisStoreBackend {
    connection: ConnectionManager,
}

impl std::fmt::Debug for RedisStoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStoreBackend").finish_non_exhaustive()
    }
}

impl RedisStoreBackend {
    /// Connects to the Redis server at `database_uri` (e.g. `redis://127.0.0.1:6379/8`, per the
    /// original example's database selection convention).
    ///
    /// # Errors
    /// Returns [`SchedulerError::Store`] if the URI is malformed or the initial connection
    /// fails. An empty `database_uri` is accepted by the caller's configuration but fails here.
    pub async fn connect(database_uri: &str) -> Result<Self, SchedulerError> {
        let client = redis::Client::open(database_uri)
            .map_err(|e| SchedulerError::Store(e.to_string()))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| SchedulerError::Store(e.to_string()))?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl StoreBackend for RedisStoreBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SchedulerError> {
        let mut conn = self.connection.clone();
        conn.get(key)
            .await
            .map_err(|e| SchedulerError::Store(e.to_string()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), SchedulerError> {
        let mut conn = self.connection.clone();
        conn.set(key, value)
            .await
            .map_err(|e| SchedulerError::Store(e.to_string()))
    }

    async fn del(&self, key: &str) -> Result<(), SchedulerError> {
        let mut conn = self.connection.clone();
        let _: () = conn
            .del(key)
            .await
            .map_err(|e| SchedulerError::Store(e.to_string()))?;
        Ok(())
    }

    async fn acquire_lock(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<LockOutcome, SchedulerError> {
        let mut conn = self.connection.clone();
        let acquired: bool = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async::<Option<String>>(&mut conn)
            .await
            .map_err(|e| SchedulerError::Store(e.to_string()))?
            .is_some();

        Ok(if acquired {
            LockOutcome::Acquired
        } else {
            LockOutcome::AlreadyHeld
        })
    }

    async fn release_lock(&self, key: &str, token: &str) -> Result<(), SchedulerError> {
        let mut conn = self.connection.clone();
        let script = redis::Script::new(RELEASE_IF_OWNER_SCRIPT);
        let _: i64 = script
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| SchedulerError::Store(e.to_string()))?;
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, SchedulerError> {
        let mut conn = self.connection.clone();
        let pattern = format!("{prefix}*");
        conn.keys(pattern)
            .await
            .map_err(|e| SchedulerError::Store(e.to_string()))
    }
}
