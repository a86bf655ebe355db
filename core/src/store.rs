#[allow(missing_docs)]
pub mod memory;

#[allow(missing_docs)]
pub mod redis;

pub use memory::InMemoryStoreBackend;
pub use redis::RedisStoreBackend;

use async_trait::async_trait;
use std::fmt::Debug;
use std::time::Duration;

use crate::errors::SchedulerError;

#[allow(unused_imports)]
use crate::scheduler::Scheduler;

/// Key prefix under which task records are stored: `task:<identifier>`.
pub const TASK_PREFIX: &str = "task:";

/// Key prefix under which locks are stored: `lock:<identifier>`.
pub const LOCK_PREFIX: &str = "lock:";

/// Outcome of attempting to acquire a lock via [`StoreBackend::acquire_lock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// The lock was free and is now held by the caller.
    Acquired,
    /// Another holder (this instance or another) already holds the lock.
    AlreadyHeld,
}

/// [`StoreBackend`] is a thin semantic wrapper over the external key/value store. It is the
/// *only* place in `schedkeeper` that touches the external store; [`Scheduler`] and the rest of
/// the crate are store-agnostic and talk only to this trait.
///
/// # Required Method(s)
/// - [`StoreBackend::get`] / [`StoreBackend::set`] / [`StoreBackend::del`] Plain key/value
///   access, used for `task:*` records.
/// - [`StoreBackend::acquire_lock`] / [`StoreBackend::release_lock`] Set-if-absent-with-expiry
///   and an owner-checked release, used for `lock:*` entries, the distributed mutual-exclusion
///   primitive that bounds at-most-one-concurrent-attempt per task identifier across instances.
/// - [`StoreBackend::keys`] Enumerates keys by prefix, used by [`Scheduler::poll`] to recover
///   `task:*` records after a crash.
///
/// Any operation may fail (connection loss, protocol error); failures propagate as
/// [`SchedulerError::Store`].
///
/// # Trait Implementation(s)
/// - [`RedisStoreBackend`] the production backend, backed by a real Redis server.
/// - [`InMemoryStoreBackend`] an in-process fake for tests, with no cross-process durability.
///
/// # See Also
/// - [`Scheduler`]
/// - [`RedisStoreBackend`]
/// - [`InMemoryStoreBackend`]
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Reads the value stored at `key`, or `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SchedulerError>;

    /// Writes `value` at `key`, unconditionally overwriting any prior value.
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), SchedulerError>;

    /// Deletes `key`. Idempotent: deleting an absent key is not an error.
    async fn del(&self, key: &str) -> Result<(), SchedulerError>;

    /// Atomically sets `key` to `token` only if it is currently absent, with the entry
    /// expiring after `ttl`. Used exclusively for lock acquisition.
    async fn acquire_lock(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<LockOutcome, SchedulerError>;

    /// Releases a lock previously acquired with `token`, but only if `token` still matches the
    /// value stored at `key` (a holder can never release a lock it does not, or no longer,
    /// own, e.g. after its TTL already expired and a different instance re-acquired it).
    async fn release_lock(&self, key: &str, token: &str) -> Result<(), SchedulerError>;

    /// Lists all keys beginning with `prefix`.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, SchedulerError>;
}

/// Builds the `task:<identifier>` key for a task identifier.
pub fn task_key(identifier: &str) -> String {
    format!("{TASK_PREFIX}{identifier}")
}

/// Builds the `lock:<identifier>` key for a task identifier.
pub fn lock_key(identifier: &str) -> String {
    format!("{LOCK_PREFIX}{identifier}")
}
