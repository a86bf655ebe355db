use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::clock::{SchedulerClock, SystemClock};
use crate::codec::{decode, encode};
use crate::errors::SchedulerError;
use crate::store::{lock_key, task_key, LockOutcome, RedisStoreBackend, StoreBackend, TASK_PREFIX};
use crate::task::Task;
use crate::utils::{date_time_to_system_time, system_time_to_date_time};

/// Extra time added on top of a task's [`Task::fail_retry_duration`] when sizing the TTL of the
/// distributed lock acquired during the firing path. Resolves the lock-TTL open question by
/// making the slack a configuration knob rather than a hardcoded constant: an operator whose
/// `execute()` bodies run long relative to their backoff can widen it without recompiling.
const DEFAULT_LOCK_TTL_SLACK: Duration = Duration::from_secs(30);

/// [`SchedulerConfig`] carries the options recognized at [`Scheduler::init`] time.
///
/// # Field(s)
/// - [`SchedulerConfig::database_uri`] Connection string for the external key/value store
///   (passed through to [`RedisStoreBackend::connect`]). An empty string is accepted here; the
///   resulting connection attempt then fails with [`SchedulerError::Store`].
/// - [`SchedulerConfig::lock_ttl_slack`] Extra duration added to `fail_retry_duration(task)` to
///   compute the lock TTL for a firing attempt.
///
/// # See Also
/// - [`Scheduler::init`]
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub database_uri: String,
    pub lock_ttl_slack: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            database_uri: String::new(),
            lock_ttl_slack: DEFAULT_LOCK_TTL_SLACK,
        }
    }
}

/// [`Scheduler`] is the process-facing entry point of `schedkeeper`: it owns the store handle,
/// a clock, and the in-memory manager (`identifier -> timer handle`), and exposes the three
/// public operations ([`Scheduler::schedule`], [`Scheduler::boot`], [`Scheduler::poll`]) plus
/// the internal firing path that implements the execution state machine.
///
/// `Scheduler<T>` is generic over one concrete [`Task`] implementation `T`; every record this
/// instance manages, under its store handle's `task:*` namespace, is assumed to decode as `T`.
/// Multiple schedulers over different task types may coexist in one process, each owning its
/// own manager and (typically) its own store connection or logical keyspace.
///
/// # Lifecycle
/// A [`Scheduler`] is always wrapped in an [`Arc`], since the firing path needs a `'static` handle
/// to itself to spawn independent timer tasks, so every constructor returns `Arc<Scheduler<T>>`
/// rather than a bare value. [`Scheduler::init`] (re)creates an instance; replacing the
/// process-wide convenience accessor via [`init_global`] is the "configured-reset" behavior.
/// In-flight timers armed by a superseded instance keep running against the store handle they
/// captured.
///
/// # Execution State Machine
/// Each identifier moves through `ARMED -> FIRING -> {ARMED, EXECUTING} -> {ARMED, absent}`:
/// - **ARMED**: a timer is installed in the manager, sleeping until the task's execution time.
/// - **FIRING**: the timer elapsed; the manager entry is removed and the distributed lock is
///   attempted. Lock contention silently abandons this attempt, it is not an error, the
///   owner elsewhere is assumed to be handling it.
/// - On lock acquisition the record is re-read; if its execution time has been moved into the
///   future by a concurrent writer, the task re-arms at that later time and the lock is
///   released without executing (the **record-wins** rule).
/// - **EXECUTING**: `task.execute()` runs. Success deletes the record and releases the lock
///   (terminal). Failure advances the execution time by `fail_retry_duration()`, persists the
///   updated record, re-arms, and releases the lock.
///
/// # See Also
/// - [`Task`]
/// - [`StoreBackend`]
/// - [`SchedulerClock`]
pub struct Scheduler<T: Task> {
    store: Arc<dyn StoreBackend>,
    clock: Arc<dyn SchedulerClock>,
    manager: DashMap<String, JoinHandle<()>>,
    lock_ttl_slack: Duration,
    _task: PhantomData<fn() -> T>,
}

impl<T: Task> std::fmt::Debug for Scheduler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("armed", &self.manager.len())
            .field("lock_ttl_slack", &self.lock_ttl_slack)
            .finish_non_exhaustive()
    }
}

impl<T: Task> Scheduler<T> {
    /// Creates a new scheduler connected to the Redis-backed store named by
    /// `config.database_uri`, using [`SystemClock`] as its clock.
    ///
    /// # Errors
    /// Returns [`SchedulerError::Store`] if the connection cannot be established.
    pub async fn init(config: SchedulerConfig) -> Result<Arc<Self>, SchedulerError> {
        let store = RedisStoreBackend::connect(&config.database_uri).await?;
        Ok(Self::with_backend(
            Arc::new(store),
            Arc::new(SystemClock),
            config.lock_ttl_slack,
        ))
    }

    /// Creates a new scheduler over an arbitrary [`StoreBackend`] and [`SchedulerClock`]. This
    /// is the seam used by tests (typically [`crate::store::InMemoryStoreBackend`] paired with
    /// [`crate::clock::VirtualClock`]) and by applications wanting a non-Redis backend.
    pub fn with_backend(
        store: Arc<dyn StoreBackend>,
        clock: Arc<dyn SchedulerClock>,
        lock_ttl_slack: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            clock,
            manager: DashMap::new(),
            lock_ttl_slack,
            _task: PhantomData,
        })
    }

    /// Number of identifiers currently armed in the in-memory manager. Exposed mainly for tests
    /// verifying that at most one timer handle exists per identifier, and that the manager goes
    /// empty once every task has terminally completed.
    pub fn armed_count(&self) -> usize {
        self.manager.len()
    }

    /// Persists a task and arms a timer for its execution time, superseding any existing record
    /// and timer for the same identifier.
    ///
    /// # Errors
    /// Returns [`SchedulerError::EmptyIdentifier`] if `task.identifier()` is empty, or
    /// [`SchedulerError::Codec`] / [`SchedulerError::Store`] if persisting the record fails.
    pub async fn schedule(self: &Arc<Self>, task: T) -> Result<(), SchedulerError> {
        let id = task.identifier();
        if id.is_empty() {
            return Err(SchedulerError::EmptyIdentifier);
        }

        let execution = task.get_execute_time();
        self.save(&task, execution).await?;
        log::debug!("scheduled `{id}` for {execution}");
        self.arm(id, task, execution);
        Ok(())
    }

    /// Force-run semantics: sets `task`'s execution time to now, then runs the same path as
    /// [`Scheduler::schedule`]. Guarantees immediate execution regardless of any previously
    /// scheduled time, including when there was no prior [`Scheduler::schedule`] call at all.
    ///
    /// # Errors
    /// Same as [`Scheduler::schedule`].
    pub async fn boot(self: &Arc<Self>, mut task: T) -> Result<(), SchedulerError> {
        let now = system_time_to_date_time(self.clock.now().await);
        task.set_execute_time(now);
        log::debug!("booting `{}`", task.identifier());
        self.schedule(task).await
    }

    /// Crash recovery: enumerates every `task:*` record in the store and arms a timer for each,
    /// without re-persisting (the existing record is already authoritative). `prototype` is
    /// accepted for call-shape fidelity with the original API and as a type-inference anchor; it
    /// is never read or mutated, decoding constructs a fresh `T` directly from each record's
    /// bytes, so prototype immutability holds structurally rather than merely by convention.
    ///
    /// A per-record decode failure is isolated: it is logged and recovery continues with the
    /// remaining identifiers. The first such failure encountered is returned once every key has
    /// been attempted (or `Ok(())` if none failed).
    ///
    /// # Errors
    /// Returns the first [`SchedulerError::Codec`]/[`SchedulerError::Store`] encountered while
    /// walking the `task:*` keyspace, if any.
    pub async fn poll(self: &Arc<Self>, _prototype: &T) -> Result<(), SchedulerError> {
        let keys = self.store.keys(TASK_PREFIX).await?;
        let mut first_error = None;

        for key in keys {
            match self.store.get(&key).await {
                Ok(Some(bytes)) => match decode::<T>(&bytes) {
                    Ok((task, execution)) => {
                        let id = task.identifier();
                        log::debug!("recovered `{id}` armed for {execution}");
                        self.arm(id, task, execution);
                    }
                    Err(e) => {
                        log::warn!("poll: failed to decode `{key}`: {e}");
                        first_error.get_or_insert(e);
                    }
                },
                Ok(None) => {
                    // Deleted between `keys` and `get`, already completed, nothing to recover.
                }
                Err(e) => {
                    log::warn!("poll: failed to read `{key}`: {e}");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn save(&self, task: &T, execution: DateTime<Utc>) -> Result<(), SchedulerError> {
        let bytes = encode(task, execution)?;
        self.store.set(&task_key(&task.identifier()), bytes).await
    }

    /// Installs a timer for `id` that sleeps until `execution`, then runs the firing path. Any
    /// existing timer for `id` is aborted and replaced, this is the "superseding `Schedule`
    /// cancels the prior timer" rule, keeping at most one handle per identifier.
    fn arm(self: &Arc<Self>, id: String, task: T, execution: DateTime<Utc>) {
        let scheduler = Arc::clone(self);
        let target = date_time_to_system_time(execution);
        let fire_id = id.clone();

        let handle = tokio::spawn(async move {
            scheduler.clock.idle_to(target).await;
            scheduler.fire(fire_id, task).await;
        });

        if let Some(previous) = self.manager.insert(id, handle) {
            previous.abort();
        }
    }

    /// The firing path: lock, re-read, execute, and either finish or reschedule. `armed_task` is
    /// the task instance captured at arm time, used only to size the lock's TTL before the
    /// authoritative record is re-read; execution always proceeds against the freshly re-read
    /// record so that an external mutation of `task:<id>` between arming and firing is honored.
    async fn fire(self: Arc<Self>, id: String, armed_task: T) {
        self.manager.remove(&id);

        let token = Uuid::new_v4().to_string();
        let lock = lock_key(&id);
        let ttl = armed_task.fail_retry_duration() + self.lock_ttl_slack;

        match self.store.acquire_lock(&lock, &token, ttl).await {
            Ok(LockOutcome::AlreadyHeld) => {
                log::debug!("lock contended for `{id}`, abandoning local firing");
                return;
            }
            Ok(LockOutcome::Acquired) => {}
            Err(e) => {
                log::warn!("store failure acquiring lock for `{id}`: {e}");
                return;
            }
        }

        let record = match self.store.get(&task_key(&id)).await {
            Ok(Some(bytes)) => match decode::<T>(&bytes) {
                Ok(record) => record,
                Err(e) => {
                    log::warn!("firing `{id}`: failed to decode record: {e}");
                    self.release_lock_best_effort(&lock, &token).await;
                    return;
                }
            },
            Ok(None) => {
                // Another instance already completed and deleted the record.
                self.release_lock_best_effort(&lock, &token).await;
                return;
            }
            Err(e) => {
                log::warn!("firing `{id}`: store failure re-reading record: {e}");
                self.release_lock_best_effort(&lock, &token).await;
                return;
            }
        };

        let (mut task, record_execution) = record;
        let now = system_time_to_date_time(self.clock.now().await);

        if record_execution > now {
            log::debug!("`{id}` rescheduled from under us, re-arming for {record_execution}");
            self.arm(id, task, record_execution);
            self.release_lock_best_effort(&lock, &token).await;
            return;
        }

        match task.execute().await {
            Ok(()) => {
                log::debug!("`{id}` executed successfully");
                if let Err(e) = self.store.del(&task_key(&id)).await {
                    log::warn!("`{id}` succeeded but failed to delete its record: {e}");
                }
            }
            Err(e) => {
                log::warn!("`{id}` execution failed: {e}");
                let next = now
                    + chrono::Duration::from_std(task.fail_retry_duration())
                        .unwrap_or_else(|_| chrono::Duration::zero());
                task.set_execute_time(next);
                if let Err(e) = self.save(&task, next).await {
                    log::warn!("`{id}` failed to persist retry record: {e}");
                    self.release_lock_best_effort(&lock, &token).await;
                    return;
                }
                self.arm(id, task, next);
            }
        }

        self.release_lock_best_effort(&lock, &token).await;
    }

    async fn release_lock_best_effort(&self, lock: &str, token: &str) {
        if let Err(e) = self.store.release_lock(lock, token).await {
            log::warn!("failed to release lock `{lock}`: {e}");
        }
    }
}

static GLOBAL_SCHEDULERS: OnceLock<RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>> =
    OnceLock::new();

fn registry() -> &'static RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>> {
    GLOBAL_SCHEDULERS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Installs `scheduler` as the process-wide convenience instance for task type `T`, replacing
/// any prior instance registered for the same `T`. This is a thin layer over the instance API:
/// applications that only ever run one [`Scheduler`] per task type may use
/// [`global_scheduler`]/[`init_global`] instead of threading an `Arc<Scheduler<T>>` through
/// their own code, but nothing in `schedkeeper` itself requires it.
///
/// Replacing the global instance does not affect timers already armed by the previous instance,
/// they keep running against the store handle and manager they captured.
pub fn init_global<T: Task>(scheduler: Arc<Scheduler<T>>) {
    let mut map = registry().write().expect("scheduler registry lock poisoned");
    map.insert(TypeId::of::<T>(), scheduler as Arc<dyn Any + Send + Sync>);
}

/// Retrieves the process-wide convenience instance for task type `T`, if one was installed via
/// [`init_global`].
pub fn global_scheduler<T: Task>() -> Option<Arc<Scheduler<T>>> {
    let map = registry().read().expect("scheduler registry lock poisoned");
    map.get(&TypeId::of::<T>())
        .cloned()
        .and_then(|boxed| boxed.downcast::<Scheduler<T>>().ok())
}
