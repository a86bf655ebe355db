use async_trait::async_trait;
use chrono::{DateTime, Utc};
use schedkeeper::clock::{AdvanceableScheduleClock, VirtualClock};
use schedkeeper::codec;
use schedkeeper::store::{task_key, InMemoryStoreBackend, LockOutcome, StoreBackend};
use schedkeeper::{Scheduler, SchedulerError, Task};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Job {
    id: String,
    at: DateTime<Utc>,
    remaining_failures: u32,
}

#[async_trait]
impl Task for Job {
    fn identifier(&self) -> String {
        self.id.clone()
    }

    fn get_execute_time(&self) -> DateTime<Utc> {
        self.at
    }

    fn set_execute_time(&mut self, time: DateTime<Utc>) -> DateTime<Utc> {
        self.at = time;
        self.at
    }

    async fn execute(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if self.remaining_failures > 0 {
            self.remaining_failures -= 1;
            return Err("simulated failure".into());
        }
        Ok(())
    }

    fn fail_retry_duration(&self) -> Duration {
        Duration::from_secs(1)
    }
}

fn prototype() -> Job {
    Job {
        id: String::new(),
        at: DateTime::<Utc>::UNIX_EPOCH,
        remaining_failures: 0,
    }
}

async fn settle() {
    // Lets spawned firing-path tasks (store calls, lock calls) run to completion on the
    // current-thread test runtime before assertions inspect shared state.
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn poll_recovers_three_tasks() {
    let store = Arc::new(InMemoryStoreBackend::new());
    let clock = Arc::new(VirtualClock::from_epoch());
    let t0: DateTime<Utc> = clock.now().await.into();

    for (id, offset) in [("123", 1), ("456", 2), ("789", 3)] {
        let job = Job {
            id: id.to_string(),
            at: t0 + chrono::Duration::seconds(offset),
            remaining_failures: 0,
        };
        let bytes = codec::encode(&job, job.at).unwrap();
        store.set(&task_key(id), bytes).await.unwrap();
    }

    let scheduler = Scheduler::with_backend(store.clone(), clock.clone(), Duration::from_secs(30));
    scheduler.poll(&prototype()).await.unwrap();
    assert_eq!(scheduler.armed_count(), 3);

    clock.advance(Duration::from_secs(4)).await;
    settle().await;

    assert_eq!(scheduler.armed_count(), 0);
    assert!(store.keys("task:").await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reschedule_postpones_execution() {
    let store = Arc::new(InMemoryStoreBackend::new());
    let clock = Arc::new(VirtualClock::from_epoch());
    let scheduler = Scheduler::with_backend(store.clone(), clock.clone(), Duration::from_secs(30));

    let t0: DateTime<Utc> = clock.now().await.into();
    let first = Job {
        id: "123".to_string(),
        at: t0 + chrono::Duration::seconds(1),
        remaining_failures: 0,
    };
    scheduler.schedule(first).await.unwrap();

    let postponed = Job {
        id: "123".to_string(),
        at: t0 + chrono::Duration::seconds(3),
        remaining_failures: 0,
    };
    scheduler.schedule(postponed).await.unwrap();
    assert_eq!(scheduler.armed_count(), 1);

    clock.advance(Duration::from_secs(1)).await;
    settle().await;
    assert!(!store.keys("task:").await.unwrap().is_empty(), "must not fire at the superseded time");

    clock.advance(Duration::from_secs(2)).await;
    settle().await;
    assert!(store.keys("task:").await.unwrap().is_empty(), "must fire at the postponed time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn boot_overrides_future_schedule() {
    let store = Arc::new(InMemoryStoreBackend::new());
    let clock = Arc::new(VirtualClock::from_epoch());
    let scheduler = Scheduler::with_backend(store.clone(), clock.clone(), Duration::from_secs(30));

    let t0: DateTime<Utc> = clock.now().await.into();
    let job = Job {
        id: "456".to_string(),
        at: t0 + chrono::Duration::seconds(10),
        remaining_failures: 0,
    };
    scheduler.schedule(job.clone()).await.unwrap();
    scheduler.boot(job).await.unwrap();

    settle().await;
    assert!(store.keys("task:").await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fail_then_succeed_retries_with_backoff() {
    let store = Arc::new(InMemoryStoreBackend::new());
    let clock = Arc::new(VirtualClock::from_epoch());
    let scheduler = Scheduler::with_backend(store.clone(), clock.clone(), Duration::from_secs(30));

    let job = Job {
        id: "retrying".to_string(),
        at: Utc::now(),
        remaining_failures: 3,
    };
    scheduler.boot(job).await.unwrap();
    settle().await;
    assert!(!store.keys("task:").await.unwrap().is_empty());

    for _ in 0..3 {
        clock.advance(Duration::from_secs(1)).await;
        settle().await;
    }

    assert!(store.keys("task:").await.unwrap().is_empty());
    assert_eq!(scheduler.armed_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn external_record_mutation_wins_over_armed_timer() {
    let store = Arc::new(InMemoryStoreBackend::new());
    let clock = Arc::new(VirtualClock::from_epoch());
    let scheduler = Scheduler::with_backend(store.clone(), clock.clone(), Duration::from_secs(30));

    let t0: DateTime<Utc> = clock.now().await.into();
    let job = Job {
        id: "123".to_string(),
        at: t0 + chrono::Duration::seconds(1),
        remaining_failures: 0,
    };
    scheduler.schedule(job).await.unwrap();

    // An out-of-band writer overwrites the record directly, bypassing `schedule` (and thus the
    // manager), which is the scenario the record-wins rule exists for.
    let mutated = Job {
        id: "123".to_string(),
        at: t0 + chrono::Duration::seconds(2),
        remaining_failures: 0,
    };
    let bytes = codec::encode(&mutated, mutated.at).unwrap();
    store.set(&task_key("123"), bytes).await.unwrap();

    clock.advance(Duration::from_secs(1)).await;
    settle().await;
    assert!(
        !store.keys("task:").await.unwrap().is_empty(),
        "timer fired at the stale time but must re-arm rather than execute early"
    );

    clock.advance(Duration::from_secs(1)).await;
    settle().await;
    assert!(store.keys("task:").await.unwrap().is_empty());
}

#[derive(Debug)]
struct FailingStoreBackend;

#[async_trait]
impl StoreBackend for FailingStoreBackend {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, SchedulerError> {
        Err(SchedulerError::Store("store unavailable".to_string()))
    }

    async fn set(&self, _key: &str, _value: Vec<u8>) -> Result<(), SchedulerError> {
        Err(SchedulerError::Store("store unavailable".to_string()))
    }

    async fn del(&self, _key: &str) -> Result<(), SchedulerError> {
        Err(SchedulerError::Store("store unavailable".to_string()))
    }

    async fn acquire_lock(
        &self,
        _key: &str,
        _token: &str,
        _ttl: Duration,
    ) -> Result<LockOutcome, SchedulerError> {
        Err(SchedulerError::Store("store unavailable".to_string()))
    }

    async fn release_lock(&self, _key: &str, _token: &str) -> Result<(), SchedulerError> {
        Err(SchedulerError::Store("store unavailable".to_string()))
    }

    async fn keys(&self, _prefix: &str) -> Result<Vec<String>, SchedulerError> {
        Err(SchedulerError::Store("store unavailable".to_string()))
    }
}

#[tokio::test]
async fn store_unavailable_surfaces_errors_without_changing_state() {
    let store: Arc<dyn StoreBackend> = Arc::new(FailingStoreBackend);
    let clock = Arc::new(VirtualClock::from_epoch());
    let scheduler = Scheduler::with_backend(store, clock, Duration::from_secs(30));

    let job = Job {
        id: "123".to_string(),
        at: Utc::now(),
        remaining_failures: 0,
    };
    assert!(matches!(
        scheduler.schedule(job).await.unwrap_err(),
        SchedulerError::Store(_)
    ));
    assert!(matches!(
        scheduler.poll(&prototype()).await.unwrap_err(),
        SchedulerError::Store(_)
    ));
    assert_eq!(scheduler.armed_count(), 0);
}

#[tokio::test]
async fn empty_identifier_is_unschedulable() {
    let store = Arc::new(InMemoryStoreBackend::new());
    let clock = Arc::new(VirtualClock::from_epoch());
    let scheduler = Scheduler::with_backend(store, clock, Duration::from_secs(30));

    let job = Job {
        id: String::new(),
        at: Utc::now(),
        remaining_failures: 0,
    };
    assert!(matches!(
        scheduler.schedule(job).await.unwrap_err(),
        SchedulerError::EmptyIdentifier
    ));
}
