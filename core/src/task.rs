use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::time::Duration;

#[allow(unused_imports)]
use crate::scheduler::Scheduler;

/// [`Task`] is the capability contract a user-defined value must satisfy to be schedulable.
/// `schedkeeper` never names a concrete task type internally, a [`Scheduler`] is generic
/// over one [`Task`] implementation and treats it opaquely apart from calling these five
/// methods.
///
/// # Required Method(s)
/// - [`Task::identifier`] A stable, unique key for this task instance.
/// - [`Task::get_execute_time`] / [`Task::set_execute_time`] The task's own notion of when it
///   should run, readable and writable so the scheduler can overwrite it from the persisted
///   record on recovery (see [`Scheduler::poll`]).
/// - [`Task::execute`] The opaque user action. May mutate `self`; returns success or failure.
/// - [`Task::fail_retry_duration`] The additive backoff applied after a failed `execute`.
///
/// # Serialization
/// A [`Task`] must also be [`Serialize`] + [`DeserializeOwned`] + [`Clone`] so that it can be
/// persisted to and reconstructed from the store (see [`crate::codec::Record`]). The scheduler
/// never inspects these fields directly; it only round-trips them through serde.
///
/// # Object Safety
/// [`Task`] is not object-safe (its supertraits need `Self: Sized`); [`Scheduler<T>`] is
/// generic over `T: Task` rather than storing `dyn Task` trait objects. This mirrors the
/// single-concrete-shape-per-scheduler assumption the store's `task:*` namespace already
/// makes: every record under a given scheduler's prefix decodes to the same `T`.
///
/// # See Also
/// - [`Scheduler`]
/// - [`crate::codec::Record`]
#[async_trait]
pub trait Task: Serialize + DeserializeOwned + Clone + Send + Sync + Debug + 'static {
    /// Stable, unique key for this task instance. Must be non-empty for the task to be
    /// schedulable: [`Scheduler::schedule`] and [`Scheduler::boot`] reject an empty
    /// identifier with [`crate::errors::SchedulerError::EmptyIdentifier`] before any store or
    /// lock call is attempted.
    fn identifier(&self) -> String;

    /// The task's current notion of when it should execute.
    fn get_execute_time(&self) -> DateTime<Utc>;

    /// Updates the task's own notion of its execution time, returning the value just set.
    fn set_execute_time(&mut self, time: DateTime<Utc>) -> DateTime<Utc>;

    /// The action. May mutate `self`. Failure is not a scheduler error, it is the expected
    /// signal that triggers the retry branch of the firing path (see [`Scheduler`]'s
    /// documentation of the execution state machine).
    async fn execute(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Additive backoff applied to the current time after a failed [`Task::execute`] to
    /// compute the next execution time.
    fn fail_retry_duration(&self) -> Duration;
}
