//! `schedkeeper` is a persistent, crash-recoverable task scheduler.
//!
//! Applications register task values that carry an identity, a desired
//! execution time, a retry-backoff policy and a user-supplied action. The
//! scheduler guarantees that each task runs at or after its execution time,
//! at-most-once-per-success across all cooperating scheduler instances that
//! share the same backing store, and is re-attempted on failure until it
//! succeeds.
//!
//! See [`Scheduler`] for the entry point.

#[allow(missing_docs)]
pub mod clock;

#[allow(missing_docs)]
pub mod codec;

#[allow(missing_docs)]
pub mod errors;

#[allow(missing_docs)]
pub mod scheduler;

#[allow(missing_docs)]
pub mod store;

#[allow(missing_docs)]
pub mod task;

pub(crate) mod utils;

pub use errors::SchedulerError;
pub use scheduler::{global_scheduler, init_global, Scheduler, SchedulerConfig};
pub use store::StoreBackend;
pub use task::Task;
