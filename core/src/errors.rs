use thiserror::Error;

#[allow(unused_imports)]
use crate::scheduler::Scheduler;

/// [`SchedulerError`] is the main enum that contains all the errors which can be thrown by
/// `schedkeeper`, it uses under the hood [`thiserror`] to make it as smooth sailing to add more
/// errors in the future as possible.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// The external key/value store rejected or failed an operation (connection drop,
    /// protocol error, timeout...). Any store call can surface this; it is never silently
    /// swallowed when it originates from a caller-facing method. A store failure inside the
    /// internal firing path is logged and the attempt is abandoned rather than propagated,
    /// since there is no caller left to receive it at that point (see [`Scheduler`]'s firing
    /// path documentation).
    #[error("store operation failed: {0}")]
    Store(String),

    /// Encoding or decoding a [`crate::codec::Record`] failed. `schedule`/`boot` propagate
    /// this immediately on encode failure; `poll` isolates it per-record and returns only the
    /// first one encountered, continuing with the rest.
    #[error("record codec failure for `{0}`: {1}")]
    Codec(String, String),

    /// A task was submitted with an empty [`crate::task::Task::identifier`]. An empty
    /// identifier cannot be distinguished from any other empty identifier in the store's key
    /// space, so it is rejected before any store or lock call is attempted.
    #[error("task identifier must not be empty")]
    EmptyIdentifier,
}
