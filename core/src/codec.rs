use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::SchedulerError;
use crate::task::Task;

/// [`Record`] is the persisted form of a task: its serialized payload paired with the
/// authoritative execution instant. It is stored under key `task:<identifier>` and is a plain
/// JSON object, a self-describing keyed container decodable without prior knowledge of field
/// order, which a hand-rolled binary format would not give for free.
///
/// # Invariant
/// `execution` is the single source of truth for when the task runs; it supersedes whatever
/// execution time is embedded in `payload` at decode time (see [`decode`]).
///
/// # See Also
/// - [`encode`]
/// - [`decode`]
#[derive(Serialize, Deserialize)]
pub struct Record<T> {
    pub payload: T,
    pub execution: DateTime<Utc>,
}

/// Encodes a task and its execution instant into the record's wire form.
///
/// # Errors
/// Returns [`SchedulerError::Codec`] if the task fails to serialize.
pub fn encode<T: Task>(task: &T, execution: DateTime<Utc>) -> Result<Vec<u8>, SchedulerError> {
    let record = Record {
        payload: task.clone(),
        execution,
    };
    serde_json::to_vec(&record)
        .map_err(|e| SchedulerError::Codec(task.identifier(), e.to_string()))
}

/// Decodes a record's wire form back into a task and its execution instant, overwriting the
/// task's own execution-time field with `record.execution` (the record's execution time is
/// authoritative, not whatever the payload happened to carry).
///
/// # Errors
/// Returns [`SchedulerError::Codec`] on malformed bytes. The caller (`poll`) is expected to
/// isolate this per-record rather than abort the whole recovery pass.
pub fn decode<T: Task>(bytes: &[u8]) -> Result<(T, DateTime<Utc>), SchedulerError> {
    let record: Record<T> = serde_json::from_slice(bytes)
        .map_err(|e| SchedulerError::Codec("<unknown>".to_string(), e.to_string()))?;
    let mut task = record.payload;
    task.set_execute_time(record.execution);
    Ok((task, record.execution))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde::{Deserialize as De, Serialize as Se};
    use std::time::Duration;

    #[derive(Clone, Debug, Se, De)]
    struct SampleTask {
        id: String,
        at: DateTime<Utc>,
    }

    #[async_trait]
    impl Task for SampleTask {
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
            Ok(())
        }

        fn fail_retry_duration(&self) -> Duration {
            Duration::from_secs(1)
        }
    }

    #[test]
    fn round_trips_payload_and_execution() {
        let task = SampleTask {
            id: "123".to_string(),
            at: DateTime::<Utc>::UNIX_EPOCH,
        };
        let later = DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::seconds(10);
        let bytes = encode(&task, later).expect("encode should succeed");

        let (decoded, execution): (SampleTask, DateTime<Utc>) =
            decode(&bytes).expect("decode should succeed");
        assert_eq!(decoded.id, "123");
        assert_eq!(execution, later);
        // The record's execution time overwrites the payload's own, even though the
        // payload that was encoded already carried a different value (UNIX_EPOCH).
        assert_eq!(decoded.get_execute_time(), later);
    }

    #[test]
    fn decode_rejects_malformed_bytes() {
        let err = decode::<SampleTask>(b"not json").unwrap_err();
        assert!(matches!(err, SchedulerError::Codec(_, _)));
    }
}
