use async_trait::async_trait;
use chrono::{DateTime, Utc};
use schedkeeper::{Scheduler, SchedulerConfig, Task};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A stand-in task shape mirroring what an application would define: a stable id, a start/end
/// window, and some opaque payload the action cares about.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct CustomTask {
    id: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    info: String,
}

#[async_trait]
impl Task for CustomTask {
    fn identifier(&self) -> String {
        self.id.clone()
    }

    fn get_execute_time(&self) -> DateTime<Utc> {
        self.end
    }

    fn set_execute_time(&mut self, time: DateTime<Utc>) -> DateTime<Utc> {
        self.end = time;
        self.end
    }

    async fn execute(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        println!("task is running: {}", self.info);
        Ok(())
    }

    fn fail_retry_duration(&self) -> Duration {
        Duration::from_secs(1)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let scheduler = Scheduler::<CustomTask>::init(SchedulerConfig {
        database_uri: "redis://127.0.0.1:6379/8".to_string(),
        ..SchedulerConfig::default()
    })
    .await?;

    // Recover anything left over from a previous run before scheduling new work.
    let prototype = CustomTask {
        id: String::new(),
        start: DateTime::<Utc>::UNIX_EPOCH,
        end: DateTime::<Utc>::UNIX_EPOCH,
        info: String::new(),
    };
    scheduler.poll(&prototype).await?;

    let now = Utc::now();
    let task = CustomTask {
        id: "123".to_string(),
        start: now,
        end: now + chrono::Duration::seconds(10),
        info: "this is a task message message".to_string(),
    };
    println!("retry duration if execution failed: {:?}", task.fail_retry_duration());

    // First schedule the task ten seconds out...
    scheduler.schedule(task.clone()).await?;
    // ...then decide to run it immediately instead.
    scheduler.boot(task).await?;

    tokio::time::sleep(Duration::from_secs(2)).await;
    Ok(())
}
