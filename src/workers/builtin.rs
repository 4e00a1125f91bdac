//! Built-in workers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::Result;
use crate::job::Job;
use crate::workers::worker::Worker;

/// Sleeps for `duration_ms` (default 1000), reporting progress in
/// one-second steps. Mostly useful for smoke-testing an agent deployment
/// end to end.
pub struct SleepWorker;

#[async_trait]
impl Worker for SleepWorker {
    fn name(&self) -> &str {
        "sleep"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    async fn run(&self, job: &Arc<Job>) -> Result<Value> {
        let duration_ms = job
            .params()
            .get("duration_ms")
            .and_then(Value::as_u64)
            .unwrap_or(1000);
        let steps = duration_ms.div_ceil(1000).max(1);

        job.progressed(0, steps);
        let mut remaining = duration_ms;
        for step in 1..=steps {
            let chunk = remaining.min(1000);
            tokio::time::sleep(Duration::from_millis(chunk)).await;
            remaining -= chunk;
            job.progressed(step, steps);
        }

        Ok(json!({ "slept_ms": duration_ms }))
    }

    async fn cancel(&self, job: &Arc<Job>) -> Result<()> {
        tracing::debug!(job_id = job.id(), "sleep interrupted; nothing to release");
        Ok(())
    }
}
