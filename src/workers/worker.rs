//! Worker capability contract.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::job::Job;

/// A named handler for one kind of job.
///
/// `run` drives the job to completion; its return value becomes the `Done`
/// payload. `cancel` is invoked when the agent shuts down so the worker can
/// release external resources before execution is torn down.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Name the master uses to route jobs to this worker.
    fn name(&self) -> &str;

    /// Version reported in the startup handshake.
    fn version(&self) -> &str {
        "0.0.0"
    }

    /// Execute the job.
    async fn run(&self, job: &Arc<Job>) -> Result<Value>;

    /// Called before a running job is cancelled. Best-effort: errors are
    /// logged by the caller, never propagated.
    async fn cancel(&self, job: &Arc<Job>) -> Result<()> {
        tracing::warn!(
            job_id = job.id(),
            worker = self.name(),
            "worker has no cancel handler"
        );
        Ok(())
    }
}
