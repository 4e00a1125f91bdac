//! Host-application hook points.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// Startup metadata sent with the first `Online` handshake.
#[derive(Debug, Clone, Serialize)]
pub struct StartupInfo {
    pub startup: bool,
    pub version: String,
    pub workers: Vec<WorkerInfo>,
}

/// One registered worker, as announced to the master.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerInfo {
    pub code: String,
    pub version: String,
}

/// Optional callbacks invoked at documented points of the agent lifecycle.
#[async_trait]
pub trait AgentHooks: Send + Sync {
    /// Runs on the first connect, before the `Online` handshake. An error
    /// aborts the connect attempt and drives the retry loop.
    async fn on_connecting(&self, _info: &StartupInfo) -> Result<()> {
        Ok(())
    }

    /// Runs once the agent is online.
    async fn on_connected(&self) -> Result<()> {
        Ok(())
    }

    /// Observes every non-empty poll result before the job starts. Errors
    /// are logged, never fatal to the poll loop.
    async fn on_ping(&self, _result: &Value) -> Result<()> {
        Ok(())
    }
}

/// Hook implementation that does nothing.
pub struct NoHooks;

#[async_trait]
impl AgentHooks for NoHooks {}
