//! Wire protocol: status codes, response envelope, job descriptor.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Job identifier assigned by the master.
pub type JobId = u64;

/// Agent-level status reported to the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerStatus {
    Connecting,
    Reconnecting,
    Online,
    Stopping,
    Offline,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "Connecting",
            Self::Reconnecting => "Reconnecting",
            Self::Online => "Online",
            Self::Stopping => "Stopping",
            Self::Offline => "Offline",
        }
    }
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-job status reported to the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Processing,
    Done,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "Processing",
            Self::Done => "Done",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        }
    }

    /// Whether this status ends the job's lifecycle.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Processing)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response envelope returned by every master endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default, rename = "formErrors")]
    pub form_errors: Option<Value>,
    #[serde(default)]
    pub redirect: Option<String>,
}

/// Job descriptor handed out by the master: an id, a worker selector, and
/// opaque parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct JobDescriptor {
    #[serde(rename = "jobId")]
    pub job_id: JobId,
    pub worker: String,
    #[serde(flatten)]
    pub params: serde_json::Map<String, Value>,
}
