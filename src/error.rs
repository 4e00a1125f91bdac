//! Error types for the worker agent.

use std::path::PathBuf;

use serde::Serialize;
use serde_json::{Map, Value};

/// Top-level error type for the agent.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Transport-level failures talking to the master. Always retryable by
/// reconnecting.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("not connected to master server")]
    NotConnected,

    #[error("could not reach master server: {reason}")]
    Request { reason: String },

    #[error("bad response from master server: {reason}")]
    BadResponse { reason: String },
}

/// The master accepted the request but rejected it semantically.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("authentication lost (master redirected to login)")]
    LoginExpired,

    #[error("master reported an error: {message}")]
    Server { message: String },

    #[error("master rejected the request: {errors}")]
    Validation { errors: Value },
}

/// Worker misconfiguration — fatal to the affected job only.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("no worker with name '{name}'")]
    NotFound { name: String },
}

/// Job-level signals.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("job cancelled")]
    Cancelled,
}

/// Disk cache failures. Escalated because once the cache is unwritable no
/// delivery path remains for the status report.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("could not encode cached status: {source}")]
    Encode { source: serde_json::Error },

    #[error("could not write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("could not decode {path}: {source}")]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("could not remove {path}: {source}")]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Serializable error report with a fixed shape, used in `Failed` payloads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

impl Error {
    /// Stable tag identifying the error family.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Connection(_) => "connection",
            Error::Api(_) => "api",
            Error::Worker(_) => "worker",
            Error::Job(JobError::Cancelled) => "job_cancelled",
            Error::Cache(_) => "cache",
        }
    }

    /// Whether this is a cooperative cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Job(JobError::Cancelled))
    }

    /// Whether the disk cache may stand in for delivery of a status report.
    /// Only known network/API failure modes qualify.
    pub fn is_delivery_failure(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Api(_))
    }

    /// Build the `{kind, message, cause, details}` payload for reporting this
    /// error to the master.
    pub fn report(&self) -> ErrorReport {
        let mut details = Map::new();
        if let Error::Api(ApiError::Validation { errors }) = self {
            details.insert("errors".to_owned(), errors.clone());
        }

        let cause = std::error::Error::source(self)
            .and_then(std::error::Error::source)
            .map(|inner| inner.to_string());

        ErrorReport {
            kind: self.kind().to_owned(),
            message: self.to_string(),
            cause,
            details,
        }
    }
}

/// Result type alias for the agent.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn cancelled_is_distinguished() {
        let err = Error::Job(JobError::Cancelled);
        assert!(err.is_cancelled());
        assert_eq!(err.kind(), "job_cancelled");
        assert!(!Error::Worker(WorkerError::NotFound {
            name: "x".to_owned()
        })
        .is_cancelled());
    }

    #[test]
    fn delivery_failures_cover_connection_and_api_only() {
        assert!(Error::Connection(ConnectionError::NotConnected).is_delivery_failure());
        assert!(Error::Api(ApiError::LoginExpired).is_delivery_failure());
        assert!(
            !Error::Worker(WorkerError::NotFound {
                name: "x".to_owned()
            })
            .is_delivery_failure()
        );
        assert!(!Error::Job(JobError::Cancelled).is_delivery_failure());
    }

    #[test]
    fn report_has_fixed_shape() {
        let err = Error::Connection(ConnectionError::Request {
            reason: "refused".to_owned(),
        });
        let report = err.report();
        assert_eq!(report.kind, "connection");
        assert!(report.message.contains("refused"));
        assert!(report.cause.is_none());
        assert!(report.details.is_empty());
    }

    #[test]
    fn validation_errors_land_in_details() {
        let err = Error::Api(ApiError::Validation {
            errors: json!({"field": "required"}),
        });
        let report = err.report();
        assert_eq!(report.kind, "api");
        assert_eq!(report.details["errors"], json!({"field": "required"}));

        let value = serde_json::to_value(&report).unwrap();
        assert!(value.get("cause").is_none());
        assert_eq!(value["details"]["errors"]["field"], "required");
    }

    #[test]
    fn cache_report_carries_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = Error::Cache(CacheError::Write {
            path: PathBuf::from("/tmp/1.json"),
            source: io,
        });
        let report = err.report();
        assert_eq!(report.kind, "cache");
        assert_eq!(report.cause.as_deref(), Some("denied"));
    }
}
