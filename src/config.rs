//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::master::protocol::JobId;

/// Where the master lives and which paths its API exposes.
///
/// Path templates carry `:serverId` / `:jobId` tokens that are substituted
/// per request.
#[derive(Debug, Clone)]
pub struct MasterConfig {
    /// Base URL of the master, e.g. `https://master.example.com`.
    pub host: String,
    /// Template for agent-level status reports.
    pub server_status_path: String,
    /// Template for per-job status reports.
    pub job_status_path: String,
    /// Template for the "give me work" request.
    pub next_job_path: String,
}

impl MasterConfig {
    pub fn server_status_for(&self, server_id: &str) -> String {
        self.server_status_path.replace(":serverId", server_id)
    }

    pub fn job_status_for(&self, job_id: JobId) -> String {
        self.job_status_path.replace(":jobId", &job_id.to_string())
    }

    pub fn next_job_for(&self, server_id: &str) -> String {
        self.next_job_path.replace(":serverId", server_id)
    }
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:3000".to_owned(),
            server_status_path: "/servers/:serverId/status".to_owned(),
            job_status_path: "/jobs/:jobId/status".to_owned(),
            next_job_path: "/servers/:serverId/next-job".to_owned(),
        }
    }
}

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Agent name for identification.
    pub name: String,
    /// Identity the master knows this agent by.
    pub server_id: String,
    /// Credential sent with every request.
    pub password: SecretString,
    /// Master endpoint description.
    pub master: MasterConfig,
    /// Directory holding undelivered job-status files.
    pub jobs_dir: PathBuf,
    /// Delay between empty-poll retries.
    pub job_interval: Duration,
    /// Delay between periodic job progress reports.
    pub message_interval: Duration,
    /// Delay between connect attempts.
    pub connect_interval: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "worker-agent".to_owned(),
            server_id: String::new(),
            password: SecretString::from(String::new()),
            master: MasterConfig::default(),
            jobs_dir: PathBuf::from("./jobs"),
            job_interval: Duration::from_secs(30),
            message_interval: Duration::from_secs(10),
            connect_interval: Duration::from_secs(10),
        }
    }
}

impl AgentConfig {
    /// Load configuration from `WORKER_AGENT_*` environment variables.
    ///
    /// `WORKER_AGENT_SERVER_ID`, `WORKER_AGENT_PASSWORD` and
    /// `WORKER_AGENT_MASTER_HOST` are required; everything else falls back to
    /// the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let require = |key: &str| {
            lookup(key)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar(key.to_owned()))
        };
        let interval = |key: &str, default: Duration| match lookup(key) {
            None => Ok(default),
            Some(raw) => raw
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|err| ConfigError::InvalidValue {
                    key: key.to_owned(),
                    message: err.to_string(),
                }),
        };

        let defaults = Self::default();
        let master_defaults = MasterConfig::default();

        Ok(Self {
            name: lookup("WORKER_AGENT_NAME").unwrap_or(defaults.name),
            server_id: require("WORKER_AGENT_SERVER_ID")?,
            password: SecretString::from(require("WORKER_AGENT_PASSWORD")?),
            master: MasterConfig {
                host: require("WORKER_AGENT_MASTER_HOST")?,
                server_status_path: lookup("WORKER_AGENT_SERVER_STATUS_PATH")
                    .unwrap_or(master_defaults.server_status_path),
                job_status_path: lookup("WORKER_AGENT_JOB_STATUS_PATH")
                    .unwrap_or(master_defaults.job_status_path),
                next_job_path: lookup("WORKER_AGENT_NEXT_JOB_PATH")
                    .unwrap_or(master_defaults.next_job_path),
            },
            jobs_dir: lookup("WORKER_AGENT_JOBS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.jobs_dir),
            job_interval: interval("WORKER_AGENT_JOB_INTERVAL_MS", defaults.job_interval)?,
            message_interval: interval(
                "WORKER_AGENT_MESSAGE_INTERVAL_MS",
                defaults.message_interval,
            )?,
            connect_interval: interval(
                "WORKER_AGENT_CONNECT_INTERVAL_MS",
                defaults.connect_interval,
            )?,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn path_templates_substitute_ids() {
        let master = MasterConfig::default();
        assert_eq!(master.server_status_for("agent-1"), "/servers/agent-1/status");
        assert_eq!(master.job_status_for(42), "/jobs/42/status");
        assert_eq!(master.next_job_for("agent-1"), "/servers/agent-1/next-job");
    }

    #[test]
    fn from_lookup_requires_identity() {
        let env = vars(&[("WORKER_AGENT_SERVER_ID", "agent-1")]);
        let err = AgentConfig::from_lookup(|k| env.get(k).cloned()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref key) if key == "WORKER_AGENT_PASSWORD"));
    }

    #[test]
    fn from_lookup_applies_defaults() {
        let env = vars(&[
            ("WORKER_AGENT_SERVER_ID", "agent-1"),
            ("WORKER_AGENT_PASSWORD", "hunter2"),
            ("WORKER_AGENT_MASTER_HOST", "http://master:9000"),
        ]);
        let config = AgentConfig::from_lookup(|k| env.get(k).cloned()).unwrap();
        assert_eq!(config.server_id, "agent-1");
        assert_eq!(config.master.host, "http://master:9000");
        assert_eq!(config.job_interval, Duration::from_secs(30));
        assert_eq!(config.message_interval, Duration::from_secs(10));
        assert_eq!(config.connect_interval, Duration::from_secs(10));
        assert_eq!(config.jobs_dir, PathBuf::from("./jobs"));
    }

    #[test]
    fn from_lookup_parses_intervals() {
        let env = vars(&[
            ("WORKER_AGENT_SERVER_ID", "agent-1"),
            ("WORKER_AGENT_PASSWORD", "hunter2"),
            ("WORKER_AGENT_MASTER_HOST", "http://master:9000"),
            ("WORKER_AGENT_JOB_INTERVAL_MS", "250"),
        ]);
        let config = AgentConfig::from_lookup(|k| env.get(k).cloned()).unwrap();
        assert_eq!(config.job_interval, Duration::from_millis(250));
    }

    #[test]
    fn from_lookup_rejects_bad_interval() {
        let env = vars(&[
            ("WORKER_AGENT_SERVER_ID", "agent-1"),
            ("WORKER_AGENT_PASSWORD", "hunter2"),
            ("WORKER_AGENT_MASTER_HOST", "http://master:9000"),
            ("WORKER_AGENT_JOB_INTERVAL_MS", "soon"),
        ]);
        let err = AgentConfig::from_lookup(|k| env.get(k).cloned()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. }
            if key == "WORKER_AGENT_JOB_INTERVAL_MS"));
    }
}
