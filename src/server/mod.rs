//! Connection manager and polling loop.
//!
//! The `Server` owns the agent's connection state machine. Connect attempts
//! take the connect lock exclusively; ordinary status sends pass through it
//! in shared mode, so a status message can never be transmitted against a
//! half-established session. The polling loop is single-flight: a dedicated
//! lock guarantees at most one outstanding "next job" request, no matter how
//! many completion and fetch-ahead events race to trigger one.

pub mod hooks;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use serde_json::{Value, json};

use crate::cache::{CachedStatus, JobCache};
use crate::config::AgentConfig;
use crate::error::{ConnectionError, Result};
use crate::job::Job;
use crate::master::client::MasterClient;
use crate::master::protocol::{JobDescriptor, JobId, JobStatus, ServerStatus};
use crate::sync::{SerialLock, Timer, WaitMap};
use crate::workers::WorkerRegistry;

pub use hooks::{AgentHooks, NoHooks, StartupInfo, WorkerInfo};

/// Key for the connect-retry backoff wait.
const CONNECT_WAIT: &str = "connect";

/// The worker agent: registers with a master, polls it for jobs, runs them,
/// and reports status back.
pub struct Server {
    config: AgentConfig,
    client: MasterClient,
    registry: Arc<WorkerRegistry>,
    hooks: Arc<dyn AgentHooks>,
    cache: JobCache,
    jobs: tokio::sync::RwLock<HashMap<JobId, Arc<Job>>>,
    connected: AtomicBool,
    started: AtomicBool,
    stopped: AtomicBool,
    connect_lock: SerialLock,
    poll_lock: SerialLock,
    poll_timer: Timer,
    waits: WaitMap,
}

impl Server {
    /// Build an agent with the default (no-op) hooks.
    pub fn with_registry(config: AgentConfig, registry: WorkerRegistry) -> Result<Arc<Self>> {
        Self::with_hooks(config, registry, Arc::new(NoHooks))
    }

    pub fn with_hooks(
        config: AgentConfig,
        registry: WorkerRegistry,
        hooks: Arc<dyn AgentHooks>,
    ) -> Result<Arc<Self>> {
        let client = MasterClient::new(&config)?;
        let cache = JobCache::new(&config.jobs_dir);

        Ok(Arc::new(Self {
            config,
            client,
            registry: Arc::new(registry),
            hooks,
            cache,
            jobs: tokio::sync::RwLock::new(HashMap::new()),
            connected: AtomicBool::new(false),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            connect_lock: SerialLock::new(),
            poll_lock: SerialLock::new(),
            poll_timer: Timer::new(),
            waits: WaitMap::new(),
        }))
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub(crate) fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Ids of currently registered jobs, sorted.
    pub async fn active_jobs(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.jobs.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    // ── Connection state machine ────────────────────────────────────────

    /// Start the agent: connect to the master and begin polling. Resolves
    /// once connected, or once the agent is stopped before ever connecting.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.cache.ensure_dir().await?;
        tracing::info!(server_id = %self.config.server_id, "starting agent");
        self.connect().await;
        Ok(())
    }

    /// Connect-retry loop: attempts spaced by `connect_interval`, looping
    /// until connected or stopped.
    pub(crate) async fn connect(self: &Arc<Self>) {
        while !self.is_connected() && !self.is_stopped() {
            let attempt = self
                .connect_lock
                .lock(|| async {
                    // State may have moved while queued for the lock.
                    if self.is_connected() || self.is_stopped() {
                        return Ok(());
                    }
                    self.connect_once().await
                })
                .await;

            if let Err(err) = attempt {
                if self.is_stopped() {
                    break;
                }
                tracing::warn!(error = %err, "connect attempt failed; retrying");
                self.waits
                    .wait(CONNECT_WAIT, self.config.connect_interval)
                    .await;
            }
        }
    }

    /// One connect attempt: handshake, cache flush, online announcement,
    /// poll kick-off. Any failure aborts the attempt.
    async fn connect_once(self: &Arc<Self>) -> Result<()> {
        let reconnecting = self.is_started();
        let status = if reconnecting {
            ServerStatus::Reconnecting
        } else {
            ServerStatus::Connecting
        };
        tracing::info!(status = %status, "connecting to master");
        self.send_server_status(status, Value::Null).await?;

        self.flush_job_cache().await?;

        let payload = if reconnecting {
            json!({})
        } else {
            let info = StartupInfo {
                startup: true,
                version: env!("CARGO_PKG_VERSION").to_owned(),
                workers: self
                    .registry
                    .manifest()
                    .into_iter()
                    .map(|(code, version)| WorkerInfo { code, version })
                    .collect(),
            };
            self.hooks.on_connecting(&info).await?;
            serde_json::to_value(&info).unwrap_or(Value::Null)
        };
        self.send_server_status(ServerStatus::Online, payload).await?;

        self.connected.store(true, Ordering::SeqCst);
        self.started.store(true, Ordering::SeqCst);
        tracing::info!("agent online");

        if let Err(err) = self.hooks.on_connected().await {
            tracing::warn!(error = %err, "on_connected hook failed");
        }

        self.next_job();
        Ok(())
    }

    /// Replay every cached job status, deleting each file only after
    /// confirmed delivery.
    async fn flush_job_cache(self: &Arc<Self>) -> Result<()> {
        let pending = self.cache.pending().await?;
        if pending.is_empty() {
            return Ok(());
        }

        tracing::info!(count = pending.len(), "flushing cached job statuses");
        for (job_id, entry) in pending {
            self.send_job_status(job_id, entry.status, entry.data, true)
                .await?;
            self.cache.remove(job_id).await?;
        }
        Ok(())
    }

    /// Mark the connection lost and begin reconnecting. No-op while already
    /// disconnected (in particular during a connect attempt).
    pub(crate) fn disconnected(self: &Arc<Self>) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::warn!("lost connection to master");
        self.poll_timer.clear();

        let server = Arc::clone(self);
        tokio::spawn(async move {
            server.connect().await;
        });
    }

    /// Stop sequence: halt polling and reconnecting, drain in-flight work,
    /// cancel active jobs, and notify the master best-effort.
    pub async fn stop(self: &Arc<Self>, reason: &str) {
        tracing::warn!(reason, "stopping agent");
        self.stopped.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);

        self.poll_timer.clear();
        self.waits.cancel_all();

        // Wait for any in-flight connect attempt or queued send to settle.
        self.connect_lock
            .lock(|| async {
                self.connected.store(false, Ordering::SeqCst);
            })
            .await;

        if let Err(err) = self
            .send_server_status(ServerStatus::Stopping, json!({"reason": reason}))
            .await
        {
            tracing::debug!(error = %err, "stopping notice not delivered");
        }

        // Cancel active jobs and wait for their terminal statuses to settle
        // (delivered or cached) before announcing offline.
        let jobs: Vec<Arc<Job>> = self.jobs.read().await.values().cloned().collect();
        join_all(jobs.iter().map(|job| job.cancel())).await;
        join_all(jobs.iter().map(|job| job.wait_finished())).await;

        if let Err(err) = self.send_server_status(ServerStatus::Offline, Value::Null).await {
            tracing::debug!(error = %err, "offline notice not delivered");
        }

        tracing::info!("agent stopped");
    }

    // ── Status delivery ─────────────────────────────────────────────────

    /// Send an agent-level status. Always attempts delivery, even while
    /// disconnected.
    pub async fn send_server_status(
        self: &Arc<Self>,
        status: ServerStatus,
        data: Value,
    ) -> Result<()> {
        let path = self.config.master.server_status_for(&self.config.server_id);
        self.send_message(&path, status_fields(status.as_str(), &data), true)
            .await
            .map(|_| ())
    }

    /// Send a per-job status. Use [`record_job_status`](Self::record_job_status)
    /// for durable delivery.
    async fn send_job_status(
        self: &Arc<Self>,
        job_id: JobId,
        status: JobStatus,
        data: Value,
        override_offline: bool,
    ) -> Result<()> {
        let path = self.config.master.job_status_for(job_id);
        self.send_message(&path, status_fields(status.as_str(), &data), override_offline)
            .await
            .map(|_| ())
    }

    /// POST `fields` to the master. Fails fast with a Connection error while
    /// offline unless `override_offline` is set; any send failure flips the
    /// agent to disconnected.
    pub(crate) async fn send_message(
        self: &Arc<Self>,
        path: &str,
        fields: Vec<(&'static str, String)>,
        override_offline: bool,
    ) -> Result<Option<Value>> {
        if !override_offline && !self.is_connected() {
            return Err(ConnectionError::NotConnected.into());
        }

        match self.client.post(path, &fields).await {
            Ok(data) => Ok(data),
            Err(err) => {
                self.disconnected();
                Err(err)
            }
        }
    }

    /// Durable job-status entry point: attempt delivery, fall back to the
    /// disk cache on connection/API failure. Runs in the connect lock's
    /// shared mode so it never races an in-progress reconnect attempt.
    pub async fn record_job_status(
        self: &Arc<Self>,
        job_id: JobId,
        status: JobStatus,
        data: Value,
    ) -> Result<()> {
        self.connect_lock
            .run(|| async {
                match self.send_job_status(job_id, status, data.clone(), false).await {
                    Ok(()) => Ok(()),
                    Err(err) if err.is_delivery_failure() => {
                        tracing::warn!(
                            job_id,
                            error = %err,
                            "status delivery failed; caching to disk"
                        );
                        self.cache.store(job_id, &CachedStatus { status, data }).await
                    }
                    // Unexpected failure modes are not covered by the cache.
                    Err(err) => Err(err),
                }
            })
            .await
    }

    // ── Polling loop ────────────────────────────────────────────────────

    /// Ask the master for work. Fire-and-forget and reentrancy-safe: at most
    /// one "next job" request is ever outstanding.
    pub(crate) fn next_job(self: &Arc<Self>) {
        let server = Arc::clone(self);
        tokio::spawn(async move {
            server.poll().await;
        });
    }

    async fn poll(self: Arc<Self>) {
        self.poll_timer.clear();
        if !self.is_connected() {
            // The connect sequence re-triggers polling once online.
            return;
        }
        let Some(guard) = self.poll_lock.try_lock() else {
            return;
        };

        tracing::debug!("requesting next job");
        let path = self.config.master.next_job_for(&self.config.server_id);
        let result = match self.send_message(&path, Vec::new(), false).await {
            Ok(data) => data,
            Err(err) => {
                tracing::warn!(error = %err, "failed to get next job");
                None
            }
        };

        if let Some(ref result) = result {
            if let Err(err) = self.hooks.on_ping(result).await {
                tracing::warn!(error = %err, "on_ping hook failed");
            }
        }

        // Release before starting the job so the fetch-ahead poll can run.
        drop(guard);

        let descriptor = result.and_then(|data| match serde_json::from_value::<JobDescriptor>(data)
        {
            Ok(descriptor) => Some(descriptor),
            Err(err) => {
                tracing::warn!(error = %err, "master returned an invalid job descriptor");
                None
            }
        });

        let Some(descriptor) = descriptor else {
            tracing::debug!("no jobs available");
            let server = Arc::clone(&self);
            self.poll_timer
                .schedule(self.config.job_interval, move || async move {
                    server.next_job();
                });
            return;
        };

        tracing::info!(
            job_id = descriptor.job_id,
            worker = %descriptor.worker,
            "job received"
        );

        let job = self.start_job(descriptor).await;

        // Fetch another job right away; this job's completion below triggers
        // a further poll so finished work is always replaced.
        self.next_job();
        job.start().await;
        self.next_job();
    }

    /// Register a job, ready to start.
    pub(crate) async fn start_job(self: &Arc<Self>, descriptor: JobDescriptor) -> Arc<Job> {
        let job = Job::new(descriptor, self);
        self.jobs.write().await.insert(job.id(), Arc::clone(&job));
        job
    }

    /// Deregister a finished job.
    pub(crate) async fn finished_job(&self, job_id: JobId) {
        self.jobs.write().await.remove(&job_id);
    }
}

fn status_fields(status: &str, data: &Value) -> Vec<(&'static str, String)> {
    let mut fields = vec![("status", status.to_owned())];
    if !data.is_null() {
        fields.push(("data", data.to_string()));
    }
    fields
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    fn offline_config(jobs_dir: &std::path::Path) -> AgentConfig {
        AgentConfig {
            server_id: "agent-test".to_owned(),
            master: crate::config::MasterConfig {
                // Nothing listens here; sends fail at the transport level.
                host: "http://127.0.0.1:9".to_owned(),
                ..crate::config::MasterConfig::default()
            },
            jobs_dir: jobs_dir.to_path_buf(),
            connect_interval: Duration::from_millis(10),
            ..AgentConfig::default()
        }
    }

    #[test]
    fn status_fields_omit_null_data() {
        let fields = status_fields("Connecting", &Value::Null);
        assert_eq!(fields, vec![("status", "Connecting".to_owned())]);

        let fields = status_fields("Processing", &json!({"progress": {}}));
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[1], ("data", "{\"progress\":{}}".to_owned()));
    }

    #[tokio::test]
    async fn send_message_fails_fast_while_offline() {
        let dir = tempfile::tempdir().unwrap();
        let server =
            Server::with_registry(offline_config(dir.path()), WorkerRegistry::new()).unwrap();

        let err = server
            .send_message("/anywhere", Vec::new(), false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Connection(ConnectionError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn record_job_status_caches_on_delivery_failure() {
        let dir = tempfile::tempdir().unwrap();
        let server =
            Server::with_registry(offline_config(dir.path()), WorkerRegistry::new()).unwrap();

        server
            .record_job_status(11, JobStatus::Done, json!({"ok": true}))
            .await
            .unwrap();

        let pending = server.cache.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0, 11);
        assert_eq!(pending[0].1.status, JobStatus::Done);
        assert_eq!(pending[0].1.data, json!({"ok": true}));
    }

    #[tokio::test]
    async fn stop_without_ever_connecting_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let server =
            Server::with_registry(offline_config(dir.path()), WorkerRegistry::new()).unwrap();

        server.stop("SIGTERM").await;
        assert!(server.is_stopped());
        assert!(!server.is_connected());
    }

    #[tokio::test]
    async fn stop_interrupts_the_connect_retry_loop() {
        let dir = tempfile::tempdir().unwrap();
        let config = AgentConfig {
            connect_interval: Duration::from_secs(3600),
            ..offline_config(dir.path())
        };
        let server = Server::with_registry(config, WorkerRegistry::new()).unwrap();

        let starter = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.start().await })
        };
        // Let the first connect attempt fail and enter the backoff wait.
        tokio::time::sleep(Duration::from_millis(100)).await;

        server.stop("SIGINT").await;
        tokio::time::timeout(Duration::from_secs(2), starter)
            .await
            .expect("connect loop did not stop")
            .unwrap()
            .unwrap();
    }
}
