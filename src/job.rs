//! Job lifecycle controller.
//!
//! A `Job` drives one unit of remote work: it resolves the named worker,
//! reports progress periodically, finalizes with exactly one terminal
//! status, and supports cooperative cancellation. All of its status
//! messages are serialized through a private lock so the master never sees
//! them out of order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use tokio::sync::{Notify, watch};

use crate::error::{Error, JobError, Result, WorkerError};
use crate::master::protocol::{JobDescriptor, JobId, JobStatus};
use crate::server::Server;
use crate::sync::{SerialLock, Timer};
use crate::workers::Worker;

/// Progress counters reported by the worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub done: Option<u64>,
    pub total: Option<u64>,
}

impl Progress {
    /// Wire payload: `{done, total, percent}` once a total is known, `{}`
    /// before.
    fn to_payload(self) -> Value {
        match (self.done, self.total) {
            (done, Some(total)) if total > 0 => {
                let done = done.unwrap_or(0);
                json!({ "done": done, "total": total, "percent": done * 100 / total })
            }
            _ => json!({}),
        }
    }
}

/// One unit of remote work being executed locally.
pub struct Job {
    id: JobId,
    worker_name: String,
    params: Map<String, Value>,
    server: Weak<Server>,
    worker: Option<Arc<dyn Worker>>,
    progress: Mutex<Progress>,
    complete: AtomicBool,
    cancelled: AtomicBool,
    cancel_signal: Notify,
    finished_tx: watch::Sender<bool>,
    lock: SerialLock,
    timer: Timer,
    created_at: DateTime<Utc>,
    started_at: OnceLock<DateTime<Utc>>,
    completed_at: OnceLock<DateTime<Utc>>,
}

impl Job {
    pub(crate) fn new(descriptor: JobDescriptor, server: &Arc<Server>) -> Arc<Self> {
        let worker = server.registry().get(&descriptor.worker);
        let (finished_tx, _) = watch::channel(false);

        Arc::new(Self {
            id: descriptor.job_id,
            worker_name: descriptor.worker,
            params: descriptor.params,
            server: Arc::downgrade(server),
            worker,
            progress: Mutex::new(Progress::default()),
            complete: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            cancel_signal: Notify::new(),
            finished_tx,
            lock: SerialLock::new(),
            timer: Timer::new(),
            created_at: Utc::now(),
            started_at: OnceLock::new(),
            completed_at: OnceLock::new(),
        })
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn worker_name(&self) -> &str {
        &self.worker_name
    }

    /// Opaque parameters handed down by the master (minus id and worker
    /// selector).
    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    pub fn progress(&self) -> Progress {
        *self.progress_slot()
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Drive the job to a terminal status. Never fails and never panics;
    /// every error is converted into a `Failed`/`Cancelled` report so the
    /// polling loop can await every job unconditionally.
    pub async fn start(self: &Arc<Self>) {
        let _ = self.started_at.set(Utc::now());
        tracing::info!(job_id = self.id, worker = %self.worker_name, "starting job");

        let outcome = tokio::select! {
            result = self.run() => result,
            _ = self.cancel_signal.notified() => Err(Error::Job(JobError::Cancelled)),
        };

        let finished = match outcome {
            Ok(result) => self.done(result).await,
            Err(err) => {
                if !err.is_cancelled() {
                    tracing::warn!(job_id = self.id, error = %err, "job failed");
                }
                self.failed(err).await
            }
        };

        if let Err(err) = finished {
            // The terminal status could neither be sent nor cached; there is
            // no delivery path left for it.
            tracing::error!(job_id = self.id, error = %err, "failed to record terminal job status");
        }
    }

    /// Resolve the worker and run it, with progress reporting armed.
    async fn run(self: &Arc<Self>) -> Result<Value> {
        let Some(worker) = self.worker.clone() else {
            return Err(WorkerError::NotFound {
                name: self.worker_name.clone(),
            }
            .into());
        };

        // Initial progress report; reschedules itself until the job is done.
        self.spawn_progress_report();

        worker.run(self).await
    }

    /// Record progress from the worker. The first time a total becomes
    /// known, a progress report goes out immediately instead of waiting for
    /// the next periodic tick.
    pub fn progressed(self: &Arc<Self>, done: u64, total: u64) {
        let first = {
            let mut progress = self.progress_slot();
            let first = progress.total.is_none() && total > 0;
            progress.done = Some(done);
            progress.total = Some(total);
            first
        };

        if first {
            self.spawn_progress_report();
        }
    }

    fn spawn_progress_report(self: &Arc<Self>) {
        let job = Arc::clone(self);
        tokio::spawn(async move {
            job.send_progress().await;
        });
    }

    /// Send the current progress and re-arm the periodic report.
    async fn send_progress(self: &Arc<Self>) {
        if self.is_complete() {
            return;
        }
        self.timer.clear();

        let sent = self
            .lock
            .lock(|| async {
                // A terminal status may have been recorded while this report
                // was queued on the lock; it must be the last word.
                if self.is_complete() {
                    return Ok(());
                }
                let payload = json!({ "progress": self.progress().to_payload() });
                self.record_status(JobStatus::Processing, payload).await
            })
            .await;
        if let Err(err) = sent {
            tracing::error!(job_id = self.id, error = %err, "failed to record job progress");
        }

        if self.is_complete() {
            return;
        }
        let Some(server) = self.server.upgrade() else {
            return;
        };
        let job = Arc::clone(self);
        self.timer
            .schedule(server.config().message_interval, move || async move {
                job.send_progress().await;
            });
    }

    /// Mark the job done and record the terminal status.
    async fn done(self: &Arc<Self>, result: Value) -> Result<()> {
        {
            let mut progress = self.progress_slot();
            progress.done = progress.total;
        }
        self.finished(JobStatus::Done, result).await
    }

    /// Record the failure, distinguishing cooperative cancellation.
    async fn failed(self: &Arc<Self>, err: Error) -> Result<()> {
        let status = if err.is_cancelled() {
            JobStatus::Cancelled
        } else {
            JobStatus::Failed
        };
        self.finished(status, json!({ "error": err.report() })).await
    }

    /// Idempotent terminal transition: exactly one terminal status is
    /// recorded and the job is deregistered exactly once. The job's
    /// exclusive lock keeps a racing progress tick from being sent after
    /// the terminal status.
    async fn finished(self: &Arc<Self>, status: JobStatus, data: Value) -> Result<()> {
        if self.complete.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self.completed_at.set(Utc::now());
        self.timer.clear();

        let recorded = self
            .lock
            .lock(|| async { self.record_status(status, data).await })
            .await;

        if let Some(server) = self.server.upgrade() {
            server.finished_job(self.id).await;
        }
        let _ = self.finished_tx.send(true);

        tracing::info!(
            job_id = self.id,
            status = %status,
            elapsed_ms = self.elapsed_ms(),
            "job finished"
        );
        recorded
    }

    /// Durable status record: delivery to the master with the disk cache as
    /// fallback.
    async fn record_status(&self, status: JobStatus, data: Value) -> Result<()> {
        tracing::debug!(job_id = self.id, status = %status, "recording job status");
        match self.server.upgrade() {
            Some(server) => server.record_job_status(self.id, status, data).await,
            // Server already torn down; nowhere left to report to.
            None => Ok(()),
        }
    }

    /// Cancel the job (idempotent). Invokes the worker's cancel hook, then
    /// interrupts the running execution with a cancellation signal, which
    /// `start` routes to the `Cancelled` terminal status.
    pub async fn cancel(self: &Arc<Self>) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(job_id = self.id, "cancelling job");

        if let Some(worker) = self.worker.clone() {
            if let Err(err) = worker.cancel(self).await {
                tracing::warn!(job_id = self.id, error = %err, "worker cancel hook failed");
            }
        }
        self.cancel_signal.notify_one();
    }

    /// Wait until the terminal status has been recorded.
    pub async fn wait_finished(&self) {
        let mut finished = self.finished_tx.subscribe();
        let _ = finished.wait_for(|done| *done).await;
    }

    fn elapsed_ms(&self) -> Option<i64> {
        let started = self.started_at.get()?;
        let completed = self.completed_at.get()?;
        Some(completed.signed_duration_since(*started).num_milliseconds())
    }

    fn progress_slot(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(|err| err.into_inner())
    }
}
