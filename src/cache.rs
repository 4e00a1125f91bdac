//! Disk-backed fallback store for undelivered job status reports.
//!
//! One `<jobId>.json` file per job. A file on disk means "not yet
//! delivered"; the flusher deletes a file only after confirmed delivery, so
//! a crash between the two steps re-sends rather than loses the report.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CacheError, Result};
use crate::master::protocol::{JobId, JobStatus};

/// A status report that could not be delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedStatus {
    pub status: JobStatus,
    pub data: Value,
}

/// Append-once-per-job file cache under a jobs directory.
pub struct JobCache {
    dir: PathBuf,
}

impl JobCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the cache directory if it does not exist yet.
    pub async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| CacheError::Write {
                path: self.dir.clone(),
                source,
            })?;
        Ok(())
    }

    /// Persist the pending status for a job, overwriting any previous entry.
    /// At most one entry exists per job id.
    pub async fn store(&self, job_id: JobId, entry: &CachedStatus) -> Result<()> {
        let path = self.path_for(job_id);
        let json = serde_json::to_vec(entry).map_err(|source| CacheError::Encode { source })?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|source| CacheError::Write { path, source })?;
        Ok(())
    }

    /// List pending entries, ordered by job id. Files that are not
    /// `<number>.json` are ignored.
    pub async fn pending(&self) -> Result<Vec<(JobId, CachedStatus)>> {
        let mut dir = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|source| CacheError::Read {
                path: self.dir.clone(),
                source,
            })?;

        let mut entries = Vec::new();
        loop {
            let entry = dir.next_entry().await.map_err(|source| CacheError::Read {
                path: self.dir.clone(),
                source,
            })?;
            let Some(entry) = entry else { break };

            let path = entry.path();
            let Some(job_id) = job_id_of(&path) else {
                continue;
            };

            let raw = tokio::fs::read(&path)
                .await
                .map_err(|source| CacheError::Read {
                    path: path.clone(),
                    source,
                })?;
            let cached: CachedStatus =
                serde_json::from_slice(&raw).map_err(|source| CacheError::Decode {
                    path: path.clone(),
                    source,
                })?;
            entries.push((job_id, cached));
        }

        entries.sort_by_key(|(job_id, _)| *job_id);
        Ok(entries)
    }

    /// Remove the entry for a delivered status.
    pub async fn remove(&self, job_id: JobId) -> Result<()> {
        let path = self.path_for(job_id);
        tokio::fs::remove_file(&path)
            .await
            .map_err(|source| CacheError::Remove { path, source })?;
        Ok(())
    }

    /// Whether a pending entry exists for the job.
    pub async fn contains(&self, job_id: JobId) -> bool {
        tokio::fs::try_exists(self.path_for(job_id))
            .await
            .unwrap_or(false)
    }

    fn path_for(&self, job_id: JobId) -> PathBuf {
        self.dir.join(format!("{job_id}.json"))
    }
}

fn job_id_of(path: &Path) -> Option<JobId> {
    if path.extension()?.to_str()? != "json" {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}
