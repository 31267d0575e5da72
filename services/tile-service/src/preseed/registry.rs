//! In-process job table.

use chrono::{Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use tile_common::{TileError, TileResult};

use super::job::{JobStatus, PreseedJob};

struct JobEntry {
    job: PreseedJob,
    cancel: CancellationToken,
}

/// Map from job id to job state. Finished jobs are kept for inspection up
/// to a count and an age limit, applied when new jobs are submitted.
pub struct JobRegistry {
    jobs: RwLock<HashMap<Uuid, JobEntry>>,
    retention_count: usize,
    retention: Duration,
}

impl JobRegistry {
    pub fn new(retention_count: usize, retention_hours: u64) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            retention_count,
            retention: Duration::hours(retention_hours.min(i64::MAX as u64) as i64),
        }
    }

    /// Register a job and return its cancellation token.
    pub async fn insert(&self, job: PreseedJob) -> CancellationToken {
        let cancel = CancellationToken::new();
        let mut jobs = self.jobs.write().await;
        prune(&mut jobs, self.retention_count, self.retention);
        jobs.insert(
            job.id,
            JobEntry {
                job,
                cancel: cancel.clone(),
            },
        );
        cancel
    }

    pub async fn get(&self, id: Uuid) -> Option<PreseedJob> {
        self.jobs.read().await.get(&id).map(|e| e.job.clone())
    }

    /// All known jobs, oldest first.
    pub async fn list(&self) -> Vec<PreseedJob> {
        let mut jobs: Vec<PreseedJob> = self
            .jobs
            .read()
            .await
            .values()
            .map(|e| e.job.clone())
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    /// Apply `f` to a job that has not finished yet. Returns false when the
    /// job is unknown or already terminal.
    pub async fn update<F>(&self, id: Uuid, f: F) -> bool
    where
        F: FnOnce(&mut PreseedJob),
    {
        match self.jobs.write().await.get_mut(&id) {
            Some(entry) if !entry.job.is_terminal() => {
                f(&mut entry.job);
                true
            }
            _ => false,
        }
    }

    /// Move a job into a terminal state unless it is already in one.
    pub async fn finish(&self, id: Uuid, status: JobStatus, error: Option<String>) -> bool {
        self.update(id, |job| {
            job.status = status;
            job.error = error;
            job.completed_at = Some(Utc::now());
        })
        .await
    }

    /// Request cancellation.
    ///
    /// A queued job is marked `Cancelled` at once; a running job stops at its
    /// next cancellation check. Cancelling a finished job changes nothing.
    pub async fn cancel(&self, id: Uuid) -> TileResult<PreseedJob> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs
            .get_mut(&id)
            .ok_or_else(|| TileError::NotFound(format!("preseed job {}", id)))?;

        if !entry.job.is_terminal() {
            entry.cancel.cancel();
            if entry.job.status == JobStatus::Queued {
                entry.job.status = JobStatus::Cancelled;
                entry.job.completed_at = Some(Utc::now());
            }
            info!(job_id = %id, status = ?entry.job.status, "Preseed job cancellation requested");
        }
        Ok(entry.job.clone())
    }

    /// Cancel every unfinished job.
    pub async fn cancel_all(&self) {
        for entry in self.jobs.read().await.values() {
            entry.cancel.cancel();
        }
    }
}

fn prune(jobs: &mut HashMap<Uuid, JobEntry>, keep: usize, max_age: Duration) {
    let cutoff = Utc::now() - max_age;
    let before = jobs.len();
    jobs.retain(|_, e| {
        !(e.job.is_terminal() && e.job.completed_at.map_or(false, |t| t < cutoff))
    });

    let mut finished: Vec<_> = jobs
        .values()
        .filter(|e| e.job.is_terminal())
        .map(|e| (e.job.completed_at, e.job.id))
        .collect();
    if finished.len() > keep {
        finished.sort();
        let excess = finished.len() - keep;
        for (_, id) in finished.into_iter().take(excess) {
            jobs.remove(&id);
        }
    }

    let removed = before - jobs.len();
    if removed > 0 {
        debug!(removed = removed, "Pruned finished preseed jobs");
    }
}
