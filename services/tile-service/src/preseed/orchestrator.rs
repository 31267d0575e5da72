//! Bulk tile generation.
//!
//! A submitted job is queued and handed to a runner task. The runner
//! resolves every dataset and enumerates the tile ranges up front, so the
//! job's total is known when it switches to `Running`. Tiles are then
//! claimed in batches; within a batch at most `max_parallelism` tiles are
//! generated at once. Cancellation is checked before each batch and before
//! each tile. Tiles already generating see the job's token in their source
//! reads and may end early; the job reports `Cancelled` only after they
//! have all returned.

use metrics::counter;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use tile_common::{
    tile::MAX_ZOOM, TileCoordinate, TileError, TileMatrixSetId, TileRange, TileResult,
};

use super::job::{JobStatus, PreseedJob, PreseedRequest};
use super::registry::JobRegistry;
use crate::config::PreseedConfig;
use crate::state::TileService;
use crate::tiles::TilePlan;

/// Result of seeding a single tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeedOutcome {
    Generated,
    AlreadyCached,
}

/// Accepts preseed jobs and runs them in the background.
pub struct PreseedOrchestrator {
    service: Arc<TileService>,
    registry: Arc<JobRegistry>,
    config: PreseedConfig,
}

impl PreseedOrchestrator {
    pub fn new(service: Arc<TileService>, config: PreseedConfig) -> Self {
        let registry = Arc::new(JobRegistry::new(
            config.job_retention_count,
            config.job_retention_hours,
        ));
        Self {
            service,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Queue a job and start its runner. Parameter problems surface as the
    /// job moving to `Failed`, not as an error here.
    pub async fn submit(&self, request: PreseedRequest) -> Uuid {
        let job = PreseedJob::new(request);
        let id = job.id;
        info!(
            job_id = %id,
            datasets = ?job.request.dataset_ids,
            min_zoom = job.request.zoom_range.min_zoom,
            max_zoom = job.request.zoom_range.max_zoom,
            format = %job.request.format,
            "Preseed job submitted"
        );

        let request = job.request.clone();
        let cancel = self.registry.insert(job).await;
        let runner = JobRunner {
            id,
            request,
            service: self.service.clone(),
            registry: self.registry.clone(),
            config: self.config.clone(),
            cancel,
        };
        tokio::spawn(runner.run());
        counter!("preseed_jobs_submitted_total").increment(1);
        id
    }

    pub async fn status(&self, id: Uuid) -> TileResult<PreseedJob> {
        self.registry
            .get(id)
            .await
            .ok_or_else(|| TileError::NotFound(format!("preseed job {}", id)))
    }

    pub async fn cancel(&self, id: Uuid) -> TileResult<PreseedJob> {
        self.registry.cancel(id).await
    }

    pub async fn list(&self) -> Vec<PreseedJob> {
        self.registry.list().await
    }

    /// Ask every unfinished job to stop.
    pub async fn shutdown(&self) {
        self.registry.cancel_all().await;
    }
}

/// One dataset's share of a job at one zoom level.
struct WorkItem {
    plan: Arc<TilePlan>,
    range: TileRange,
}

struct JobRunner {
    id: Uuid,
    request: PreseedRequest,
    service: Arc<TileService>,
    registry: Arc<JobRegistry>,
    config: PreseedConfig,
    cancel: CancellationToken,
}

impl JobRunner {
    #[instrument(skip(self), fields(job_id = %self.id))]
    async fn run(self) {
        if self.cancel.is_cancelled() {
            return;
        }

        let work = match self.enumerate().await {
            Ok(work) => work,
            Err(e) => {
                warn!(error = %e, "Preseed job failed before start");
                counter!("preseed_jobs_total", "status" => "failed").increment(1);
                self.registry
                    .finish(self.id, JobStatus::Failed, Some(e.to_string()))
                    .await;
                return;
            }
        };

        let total: u64 = work.iter().map(|w| w.range.count()).sum();
        let started = self
            .registry
            .update(self.id, |job| {
                job.status = JobStatus::Running;
                job.progress.total_tiles = total;
                job.started_at = Some(chrono::Utc::now());
            })
            .await;
        if !started {
            return;
        }
        info!(total_tiles = total, "Preseed job running");

        let status = self.execute(&work).await;
        self.registry.finish(self.id, status, None).await;

        let status_label = match status {
            JobStatus::Cancelled => "cancelled",
            _ => "completed",
        };
        counter!("preseed_jobs_total", "status" => status_label).increment(1);
        if let Some(job) = self.registry.get(self.id).await {
            info!(
                status = ?job.status,
                tiles_done = job.progress.tiles_done,
                tiles_failed = job.progress.tiles_failed,
                total_tiles = job.progress.total_tiles,
                "Preseed job finished"
            );
        }
    }

    /// Resolve datasets and tile ranges. Any problem here fails the job.
    async fn enumerate(&self) -> TileResult<Vec<WorkItem>> {
        let request = &self.request;
        let fatal = |msg: String| TileError::PreseedJobFatal(msg);
        let tms: TileMatrixSetId = request.tile_matrix_set;
        let zooms = request.zoom_range;

        if request.dataset_ids.is_empty() {
            return Err(fatal("no datasets requested".to_string()));
        }
        if zooms.min_zoom > zooms.max_zoom || zooms.max_zoom > MAX_ZOOM {
            return Err(fatal(format!(
                "invalid zoom range {}..={} (maximum zoom {})",
                zooms.min_zoom, zooms.max_zoom, MAX_ZOOM
            )));
        }

        let bbox = match request.bbox {
            Some(bbox) => {
                bbox.validate()
                    .map_err(|e| fatal(format!("invalid bbox: {}", e)))?;
                let from = request.bbox_crs.unwrap_or_else(|| tms.crs());
                Some(bbox.transform(from, tms.crs()))
            }
            None => None,
        };

        let mut work = Vec::new();
        for dataset_id in &request.dataset_ids {
            let plan = self
                .service
                .plan(
                    dataset_id,
                    tms,
                    request.style_id.as_deref(),
                    request.format,
                    request.transparent,
                    request.tile_size,
                )
                .await
                .map_err(|e| fatal(format!("dataset '{}': {}", dataset_id, e)))?;
            let plan = Arc::new(plan);

            for zoom in zooms.levels() {
                let range = match &bbox {
                    Some(bbox) => tms.bounds_to_tile_range(zoom, bbox),
                    None => tms.full_range(zoom),
                }
                .map_err(|e| fatal(e.to_string()))?;
                work.push(WorkItem {
                    plan: plan.clone(),
                    range,
                });
            }
        }
        Ok(work)
    }

    async fn execute(&self, work: &[WorkItem]) -> JobStatus {
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallelism.max(1)));
        let batch_size = self.config.batch_size.max(1);
        let mut tiles = work
            .iter()
            .flat_map(|w| w.range.iter().map(move |coord| (w.plan.clone(), coord)));

        loop {
            if self.cancel.is_cancelled() {
                info!("Preseed job cancelled");
                return JobStatus::Cancelled;
            }
            let batch: Vec<(Arc<TilePlan>, TileCoordinate)> =
                tiles.by_ref().take(batch_size).collect();
            if batch.is_empty() {
                return JobStatus::Completed;
            }
            self.run_batch(batch, &semaphore).await;
        }
    }

    async fn run_batch(&self, batch: Vec<(Arc<TilePlan>, TileCoordinate)>, semaphore: &Arc<Semaphore>) {
        let mut tasks = JoinSet::new();
        for (plan, coord) in batch {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            if self.cancel.is_cancelled() {
                break;
            }
            let service = self.service.clone();
            let cancel = self.cancel.clone();
            let overwrite = self.request.overwrite;
            let retries = self.config.max_tile_retries;
            tasks.spawn(async move {
                let outcome = seed_tile(&service, &plan, coord, overwrite, retries, &cancel).await;
                drop(permit);
                (coord, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (done, failed) = match joined {
                Ok((_, Ok(outcome))) => {
                    let label = match outcome {
                        SeedOutcome::Generated => "generated",
                        SeedOutcome::AlreadyCached => "skipped",
                    };
                    counter!("preseed_tiles_total", "outcome" => label).increment(1);
                    (1, 0)
                }
                Ok((_, Err(TileError::Cancelled))) => (0, 0),
                Ok((coord, Err(e))) => {
                    warn!(tile = %coord, error = %e, "Preseed tile failed");
                    counter!("preseed_tiles_total", "outcome" => "failed").increment(1);
                    (0, 1)
                }
                Err(e) => {
                    warn!(error = %e, "Preseed tile task panicked");
                    (0, 1)
                }
            };
            if done + failed > 0 {
                self.registry
                    .update(self.id, |job| {
                        job.progress.tiles_done += done;
                        job.progress.tiles_failed += failed;
                    })
                    .await;
            }
        }
    }
}

/// Generate and store one tile, skipping it when cached unless `overwrite`.
/// Retryable failures are attempted again up to `retries` times.
async fn seed_tile(
    service: &TileService,
    plan: &TilePlan,
    coord: TileCoordinate,
    overwrite: bool,
    retries: u32,
    cancel: &CancellationToken,
) -> TileResult<SeedOutcome> {
    if cancel.is_cancelled() {
        return Err(TileError::Cancelled);
    }
    let key = plan.key(coord)?;

    if !overwrite {
        match service.cache().contains(&key).await {
            Ok(true) => return Ok(SeedOutcome::AlreadyCached),
            Ok(false) => {}
            Err(e) => debug!(error = %e, "Cache lookup failed; generating"),
        }
    }

    let mut attempt = 0;
    let bytes = loop {
        match service.generate(plan, coord, cancel).await {
            Ok(bytes) => break bytes,
            Err(e) if e.is_retryable() && attempt < retries && !cancel.is_cancelled() => {
                attempt += 1;
                debug!(tile = %coord, attempt = attempt, error = %e, "Retrying preseed tile");
            }
            Err(e) => return Err(e),
        }
    };

    service.cache().put(&key, bytes).await?;
    Ok(SeedOutcome::Generated)
}
