//! Job and cache administration.
//!
//! Thin layer over the preseed orchestrator and the tile cache that checks
//! identifiers and converts storage failures into [`TileError`]s.

use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use storage::{CacheQuota, CacheStatistics, EnforcementReport, Usage};
use tile_common::cache_key::validate_identifier;
use tile_common::{TileError, TileResult};

use crate::config::ServiceConfig;
use crate::preseed::{PreseedJob, PreseedOrchestrator, PreseedRequest};
use crate::state::TileService;

/// Administration entry point for one tile service.
pub struct TileAdmin {
    service: Arc<TileService>,
    orchestrator: PreseedOrchestrator,
}

impl TileAdmin {
    pub fn new(service: Arc<TileService>, config: &ServiceConfig) -> Self {
        let orchestrator = PreseedOrchestrator::new(service.clone(), config.preseed.clone());
        Self {
            service,
            orchestrator,
        }
    }

    pub fn service(&self) -> &Arc<TileService> {
        &self.service
    }

    pub fn orchestrator(&self) -> &PreseedOrchestrator {
        &self.orchestrator
    }

    pub async fn submit_preseed_job(&self, request: PreseedRequest) -> Uuid {
        self.orchestrator.submit(request).await
    }

    pub async fn get_job_status(&self, job_id: Uuid) -> TileResult<PreseedJob> {
        self.orchestrator.status(job_id).await
    }

    pub async fn cancel_job(&self, job_id: Uuid) -> TileResult<PreseedJob> {
        self.orchestrator.cancel(job_id).await
    }

    pub async fn list_jobs(&self) -> Vec<PreseedJob> {
        self.orchestrator.list().await
    }

    /// Remove every cached tile of a dataset. Returns the number removed.
    pub async fn purge_dataset(&self, dataset_id: &str) -> TileResult<u64> {
        validate_identifier("datasetId", dataset_id)?;
        let removed = self.service.cache().purge_dataset(dataset_id).await?;
        info!(dataset = %dataset_id, removed = removed, "Dataset cache purged");
        Ok(removed)
    }

    /// Effective quota, or `None` when the dataset is unlimited.
    pub async fn get_quota(&self, dataset_id: &str) -> TileResult<Option<CacheQuota>> {
        validate_identifier("datasetId", dataset_id)?;
        Ok(self.service.cache().quota().quota(dataset_id).await)
    }

    pub async fn set_quota(&self, dataset_id: &str, quota: CacheQuota) -> TileResult<()> {
        validate_identifier("datasetId", dataset_id)?;
        if quota.max_size_bytes == Some(0) || quota.max_tiles == Some(0) {
            return Err(TileError::invalid_parameter(
                "quota",
                "limits must be greater than zero",
            ));
        }
        self.service.cache().quota().set_quota(dataset_id, quota).await;
        Ok(())
    }

    pub async fn enforce_quota(&self, dataset_id: &str) -> TileResult<EnforcementReport> {
        validate_identifier("datasetId", dataset_id)?;
        Ok(self.service.cache().enforce_quota(dataset_id).await?)
    }

    pub async fn get_usage(&self, dataset_id: &str) -> TileResult<Usage> {
        validate_identifier("datasetId", dataset_id)?;
        Ok(self.service.cache().usage(dataset_id).await?)
    }

    pub async fn get_statistics(&self, dataset_id: &str) -> TileResult<CacheStatistics> {
        validate_identifier("datasetId", dataset_id)?;
        Ok(self.service.cache().statistics(dataset_id).await?)
    }

    pub async fn all_statistics(&self) -> TileResult<Vec<CacheStatistics>> {
        Ok(self.service.cache().all_statistics().await?)
    }

    pub async fn reset_statistics(&self, dataset_id: &str) -> TileResult<()> {
        validate_identifier("datasetId", dataset_id)?;
        self.service.cache().reset_statistics(dataset_id).await;
        Ok(())
    }

    /// Cancel all running jobs.
    pub async fn shutdown(&self) {
        self.orchestrator.shutdown().await;
    }
}
