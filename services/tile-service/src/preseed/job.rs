//! Preseed job records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tile_common::{BoundingBox, CrsCode, TileFormat, TileMatrixSetId};

use crate::tiles::DEFAULT_TILE_SIZE;

fn default_tile_size() -> u32 {
    DEFAULT_TILE_SIZE
}

/// Lifecycle of a preseed job.
///
/// `Queued → Running → {Completed | Failed | Cancelled}`; a job may also go
/// straight from `Queued` to `Failed` or `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoomRange {
    pub min_zoom: u32,
    pub max_zoom: u32,
}

impl ZoomRange {
    pub fn new(min_zoom: u32, max_zoom: u32) -> Self {
        Self { min_zoom, max_zoom }
    }

    pub fn levels(&self) -> impl Iterator<Item = u32> {
        self.min_zoom..=self.max_zoom
    }
}

/// Counters updated while a job runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    /// Tiles generated or skipped because they were already cached
    pub tiles_done: u64,
    /// Fixed once the job starts running
    pub total_tiles: u64,
    pub tiles_failed: u64,
}

impl JobProgress {
    /// Share of tiles processed (done or failed), 0..=100.
    pub fn percent_complete(&self) -> f64 {
        if self.total_tiles == 0 {
            return 0.0;
        }
        (self.tiles_done + self.tiles_failed) as f64 * 100.0 / self.total_tiles as f64
    }
}

/// Parameters of a preseed submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreseedRequest {
    pub dataset_ids: Vec<String>,
    pub tile_matrix_set: TileMatrixSetId,
    pub zoom_range: ZoomRange,
    /// Area to seed. The whole matrix when absent.
    #[serde(default)]
    pub bbox: Option<BoundingBox>,
    /// CRS of `bbox`; the tile matrix set's own CRS when absent.
    #[serde(default)]
    pub bbox_crs: Option<CrsCode>,
    /// Style to render; each dataset's default when absent.
    #[serde(default)]
    pub style_id: Option<String>,
    pub format: TileFormat,
    #[serde(default)]
    pub transparent: bool,
    #[serde(default = "default_tile_size")]
    pub tile_size: u32,
    /// Regenerate tiles that are already cached.
    #[serde(default)]
    pub overwrite: bool,
}

impl PreseedRequest {
    pub fn new(
        dataset_ids: Vec<String>,
        tile_matrix_set: TileMatrixSetId,
        zoom_range: ZoomRange,
        format: TileFormat,
    ) -> Self {
        Self {
            dataset_ids,
            tile_matrix_set,
            zoom_range,
            bbox: None,
            bbox_crs: None,
            style_id: None,
            format,
            transparent: false,
            tile_size: DEFAULT_TILE_SIZE,
            overwrite: false,
        }
    }
}

/// A submitted job and its current state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreseedJob {
    pub id: Uuid,
    #[serde(flatten)]
    pub request: PreseedRequest,
    pub status: JobStatus,
    pub progress: JobProgress,
    /// Reason for a `Failed` status
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PreseedJob {
    pub fn new(request: PreseedRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            status: JobStatus::Queued,
            progress: JobProgress::default(),
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
