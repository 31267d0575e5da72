//! The tile miss-path: resolve, check the cache, generate, store.
//!
//! ```text
//! TileRequest ─► TilePlan ─► TileCache::get ─┬─► hit: cached bytes
//!                                            └─► miss: [single-flight]
//!                                                  raster: SourceReader ─► TileRenderer
//!                                                  vector: FeatureQuery ─► VectorTileEncoder
//!                                                  ─► TileCache::put (failures degrade)
//! ```

use bytes::Bytes;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use renderer::RenderOptions;
use source_reader::{SampleGrid, SourceReader, WindowRequest};
use storage::PutOutcome;
use tile_common::{
    RasterDataset, StyleDefinition, TileCacheKey, TileCoordinate, TileError, TileFormat,
    TileMatrixSetId, TileResult, VectorLayerSource,
};
use vector_tile::LayerFeatures;

use crate::state::TileService;

pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Style segment used in cache keys of vector tiles requested without one.
pub const DEFAULT_VECTOR_STYLE: &str = "default";

fn default_tile_size() -> u32 {
    DEFAULT_TILE_SIZE
}

/// Arguments of a single tile retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileRequest {
    pub dataset_id: String,
    pub tile_matrix_set: TileMatrixSetId,
    pub zoom: u32,
    pub row: u32,
    pub column: u32,
    /// `None` selects the dataset's default style.
    #[serde(default)]
    pub style_id: Option<String>,
    pub format: TileFormat,
    #[serde(default)]
    pub transparent: bool,
    #[serde(default = "default_tile_size")]
    pub tile_size: u32,
}

impl TileRequest {
    pub fn new(
        dataset_id: impl Into<String>,
        tile_matrix_set: TileMatrixSetId,
        zoom: u32,
        row: u32,
        column: u32,
        format: TileFormat,
    ) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            tile_matrix_set,
            zoom,
            row,
            column,
            style_id: None,
            format,
            transparent: false,
            tile_size: DEFAULT_TILE_SIZE,
        }
    }

    pub fn with_style(mut self, style_id: impl Into<String>) -> Self {
        self.style_id = Some(style_id.into());
        self
    }

    pub fn with_transparency(mut self, transparent: bool) -> Self {
        self.transparent = transparent;
        self
    }

    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size;
        self
    }
}

/// Where the bytes of a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheStatus {
    Hit,
    /// Generated and written to the cache.
    Miss,
    /// Generated but not cached (write failed or over quota).
    Uncached,
}

#[derive(Debug, Clone)]
pub struct TileResponse {
    pub bytes: Bytes,
    pub content_type: String,
    pub cache_status: CacheStatus,
}

/// What a tile is generated from.
#[derive(Debug, Clone)]
pub enum TileSource {
    Raster {
        dataset: RasterDataset,
        style: StyleDefinition,
    },
    Vector {
        layers: Vec<VectorLayerSource>,
    },
}

/// A resolved dataset/style/format combination. Keys for individual tiles
/// are derived from it without further metadata lookups.
#[derive(Debug, Clone)]
pub struct TilePlan {
    pub dataset_id: String,
    pub tile_matrix_set: TileMatrixSetId,
    pub style_id: String,
    pub format: TileFormat,
    pub transparent: bool,
    pub tile_size: u32,
    pub source: TileSource,
}

impl TilePlan {
    pub fn key(&self, coord: TileCoordinate) -> TileResult<TileCacheKey> {
        TileCacheKey::new(
            self.dataset_id.clone(),
            self.tile_matrix_set,
            coord,
            self.style_id.clone(),
            self.format,
            self.transparent,
            self.tile_size,
        )
    }
}

/// Per-key locks for concurrent misses on the same tile.
#[derive(Default)]
pub(crate) struct InflightTiles {
    locks: StdMutex<HashMap<TileCacheKey, Arc<Mutex<()>>>>,
}

impl InflightTiles {
    fn map(&self) -> MutexGuard<'_, HashMap<TileCacheKey, Arc<Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self, key: &TileCacheKey) -> InflightEntry<'_> {
        let lock = self.map().entry(key.clone()).or_default().clone();
        InflightEntry {
            tiles: self,
            key: key.clone(),
            lock,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.map().len()
    }
}

/// A request's claim on a key. The last claim dropped removes the key,
/// including when the request future is dropped mid-render.
struct InflightEntry<'a> {
    tiles: &'a InflightTiles,
    key: TileCacheKey,
    lock: Arc<Mutex<()>>,
}

impl InflightEntry<'_> {
    async fn lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

impl Drop for InflightEntry<'_> {
    fn drop(&mut self) {
        let mut locks = self.tiles.map();
        let last = locks
            .get(&self.key)
            .is_some_and(|current| Arc::ptr_eq(current, &self.lock) && Arc::strong_count(current) <= 2);
        if last {
            locks.remove(&self.key);
        }
    }
}

impl TileService {
    /// Retrieve one tile, generating and caching it on a miss.
    pub async fn get_tile(&self, request: &TileRequest) -> TileResult<TileResponse> {
        self.get_tile_with_cancel(request, &CancellationToken::new()).await
    }

    #[instrument(
        skip(self, request, cancel),
        fields(
            dataset = %request.dataset_id,
            zoom = request.zoom,
            row = request.row,
            col = request.column,
            format = %request.format
        )
    )]
    pub async fn get_tile_with_cancel(
        &self,
        request: &TileRequest,
        cancel: &CancellationToken,
    ) -> TileResult<TileResponse> {
        let coord = TileCoordinate::new(request.zoom, request.row, request.column)?;
        let plan = self
            .plan(
                &request.dataset_id,
                request.tile_matrix_set,
                request.style_id.as_deref(),
                request.format,
                request.transparent,
                request.tile_size,
            )
            .await?;
        let key = plan.key(coord)?;

        if let Some(response) = self.cached(&key).await {
            return Ok(response);
        }

        let Some(inflight) = &self.inflight else {
            return self.generate_and_store(&plan, &key, cancel).await;
        };

        let entry = inflight.enter(&key);
        let _guard = entry.lock().await;
        // Another request may have produced the tile while we waited.
        if self.cache.contains(&key).await.unwrap_or(false) {
            if let Some(response) = self.cached(&key).await {
                return Ok(response);
            }
        }
        self.generate_and_store(&plan, &key, cancel).await
    }

    /// Resolve dataset, style and format for a family of tiles.
    ///
    /// Fails with `ConfigurationError` for transparency in a format without
    /// alpha, `UnknownDataset`/`UnknownStyle` for missing records and
    /// `NotFound` for a vector request on a dataset without vector layers.
    pub async fn plan(
        &self,
        dataset_id: &str,
        tile_matrix_set: TileMatrixSetId,
        style_id: Option<&str>,
        format: TileFormat,
        transparent: bool,
        tile_size: u32,
    ) -> TileResult<TilePlan> {
        let (style_id, source) = if format.is_vector() {
            let layers = self.metadata.vector_layers(dataset_id).await?;
            if layers.is_empty() {
                return Err(match self.metadata.dataset(dataset_id).await? {
                    Some(_) => TileError::NotFound(format!(
                        "dataset '{}' has no vector layers",
                        dataset_id
                    )),
                    None => TileError::UnknownDataset(dataset_id.to_string()),
                });
            }
            let style_id = style_id.unwrap_or(DEFAULT_VECTOR_STYLE).to_string();
            (style_id, TileSource::Vector { layers })
        } else {
            RenderOptions::new(format, transparent)
                .validate()
                .map_err(TileError::from)?;
            let dataset = self
                .metadata
                .dataset(dataset_id)
                .await?
                .ok_or_else(|| TileError::UnknownDataset(dataset_id.to_string()))?;
            let style_id = style_id
                .map(str::to_string)
                .unwrap_or_else(|| dataset.default_style_id.clone());
            let style = self
                .metadata
                .style(&style_id)
                .await?
                .ok_or_else(|| TileError::UnknownStyle(style_id.clone()))?;
            style.validate()?;
            (style_id, TileSource::Raster { dataset, style })
        };

        let plan = TilePlan {
            dataset_id: dataset_id.to_string(),
            tile_matrix_set,
            style_id,
            format,
            transparent,
            tile_size,
            source,
        };
        // Validates identifiers and tile size up front.
        plan.key(TileCoordinate { zoom: 0, row: 0, column: 0 })?;
        Ok(plan)
    }

    /// Cached entry for `key`. Read failures are logged and count as a miss.
    async fn cached(&self, key: &TileCacheKey) -> Option<TileResponse> {
        match self.cache.get(key).await {
            Ok(entry) => entry.map(|entry| TileResponse {
                bytes: entry.bytes,
                content_type: entry.content_type,
                cache_status: CacheStatus::Hit,
            }),
            Err(e) => {
                warn!(error = %e, path = %key.storage_path(), "Cache read failed; regenerating");
                None
            }
        }
    }

    async fn generate_and_store(
        &self,
        plan: &TilePlan,
        key: &TileCacheKey,
        cancel: &CancellationToken,
    ) -> TileResult<TileResponse> {
        let bytes = self.generate(plan, key.coordinate(), cancel).await?;
        let cache_status = self.store(key, bytes.clone()).await;
        Ok(TileResponse {
            bytes,
            content_type: key.format.content_type().to_string(),
            cache_status,
        })
    }

    /// Write a generated tile. The cache is an optimization, so failures are
    /// logged and reported as `Uncached` rather than returned.
    pub async fn store(&self, key: &TileCacheKey, bytes: Bytes) -> CacheStatus {
        match self.cache.put(key, bytes).await {
            Ok(PutOutcome::Stored) => CacheStatus::Miss,
            Ok(PutOutcome::SkippedOverQuota) => CacheStatus::Uncached,
            Err(e) => {
                counter!("tile_cache_write_failures_total", "dataset" => key.dataset_id.clone())
                    .increment(1);
                warn!(error = %e, path = %key.storage_path(), "Cache write failed; serving uncached");
                CacheStatus::Uncached
            }
        }
    }

    /// Produce the encoded bytes of one tile without touching the cache.
    #[instrument(skip(self, plan, cancel), fields(dataset = %plan.dataset_id, tile = %coord))]
    pub async fn generate(
        &self,
        plan: &TilePlan,
        coord: TileCoordinate,
        cancel: &CancellationToken,
    ) -> TileResult<Bytes> {
        if cancel.is_cancelled() {
            return Err(TileError::Cancelled);
        }
        let start = Instant::now();
        let result = match &plan.source {
            TileSource::Raster { dataset, style } => {
                self.render_raster(plan, dataset, style, coord, cancel).await
            }
            TileSource::Vector { layers } => self.encode_vector(plan, layers, coord, cancel).await,
        };

        let format = plan.format.as_str();
        match &result {
            Ok(bytes) => {
                histogram!("tile_generation_duration_seconds", "format" => format)
                    .record(start.elapsed().as_secs_f64());
                counter!("tiles_generated_total", "format" => format).increment(1);
                debug!(size = bytes.len(), "Tile generated");
            }
            Err(TileError::Cancelled) => {}
            Err(e) => {
                counter!("tile_generation_failures_total", "kind" => e.kind()).increment(1);
            }
        }
        result
    }

    async fn render_raster(
        &self,
        plan: &TilePlan,
        dataset: &RasterDataset,
        style: &StyleDefinition,
        coord: TileCoordinate,
        cancel: &CancellationToken,
    ) -> TileResult<Bytes> {
        let tms = plan.tile_matrix_set;
        let bounds = tms.tile_to_bounds(coord.zoom, coord.row, coord.column)?;
        let size = plan.tile_size as usize;
        let request = WindowRequest::new(bounds, tms.crs(), size, size);

        let extent = dataset.spatial_extent.transform(dataset.crs, tms.crs());
        let grid = if extent.intersects(&bounds) {
            self.reader.read_window(dataset, &request, cancel).await?
        } else {
            debug!("Tile outside dataset extent; rendering nodata");
            SampleGrid::empty(&request, dataset.band_indices().len())
        };

        let renderer = self.renderer.clone();
        let style = style.clone();
        let options = RenderOptions::new(plan.format, plan.transparent);
        let encoded = tokio::task::spawn_blocking(move || renderer.render(&grid, &style, &options))
            .await
            .map_err(|e| TileError::InternalError(format!("render task failed: {}", e)))?
            .map_err(TileError::from)?;
        Ok(Bytes::from(encoded))
    }

    async fn encode_vector(
        &self,
        plan: &TilePlan,
        layers: &[VectorLayerSource],
        coord: TileCoordinate,
        cancel: &CancellationToken,
    ) -> TileResult<Bytes> {
        let features = self.features.as_ref().ok_or_else(|| {
            TileError::ConfigurationError("no feature query service configured".to_string())
        })?;
        let tms = plan.tile_matrix_set;
        let bounds = tms.tile_to_bounds(coord.zoom, coord.row, coord.column)?;
        let query_bounds = self.encoder.query_bounds(&bounds);

        let mut results = Vec::with_capacity(layers.len());
        for layer in layers {
            if cancel.is_cancelled() {
                return Err(TileError::Cancelled);
            }
            let rows = features.query(layer, &query_bounds, tms.crs()).await?;
            results.push(LayerFeatures::new(layer.clone(), rows));
        }

        let encoder = self.encoder.clone();
        let zoom = coord.zoom;
        let encoded = tokio::task::spawn_blocking(move || encoder.encode(&results, &bounds, zoom))
            .await
            .map_err(|e| TileError::InternalError(format!("encode task failed: {}", e)))?
            .map_err(TileError::from)?;
        Ok(Bytes::from(encoded))
    }
}
