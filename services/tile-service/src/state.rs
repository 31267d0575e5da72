//! Shared service components.

use std::sync::Arc;
use tracing::info;

use renderer::TileRenderer;
use source_reader::{SourceReader, SourceReaders};
use storage::{CacheStorage, TileCache};
use tile_common::{FeatureQuery, MetadataProvider, TileError, TileResult};
use vector_tile::VectorTileEncoder;

use crate::config::ServiceConfig;
use crate::tiles::InflightTiles;

/// Everything the tile miss-path needs, shared by on-demand requests and
/// preseed workers.
pub struct TileService {
    pub(crate) metadata: Arc<dyn MetadataProvider>,
    pub(crate) features: Option<Arc<dyn FeatureQuery>>,
    pub(crate) reader: Arc<dyn SourceReader>,
    pub(crate) renderer: TileRenderer,
    pub(crate) encoder: VectorTileEncoder,
    pub(crate) cache: Arc<TileCache>,
    pub(crate) inflight: Option<InflightTiles>,
}

impl TileService {
    /// Build the cache backend and source readers described by `config`.
    pub fn from_config(
        config: &ServiceConfig,
        metadata: Arc<dyn MetadataProvider>,
        features: Option<Arc<dyn FeatureQuery>>,
    ) -> TileResult<Self> {
        config.validate()?;
        let storage = config.cache.build_shared()?;
        let reader: Arc<dyn SourceReader> =
            Arc::new(SourceReaders::from_config(&config.source)?);
        info!(
            quota_mode = ?config.quota.mode,
            deduplicate = config.deduplicate_inflight,
            "Tile service initialized"
        );
        Self::builder(storage, reader, metadata)
            .features(features)
            .config(config)
            .build()
    }

    pub fn builder(
        storage: Arc<dyn CacheStorage>,
        reader: Arc<dyn SourceReader>,
        metadata: Arc<dyn MetadataProvider>,
    ) -> TileServiceBuilder {
        TileServiceBuilder {
            storage,
            reader,
            metadata,
            features: None,
            config: ServiceConfig::default(),
        }
    }

    pub fn cache(&self) -> &Arc<TileCache> {
        &self.cache
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataProvider> {
        &self.metadata
    }
}

/// Assembles a [`TileService`] from explicit components.
pub struct TileServiceBuilder {
    storage: Arc<dyn CacheStorage>,
    reader: Arc<dyn SourceReader>,
    metadata: Arc<dyn MetadataProvider>,
    features: Option<Arc<dyn FeatureQuery>>,
    config: ServiceConfig,
}

impl TileServiceBuilder {
    pub fn features(mut self, features: Option<Arc<dyn FeatureQuery>>) -> Self {
        self.features = features;
        self
    }

    /// Take render, vector, quota and deduplication settings from `config`.
    /// Its cache and source sections are ignored here.
    pub fn config(mut self, config: &ServiceConfig) -> Self {
        self.config = config.clone();
        self
    }

    pub fn build(self) -> TileResult<TileService> {
        let config = self.config;
        let renderer = TileRenderer::new(config.render.clone()).map_err(TileError::from)?;
        let encoder = VectorTileEncoder::new(config.vector.clone()).map_err(TileError::from)?;
        let cache = Arc::new(TileCache::new(
            self.storage,
            config.quota.mode,
            config.quota.default_quota,
        ));

        Ok(TileService {
            metadata: self.metadata,
            features: self.features,
            reader: self.reader,
            renderer,
            encoder,
            cache,
            inflight: config.deduplicate_inflight.then(InflightTiles::default),
        })
    }
}
