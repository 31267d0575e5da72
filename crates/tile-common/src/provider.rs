//! Collaborator interfaces the tile core consumes but does not implement.

use async_trait::async_trait;

use crate::bbox::BoundingBox;
use crate::crs::CrsCode;
use crate::dataset::{RasterDataset, VectorLayerSource};
use crate::error::TileResult;
use crate::feature::FeatureRow;
use crate::style::StyleDefinition;

/// Supplies dataset and style records.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Dataset by id, `None` when unknown.
    async fn dataset(&self, dataset_id: &str) -> TileResult<Option<RasterDataset>>;

    /// Style by id, `None` when unknown.
    async fn style(&self, style_id: &str) -> TileResult<Option<StyleDefinition>>;

    /// Vector layers a dataset can serve. Empty for raster-only datasets.
    async fn vector_layers(&self, dataset_id: &str) -> TileResult<Vec<VectorLayerSource>>;
}

/// Spatial feature query service.
#[async_trait]
pub trait FeatureQuery: Send + Sync {
    /// Rows of `layer` intersecting `bbox`, with geometries in `crs`.
    async fn query(
        &self,
        layer: &VectorLayerSource,
        bbox: &BoundingBox,
        crs: CrsCode,
    ) -> TileResult<Vec<FeatureRow>>;
}
