//! Common test fixtures for geotile tests.
//!
//! Dataset and style records, plus in-memory stand-ins for the metadata
//! provider and feature query collaborators.

use async_trait::async_trait;
use geo::{BoundingRect, Intersects, Rect};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use tile_common::{
    BoundingBox, ClassBreak, Color, ColorStop, CrsCode, FeatureQuery, FeatureRow, HillshadeParams,
    MetadataProvider, RasterDataset, ResamplingMethod, SourceKind, StyleDefinition, StyleKind,
    TileError, TileResult, VectorLayerSource,
};

/// Common bounding box definitions for testing.
pub mod bbox {
    /// Whole world in lon/lat
    pub const GLOBAL: (f64, f64, f64, f64) = (-180.0, -90.0, 180.0, 90.0);

    /// A 1x1 degree cell in Colorado, handy for DEM fixtures
    pub const FRONT_RANGE: (f64, f64, f64, f64) = (-106.0, 39.0, -105.0, 40.0);

    /// Invalid bbox (min > max)
    pub const INVALID: (f64, f64, f64, f64) = (10.0, 10.0, 5.0, 5.0);
}

/// A raster dataset record with the common defaults.
pub fn raster_dataset(id: &str, kind: SourceKind, locator: &str, extent: BoundingBox) -> RasterDataset {
    RasterDataset {
        id: id.to_string(),
        source_kind: kind,
        locator: locator.to_string(),
        bands: vec![],
        crs: CrsCode::Epsg4326,
        spatial_extent: extent,
        nodata_value: None,
        default_style_id: "elevation".to_string(),
        resampling: ResamplingMethod::Nearest,
    }
}

/// Global COG-backed elevation dataset.
pub fn dem_dataset(locator: &str) -> RasterDataset {
    let (a, b, c, d) = bbox::GLOBAL;
    raster_dataset("dem", SourceKind::TiledOverview, locator, BoundingBox::new(a, b, c, d))
}

/// Global Zarr-backed dataset.
pub fn zarr_dataset(locator: &str) -> RasterDataset {
    let (a, b, c, d) = bbox::GLOBAL;
    RasterDataset {
        default_style_id: "temperature".to_string(),
        ..raster_dataset("temperature", SourceKind::ChunkedArray, locator, BoundingBox::new(a, b, c, d))
    }
}

/// Continuous blue-green-red ramp over 0..=2000.
pub fn elevation_style() -> StyleDefinition {
    StyleDefinition {
        id: "elevation".to_string(),
        kind: StyleKind::Continuous {
            stops: vec![
                ColorStop {
                    value: 0.0,
                    color: Color::rgba(0, 0, 255, 255),
                },
                ColorStop {
                    value: 1000.0,
                    color: Color::rgba(0, 255, 0, 255),
                },
                ColorStop {
                    value: 2000.0,
                    color: Color::rgba(255, 0, 0, 255),
                },
            ],
        },
        hillshade: None,
    }
}

/// Elevation ramp with relief shading.
pub fn shaded_relief_style() -> StyleDefinition {
    StyleDefinition {
        id: "shaded".to_string(),
        hillshade: Some(HillshadeParams::default()),
        ..elevation_style()
    }
}

/// Three land cover classes: water, forest, urban.
pub fn landcover_style() -> StyleDefinition {
    let class = |min: f64, max: f64, color: Color, label: &str| ClassBreak {
        min: Some(min),
        max: Some(max),
        color,
        label: Some(label.to_string()),
    };
    StyleDefinition {
        id: "landcover".to_string(),
        kind: StyleKind::Classified {
            classes: vec![
                class(0.0, 1.0, Color::rgba(0, 0, 200, 255), "water"),
                class(1.0, 2.0, Color::rgba(0, 120, 0, 255), "forest"),
                class(2.0, 3.0, Color::rgba(128, 128, 128, 255), "urban"),
            ],
        },
        hillshade: None,
    }
}

/// Metadata provider backed by hash maps.
#[derive(Default)]
pub struct InMemoryMetadataProvider {
    datasets: RwLock<HashMap<String, RasterDataset>>,
    styles: RwLock<HashMap<String, StyleDefinition>>,
    layers: RwLock<HashMap<String, Vec<VectorLayerSource>>>,
}

impl InMemoryMetadataProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dataset(self, dataset: RasterDataset) -> Self {
        self.insert_dataset(dataset);
        self
    }

    pub fn with_style(self, style: StyleDefinition) -> Self {
        if let Ok(mut styles) = self.styles.write() {
            styles.insert(style.id.clone(), style);
        }
        self
    }

    pub fn with_layers(self, dataset_id: &str, layers: Vec<VectorLayerSource>) -> Self {
        if let Ok(mut map) = self.layers.write() {
            map.insert(dataset_id.to_string(), layers);
        }
        self
    }

    pub fn insert_dataset(&self, dataset: RasterDataset) {
        if let Ok(mut datasets) = self.datasets.write() {
            datasets.insert(dataset.id.clone(), dataset);
        }
    }
}

fn poisoned() -> TileError {
    TileError::InternalError("fixture lock poisoned".to_string())
}

#[async_trait]
impl MetadataProvider for InMemoryMetadataProvider {
    async fn dataset(&self, dataset_id: &str) -> TileResult<Option<RasterDataset>> {
        Ok(self.datasets.read().map_err(|_| poisoned())?.get(dataset_id).cloned())
    }

    async fn style(&self, style_id: &str) -> TileResult<Option<StyleDefinition>> {
        Ok(self.styles.read().map_err(|_| poisoned())?.get(style_id).cloned())
    }

    async fn vector_layers(&self, dataset_id: &str) -> TileResult<Vec<VectorLayerSource>> {
        Ok(self
            .layers
            .read()
            .map_err(|_| poisoned())?
            .get(dataset_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Feature query returning fixed rows per layer source, filtered by bbox.
#[derive(Default)]
pub struct MockFeatureQuery {
    rows: HashMap<String, Vec<FeatureRow>>,
    calls: Arc<AtomicUsize>,
}

impl MockFeatureQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows (in EPSG:4326) served for layer source `source`.
    pub fn with_rows(mut self, source: &str, rows: Vec<FeatureRow>) -> Self {
        self.rows.insert(source.to_string(), rows);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeatureQuery for MockFeatureQuery {
    async fn query(
        &self,
        layer: &VectorLayerSource,
        bbox: &BoundingBox,
        crs: CrsCode,
    ) -> TileResult<Vec<FeatureRow>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let query = bbox.transform(crs, CrsCode::Epsg4326);
        let rect = Rect::new((query.min_x, query.min_y), (query.max_x, query.max_y));

        let rows = self.rows.get(&layer.source).cloned().unwrap_or_default();
        Ok(rows
            .into_iter()
            .filter(|row| {
                row.geometry
                    .bounding_rect()
                    .map(|r| r.intersects(&rect))
                    .unwrap_or(false)
            })
            .map(|mut row| {
                if crs != CrsCode::Epsg4326 {
                    use geo::MapCoordsInPlace;
                    row.geometry.map_coords_in_place(|c| {
                        let (x, y) = CrsCode::Epsg4326.transform_point(crs, c.x, c.y);
                        geo::Coord { x, y }
                    });
                }
                row
            })
            .collect())
    }
}
