//! On-demand tile retrieval: cache behaviour, variants, error kinds and
//! vector tiles.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{metadata, HarnessBuilder, ReadOnlyStorage, SyntheticReader};
use test_utils::{dem_dataset, raster_dataset, sample_features, MockFeatureQuery};
use tile_common::{
    BoundingBox, SourceKind, TileError, TileFormat, TileMatrixSetId, VectorLayerSource,
};
use tile_service::{CacheStatus, TileRequest};

fn png(z: u32, row: u32, col: u32) -> TileRequest {
    TileRequest::new("dem", TileMatrixSetId::WebMercatorQuad, z, row, col, TileFormat::Png)
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_request_is_served_from_cache() {
    let h = HarnessBuilder::new().build();

    let first = h.service.get_tile(&png(1, 0, 1)).await.unwrap();
    let second = h.service.get_tile(&png(1, 0, 1)).await.unwrap();

    assert_eq!(first.cache_status, CacheStatus::Miss);
    assert_eq!(second.cache_status, CacheStatus::Hit);
    assert_eq!(first.bytes, second.bytes);
    assert_eq!(second.content_type, "image/png");
    assert_eq!(h.reader.calls(), 1);

    let image = image::load_from_memory(&second.bytes).unwrap();
    assert_eq!((image.width(), image.height()), (256, 256));

    let stats = h.admin.get_statistics("dem").await.unwrap();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.total_tiles, 1);
    assert_eq!(stats.total_size_bytes, first.bytes.len() as u64);
}

#[tokio::test(flavor = "multi_thread")]
async fn variants_are_cached_independently() {
    let h = HarnessBuilder::new().build();
    let requests = vec![
        png(2, 1, 1),
        png(2, 1, 1).with_transparency(true),
        png(2, 1, 1).with_style("landcover"),
        png(2, 1, 1).with_tile_size(512),
        TileRequest::new("dem", TileMatrixSetId::WebMercatorQuad, 2, 1, 1, TileFormat::Jpeg),
        TileRequest::new("dem", TileMatrixSetId::WebMercatorQuad, 2, 1, 1, TileFormat::Webp),
        TileRequest::new("dem", TileMatrixSetId::Crs84Quad, 2, 1, 1, TileFormat::Png),
    ];

    for request in &requests {
        let response = h.service.get_tile(request).await.unwrap();
        assert_eq!(response.cache_status, CacheStatus::Miss, "{:?}", request);
        assert_eq!(response.content_type, request.format.content_type());
    }
    for request in &requests {
        let response = h.service.get_tile(request).await.unwrap();
        assert_eq!(response.cache_status, CacheStatus::Hit, "{:?}", request);
    }

    assert_eq!(h.reader.calls(), requests.len());
    let usage = h.admin.get_usage("dem").await.unwrap();
    assert_eq!(usage.tile_count, requests.len() as u64);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_misses_generate_once() {
    let h = HarnessBuilder::new()
        .reader(SyntheticReader::new().with_delay(Duration::from_millis(50)))
        .build();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = h.service.clone();
        handles.push(tokio::spawn(async move { service.get_tile(&png(3, 2, 5)).await }));
    }
    let mut statuses = Vec::new();
    for handle in handles {
        statuses.push(handle.await.unwrap().unwrap().cache_status);
    }

    assert_eq!(h.reader.calls(), 1);
    assert_eq!(statuses.iter().filter(|s| **s == CacheStatus::Miss).count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn transparent_jpeg_is_a_configuration_error() {
    let h = HarnessBuilder::new().build();
    let request = TileRequest::new("dem", TileMatrixSetId::WebMercatorQuad, 0, 0, 0, TileFormat::Jpeg)
        .with_transparency(true);

    let err = h.service.get_tile(&request).await.unwrap_err();
    assert!(matches!(err, TileError::ConfigurationError(_)), "{:?}", err);
    assert_eq!(h.reader.calls(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn out_of_range_coordinate_is_rejected() {
    let h = HarnessBuilder::new().build();

    let err = h.service.get_tile(&png(2, 4, 0)).await.unwrap_err();
    assert!(matches!(err, TileError::InvalidCoordinate(_)), "{:?}", err);

    // CRS84Quad has two columns at zoom 0
    let request = TileRequest::new("dem", TileMatrixSetId::Crs84Quad, 0, 0, 2, TileFormat::Png);
    let err = h.service.get_tile(&request).await.unwrap_err();
    assert!(matches!(err, TileError::InvalidCoordinate(_)), "{:?}", err);
    assert_eq!(h.reader.calls(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_dataset_and_style() {
    let h = HarnessBuilder::new().build();

    let request = TileRequest::new("missing", TileMatrixSetId::WebMercatorQuad, 0, 0, 0, TileFormat::Png);
    let err = h.service.get_tile(&request).await.unwrap_err();
    assert!(matches!(err, TileError::UnknownDataset(_)), "{:?}", err);

    let err = h.service.get_tile(&png(0, 0, 0).with_style("nope")).await.unwrap_err();
    assert!(matches!(err, TileError::UnknownStyle(_)), "{:?}", err);
}

#[tokio::test(flavor = "multi_thread")]
async fn unsafe_style_identifier_is_rejected() {
    let h = HarnessBuilder::new().build();
    let err = h
        .service
        .get_tile(&png(0, 0, 0).with_style("../elevation"))
        .await
        .unwrap_err();
    assert!(err.is_client_error(), "{:?}", err);
}

#[tokio::test(flavor = "multi_thread")]
async fn tile_outside_dataset_extent_skips_the_source() {
    let small = raster_dataset(
        "dem",
        SourceKind::TiledOverview,
        "dem.tif",
        BoundingBox::new(-106.0, 39.0, -105.0, 40.0),
    );
    let h = HarnessBuilder::new()
        .metadata(metadata().with_dataset(small))
        .build();

    // Eastern hemisphere, far from Colorado
    let response = h.service.get_tile(&png(2, 1, 3)).await.unwrap();
    assert!(!response.bytes.is_empty());
    assert_eq!(h.reader.calls(), 0);

    h.service.get_tile(&png(2, 1, 0)).await.unwrap();
    assert_eq!(h.reader.calls(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn cache_write_failure_serves_uncached_tile() {
    let h = HarnessBuilder::new()
        .storage(Arc::new(ReadOnlyStorage::new()))
        .build();

    let first = h.service.get_tile(&png(1, 1, 1)).await.unwrap();
    assert_eq!(first.cache_status, CacheStatus::Uncached);
    assert!(!first.bytes.is_empty());

    let second = h.service.get_tile(&png(1, 1, 1)).await.unwrap();
    assert_eq!(second.cache_status, CacheStatus::Uncached);
    assert_eq!(h.reader.calls(), 2);
}

fn places_layer() -> VectorLayerSource {
    VectorLayerSource {
        name: "places".to_string(),
        source: "places_table".to_string(),
        attributes: vec![],
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn vector_tile_contains_intersecting_features() {
    let features = Arc::new(MockFeatureQuery::new().with_rows("places_table", sample_features()));
    let h = HarnessBuilder::new()
        .metadata(metadata().with_layers("dem", vec![places_layer()]))
        .features(features.clone())
        .build();

    let request = TileRequest::new("dem", TileMatrixSetId::WebMercatorQuad, 0, 0, 0, TileFormat::Mvt);
    let response = h.service.get_tile(&request).await.unwrap();
    assert_eq!(response.content_type, "application/vnd.mapbox-vector-tile");
    assert_eq!(response.cache_status, CacheStatus::Miss);

    let tile = vector_tile::decode_tile(&response.bytes).unwrap();
    let layer = tile.layer("places").unwrap();
    assert_eq!(layer.features.len(), 3);
    assert_eq!(features.call_count(), 1);

    let again = h.service.get_tile(&request).await.unwrap();
    assert_eq!(again.cache_status, CacheStatus::Hit);
    assert_eq!(features.call_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn vector_tile_without_features_is_empty() {
    let features = Arc::new(MockFeatureQuery::new().with_rows("places_table", sample_features()));
    let h = HarnessBuilder::new()
        .metadata(metadata().with_layers("dem", vec![places_layer()]))
        .features(features)
        .build();

    // Top-left tile at zoom 6 covers the far north-west
    let request = TileRequest::new("dem", TileMatrixSetId::WebMercatorQuad, 6, 0, 0, TileFormat::Mvt);
    let response = h.service.get_tile(&request).await.unwrap();
    assert!(response.bytes.is_empty());
    assert!(vector_tile::decode_tile(&response.bytes).unwrap().layers.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn vector_tile_for_raster_only_dataset_is_not_found() {
    let h = HarnessBuilder::new()
        .features(Arc::new(MockFeatureQuery::new()))
        .build();

    let request = TileRequest::new("dem", TileMatrixSetId::WebMercatorQuad, 0, 0, 0, TileFormat::Mvt);
    let err = h.service.get_tile(&request).await.unwrap_err();
    assert!(matches!(err, TileError::NotFound(_)), "{:?}", err);

    let request = TileRequest::new("other", TileMatrixSetId::WebMercatorQuad, 0, 0, 0, TileFormat::Mvt);
    let err = h.service.get_tile(&request).await.unwrap_err();
    assert!(matches!(err, TileError::UnknownDataset(_)), "{:?}", err);
}

#[tokio::test(flavor = "multi_thread")]
async fn renders_from_a_real_cog() {
    use source_reader::{SourceConfig, SourceReaders, SourceStore};
    use storage::FilesystemCache;
    use test_utils::{create_elevation_grid, CogBuilder};
    use tile_service::TileService;

    let sources = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    CogBuilder::new(512, 256, create_elevation_grid(512, 256, 2000.0))
        .georeference(-180.0, 90.0, 360.0 / 512.0, 180.0 / 256.0)
        .epsg(4326)
        .overviews(2)
        .deflate()
        .write_to(&sources.path().join("dem.tif"))
        .unwrap();

    let reader = Arc::new(SourceReaders::new(
        SourceStore::filesystem(sources.path()),
        &SourceConfig::default(),
    ));
    let storage = Arc::new(FilesystemCache::new(cache_dir.path()).unwrap());
    let meta = test_utils::InMemoryMetadataProvider::new()
        .with_dataset(dem_dataset("dem.tif"))
        .with_style(test_utils::elevation_style());
    let service = TileService::builder(storage, reader, Arc::new(meta))
        .build()
        .unwrap();

    let request = TileRequest::new("dem", TileMatrixSetId::Crs84Quad, 1, 0, 1, TileFormat::Png);
    let response = service.get_tile(&request).await.unwrap();
    assert_eq!(response.cache_status, CacheStatus::Miss);
    let image = image::load_from_memory(&response.bytes).unwrap().to_rgba8();
    assert_eq!(image.dimensions(), (256, 256));
    assert!(image.pixels().all(|p| p[3] == 255));

    let cached = service.get_tile(&request).await.unwrap();
    assert_eq!(cached.cache_status, CacheStatus::Hit);
    assert_eq!(cached.bytes, response.bytes);
}
