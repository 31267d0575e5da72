//! COG window reads: full resolution, overview selection, encodings,
//! nodata handling and object storage access.

use bytes::Bytes;
use object_store::{memory::InMemory, path::Path as ObjectPath, ObjectStore};
use source_reader::{
    SourceConfig, SourceError, SourceReader, SourceReaders, SourceStore, WindowRequest,
};
use std::sync::Arc;
use test_utils::{assert_approx_eq, create_test_grid, dem_dataset, CogBuilder, CogSampleType};
use tile_common::{BoundingBox, CrsCode, RasterDataset, ResamplingMethod};
use tokio_util::sync::CancellationToken;

const WIDTH: u32 = 512;
const HEIGHT: u32 = 256;
const PIXEL: f64 = 360.0 / WIDTH as f64;

fn global_cog() -> CogBuilder {
    CogBuilder::new(WIDTH, HEIGHT, create_test_grid(WIDTH as usize, HEIGHT as usize))
        .georeference(-180.0, 90.0, PIXEL, PIXEL)
        .epsg(4326)
}

fn readers(root: &std::path::Path) -> SourceReaders {
    SourceReaders::new(SourceStore::filesystem(root), &SourceConfig::default())
}

/// Bbox of source pixels `cols` x `rows` at full resolution.
fn pixel_bbox(col0: u32, row0: u32, cols: u32, rows: u32) -> BoundingBox {
    BoundingBox::new(
        -180.0 + col0 as f64 * PIXEL,
        90.0 - (row0 + rows) as f64 * PIXEL,
        -180.0 + (col0 + cols) as f64 * PIXEL,
        90.0 - row0 as f64 * PIXEL,
    )
}

async fn read(readers: &SourceReaders, dataset: &RasterDataset, request: WindowRequest) -> Vec<f32> {
    let grid = readers
        .read_window(dataset, &request, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!((grid.width, grid.height), (request.width, request.height));
    grid.bands.into_iter().next().unwrap()
}

#[tokio::test]
async fn full_resolution_window_matches_source_pixels() {
    let dir = tempfile::tempdir().unwrap();
    global_cog().overviews(2).write_to(&dir.path().join("dem.tif")).unwrap();
    let readers = readers(dir.path());

    // Straddles the tile boundary at column 256
    let request = WindowRequest::new(pixel_bbox(250, 10, 12, 8), CrsCode::Epsg4326, 12, 8);
    let values = read(&readers, &dem_dataset("dem.tif"), request).await;

    for row in 0..8 {
        for col in 0..12 {
            let expected = ((250 + col) * 1000 + 10 + row) as f32;
            assert_eq!(values[row * 12 + col], expected, "pixel ({}, {})", col, row);
        }
    }
}

#[tokio::test]
async fn coarse_request_uses_overview() {
    let dir = tempfile::tempdir().unwrap();
    global_cog().overviews(3).write_to(&dir.path().join("dem.tif")).unwrap();
    let readers = readers(dir.path());

    // 64x32 output over the whole world matches the third overview exactly
    let request = WindowRequest::new(
        BoundingBox::new(-180.0, -90.0, 180.0, 90.0),
        CrsCode::Epsg4326,
        64,
        32,
    );
    let values = read(&readers, &dem_dataset("dem.tif"), request).await;

    // Overview pixel (0, 0) is the mean of the 8x8 full-resolution block
    assert_approx_eq!(values[0], 3503.5, 1e-3);
}

#[tokio::test]
async fn deflate_predictor_big_endian_multiband() {
    let dir = tempfile::tempdir().unwrap();
    let w = 64u32;
    let h = 32u32;
    let band0: Vec<f32> = (0..w * h).map(|i| (i % 200) as f32).collect();
    let band1: Vec<f32> = (0..w * h).map(|i| (i % 50) as f32 * 10.0).collect();
    CogBuilder::new(w, h, band0.clone())
        .add_band(band1.clone())
        .sample_type(CogSampleType::U16)
        .tile_size(32)
        .deflate()
        .predictor()
        .big_endian()
        .georeference(0.0, 32.0, 1.0, 1.0)
        .epsg(4326)
        .write_to(&dir.path().join("multi.tif"))
        .unwrap();

    let mut dataset = dem_dataset("multi.tif");
    dataset.bands = vec![1, 0];
    let request = WindowRequest::new(BoundingBox::new(0.0, 0.0, 64.0, 32.0), CrsCode::Epsg4326, 64, 32);
    let grid = readers(dir.path())
        .read_window(&dataset, &request, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(grid.band_count(), 2);
    assert_eq!(grid.bands[0], band1);
    assert_eq!(grid.bands[1], band0);
}

#[tokio::test]
async fn nodata_and_sparse_tiles_read_as_nan() {
    let dir = tempfile::tempdir().unwrap();
    let mut band = vec![f32::NAN; 64 * 32];
    for row in 0..32 {
        for col in 0..16 {
            band[row * 64 + col] = 5.0;
        }
    }
    CogBuilder::new(64, 32, band)
        .tile_size(16)
        .nodata(-9999.0)
        .sparse()
        .georeference(0.0, 32.0, 1.0, 1.0)
        .write_to(&dir.path().join("sparse.tif"))
        .unwrap();

    let request = WindowRequest::new(BoundingBox::new(0.0, 0.0, 64.0, 32.0), CrsCode::Epsg4326, 64, 32);
    let values = read(&readers(dir.path()), &dem_dataset("sparse.tif"), request).await;

    assert_eq!(values[0], 5.0);
    assert_eq!(values[15], 5.0);
    assert!(values[16].is_nan());
    assert!(values[63].is_nan());
}

#[tokio::test]
async fn window_outside_source_is_all_nodata() {
    let dir = tempfile::tempdir().unwrap();
    CogBuilder::new(32, 32, vec![1.0; 32 * 32])
        .tile_size(16)
        .georeference(0.0, 32.0, 1.0, 1.0)
        .write_to(&dir.path().join("small.tif"))
        .unwrap();

    let request = WindowRequest::new(
        BoundingBox::new(100.0, 0.0, 110.0, 10.0),
        CrsCode::Epsg4326,
        8,
        8,
    );
    let grid = readers(dir.path())
        .read_window(&dem_dataset("small.tif"), &request, &CancellationToken::new())
        .await
        .unwrap();
    assert!(grid.is_all_nodata());
}

#[tokio::test]
async fn missing_band_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    global_cog().write_to(&dir.path().join("dem.tif")).unwrap();

    let mut dataset = dem_dataset("dem.tif");
    dataset.bands = vec![3];
    let request = WindowRequest::new(pixel_bbox(0, 0, 4, 4), CrsCode::Epsg4326, 4, 4);
    let err = readers(dir.path())
        .read_window(&dataset, &request, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::InvalidRequest(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn corrupt_file_is_decode_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("bad.tif"), b"definitely not a tiff file").unwrap();

    let request = WindowRequest::new(pixel_bbox(0, 0, 4, 4), CrsCode::Epsg4326, 4, 4);
    let err = readers(dir.path())
        .read_window(&dem_dataset("bad.tif"), &request, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::Decode(_)));
}

#[tokio::test]
async fn oversized_tile_header_is_decode_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut bytes = CogBuilder::new(32, 32, create_test_grid(32, 32))
        .georeference(-180.0, 90.0, 1.0, 1.0)
        .epsg(4326)
        .tile_size(16)
        .deflate()
        .build();

    // Rewrite TileWidth and TileLength (LONG, count 1) to 1 << 20
    for tag in [322u16, 323] {
        let mut entry = tag.to_le_bytes().to_vec();
        entry.extend_from_slice(&[4, 0, 1, 0, 0, 0]);
        let at = bytes
            .windows(entry.len())
            .position(|w| w == entry.as_slice())
            .unwrap();
        bytes[at + 8..at + 12].copy_from_slice(&(1u32 << 20).to_le_bytes());
    }
    std::fs::write(dir.path().join("huge.tif"), &bytes).unwrap();

    let request = WindowRequest::new(BoundingBox::new(-180.0, 58.0, -148.0, 90.0), CrsCode::Epsg4326, 8, 8);
    let err = readers(dir.path())
        .read_window(&dem_dataset("huge.tif"), &request, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::Decode(_)), "{:?}", err);
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn reads_from_object_storage() {
    let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
    let bytes = global_cog().overviews(1).build();
    store
        .put(&ObjectPath::from("cogs/dem.tif"), Bytes::from(bytes).into())
        .await
        .unwrap();

    let readers = SourceReaders::new(SourceStore::object_store(store), &SourceConfig::default());
    let request = WindowRequest::new(pixel_bbox(100, 100, 4, 4), CrsCode::Epsg4326, 4, 4);
    let values = read(&readers, &dem_dataset("cogs/dem.tif"), request).await;
    assert_eq!(values[0], 100_100.0);
    assert_eq!(values[5], 101_101.0);
}

#[tokio::test]
async fn web_mercator_request_over_geographic_source() {
    let dir = tempfile::tempdir().unwrap();
    CogBuilder::new(360, 180, vec![42.0; 360 * 180])
        .tile_size(64)
        .georeference(-180.0, 90.0, 1.0, 1.0)
        .epsg(4326)
        .write_to(&dir.path().join("const.tif"))
        .unwrap();

    let mut dataset = dem_dataset("const.tif");
    dataset.resampling = ResamplingMethod::Bilinear;
    // Web Mercator tile 1/0/0 (north-west quadrant)
    let half = 20037508.342789244;
    let request = WindowRequest::new(BoundingBox::new(-half, 0.0, 0.0, half), CrsCode::Epsg3857, 32, 32);
    let grid = readers(dir.path())
        .read_window(&dataset, &request, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(grid.crs, CrsCode::Epsg3857);
    assert!(grid.bands[0].iter().all(|v| *v == 42.0));
}

#[tokio::test]
async fn repeated_reads_hit_block_cache() {
    let dir = tempfile::tempdir().unwrap();
    global_cog().write_to(&dir.path().join("dem.tif")).unwrap();
    let readers = readers(dir.path());
    let dataset = dem_dataset("dem.tif");

    let request = WindowRequest::new(pixel_bbox(10, 10, 8, 8), CrsCode::Epsg4326, 8, 8);
    let first = read(&readers, &dataset, request.clone()).await;
    let second = read(&readers, &dataset, request).await;

    assert_eq!(first, second);
    assert!(readers.cache_stats().await.hits >= 1);
}
