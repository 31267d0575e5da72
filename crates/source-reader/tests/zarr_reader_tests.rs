//! Zarr V3 window reads: spatial subsetting across chunks, non-spatial
//! dimension selection and chunk caching.

use source_reader::{SourceConfig, SourceError, SourceReader, SourceReaders, SourceStore, WindowRequest};
use test_utils::{create_constant_grid, create_test_grid, zarr_dataset, ZarrFixture};
use tile_common::{BoundingBox, CrsCode};
use tokio_util::sync::CancellationToken;

const WIDTH: usize = 100;
const HEIGHT: usize = 80;

/// 100 x 80 cells of 1 degree, value `col * 1000 + row`.
fn write_grid(root: &std::path::Path) {
    ZarrFixture::grid(WIDTH, HEIGHT, 32, create_test_grid(WIDTH, HEIGHT))
        .with_bbox(BoundingBox::new(0.0, -40.0, 100.0, 40.0))
        .write(&root.join("grid.zarr"))
        .expect("Failed to write Zarr");
}

fn readers(root: &std::path::Path) -> SourceReaders {
    SourceReaders::new(SourceStore::filesystem(root), &SourceConfig::default())
}

#[tokio::test]
async fn window_spanning_chunks_matches_source() {
    let dir = tempfile::tempdir().unwrap();
    write_grid(dir.path());

    // Columns 25..40 and rows 25..35 cross chunk boundaries at 32 in both axes
    let request = WindowRequest::new(
        BoundingBox::new(25.0, 5.0, 40.0, 15.0),
        CrsCode::Epsg4326,
        15,
        10,
    );
    let grid = readers(dir.path())
        .read_window(&zarr_dataset("grid.zarr"), &request, &CancellationToken::new())
        .await
        .unwrap();

    for row in 0..10 {
        for col in 0..15 {
            let expected = ((25 + col) * 1000 + 25 + row) as f32;
            assert_eq!(grid.get(0, col, row), Some(expected), "pixel ({}, {})", col, row);
        }
    }
}

#[tokio::test]
async fn partial_overlap_fills_nodata() {
    let dir = tempfile::tempdir().unwrap();
    write_grid(dir.path());

    // Right half lies east of the array
    let request = WindowRequest::new(
        BoundingBox::new(90.0, 0.0, 110.0, 10.0),
        CrsCode::Epsg4326,
        20,
        10,
    );
    let grid = readers(dir.path())
        .read_window(&zarr_dataset("grid.zarr"), &request, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(grid.get(0, 0, 0), Some((90 * 1000 + 30) as f32));
    assert!(grid.get(0, 10, 0).unwrap().is_nan());
    assert!(grid.get(0, 19, 9).unwrap().is_nan());
}

#[tokio::test]
async fn time_dimension_requires_an_index() {
    let dir = tempfile::tempdir().unwrap();
    ZarrFixture::time_series(
        16,
        16,
        8,
        vec![
            create_constant_grid(16, 16, 1.0),
            create_constant_grid(16, 16, 2.0),
            create_constant_grid(16, 16, 3.0),
        ],
    )
    .with_bbox(BoundingBox::new(0.0, 0.0, 16.0, 16.0))
    .write(&dir.path().join("series.zarr"))
    .unwrap();

    let readers = readers(dir.path());
    let dataset = zarr_dataset("series.zarr");
    let request = WindowRequest::new(BoundingBox::new(0.0, 0.0, 16.0, 16.0), CrsCode::Epsg4326, 4, 4);

    let err = readers
        .read_window(&dataset, &request, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::InvalidRequest(_)));

    let grid = readers
        .read_window(&dataset, &request.clone().with_index("time", 1), &CancellationToken::new())
        .await
        .unwrap();
    assert!(grid.bands[0].iter().all(|v| *v == 2.0));

    let err = readers
        .read_window(&dataset, &request.with_index("time", 7), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::InvalidRequest(_)));
}

#[tokio::test]
async fn dataset_nodata_value_is_masked() {
    let dir = tempfile::tempdir().unwrap();
    let mut data = create_constant_grid(16, 16, 7.0);
    data[0] = -1.0;
    ZarrFixture::grid(16, 16, 16, data)
        .with_bbox(BoundingBox::new(0.0, 0.0, 16.0, 16.0))
        .write(&dir.path().join("masked.zarr"))
        .unwrap();

    let mut dataset = zarr_dataset("masked.zarr");
    dataset.nodata_value = Some(-1.0);
    let request = WindowRequest::new(BoundingBox::new(0.0, 0.0, 16.0, 16.0), CrsCode::Epsg4326, 16, 16);
    let grid = readers(dir.path())
        .read_window(&dataset, &request, &CancellationToken::new())
        .await
        .unwrap();

    assert!(grid.get(0, 0, 0).unwrap().is_nan());
    assert_eq!(grid.get(0, 1, 0), Some(7.0));
}

#[tokio::test]
async fn extent_falls_back_to_dataset_record() {
    let dir = tempfile::tempdir().unwrap();
    ZarrFixture::grid(36, 18, 18, create_test_grid(36, 18))
        .write(&dir.path().join("nobbox.zarr"))
        .unwrap();

    // zarr_dataset covers the globe, so each cell is 10 degrees
    let request = WindowRequest::new(
        BoundingBox::new(-180.0, 80.0, -170.0, 90.0),
        CrsCode::Epsg4326,
        1,
        1,
    );
    let grid = readers(dir.path())
        .read_window(&zarr_dataset("nobbox.zarr"), &request, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(grid.get(0, 0, 0), Some(0.0));
}

#[tokio::test]
async fn missing_store_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let request = WindowRequest::new(BoundingBox::new(0.0, 0.0, 1.0, 1.0), CrsCode::Epsg4326, 4, 4);
    let err = readers(dir.path())
        .read_window(&zarr_dataset("absent.zarr"), &request, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn chunks_are_cached_between_reads() {
    let dir = tempfile::tempdir().unwrap();
    write_grid(dir.path());
    let readers = readers(dir.path());
    let dataset = zarr_dataset("grid.zarr");
    let request = WindowRequest::new(BoundingBox::new(0.0, 30.0, 10.0, 40.0), CrsCode::Epsg4326, 10, 10);

    readers
        .read_window(&dataset, &request, &CancellationToken::new())
        .await
        .unwrap();
    let misses = readers.cache_stats().await.misses;
    readers
        .read_window(&dataset, &request, &CancellationToken::new())
        .await
        .unwrap();

    let stats = readers.cache_stats().await;
    assert_eq!(stats.misses, misses);
    assert!(stats.hits >= 1);
}

#[tokio::test]
async fn corrupt_chunks_are_a_decode_error() {
    let dir = tempfile::tempdir().unwrap();
    write_grid(dir.path());
    for entry in walkdir::WalkDir::new(dir.path().join("grid.zarr/c")) {
        let entry = entry.unwrap();
        if entry.file_type().is_file() {
            std::fs::write(entry.path(), b"garbage").unwrap();
        }
    }

    let request = WindowRequest::new(BoundingBox::new(0.0, 0.0, 50.0, 20.0), CrsCode::Epsg4326, 10, 10);
    let err = readers(dir.path())
        .read_window(&zarr_dataset("grid.zarr"), &request, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::Decode(_)), "{:?}", err);
    assert!(!err.is_retryable());
}
