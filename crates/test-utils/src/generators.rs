//! Test data generators for synthetic rasters and features.
//!
//! These generators create predictable, verifiable patterns that can be
//! used across the test suite.

use geo::{line_string, point, polygon};
use tile_common::FeatureRow;

/// Creates a test grid with predictable values.
///
/// Each cell value is calculated as: `col * 1000 + row`
///
/// This makes it easy to verify that data is being read correctly
/// by checking that grid[row][col] == col * 1000 + row.
///
/// # Example
///
/// ```
/// use test_utils::create_test_grid;
///
/// let grid = create_test_grid(10, 5);
/// assert_eq!(grid.len(), 50);
/// assert_eq!(grid[1], 1000.0); // col=1, row=0
/// assert_eq!(grid[10], 1.0);   // col=0, row=1
/// ```
pub fn create_test_grid(width: usize, height: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            data.push((col * 1000 + row) as f32);
        }
    }
    data
}

/// Creates an elevation-like grid: a single smooth hill peaking at `peak`
/// meters in the centre and falling to 0 at the corners.
pub fn create_elevation_grid(width: usize, height: usize, peak: f32) -> Vec<f32> {
    let mut data = Vec::with_capacity(width * height);
    let cx = width as f32 / 2.0;
    let cy = height as f32 / 2.0;
    let max_dist = (cx * cx + cy * cy).sqrt();

    for row in 0..height {
        for col in 0..width {
            let dx = col as f32 + 0.5 - cx;
            let dy = row as f32 + 0.5 - cy;
            let dist = (dx * dx + dy * dy).sqrt() / max_dist;
            data.push(peak * (1.0 - dist).max(0.0));
        }
    }
    data
}

/// A constant grid.
pub fn create_constant_grid(width: usize, height: usize, value: f32) -> Vec<f32> {
    vec![value; width * height]
}

/// Land cover codes 0, 1 and 2 in vertical stripes of equal width.
pub fn create_class_grid(width: usize, height: usize) -> Vec<f32> {
    let mut data = Vec::with_capacity(width * height);
    for _row in 0..height {
        for col in 0..width {
            data.push((col * 3 / width.max(1)) as f32);
        }
    }
    data
}

/// A few features around the origin (lon/lat): a city point, a road line
/// and a park polygon.
pub fn sample_features() -> Vec<FeatureRow> {
    vec![
        FeatureRow::new(point!(x: 10.0, y: 10.0))
            .with_id(1)
            .with_property("name", "Springfield")
            .with_property("population", 30_000i64),
        FeatureRow::new(line_string![(x: -20.0, y: -5.0), (x: 0.0, y: 5.0), (x: 20.0, y: 15.0)])
            .with_id(2)
            .with_property("name", "Route 1")
            .with_property("paved", true),
        FeatureRow::new(polygon![
            (x: -10.0, y: -10.0),
            (x: 10.0, y: -10.0),
            (x: 10.0, y: 10.0),
            (x: -10.0, y: 10.0),
            (x: -10.0, y: -10.0),
        ])
        .with_id(3)
        .with_property("name", "Central Park")
        .with_property("area_km2", 3.41),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elevation_grid_peaks_in_centre() {
        let grid = create_elevation_grid(10, 10, 1000.0);
        let centre = grid[5 * 10 + 5];
        assert!(centre > 850.0);
        assert!(grid[0] < 150.0);
    }

    #[test]
    fn test_class_grid_has_three_classes() {
        let grid = create_class_grid(9, 1);
        assert_eq!(grid, vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0]);
    }
}
