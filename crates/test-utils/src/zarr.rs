//! Writer for small Zarr V3 arrays on the local filesystem.

use std::path::Path;
use std::sync::Arc;

use tile_common::BoundingBox;
use zarrs::array::{ArrayBuilder, DataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs_filesystem::FilesystemStore;

/// Description of an array to write. `data` is the whole array in C order
/// over `dims`.
#[derive(Debug, Clone)]
pub struct ZarrFixture {
    pub dims: Vec<String>,
    pub shape: Vec<u64>,
    pub chunks: Vec<u64>,
    pub data: Vec<f32>,
    pub bbox: Option<BoundingBox>,
    pub crs: Option<String>,
}

impl ZarrFixture {
    /// A 2D `[y, x]` array.
    pub fn grid(width: usize, height: usize, chunk: u64, data: Vec<f32>) -> Self {
        Self {
            dims: vec!["y".to_string(), "x".to_string()],
            shape: vec![height as u64, width as u64],
            chunks: vec![chunk, chunk],
            data,
            bbox: None,
            crs: None,
        }
    }

    /// A 3D `[time, y, x]` array built from one grid per time step.
    pub fn time_series(width: usize, height: usize, chunk: u64, steps: Vec<Vec<f32>>) -> Self {
        let n = steps.len() as u64;
        Self {
            dims: vec!["time".to_string(), "y".to_string(), "x".to_string()],
            shape: vec![n, height as u64, width as u64],
            chunks: vec![1, chunk, chunk],
            data: steps.into_iter().flatten().collect(),
            bbox: None,
            crs: None,
        }
    }

    pub fn with_bbox(mut self, bbox: BoundingBox) -> Self {
        self.bbox = Some(bbox);
        self
    }

    pub fn with_crs(mut self, crs: &str) -> Self {
        self.crs = Some(crs.to_string());
        self
    }

    pub fn write(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        std::fs::create_dir_all(path)?;
        let store = Arc::new(FilesystemStore::new(path)?);

        let mut attrs = serde_json::Map::new();
        attrs.insert(
            "_ARRAY_DIMENSIONS".to_string(),
            serde_json::json!(self.dims),
        );
        if let Some(bbox) = self.bbox {
            attrs.insert(
                "bbox".to_string(),
                serde_json::json!([bbox.min_x, bbox.min_y, bbox.max_x, bbox.max_y]),
            );
        }
        if let Some(crs) = &self.crs {
            attrs.insert("crs".to_string(), serde_json::json!(crs));
        }

        let array = ArrayBuilder::new(
            self.shape.clone(),
            DataType::Float32,
            self.chunks.clone().try_into()?,
            FillValue::from(f32::NAN),
        )
        .attributes(attrs)
        .build(store, "/")?;

        array.store_metadata()?;

        let subset =
            ArraySubset::new_with_start_shape(vec![0; self.shape.len()], self.shape.clone())?;
        array.store_array_subset_elements(&subset, &self.data)?;
        Ok(())
    }
}
