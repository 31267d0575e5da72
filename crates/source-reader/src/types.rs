//! Window requests and the sample grids returned for them.

use std::collections::BTreeMap;
use tile_common::{BoundingBox, CrsCode};

use crate::error::{Result, SourceError};

/// Largest output dimension a single window may ask for.
pub const MAX_WINDOW_DIM: usize = 8192;

/// A request for `width` x `height` samples covering `bbox`.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowRequest {
    /// Output extent, in `crs` units.
    pub bbox: BoundingBox,
    pub crs: CrsCode,
    pub width: usize,
    pub height: usize,
    /// Index along each named non-spatial dimension (e.g. `time`).
    pub dimension_indices: BTreeMap<String, u64>,
}

impl WindowRequest {
    pub fn new(bbox: BoundingBox, crs: CrsCode, width: usize, height: usize) -> Self {
        Self {
            bbox,
            crs,
            width,
            height,
            dimension_indices: BTreeMap::new(),
        }
    }

    /// Select `index` along the dimension called `name`.
    pub fn with_index(mut self, name: impl Into<String>, index: u64) -> Self {
        self.dimension_indices.insert(name.into(), index);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(SourceError::invalid_request("output size must be non-zero"));
        }
        if self.width > MAX_WINDOW_DIM || self.height > MAX_WINDOW_DIM {
            return Err(SourceError::invalid_request(format!(
                "output size {}x{} exceeds {}",
                self.width, self.height, MAX_WINDOW_DIM
            )));
        }
        self.bbox
            .validate()
            .map_err(|e| SourceError::invalid_request(e.to_string()))?;
        if self.bbox.width() <= 0.0 || self.bbox.height() <= 0.0 {
            return Err(SourceError::invalid_request("bbox has zero area"));
        }
        Ok(())
    }

    /// Size of one output pixel in request units.
    pub fn pixel_size(&self) -> (f64, f64) {
        (
            self.bbox.width() / self.width as f64,
            self.bbox.height() / self.height as f64,
        )
    }

    /// Center of output pixel `(col, row)`; row 0 is the top edge.
    pub fn pixel_center(&self, col: usize, row: usize) -> (f64, f64) {
        let (dx, dy) = self.pixel_size();
        (
            self.bbox.min_x + (col as f64 + 0.5) * dx,
            self.bbox.max_y - (row as f64 + 0.5) * dy,
        )
    }
}

/// Per-band samples for a window, row-major from the top-left corner.
///
/// NaN marks nodata: readers convert the dataset's nodata value and any
/// area outside the source's coverage to NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleGrid {
    pub width: usize,
    pub height: usize,
    pub bands: Vec<Vec<f32>>,
    pub bbox: BoundingBox,
    pub crs: CrsCode,
}

impl SampleGrid {
    /// A grid with every sample set to nodata.
    pub fn empty(request: &WindowRequest, band_count: usize) -> Self {
        let band_count = band_count.max(1);
        Self {
            width: request.width,
            height: request.height,
            bands: vec![vec![f32::NAN; request.width * request.height]; band_count],
            bbox: request.bbox,
            crs: request.crs,
        }
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    pub fn band(&self, index: usize) -> Option<&[f32]> {
        self.bands.get(index).map(|b| b.as_slice())
    }

    pub fn get(&self, band: usize, col: usize, row: usize) -> Option<f32> {
        if col >= self.width || row >= self.height {
            return None;
        }
        self.bands.get(band).map(|b| b[row * self.width + col])
    }

    /// True when no band holds a single valid sample.
    pub fn is_all_nodata(&self) -> bool {
        self.bands.iter().all(|b| b.iter().all(|v| v.is_nan()))
    }

    /// Min and max of the valid samples of a band.
    pub fn value_range(&self, band: usize) -> Option<(f32, f32)> {
        let data = self.bands.get(band)?;
        data.iter()
            .filter(|v| !v.is_nan())
            .fold(None, |acc, &v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}
