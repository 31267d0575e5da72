//! Zarr V3 reader.
//!
//! Arrays are addressed through dimension names (`_ARRAY_DIMENSIONS`
//! attribute, falling back to `[.., y, x]`). Non-spatial dimensions are
//! pinned to one index each, so every chunk read is a 2D slab that goes
//! through the shared block cache.

use async_trait::async_trait;
use lru::LruCache;
use metrics::counter;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tile_common::{BoundingBox, CrsCode, RasterDataset};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use zarrs::array::{Array, DataType};
use zarrs::array_subset::ArraySubset;
use zarrs::storage::ReadableStorageTraits;

use crate::cache::{hash_path, BlockCache, BlockKey};
use crate::error::{Result, SourceError};
use crate::reader::SourceReader;
use crate::resample::{pixel_window, resample, PixelGrid, PixelRange, SourceWindow};
use crate::store::SourceStore;
use crate::types::{SampleGrid, WindowRequest};

type ZarrArray = Array<dyn ReadableStorageTraits>;

const BAND_DIMS: [&str; 2] = ["band", "bands"];

/// An opened array and the layout facts derived from its metadata.
struct OpenArray {
    array: ZarrArray,
    dims: Vec<String>,
    shape: Vec<u64>,
    chunk_shape: Vec<u64>,
    y_dim: usize,
    x_dim: usize,
    extent: Option<BoundingBox>,
    crs: Option<CrsCode>,
    fill_nodata: Option<f64>,
}

impl OpenArray {
    fn open(storage: Arc<dyn ReadableStorageTraits>) -> Result<Self> {
        let array = Array::open(storage, "/")
            .map_err(|e| SourceError::decode(format!("failed to open zarr array: {}", e)))?;

        let shape = array.shape().to_vec();
        if shape.len() < 2 {
            return Err(SourceError::unsupported(
                "zarr array must have at least 2 dimensions",
            ));
        }

        let origin = vec![0u64; shape.len()];
        let chunk_shape: Vec<u64> = array
            .chunk_grid()
            .chunk_shape(&origin, array.shape())
            .map_err(|e| SourceError::decode(e.to_string()))?
            .ok_or_else(|| SourceError::decode("missing chunk shape"))?
            .iter()
            .map(|c| c.get())
            .collect();

        let attrs = array.attributes();
        let dims: Vec<String> = attrs
            .get("_ARRAY_DIMENSIONS")
            .and_then(|v| v.as_array())
            .map(|names| {
                names
                    .iter()
                    .map(|n| n.as_str().unwrap_or_default().to_string())
                    .collect()
            })
            .filter(|names: &Vec<String>| names.len() == shape.len())
            .unwrap_or_else(|| {
                let mut names: Vec<String> =
                    (0..shape.len() - 2).map(|i| format!("dim_{}", i)).collect();
                names.push("y".to_string());
                names.push("x".to_string());
                names
            });

        let find = |candidates: &[&str]| dims.iter().position(|d| candidates.contains(&d.as_str()));
        let y_dim = find(&["y", "lat", "latitude"]).unwrap_or(shape.len() - 2);
        let x_dim = find(&["x", "lon", "longitude"]).unwrap_or(shape.len() - 1);
        if y_dim == x_dim {
            return Err(SourceError::decode("could not identify spatial dimensions"));
        }

        let extent = attrs
            .get("bbox")
            .and_then(|v| v.as_array())
            .and_then(|arr| {
                if arr.len() == 4 {
                    Some(BoundingBox::new(
                        arr[0].as_f64()?,
                        arr[1].as_f64()?,
                        arr[2].as_f64()?,
                        arr[3].as_f64()?,
                    ))
                } else {
                    None
                }
            });

        let crs = attrs
            .get("crs")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<CrsCode>().ok());

        let fill_nodata = match array.data_type() {
            DataType::Float32 => array
                .fill_value()
                .as_ne_bytes()
                .try_into()
                .map(f32::from_ne_bytes)
                .ok()
                .filter(|v| !v.is_nan())
                .map(|v| v as f64),
            _ => None,
        };

        Ok(Self {
            array,
            dims,
            shape,
            chunk_shape,
            y_dim,
            x_dim,
            extent,
            crs,
            fill_nodata,
        })
    }

    fn grid(&self, dataset: &RasterDataset) -> PixelGrid {
        let extent = self.extent.unwrap_or(dataset.spatial_extent);
        let (width, height) = (self.shape[self.x_dim], self.shape[self.y_dim]);
        PixelGrid {
            origin_x: extent.min_x,
            origin_y: extent.max_y,
            res_x: extent.width() / width as f64,
            res_y: extent.height() / height as f64,
            width,
            height,
            crs: self.crs.unwrap_or(dataset.crs),
        }
    }

    /// Index along every dimension except y and x, one entry per band.
    fn slices(
        &self,
        dataset: &RasterDataset,
        indices: &BTreeMap<String, u64>,
    ) -> Result<Vec<Vec<u64>>> {
        let mut base = vec![0u64; self.shape.len()];
        let mut band_dim = None;

        for (d, name) in self.dims.iter().enumerate() {
            if d == self.y_dim || d == self.x_dim {
                continue;
            }
            if BAND_DIMS.contains(&name.as_str()) && !indices.contains_key(name) {
                band_dim = Some(d);
                continue;
            }
            let index = match indices.get(name) {
                Some(&i) => i,
                None if self.shape[d] == 1 => 0,
                None => {
                    return Err(SourceError::invalid_request(format!(
                        "dimension '{}' has {} entries; an index is required",
                        name, self.shape[d]
                    )))
                }
            };
            if index >= self.shape[d] {
                return Err(SourceError::invalid_request(format!(
                    "index {} out of range for dimension '{}' of size {}",
                    index, name, self.shape[d]
                )));
            }
            base[d] = index;
        }

        let bands = dataset.band_indices();
        match band_dim {
            Some(d) => bands
                .iter()
                .map(|&b| {
                    if b as u64 >= self.shape[d] {
                        return Err(SourceError::invalid_request(format!(
                            "band {} requested but source has {} band(s)",
                            b, self.shape[d]
                        )));
                    }
                    let mut slice = base.clone();
                    slice[d] = b as u64;
                    Ok(slice)
                })
                .collect(),
            None => {
                if bands.iter().any(|&b| b != 0) {
                    return Err(SourceError::invalid_request(
                        "source has no band dimension; only band 0 exists",
                    ));
                }
                Ok(vec![base; bands.len()])
            }
        }
    }

    /// Read chunk `(cx, cy)` of one slice as row-major y/x samples.
    fn read_chunk(&self, slice: &[u64], cx: u64, cy: u64, nodata: Option<f64>) -> Result<Vec<f32>> {
        let (cw, ch) = (self.chunk_shape[self.x_dim], self.chunk_shape[self.y_dim]);
        let x0 = cx * cw;
        let y0 = cy * ch;
        let w = cw.min(self.shape[self.x_dim] - x0);
        let h = ch.min(self.shape[self.y_dim] - y0);

        let mut start = slice.to_vec();
        let mut extent = vec![1u64; self.shape.len()];
        start[self.x_dim] = x0;
        start[self.y_dim] = y0;
        extent[self.x_dim] = w;
        extent[self.y_dim] = h;

        let subset = ArraySubset::new_with_start_shape(start, extent)
            .map_err(|e| SourceError::decode(e.to_string()))?;

        let mut values = self.retrieve(&subset)?;
        if self.x_dim < self.y_dim {
            values = transpose(&values, w as usize, h as usize);
        }
        if let Some(nd) = nodata {
            for v in values.iter_mut() {
                if *v as f64 == nd {
                    *v = f32::NAN;
                }
            }
        }
        Ok(values)
    }

    fn retrieve(&self, subset: &ArraySubset) -> Result<Vec<f32>> {
        macro_rules! elements {
            ($t:ty) => {
                self.array
                    .retrieve_array_subset_elements::<$t>(subset)
                    .map(|v| v.into_iter().map(|x| x as f32).collect::<Vec<f32>>())
            };
        }
        let result = match self.array.data_type() {
            DataType::Float32 => self.array.retrieve_array_subset_elements::<f32>(subset),
            DataType::Float64 => elements!(f64),
            DataType::Int8 => elements!(i8),
            DataType::Int16 => elements!(i16),
            DataType::Int32 => elements!(i32),
            DataType::Int64 => elements!(i64),
            DataType::UInt8 => elements!(u8),
            DataType::UInt16 => elements!(u16),
            DataType::UInt32 => elements!(u32),
            DataType::UInt64 => elements!(u64),
            other => {
                return Err(SourceError::unsupported(format!(
                    "zarr data type {:?}",
                    other
                )))
            }
        };
        result.map_err(SourceError::from)
    }
}

/// Column-major (x, y) buffer to row-major (y, x).
fn transpose(values: &[f32], w: usize, h: usize) -> Vec<f32> {
    let mut out = vec![f32::NAN; w * h];
    for x in 0..w {
        for y in 0..h {
            out[y * w + x] = values[x * h + y];
        }
    }
    out
}

/// Reader for chunked Zarr V3 arrays.
pub struct ZarrReader {
    store: SourceStore,
    arrays: Mutex<LruCache<String, Arc<OpenArray>>>,
    blocks: Arc<RwLock<BlockCache>>,
}

impl ZarrReader {
    pub fn new(store: SourceStore, array_entries: usize, blocks: Arc<RwLock<BlockCache>>) -> Self {
        let capacity = NonZeroUsize::new(array_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            arrays: Mutex::new(LruCache::new(capacity)),
            blocks,
        }
    }

    async fn open(&self, locator: &str) -> Result<Arc<OpenArray>> {
        if let Some(array) = self.arrays.lock().await.get(locator) {
            return Ok(array.clone());
        }

        let storage = self.store.zarr_storage(locator)?;
        let array = tokio::task::spawn_blocking(move || OpenArray::open(storage))
            .await
            .map_err(|e| SourceError::decode(format!("open task failed: {}", e)))??;
        let array = Arc::new(array);
        debug!(locator, dims = ?array.dims, shape = ?array.shape, "Opened zarr array");

        self.arrays
            .lock()
            .await
            .put(locator.to_string(), array.clone());
        Ok(array)
    }

    async fn chunk(
        &self,
        array: &Arc<OpenArray>,
        key: BlockKey,
        slice: &[u64],
        nodata: Option<f64>,
    ) -> Result<Arc<Vec<f32>>> {
        if let Some(data) = self.blocks.write().await.get(&key) {
            counter!("source_block_cache_hits_total", "kind" => "zarr").increment(1);
            return Ok(data);
        }

        let (cx, cy) = (key.1 as u64, key.2 as u64);
        let reader = array.clone();
        let slice = slice.to_vec();
        let data = tokio::task::spawn_blocking(move || reader.read_chunk(&slice, cx, cy, nodata))
            .await
            .map_err(|e| SourceError::decode(format!("read task failed: {}", e)))??;
        counter!("source_chunks_read_total", "kind" => "zarr").increment(1);

        let data = Arc::new(data);
        self.blocks.write().await.insert(key, data.clone());
        Ok(data)
    }

    async fn assemble(
        &self,
        array: &Arc<OpenArray>,
        locator: &str,
        range: PixelRange,
        slices: &[Vec<u64>],
        nodata: Option<f64>,
        cancel: &CancellationToken,
    ) -> Result<SourceWindow> {
        let (cw, ch) = (array.chunk_shape[array.x_dim], array.chunk_shape[array.y_dim]);
        let width = array.shape[array.x_dim];
        let (w, h) = (range.width(), range.height());
        let mut bands = Vec::with_capacity(slices.len());

        for slice in slices {
            let slice_hash = hash_path(&format!("{}#{:?}#{:?}", locator, slice, nodata));
            let mut out = vec![f32::NAN; w * h];
            for cy in range.row0 / ch..=(range.row1 - 1) / ch {
                for cx in range.col0 / cw..=(range.col1 - 1) / cw {
                    if cancel.is_cancelled() {
                        return Err(SourceError::Cancelled);
                    }
                    let key = (slice_hash, cx as usize, cy as usize);
                    let chunk = self.chunk(array, key, slice, nodata).await?;

                    let chunk_w = cw.min(width - cx * cw);
                    let col_start = (cx * cw).max(range.col0);
                    let col_end = ((cx + 1) * cw).min(range.col1);
                    let row_start = (cy * ch).max(range.row0);
                    let row_end = ((cy + 1) * ch).min(range.row1);
                    let n = (col_end - col_start) as usize;
                    for row in row_start..row_end {
                        let src = ((row - cy * ch) * chunk_w + (col_start - cx * cw)) as usize;
                        let dst = (row - range.row0) as usize * w + (col_start - range.col0) as usize;
                        out[dst..dst + n].copy_from_slice(&chunk[src..src + n]);
                    }
                }
            }
            bands.push(out);
        }
        Ok(SourceWindow { range, bands })
    }
}

#[async_trait]
impl SourceReader for ZarrReader {
    #[instrument(skip(self, dataset, request, cancel), fields(dataset = %dataset.id))]
    async fn read_window(
        &self,
        dataset: &RasterDataset,
        request: &WindowRequest,
        cancel: &CancellationToken,
    ) -> Result<SampleGrid> {
        request.validate()?;
        let array = self.open(&dataset.locator).await?;
        let slices = array.slices(dataset, &request.dimension_indices)?;

        let grid = array.grid(dataset);
        let Some(range) = pixel_window(&grid, request) else {
            return Ok(SampleGrid::empty(request, slices.len()));
        };

        let nodata = dataset.nodata_value.or(array.fill_nodata);
        let window = self
            .assemble(&array, &dataset.locator, range, &slices, nodata, cancel)
            .await?;

        Ok(SampleGrid {
            width: request.width,
            height: request.height,
            bands: resample(&window, &grid, request, dataset.resampling),
            bbox: request.bbox,
            crs: request.crs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transpose() {
        // x-major 2x3: values[x * h + y]
        let xy = vec![0.0, 1.0, 2.0, 10.0, 11.0, 12.0];
        assert_eq!(
            transpose(&xy, 2, 3),
            vec![0.0, 10.0, 1.0, 11.0, 2.0, 12.0]
        );
    }
}
