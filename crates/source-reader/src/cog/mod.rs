//! Cloud-optimized GeoTIFF reader.
//!
//! A window read:
//! 1. Parses (or reuses) the header: IFDs, tile index, georeferencing
//! 2. Picks the coarsest overview that still meets the output resolution
//! 3. Fetches only the internal tiles intersecting the window, via byte ranges
//! 4. Decodes them through the shared block cache and resamples to the output grid

mod decode;
mod tiff;

pub use decode::decode_tile;
pub use tiff::{
    parse_header, CogHeader, Compression, Endian, GeoTransform, ImageLevel, SampleType,
    HEADER_PREFETCH,
};

use async_trait::async_trait;
use futures::future::try_join_all;
use lru::LruCache;
use metrics::counter;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tile_common::RasterDataset;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::cache::{hash_path, BlockCache};
use crate::error::{Result, SourceError};
use crate::range::RangeReader;
use crate::reader::SourceReader;
use crate::resample::{pixel_window, resample, PixelGrid, PixelRange, SourceWindow};
use crate::store::SourceStore;
use crate::types::{SampleGrid, WindowRequest};

/// Reader for tiled GeoTIFFs with internal overviews.
pub struct CogReader {
    store: SourceStore,
    headers: Mutex<LruCache<String, Arc<CogHeader>>>,
    blocks: Arc<RwLock<BlockCache>>,
}

impl CogReader {
    pub fn new(store: SourceStore, header_entries: usize, blocks: Arc<RwLock<BlockCache>>) -> Self {
        let capacity = NonZeroUsize::new(header_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            headers: Mutex::new(LruCache::new(capacity)),
            blocks,
        }
    }

    async fn header(&self, reader: &dyn RangeReader) -> Result<Arc<CogHeader>> {
        let id = reader.identifier().to_string();
        if let Some(header) = self.headers.lock().await.get(&id) {
            return Ok(header.clone());
        }

        let header = Arc::new(parse_header(reader).await?);
        self.headers.lock().await.put(id, header.clone());
        Ok(header)
    }

    /// Pixel grid of `level`, from the file's georeferencing when present
    /// and the dataset extent otherwise.
    fn level_grid(header: &CogHeader, level: usize, dataset: &RasterDataset) -> PixelGrid {
        let full = header.full();
        let crs = header.crs.unwrap_or(dataset.crs);
        let (origin_x, origin_y, full_res) = match header.geo {
            Some(geo) => (geo.origin_x, geo.origin_y, (geo.pixel_width, geo.pixel_height)),
            None => {
                let e = dataset.spatial_extent;
                (
                    e.min_x,
                    e.max_y,
                    (e.width() / full.width as f64, e.height() / full.height as f64),
                )
            }
        };
        let (res_x, res_y) = header.level_resolution(level, full_res);
        let l = &header.levels[level];
        PixelGrid {
            origin_x,
            origin_y,
            res_x,
            res_y,
            width: l.width,
            height: l.height,
            crs,
        }
    }

    /// Decoded tile `(tx, ty)` of `level`, one buffer per requested band.
    #[allow(clippy::too_many_arguments)]
    async fn tile(
        &self,
        reader: &dyn RangeReader,
        header: &CogHeader,
        level: usize,
        tx: u64,
        ty: u64,
        bands: &[usize],
        nodata: Option<f64>,
    ) -> Result<Vec<Arc<Vec<f32>>>> {
        let keys: Vec<_> = bands
            .iter()
            .map(|b| {
                let id = format!("{}#{}#{}#{:?}", reader.identifier(), level, b, nodata);
                (hash_path(&id), tx as usize, ty as usize)
            })
            .collect();

        {
            let mut cache = self.blocks.write().await;
            let cached: Vec<_> = keys.iter().map_while(|k| cache.get(k)).collect();
            if cached.len() == keys.len() {
                counter!("source_block_cache_hits_total", "kind" => "cog").increment(1);
                return Ok(cached);
            }
        }

        let l = &header.levels[level];
        let (offset, length) = l.tile_location(tx, ty)?;
        let decoded = if length == 0 {
            let pixels = (l.tile_width * l.tile_height) as usize;
            vec![vec![f32::NAN; pixels]; l.samples_per_pixel]
        } else {
            let raw = reader.read_range(offset, length as usize).await?;
            counter!("source_bytes_read_total", "kind" => "cog").increment(length);
            let level_def = l.clone();
            let endian = header.endian;
            tokio::task::spawn_blocking(move || decode_tile(&level_def, endian, &raw, nodata))
                .await
                .map_err(|e| SourceError::decode(format!("decode task failed: {}", e)))??
        };

        let blocks: Vec<Arc<Vec<f32>>> = bands
            .iter()
            .map(|&b| Arc::new(decoded[b].clone()))
            .collect();

        let mut cache = self.blocks.write().await;
        for (key, block) in keys.into_iter().zip(&blocks) {
            cache.insert(key, block.clone());
        }
        Ok(blocks)
    }

    /// Copy the tiles covering `range` into contiguous per-band buffers.
    #[allow(clippy::too_many_arguments)]
    async fn assemble(
        &self,
        reader: &dyn RangeReader,
        header: &CogHeader,
        level: usize,
        range: PixelRange,
        bands: &[usize],
        nodata: Option<f64>,
        cancel: &CancellationToken,
    ) -> Result<SourceWindow> {
        let l = &header.levels[level];
        let (tw, th) = (l.tile_width, l.tile_height);
        let tiles: Vec<(u64, u64)> = (range.row0 / th..=(range.row1 - 1) / th)
            .flat_map(|ty| (range.col0 / tw..=(range.col1 - 1) / tw).map(move |tx| (tx, ty)))
            .collect();

        if cancel.is_cancelled() {
            return Err(SourceError::Cancelled);
        }
        debug!(level, tiles = tiles.len(), "Fetching COG tiles");

        let fetched = try_join_all(
            tiles
                .iter()
                .map(|&(tx, ty)| self.tile(reader, header, level, tx, ty, bands, nodata)),
        )
        .await?;

        let (w, h) = (range.width(), range.height());
        let mut out = vec![vec![f32::NAN; w * h]; bands.len()];
        for (&(tx, ty), blocks) in tiles.iter().zip(&fetched) {
            let col_start = (tx * tw).max(range.col0);
            let col_end = ((tx + 1) * tw).min(range.col1);
            let row_start = (ty * th).max(range.row0);
            let row_end = ((ty + 1) * th).min(range.row1);
            for row in row_start..row_end {
                let src_row = (row - ty * th) as usize;
                let dst_row = (row - range.row0) as usize;
                let n = (col_end - col_start) as usize;
                let src = src_row * tw as usize + (col_start - tx * tw) as usize;
                let dst = dst_row * w + (col_start - range.col0) as usize;
                for (b, block) in blocks.iter().enumerate() {
                    out[b][dst..dst + n].copy_from_slice(&block[src..src + n]);
                }
            }
        }
        Ok(SourceWindow { range, bands: out })
    }
}

#[async_trait]
impl SourceReader for CogReader {
    #[instrument(skip(self, dataset, request, cancel), fields(dataset = %dataset.id))]
    async fn read_window(
        &self,
        dataset: &RasterDataset,
        request: &WindowRequest,
        cancel: &CancellationToken,
    ) -> Result<SampleGrid> {
        request.validate()?;
        let reader = self.store.range_reader(&dataset.locator)?;
        let header = self.header(reader.as_ref()).await?;

        let bands = dataset.band_indices();
        let spp = header.full().samples_per_pixel;
        if let Some(&bad) = bands.iter().find(|&&b| b >= spp) {
            return Err(SourceError::invalid_request(format!(
                "band {} requested but source has {} band(s)",
                bad, spp
            )));
        }
        if let Some(crs) = header.crs {
            if crs != dataset.crs {
                warn!(file_crs = %crs, dataset_crs = %dataset.crs, "COG CRS differs from dataset record; using file CRS");
            }
        }

        let full_grid = Self::level_grid(&header, 0, dataset);
        let src_bbox = request.bbox.transform(request.crs, full_grid.crs);
        let target = (src_bbox.width() / request.width as f64)
            .min(src_bbox.height() / request.height as f64);
        let level = header.select_level((full_grid.res_x, full_grid.res_y), target);
        let grid = Self::level_grid(&header, level, dataset);

        let Some(range) = pixel_window(&grid, request) else {
            return Ok(SampleGrid::empty(request, bands.len()));
        };

        let nodata = dataset.nodata_value.or(header.nodata);
        let window = self
            .assemble(reader.as_ref(), &header, level, range, &bands, nodata, cancel)
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

