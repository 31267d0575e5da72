//! Window reads from tiled GeoTIFF (COG) and Zarr V3 raster sources.
//!
//! Both readers fetch only the bytes a window needs: a COG read picks the
//! coarsest adequate overview and range-reads the intersecting internal
//! tiles, a Zarr read retrieves the intersecting chunks of one slice.
//! Decoded blocks are shared through one memory-bounded LRU cache.
//!
//! ```text
//! SourceReaders::read_window(dataset, request, cancel)
//!   │
//!   ├─► CogReader   (source_kind = tiled_overview)
//!   │     header ─► level ─► tiles ─► BlockCache ─► resample
//!   │
//!   └─► ZarrReader  (source_kind = chunked_array)
//!         array ─► slice ─► chunks ─► BlockCache ─► resample
//! ```

pub mod cache;
pub mod cog;
pub mod config;
pub mod error;
pub mod range;
pub mod reader;
pub mod resample;
pub mod store;
pub mod types;
pub mod zarr;

pub use cache::{BlockCache, CacheStats};
pub use cog::CogReader;
pub use config::{SourceConfig, SourceStoreConfig};
pub use error::{Result, SourceError};
pub use range::{FileRangeReader, ObjectRangeReader, RangeReader};
pub use reader::{SourceReader, SourceReaders};
pub use store::{SourceStore, TokioBlockOn};
pub use types::{SampleGrid, WindowRequest, MAX_WINDOW_DIM};
pub use zarr::ZarrReader;
