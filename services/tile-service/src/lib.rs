//! Tile service core.
//!
//! Wires the cache, source readers, raster renderer and vector tile encoder
//! into the on-demand tile path, runs preseed jobs on top of the same path,
//! and exposes the job and cache administration operations.

pub mod admin;
pub mod config;
pub mod preseed;
pub mod state;
pub mod telemetry;
pub mod tiles;

pub use admin::TileAdmin;
pub use config::{LoggingConfig, PreseedConfig, QuotaConfig, ServiceConfig};
pub use preseed::{JobProgress, JobStatus, PreseedJob, PreseedOrchestrator, PreseedRequest, ZoomRange};
pub use state::{TileService, TileServiceBuilder};
pub use telemetry::init_tracing;
pub use tiles::{CacheStatus, TilePlan, TileRequest, TileResponse, TileSource};
