//! Preseed jobs: bulk generation of tiles into the cache ahead of demand.

pub mod job;
pub mod orchestrator;
pub mod registry;

pub use job::{JobProgress, JobStatus, PreseedJob, PreseedRequest, ZoomRange};
pub use orchestrator::PreseedOrchestrator;
pub use registry::JobRegistry;
