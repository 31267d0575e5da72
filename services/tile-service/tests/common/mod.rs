//! Shared harness for tile service integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use source_reader::{SampleGrid, SourceError, SourceReader, WindowRequest};
use storage::{CacheStorage, CachedTileEntry, ObjectInfo, ObjectStoreCache, StorageError};
use test_utils::{dem_dataset, elevation_style, landcover_style, InMemoryMetadataProvider};
use tile_common::{FeatureQuery, RasterDataset};
use tile_service::{PreseedJob, ServiceConfig, TileAdmin, TileService};

/// Source reader producing a value ramp, counting its calls.
#[derive(Default)]
pub struct SyntheticReader {
    calls: AtomicUsize,
    delay: Duration,
    failures_left: AtomicUsize,
}

impl SyntheticReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the first `n` reads as unavailable.
    pub fn failing_first(self, n: usize) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceReader for SyntheticReader {
    async fn read_window(
        &self,
        _dataset: &RasterDataset,
        request: &WindowRequest,
        cancel: &CancellationToken,
    ) -> source_reader::Result<SampleGrid> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(SourceError::Cancelled),
                _ = tokio::time::sleep(self.delay) => {}
            }
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SourceError::Unavailable("connection reset".to_string()));
        }

        let mut grid = SampleGrid::empty(request, 1);
        for (i, v) in grid.bands[0].iter_mut().enumerate() {
            *v = (i % 2000) as f32;
        }
        Ok(grid)
    }
}

/// Storage that reads through to memory but rejects every write.
pub struct ReadOnlyStorage {
    inner: ObjectStoreCache,
}

impl ReadOnlyStorage {
    pub fn new() -> Self {
        Self {
            inner: ObjectStoreCache::in_memory(),
        }
    }
}

#[async_trait]
impl CacheStorage for ReadOnlyStorage {
    async fn try_get(&self, path: &str) -> storage::Result<Option<CachedTileEntry>> {
        self.inner.try_get(path).await
    }

    async fn put(&self, _path: &str, _bytes: Bytes, _content_type: &str) -> storage::Result<()> {
        Err(StorageError::Backend("bucket is read-only".to_string()))
    }

    async fn delete(&self, path: &str) -> storage::Result<()> {
        self.inner.delete(path).await
    }

    async fn purge_by_prefix(&self, prefix: &str) -> storage::Result<u64> {
        self.inner.purge_by_prefix(prefix).await
    }

    async fn list(&self, prefix: &str) -> storage::Result<Vec<ObjectInfo>> {
        self.inner.list(prefix).await
    }

    fn name(&self) -> &'static str {
        "read-only"
    }
}

pub fn metadata() -> InMemoryMetadataProvider {
    InMemoryMetadataProvider::new()
        .with_dataset(dem_dataset("dem.tif"))
        .with_style(elevation_style())
        .with_style(landcover_style())
}

pub fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.preseed.max_parallelism = 4;
    config.preseed.batch_size = 8;
    config
}

pub struct Harness {
    pub service: Arc<TileService>,
    pub reader: Arc<SyntheticReader>,
    pub admin: TileAdmin,
}

pub struct HarnessBuilder {
    reader: SyntheticReader,
    storage: Arc<dyn CacheStorage>,
    metadata: InMemoryMetadataProvider,
    features: Option<Arc<dyn FeatureQuery>>,
    config: ServiceConfig,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            reader: SyntheticReader::new(),
            storage: Arc::new(ObjectStoreCache::in_memory()),
            metadata: metadata(),
            features: None,
            config: test_config(),
        }
    }

    pub fn reader(mut self, reader: SyntheticReader) -> Self {
        self.reader = reader;
        self
    }

    pub fn storage(mut self, storage: Arc<dyn CacheStorage>) -> Self {
        self.storage = storage;
        self
    }

    pub fn metadata(mut self, metadata: InMemoryMetadataProvider) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn features(mut self, features: Arc<dyn FeatureQuery>) -> Self {
        self.features = Some(features);
        self
    }

    pub fn config(mut self, f: impl FnOnce(&mut ServiceConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn build(self) -> Harness {
        test_utils::init_test_tracing();
        let reader = Arc::new(self.reader);
        let service = TileService::builder(self.storage, reader.clone(), Arc::new(self.metadata))
            .features(self.features)
            .config(&self.config)
            .build()
            .expect("service should build");
        let service = Arc::new(service);
        let admin = TileAdmin::new(service.clone(), &self.config);
        Harness {
            service,
            reader,
            admin,
        }
    }
}

/// Poll a job until it reaches a terminal state.
pub async fn wait_for_job(admin: &TileAdmin, id: Uuid) -> PreseedJob {
    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        let job = admin.get_job_status(id).await.expect("job should exist");
        if job.is_terminal() {
            return job;
        }
        assert!(Instant::now() < deadline, "job {} did not finish: {:?}", id, job);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
