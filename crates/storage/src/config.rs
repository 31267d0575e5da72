//! Cache backend configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::backend::{CacheBackend, CacheStorage};
use crate::error::{Result, StorageError};
use crate::filesystem::FilesystemCache;
use crate::object_store::ObjectStoreCache;

/// Connection settings for an S3-compatible bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct S3CacheConfig {
    pub bucket: String,
    /// Custom endpoint (MinIO etc.). AWS when unset.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub allow_http: bool,
    /// Key prefix inside the bucket
    #[serde(default)]
    pub prefix: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Connection settings for an Azure Blob container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AzureCacheConfig {
    pub account: String,
    pub container: String,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
}

/// Which backend holds the tile cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheBackendConfig {
    Filesystem { root: PathBuf },
    S3(S3CacheConfig),
    Azure(AzureCacheConfig),
    Memory,
}

impl Default for CacheBackendConfig {
    fn default() -> Self {
        CacheBackendConfig::Filesystem {
            root: PathBuf::from("./tile-cache"),
        }
    }
}

impl CacheBackendConfig {
    /// Read backend settings from environment variables.
    ///
    /// `TILE_CACHE_BACKEND` selects `filesystem` (default), `s3`, `azure` or
    /// `memory`; the remaining variables fill in that backend's settings.
    pub fn from_env() -> Result<Self> {
        let kind = std::env::var("TILE_CACHE_BACKEND").unwrap_or_else(|_| "filesystem".to_string());
        let env = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        match kind.to_lowercase().as_str() {
            "filesystem" | "fs" | "file" => Ok(CacheBackendConfig::Filesystem {
                root: env("TILE_CACHE_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("./tile-cache")),
            }),
            "s3" | "minio" => Ok(CacheBackendConfig::S3(S3CacheConfig {
                bucket: env("S3_BUCKET")
                    .ok_or_else(|| StorageError::Config("S3_BUCKET is required".to_string()))?,
                endpoint: env("S3_ENDPOINT"),
                region: env("S3_REGION").unwrap_or_else(default_region),
                access_key_id: env("S3_ACCESS_KEY"),
                secret_access_key: env("S3_SECRET_KEY"),
                allow_http: env("S3_ALLOW_HTTP")
                    .map(|v| v.to_lowercase() == "true" || v == "1")
                    .unwrap_or(false),
                prefix: env("TILE_CACHE_PREFIX"),
            })),
            "azure" => Ok(CacheBackendConfig::Azure(AzureCacheConfig {
                account: env("AZURE_STORAGE_ACCOUNT").ok_or_else(|| {
                    StorageError::Config("AZURE_STORAGE_ACCOUNT is required".to_string())
                })?,
                container: env("AZURE_STORAGE_CONTAINER").ok_or_else(|| {
                    StorageError::Config("AZURE_STORAGE_CONTAINER is required".to_string())
                })?,
                access_key: env("AZURE_STORAGE_KEY"),
                prefix: env("TILE_CACHE_PREFIX"),
            })),
            "memory" => Ok(CacheBackendConfig::Memory),
            other => Err(StorageError::Config(format!(
                "unknown TILE_CACHE_BACKEND '{}'",
                other
            ))),
        }
    }

    /// Construct the configured backend.
    pub fn build(&self) -> Result<CacheBackend> {
        let backend = match self {
            CacheBackendConfig::Filesystem { root } => {
                CacheBackend::Filesystem(FilesystemCache::new(root.clone())?)
            }
            CacheBackendConfig::S3(cfg) => CacheBackend::ObjectStore(ObjectStoreCache::s3(cfg)?),
            CacheBackendConfig::Azure(cfg) => {
                CacheBackend::ObjectStore(ObjectStoreCache::azure(cfg)?)
            }
            CacheBackendConfig::Memory => CacheBackend::ObjectStore(ObjectStoreCache::in_memory()),
        };
        info!(backend = backend.name(), "Tile cache backend ready");
        Ok(backend)
    }

    /// Construct the backend behind a shared trait object.
    pub fn build_shared(&self) -> Result<Arc<dyn CacheStorage>> {
        Ok(Arc::new(self.build()?))
    }
}
