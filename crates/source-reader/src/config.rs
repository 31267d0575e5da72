//! Configuration for the source readers.

use object_store::aws::AmazonS3Builder;
use object_store::ObjectStore;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, SourceError};
use crate::store::SourceStore;

/// Where dataset locators are resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceStoreConfig {
    /// Locators are paths, relative ones joined onto `root`.
    Filesystem {
        #[serde(default = "default_root")]
        root: PathBuf,
    },
    /// Locators are object keys in an S3-compatible bucket.
    S3 {
        bucket: String,
        #[serde(default)]
        endpoint: Option<String>,
        #[serde(default = "default_region")]
        region: String,
        #[serde(default)]
        access_key_id: Option<String>,
        #[serde(default)]
        secret_access_key: Option<String>,
        #[serde(default)]
        allow_http: bool,
    },
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Default for SourceStoreConfig {
    fn default() -> Self {
        SourceStoreConfig::Filesystem {
            root: default_root(),
        }
    }
}

impl SourceStoreConfig {
    pub fn build(&self) -> Result<SourceStore> {
        match self {
            SourceStoreConfig::Filesystem { root } => Ok(SourceStore::filesystem(root.clone())),
            SourceStoreConfig::S3 {
                bucket,
                endpoint,
                region,
                access_key_id,
                secret_access_key,
                allow_http,
            } => {
                let mut builder = AmazonS3Builder::new()
                    .with_bucket_name(bucket)
                    .with_region(region)
                    .with_allow_http(*allow_http);
                if let Some(endpoint) = endpoint {
                    builder = builder.with_endpoint(endpoint);
                }
                if let (Some(key), Some(secret)) = (access_key_id, secret_access_key) {
                    builder = builder
                        .with_access_key_id(key)
                        .with_secret_access_key(secret);
                }
                let s3 = builder.build().map_err(|e| {
                    SourceError::Config(format!("Failed to create S3 client: {}", e))
                })?;
                let store: Arc<dyn ObjectStore> = Arc::new(s3);
                Ok(SourceStore::object_store(store))
            }
        }
    }
}

/// Configuration for the source readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Upper bound on a single window read.
    pub read_timeout_secs: u64,

    /// Memory budget for decoded COG tiles and Zarr chunks, in megabytes.
    pub chunk_cache_mb: usize,

    /// Number of parsed COG headers / opened Zarr arrays kept.
    pub header_cache_entries: usize,

    pub store: SourceStoreConfig,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            read_timeout_secs: 30,
            chunk_cache_mb: 256,
            header_cache_entries: 64,
            store: SourceStoreConfig::default(),
        }
    }
}

impl SourceConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("SOURCE_READ_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                config.read_timeout_secs = secs;
            }
        }

        if let Ok(val) = std::env::var("CHUNK_CACHE_SIZE_MB") {
            if let Ok(size) = val.parse() {
                config.chunk_cache_mb = size;
            }
        }

        if let Ok(val) = std::env::var("SOURCE_HEADER_CACHE_ENTRIES") {
            if let Ok(n) = val.parse() {
                config.header_cache_entries = n;
            }
        }

        match std::env::var("SOURCE_BACKEND").as_deref() {
            Ok("s3") => {
                if let Ok(bucket) = std::env::var("SOURCE_S3_BUCKET") {
                    config.store = SourceStoreConfig::S3 {
                        bucket,
                        endpoint: std::env::var("S3_ENDPOINT").ok(),
                        region: std::env::var("S3_REGION").unwrap_or_else(|_| default_region()),
                        access_key_id: std::env::var("S3_ACCESS_KEY").ok(),
                        secret_access_key: std::env::var("S3_SECRET_KEY").ok(),
                        allow_http: std::env::var("S3_ALLOW_HTTP")
                            .map(|v| v.to_lowercase() == "true" || v == "1")
                            .unwrap_or(false),
                    };
                }
            }
            _ => {
                if let Ok(root) = std::env::var("SOURCE_ROOT") {
                    config.store = SourceStoreConfig::Filesystem {
                        root: PathBuf::from(root),
                    };
                }
            }
        }

        config
    }

    pub fn validate(&self) -> Result<()> {
        if self.read_timeout_secs == 0 {
            return Err(SourceError::Config(
                "read_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.header_cache_entries == 0 {
            return Err(SourceError::Config(
                "header_cache_entries must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn chunk_cache_bytes(&self) -> usize {
        self.chunk_cache_mb * 1024 * 1024
    }
}
