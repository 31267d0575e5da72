//! Service configuration.
//!
//! Loaded from a YAML file or from environment variables (after reading an
//! optional `.env`). Every section has defaults so partial files work.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;
use tracing::warn;

use renderer::RenderConfig;
use source_reader::SourceConfig;
use storage::{CacheBackendConfig, CacheQuota, QuotaMode};
use tile_common::{TileError, TileResult};
use vector_tile::VectorTileConfig;

/// Top-level configuration for the tile service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Backend holding rendered tiles
    pub cache: CacheBackendConfig,
    pub preseed: PreseedConfig,
    /// Source stores, read timeout and block cache
    pub source: SourceConfig,
    pub quota: QuotaConfig,
    pub render: RenderConfig,
    pub vector: VectorTileConfig,
    pub logging: LoggingConfig,
    /// Concurrent misses for one tile share a single generation
    pub deduplicate_inflight: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            cache: CacheBackendConfig::default(),
            preseed: PreseedConfig::default(),
            source: SourceConfig::default(),
            quota: QuotaConfig::default(),
            render: RenderConfig::default(),
            vector: VectorTileConfig::default(),
            logging: LoggingConfig::default(),
            deduplicate_inflight: true,
        }
    }
}

/// Bulk generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreseedConfig {
    /// Tiles generated concurrently within a job
    pub max_parallelism: usize,
    /// Tiles claimed between cancellation checks
    pub batch_size: usize,
    /// Extra attempts for a tile failing with a retryable error
    pub max_tile_retries: u32,
    /// Finished jobs kept for inspection
    pub job_retention_count: usize,
    /// Finished jobs older than this are dropped
    pub job_retention_hours: u64,
}

impl Default for PreseedConfig {
    fn default() -> Self {
        Self {
            max_parallelism: num_cpus::get(),
            batch_size: 64,
            max_tile_retries: 1,
            job_retention_count: 100,
            job_retention_hours: 24,
        }
    }
}

/// When quotas are enforced and the quota applied to datasets without one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub mode: QuotaMode,
    #[serde(rename = "default")]
    pub default_quota: Option<CacheQuota>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    pub level: String,
    /// JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from a YAML file. Missing sections take defaults.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: ServiceConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables.
    ///
    /// Reads `.env` first when present. Unset variables keep their defaults;
    /// unparseable ones are logged and ignored.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self {
            source: SourceConfig::from_env(),
            ..Self::default()
        };

        if env::var("TILE_CACHE_BACKEND").is_ok() || env::var("TILE_CACHE_ROOT").is_ok() {
            config.cache = CacheBackendConfig::from_env()
                .map_err(|e| anyhow::anyhow!("Invalid cache backend settings: {}", e))?;
        }

        env_override("PRESEED_MAX_PARALLELISM", &mut config.preseed.max_parallelism);
        env_override("PRESEED_BATCH_SIZE", &mut config.preseed.batch_size);
        env_override("PRESEED_MAX_TILE_RETRIES", &mut config.preseed.max_tile_retries);
        env_override("SOURCE_READ_TIMEOUT_SECS", &mut config.source.read_timeout_secs);
        env_override("QUOTA_MODE", &mut config.quota.mode);
        env_override("JPEG_QUALITY", &mut config.render.jpeg_quality);
        env_override("WEBP_QUALITY", &mut config.render.webp_quality);
        env_override("LOG_LEVEL", &mut config.logging.level);
        env_override("LOG_JSON", &mut config.logging.json);
        env_override("DEDUPLICATE_INFLIGHT", &mut config.deduplicate_inflight);

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> TileResult<()> {
        if self.preseed.max_parallelism == 0 {
            return Err(TileError::ConfigurationError(
                "preseed.max_parallelism must be greater than 0".to_string(),
            ));
        }
        if self.preseed.batch_size == 0 {
            return Err(TileError::ConfigurationError(
                "preseed.batch_size must be greater than 0".to_string(),
            ));
        }
        self.source.validate().map_err(TileError::from)?;
        self.render.validate().map_err(TileError::from)?;
        self.vector.validate().map_err(TileError::from)?;
        Ok(())
    }
}

fn env_override<T: FromStr>(name: &str, target: &mut T) {
    let Ok(raw) = env::var(name) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => warn!(var = name, value = %raw, "Ignoring unparseable environment variable"),
    }
}
