//! CLI configuration file.
//!
//! ```toml
//! [store]
//! chunk_size = 8388608
//! workers = 8
//! failure_policy = "fail_fast"
//! hash_algorithm = "blake3"
//!
//! [retry]
//! max_retries = 3
//! base_delay_ms = 100
//!
//! [storage]
//! data_dir = "/var/lib/cairn"
//! backend = "localfs"
//! ```

use anyhow::{Context, Result, bail};
use cairn_core::{FailurePolicy, RetryPolicy, StoreConfig};
use cairn_files::{DEFAULT_CHUNK_SIZE, HashAlgorithm, MIN_RECOMMENDED_CHUNK_SIZE};
use cairn_transport::TransportType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// `[store]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub chunk_size: usize,
    pub workers: usize,
    pub failure_policy: FailurePolicy,
    pub hash_algorithm: HashAlgorithm,
}

impl Default for StoreSection {
    fn default() -> Self {
        let defaults = StoreConfig::default();
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            workers: defaults.workers,
            failure_policy: defaults.failure_policy,
            hash_algorithm: defaults.hash_algorithm,
        }
    }
}

/// `[storage]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Root for chunk blobs (localfs backend) and manifests
    pub data_dir: PathBuf,
    /// `localfs` or `http`
    pub backend: String,
    /// Endpoint for the http backend
    pub base_url: Option<String>,
    /// Bearer token for the http backend
    pub bearer_token: Option<String>,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("cairn"),
            backend: TransportType::LocalFs.to_string(),
            base_url: None,
            bearer_token: None,
        }
    }
}

impl StorageSection {
    /// Directory holding chunk blobs for the localfs backend
    pub fn blob_dir(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }

    /// Directory holding manifests
    pub fn manifest_dir(&self) -> PathBuf {
        self.data_dir.join("manifests")
    }

    /// Parsed backend type
    pub fn transport_type(&self) -> Result<TransportType> {
        self.backend
            .parse()
            .with_context(|| format!("invalid storage.backend {:?}", self.backend))
    }
}

/// Whole configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreSection,
    pub retry: RetryPolicy,
    pub storage: StorageSection,
}

impl Config {
    /// `<config dir>/cairn/config.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cairn")
            .join("config.toml")
    }

    /// Load from `path`
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("failed to parse config {}", path.display()))
    }

    /// Load from the default path, or defaults if the file does not exist
    pub fn load_or_default() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Store configuration described by the file
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            chunk_size: self.store.chunk_size,
            workers: self.store.workers,
            failure_policy: self.store.failure_policy,
            hash_algorithm: self.store.hash_algorithm,
            retry: self.retry.clone(),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.store_config().validate()?;
        if self.store.chunk_size < MIN_RECOMMENDED_CHUNK_SIZE {
            bail!(
                "store.chunk_size {} is below the minimum of {} bytes",
                self.store.chunk_size,
                MIN_RECOMMENDED_CHUNK_SIZE
            );
        }
        if self.storage.transport_type()? == TransportType::Http
            && self.storage.base_url.is_none()
        {
            bail!("storage.backend = \"http\" requires storage.base_url");
        }
        Ok(())
    }
}
