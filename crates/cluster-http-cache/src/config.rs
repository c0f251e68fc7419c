//! Cache configuration.
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `CLUSTER_CACHE_MODE` | `unified` or `divided` (default: `divided`) |
//! | `CLUSTER_CACHE_PARTITION_SIZE` | Body partition size in bytes (default: 2048) |
//! | `CLUSTER_CACHE_MAX_BODY_SIZE` | Largest cacheable body in bytes (default: 4 MiB) |
//! | `CLUSTER_CACHE_APP_PREFIX` | Key namespace prefix (default: `http-cache`) |
//! | `CLUSTER_CACHE_CLUSTER_NAME` | Cluster to join (default: `dev`) |
//! | `CLUSTER_CACHE_MEMBERS` | Comma separated member addresses |
//! | `CLUSTER_CACHE_CONNECTION_TIMEOUT_MS` | Connect timeout (default: 5000) |
//! | `CLUSTER_CACHE_OPERATION_TIMEOUT_MS` | Per-operation timeout (default: 1000) |
//! | `CLUSTER_CACHE_ENTRY_TTL` | Entry time-to-live in seconds, 0 disables (default: 300) |

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CacheError, CacheResult};

/// Default body partition size (2 KiB).
pub const DEFAULT_PARTITION_SIZE: u64 = 2 * 1024;

/// Upper bound for a single body partition (32 MiB).
pub const MAX_PARTITION_SIZE: u64 = 32 * 1024 * 1024;

/// Default largest cacheable body (4 MiB).
pub const DEFAULT_MAX_BODY_SIZE: u64 = 4 * 1024 * 1024;

/// Upper bound for a unified response record body (32 MiB).
pub const MAX_UNIFIED_BODY_SIZE: u64 = 32 * 1024 * 1024;

/// Upper bound for the total body of a divided entry (1 GiB).
pub const MAX_DIVIDED_BODY_SIZE: u64 = 1024 * 1024 * 1024;

/// Storage strategy for cached responses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// One record per response holding header and whole body.
    Unified,
    /// Header and fixed-size body partitions stored as separate entries.
    #[default]
    Divided,
}

impl CacheMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unified => "UNIFIED",
            Self::Divided => "DIVIDED",
        }
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheMode {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unified" => Ok(Self::Unified),
            "divided" => Ok(Self::Divided),
            other => Err(CacheError::Config {
                message: format!("unknown cache mode: {}", other),
            }),
        }
    }
}

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Storage strategy.
    #[serde(default)]
    pub mode: CacheMode,

    /// Body partition size in bytes (divided mode).
    #[serde(default = "default_partition_size")]
    pub partition_size: u64,

    /// Largest cacheable body in bytes.
    #[serde(default = "default_max_body_size")]
    pub max_body_size: u64,

    /// Prefix for every key written to the cluster.
    #[serde(default = "default_app_prefix")]
    pub app_prefix: String,

    /// Name of the cluster to join.
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    /// Member addresses used to reach the cluster.
    #[serde(default = "default_members")]
    pub members: Vec<String>,

    /// Connect timeout in milliseconds.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_ms: u64,

    /// Timeout for a single get/put/remove/lock call in milliseconds.
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_ms: u64,

    /// Time-to-live of written entries in seconds (0 = no expiry).
    #[serde(default = "default_entry_ttl")]
    pub entry_ttl_secs: u64,
}

fn default_partition_size() -> u64 {
    DEFAULT_PARTITION_SIZE
}

fn default_max_body_size() -> u64 {
    DEFAULT_MAX_BODY_SIZE
}

fn default_app_prefix() -> String {
    "http-cache".to_string()
}

fn default_cluster_name() -> String {
    "dev".to_string()
}

fn default_members() -> Vec<String> {
    vec!["127.0.0.1:5701".to_string()]
}

fn default_connection_timeout() -> u64 {
    5000
}

fn default_operation_timeout() -> u64 {
    1000
}

fn default_entry_ttl() -> u64 {
    300
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            mode: CacheMode::default(),
            partition_size: default_partition_size(),
            max_body_size: default_max_body_size(),
            app_prefix: default_app_prefix(),
            cluster_name: default_cluster_name(),
            members: default_members(),
            connection_timeout_ms: default_connection_timeout(),
            operation_timeout_ms: default_operation_timeout(),
            entry_ttl_secs: default_entry_ttl(),
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl CacheConfig {
    /// Create config from environment variables (see module docs).
    pub fn from_env() -> Self {
        Self {
            mode: std::env::var("CLUSTER_CACHE_MODE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            partition_size: env_u64("CLUSTER_CACHE_PARTITION_SIZE")
                .unwrap_or_else(default_partition_size),
            max_body_size: env_u64("CLUSTER_CACHE_MAX_BODY_SIZE")
                .unwrap_or_else(default_max_body_size),
            app_prefix: std::env::var("CLUSTER_CACHE_APP_PREFIX")
                .unwrap_or_else(|_| default_app_prefix()),
            cluster_name: std::env::var("CLUSTER_CACHE_CLUSTER_NAME")
                .unwrap_or_else(|_| default_cluster_name()),
            members: std::env::var("CLUSTER_CACHE_MEMBERS")
                .ok()
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|m| !m.is_empty())
                        .map(String::from)
                        .collect::<Vec<_>>()
                })
                .filter(|m| !m.is_empty())
                .unwrap_or_else(default_members),
            connection_timeout_ms: env_u64("CLUSTER_CACHE_CONNECTION_TIMEOUT_MS")
                .unwrap_or_else(default_connection_timeout),
            operation_timeout_ms: env_u64("CLUSTER_CACHE_OPERATION_TIMEOUT_MS")
                .unwrap_or_else(default_operation_timeout),
            entry_ttl_secs: env_u64("CLUSTER_CACHE_ENTRY_TTL").unwrap_or_else(default_entry_ttl),
        }
    }

    /// Parse a YAML document.
    pub fn from_yaml_str(yaml: &str) -> CacheResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read and parse a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> CacheResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| CacheError::Config {
            message: format!("failed to read {}: {}", path.display(), e),
        })?;
        Self::from_yaml_str(&content)
    }

    /// Set the storage mode.
    pub fn with_mode(mut self, mode: CacheMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the body partition size.
    pub fn with_partition_size(mut self, size: u64) -> Self {
        self.partition_size = size;
        self
    }

    /// Set the largest cacheable body.
    pub fn with_max_body_size(mut self, size: u64) -> Self {
        self.max_body_size = size;
        self
    }

    /// Set the key prefix.
    pub fn with_app_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.app_prefix = prefix.into();
        self
    }

    /// Set the cluster name.
    pub fn with_cluster_name(mut self, name: impl Into<String>) -> Self {
        self.cluster_name = name.into();
        self
    }

    /// Set the entry time-to-live.
    pub fn with_entry_ttl_secs(mut self, secs: u64) -> Self {
        self.entry_ttl_secs = secs;
        self
    }

    /// Set the bound on a single cluster operation.
    pub fn with_operation_timeout_ms(mut self, ms: u64) -> Self {
        self.operation_timeout_ms = ms;
        self
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn entry_ttl(&self) -> Option<Duration> {
        (self.entry_ttl_secs > 0).then(|| Duration::from_secs(self.entry_ttl_secs))
    }

    /// Effective storage parameters after clamping.
    pub fn storage_params(&self) -> StorageParams {
        StorageParams {
            mode: self.mode,
            partition_size: valid_partition_size(self.partition_size),
            max_body_size: valid_max_body_size(self.max_body_size, self.mode),
        }
    }
}

/// Storage parameters in effect for a running cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageParams {
    pub mode: CacheMode,
    pub partition_size: u64,
    pub max_body_size: u64,
}

pub(crate) fn valid_partition_size(size: u64) -> u64 {
    if size == 0 {
        warn!(
            configured = size,
            effective = DEFAULT_PARTITION_SIZE,
            "partition size must be positive, using default"
        );
        return DEFAULT_PARTITION_SIZE;
    }
    if size > MAX_PARTITION_SIZE {
        warn!(
            configured = size,
            effective = MAX_PARTITION_SIZE,
            "partition size exceeds upper bound, clamped"
        );
        return MAX_PARTITION_SIZE;
    }
    size
}

pub(crate) fn valid_max_body_size(size: u64, mode: CacheMode) -> u64 {
    let bound = match mode {
        CacheMode::Unified => MAX_UNIFIED_BODY_SIZE,
        CacheMode::Divided => MAX_DIVIDED_BODY_SIZE,
    };
    if size == 0 {
        warn!(
            configured = size,
            effective = DEFAULT_MAX_BODY_SIZE,
            "max body size must be positive, using default"
        );
        return DEFAULT_MAX_BODY_SIZE;
    }
    if size > bound {
        warn!(
            configured = size,
            effective = bound,
            mode = %mode,
            "max body size exceeds upper bound, clamped"
        );
        return bound;
    }
    size
}
