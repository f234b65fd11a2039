use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Largest identifier range a single namespace may span
pub const MAX_RANGE_SIZE: u64 = 1 << 24;

/// Shortest TTL that still leaves room for a renewal tick before expiry
pub const MIN_TTL_SECONDS: u64 = 5;

/// Longest TTL accepted: one year
pub const MAX_TTL_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Root configuration for an idlease process
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IdleaseConfig {
    /// Lease and identifier range configuration
    #[serde(default)]
    pub lease: LeaseConfig,

    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Server/HTTP configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Identifier range and lease timing
///
/// Environment variables: `IDLEASE__LEASE__TABLE`, `IDLEASE__LEASE__MIN_ID`,
/// `IDLEASE__LEASE__MAX_ID`, `IDLEASE__LEASE__TTL_SECONDS`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseConfig {
    /// Namespace holding the slot records; processes sharing a table share a range
    #[serde(default)]
    pub table: String,

    /// Lowest identifier that may be allocated (inclusive)
    #[serde(default = "default_min_id")]
    pub min_id: i64,

    /// Highest identifier that may be allocated (inclusive)
    #[serde(default = "default_max_id")]
    pub max_id: i64,

    /// Lease time-to-live in seconds
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
}

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage backend type: "memory" or "foundationdb"
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// FoundationDB cluster file path (only used when backend = "foundationdb")
    pub fdb_cluster_file: Option<String>,
}

/// Server/HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_http_host")]
    pub http_host: String,

    /// HTTP server port
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable Prometheus metrics
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

// Default value functions
fn default_min_id() -> i64 {
    0
}

fn default_max_id() -> i64 {
    1023
}

fn default_ttl_seconds() -> u64 {
    600 // 10 minutes
}

fn default_storage_backend() -> String {
    "memory".to_string()
}

fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            table: String::new(),
            min_id: default_min_id(),
            max_id: default_max_id(),
            ttl_seconds: default_ttl_seconds(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { backend: default_storage_backend(), fdb_cluster_file: None }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { http_host: default_http_host(), http_port: default_http_port() }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { log_level: default_log_level(), metrics_enabled: default_metrics_enabled() }
    }
}

impl LeaseConfig {
    /// Lease config for `table` with the default range and TTL
    pub fn new(table: impl Into<String>) -> Self {
        Self { table: table.into(), ..Self::default() }
    }

    /// Builder-style range override
    pub fn with_range(mut self, min_id: i64, max_id: i64) -> Self {
        self.min_id = min_id;
        self.max_id = max_id;
        self
    }

    /// Builder-style TTL override
    pub fn with_ttl_seconds(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }

    /// Number of identifiers in `[min_id, max_id]`; zero for an inverted range
    pub fn range_size(&self) -> u64 {
        if self.max_id < self.min_id {
            return 0;
        }
        let size = self.max_id as i128 - self.min_id as i128 + 1;
        u64::try_from(size).unwrap_or(u64::MAX)
    }

    /// Whether `id` lies inside the configured range
    pub fn contains(&self, id: i64) -> bool {
        (self.min_id..=self.max_id).contains(&id)
    }

    /// TTL as signed seconds, for adding to unix timestamps
    pub fn ttl_secs(&self) -> i64 {
        i64::try_from(self.ttl_seconds).unwrap_or(i64::MAX)
    }

    /// Interval between renewal ticks: two fifths of the TTL
    pub fn renewal_period(&self) -> Duration {
        Duration::from_millis(self.ttl_seconds.saturating_mul(1000).saturating_mul(2) / 5)
    }

    /// Validate the lease section on its own
    pub fn validate(&self) -> Result<()> {
        if self.table.trim().is_empty() {
            return Err(Error::Config("lease.table cannot be empty".to_string()));
        }

        if self.min_id > self.max_id {
            return Err(Error::Config(format!(
                "lease.min_id ({}) must not exceed lease.max_id ({})",
                self.min_id, self.max_id
            )));
        }

        if self.range_size() > MAX_RANGE_SIZE {
            return Err(Error::Config(format!(
                "lease range [{}, {}] spans {} IDs, maximum is {}",
                self.min_id,
                self.max_id,
                self.range_size(),
                MAX_RANGE_SIZE
            )));
        }

        if self.ttl_seconds < MIN_TTL_SECONDS {
            return Err(Error::Config(format!(
                "lease.ttl_seconds must be at least {}, got {}",
                MIN_TTL_SECONDS, self.ttl_seconds
            )));
        }

        if self.ttl_seconds > MAX_TTL_SECONDS {
            return Err(Error::Config(format!(
                "lease.ttl_seconds must be at most {}, got {}",
                MAX_TTL_SECONDS, self.ttl_seconds
            )));
        }

        Ok(())
    }
}

impl IdleaseConfig {
    /// Load configuration with layered precedence: defaults → file → env vars
    ///
    /// 1. Hardcoded defaults (via `#[serde(default)]` annotations)
    /// 2. Values from the config file, if it exists
    /// 3. Environment variables prefixed `IDLEASE__`, e.g. `IDLEASE__LEASE__TABLE`
    ///
    /// Each layer only overrides properties that are explicitly set.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let builder =
            config::Config::builder().add_source(config::File::from(path.as_ref()).required(false));

        let builder = builder.add_source(
            config::Environment::with_prefix("IDLEASE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| Error::Config(format!("Failed to build config: {}", e)))?;

        config
            .try_deserialize()
            .map_err(|e| Error::Config(format!("Failed to deserialize config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.lease.validate()?;

        if self.storage.backend != "memory" && self.storage.backend != "foundationdb" {
            return Err(Error::Config(format!(
                "Invalid storage backend: {}. Must be 'memory' or 'foundationdb'",
                self.storage.backend
            )));
        }

        if self.storage.backend == "foundationdb" && self.storage.fdb_cluster_file.is_none() {
            return Err(Error::Config(
                "fdb_cluster_file is required when using FoundationDB backend".to_string(),
            ));
        }

        if self.storage.backend == "memory" {
            tracing::warn!(
                "Memory storage backend selected - leases are only exclusive within this process"
            );
        }

        if self.lease.range_size() == 1 {
            tracing::warn!(
                id = self.lease.min_id,
                "lease range holds a single ID; a second process will fail to start"
            );
        }

        Ok(())
    }
}
