use crate::backend::{ScannedSlot, SlotRecord, SlotStore, StorageResult};
#[cfg(feature = "fdb")]
use crate::FdbBackend;
use crate::MemoryBackend;
#[cfg(not(feature = "fdb"))]
use crate::backend::StorageError;
use crate::metrics::{Metrics, MetricsCollector};
use async_trait::async_trait;

/// Storage backend type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackendType {
    /// In-memory storage (for development and testing)
    Memory,
    /// FoundationDB storage (for production)
    FoundationDB,
}

/// Storage backend configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Backend type
    pub backend_type: StorageBackendType,
    /// FDB cluster file path (only used for FoundationDB backend)
    pub fdb_cluster_file: Option<String>,
}

impl StorageConfig {
    /// Create a new in-memory storage configuration
    pub fn memory() -> Self {
        Self { backend_type: StorageBackendType::Memory, fdb_cluster_file: None }
    }

    /// Create a new FoundationDB storage configuration
    pub fn foundationdb(cluster_file: Option<String>) -> Self {
        Self { backend_type: StorageBackendType::FoundationDB, fdb_cluster_file: cluster_file }
    }
}

/// Backend enum wrapper that implements SlotStore
#[derive(Clone)]
pub enum Backend {
    Memory(MemoryBackend),
    #[cfg(feature = "fdb")]
    FoundationDB(FdbBackend),
}

impl Backend {
    /// Short name of the active backend, for logs and health output
    pub fn kind(&self) -> &'static str {
        match self {
            Backend::Memory(_) => "memory",
            #[cfg(feature = "fdb")]
            Backend::FoundationDB(_) => "foundationdb",
        }
    }
}

impl MetricsCollector for Backend {
    fn metrics(&self) -> &Metrics {
        match self {
            Backend::Memory(b) => b.metrics(),
            #[cfg(feature = "fdb")]
            Backend::FoundationDB(b) => b.metrics(),
        }
    }
}

#[async_trait]
impl SlotStore for Backend {
    async fn scan_all(&self, namespace: &str) -> StorageResult<Vec<ScannedSlot>> {
        match self {
            Backend::Memory(b) => b.scan_all(namespace).await,
            #[cfg(feature = "fdb")]
            Backend::FoundationDB(b) => b.scan_all(namespace).await,
        }
    }

    async fn conditional_insert(
        &self,
        namespace: &str,
        record: SlotRecord,
        now: i64,
    ) -> StorageResult<()> {
        match self {
            Backend::Memory(b) => b.conditional_insert(namespace, record, now).await,
            #[cfg(feature = "fdb")]
            Backend::FoundationDB(b) => b.conditional_insert(namespace, record, now).await,
        }
    }

    async fn conditional_update(
        &self,
        namespace: &str,
        id: i64,
        expected_owner: &[u8],
        expires_at: i64,
    ) -> StorageResult<()> {
        match self {
            Backend::Memory(b) => {
                b.conditional_update(namespace, id, expected_owner, expires_at).await
            }
            #[cfg(feature = "fdb")]
            Backend::FoundationDB(b) => {
                b.conditional_update(namespace, id, expected_owner, expires_at).await
            }
        }
    }

    async fn health_check(&self) -> StorageResult<()> {
        match self {
            Backend::Memory(b) => b.health_check().await,
            #[cfg(feature = "fdb")]
            Backend::FoundationDB(b) => b.health_check().await,
        }
    }
}

/// Create a storage backend based on configuration
///
/// # Errors
///
/// Returns an error if the backend cannot be created, including when
/// FoundationDB is requested from a build without the `fdb` feature.
pub async fn create_storage_backend(config: &StorageConfig) -> StorageResult<Backend> {
    match config.backend_type {
        StorageBackendType::Memory => Ok(Backend::Memory(MemoryBackend::new())),
        #[cfg(feature = "fdb")]
        StorageBackendType::FoundationDB => {
            let backend = FdbBackend::with_cluster_file(config.fdb_cluster_file.clone()).await?;
            Ok(Backend::FoundationDB(backend))
        }
        #[cfg(not(feature = "fdb"))]
        StorageBackendType::FoundationDB => Err(StorageError::Unavailable(
            "FoundationDB support not compiled in (enable the `fdb` feature)".to_string(),
        )),
    }
}
