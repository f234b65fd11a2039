pub mod backend;
pub mod codec;
pub mod factory;
#[cfg(feature = "fdb")]
pub mod fdb;
pub mod memory;
pub mod metrics;

pub use backend::{ScannedSlot, SlotRecord, SlotStore, StorageError, StorageResult};
pub use factory::{create_storage_backend, Backend, StorageBackendType, StorageConfig};
#[cfg(feature = "fdb")]
pub use fdb::FdbBackend;
pub use memory::MemoryBackend;
pub use metrics::{Metrics, MetricsCollector, MetricsSnapshot, Operation};
