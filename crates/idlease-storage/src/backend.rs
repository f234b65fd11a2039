use async_trait::async_trait;
use bytes::Bytes;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage operation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// Conditional write precondition did not hold
    #[error("Conditional check failed")]
    Conflict,

    /// Provisioned capacity or throughput exceeded
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// Connection or network error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal storage backend error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Operation timeout
    #[error("Operation timeout")]
    Timeout,

    /// Backend refused the request (misconfiguration, missing table, permissions)
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Whether a failed write may succeed if simply retried later
    ///
    /// Only capacity and internal server errors qualify; conflicts are not
    /// transient since the precondition reflects durable store state.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::CapacityExceeded(_) | StorageError::Internal(_))
    }

    /// Whether this is a precondition failure of a conditional write
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict)
    }
}

/// Persisted ownership record for a single identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRecord {
    /// Identifier this record reserves
    pub id: i64,
    /// Owner token of the current holder
    pub owner: Bytes,
    /// Expiry as unix seconds; the slot is logically free once `now >= expires_at`
    pub expires_at: i64,
}

impl SlotRecord {
    pub fn new(id: i64, owner: impl Into<Bytes>, expires_at: i64) -> Self {
        Self { id, owner: owner.into(), expires_at }
    }

    /// Check whether the lease has lapsed at `now` (unix seconds)
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

/// One entry returned by a namespace scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScannedSlot {
    /// A well-formed slot record
    Record(SlotRecord),
    /// The key names an identifier but the stored value could not be decoded
    Malformed { id: i64, reason: String },
    /// The key itself could not be mapped back to an identifier
    Unidentified { key: Bytes, reason: String },
}

/// Slot store abstraction
///
/// Every mutating operation is conditional. Implementations must evaluate the
/// precondition and apply the write atomically with respect to other callers,
/// including callers in other processes.
#[async_trait]
pub trait SlotStore: Send + Sync {
    /// List every slot in the namespace
    ///
    /// Best-effort: the listing does not need to be linearizable with
    /// concurrent writes.
    async fn scan_all(&self, namespace: &str) -> StorageResult<Vec<ScannedSlot>>;

    /// Create a slot record if the slot is free
    ///
    /// The slot is free when no record exists for `record.id`, or the existing
    /// record expired at `now`. Returns [`StorageError::Conflict`] otherwise.
    async fn conditional_insert(
        &self,
        namespace: &str,
        record: SlotRecord,
        now: i64,
    ) -> StorageResult<()>;

    /// Set `expires_at` on the slot if it is still owned by `expected_owner`
    ///
    /// Returns [`StorageError::Conflict`] if the record is missing or held by
    /// another owner; the record is left untouched in that case.
    async fn conditional_update(
        &self,
        namespace: &str,
        id: i64,
        expected_owner: &[u8],
        expires_at: i64,
    ) -> StorageResult<()>;

    /// Check if the backend is healthy and can accept requests
    async fn health_check(&self) -> StorageResult<()>;
}
