use crate::backend::{ScannedSlot, SlotRecord, SlotStore, StorageError, StorageResult};
use crate::codec;
use crate::metrics::{Metrics, MetricsCollector, Operation};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

/// In-memory slot store using BTreeMap
///
/// This backend provides:
/// - Thread-safe concurrent access via RwLock, with each conditional write
///   evaluated and applied under a single write guard
/// - The same key/value layout as persistent backends
/// - Fault injection and raw writes for exercising failure paths
///
/// Clones share the same underlying map, so several allocators built from
/// clones of one backend behave like processes sharing one store.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Bytes>>>,
    faults: Arc<Mutex<VecDeque<(Operation, StorageError)>>>,
    metrics: Metrics,
}

impl MemoryBackend {
    /// Create a new in-memory storage backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `op` fail with `error` instead of touching the map
    ///
    /// Faults queue up per operation and are consumed in order.
    pub fn fail_next(&self, op: Operation, error: StorageError) {
        self.faults.lock().push_back((op, error));
    }

    /// Write a record unconditionally, bypassing slot preconditions
    pub fn put_record(&self, namespace: &str, record: &SlotRecord) -> StorageResult<()> {
        let key = codec::slot_key(namespace, record.id);
        let value = codec::encode_record(record)?;
        self.data.write().insert(key, Bytes::from(value));
        Ok(())
    }

    /// Write arbitrary bytes under an arbitrary key
    pub fn put_raw(&self, key: Vec<u8>, value: Vec<u8>) {
        self.data.write().insert(key, Bytes::from(value));
    }

    /// Read back the decoded record for `id`, if one is stored and well-formed
    pub fn get_record(&self, namespace: &str, id: i64) -> Option<SlotRecord> {
        let key = codec::slot_key(namespace, id);
        let data = self.data.read();
        data.get(&key).and_then(|v| codec::decode_record(v).ok())
    }

    /// Number of keys currently stored (any namespace)
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    fn take_fault(&self, op: Operation) -> Option<StorageError> {
        let mut faults = self.faults.lock();
        let pos = faults.iter().position(|(o, _)| *o == op)?;
        faults.remove(pos).map(|(_, e)| e)
    }

    fn scan_inner(&self, namespace: &str) -> StorageResult<Vec<ScannedSlot>> {
        if let Some(e) = self.take_fault(Operation::Scan) {
            return Err(e);
        }

        let prefix = codec::namespace_prefix(namespace);
        let end = codec::namespace_end(namespace);
        let data = self.data.read();

        let slots = data
            .range(prefix.clone()..end)
            .map(|(k, v)| codec::decode_scanned(&prefix, k, v))
            .collect();

        Ok(slots)
    }

    fn insert_inner(&self, namespace: &str, record: &SlotRecord, now: i64) -> StorageResult<()> {
        if let Some(e) = self.take_fault(Operation::Insert) {
            return Err(e);
        }

        let key = codec::slot_key(namespace, record.id);
        let value = codec::encode_record(record)?;

        let mut data = self.data.write();
        if let Some(existing) = data.get(&key) {
            // An unreadable record cannot be proven expired
            match codec::decode_record(existing) {
                Ok(current) if current.is_expired(now) => {}
                _ => return Err(StorageError::Conflict),
            }
        }

        data.insert(key, Bytes::from(value));
        Ok(())
    }

    fn update_inner(
        &self,
        namespace: &str,
        id: i64,
        expected_owner: &[u8],
        expires_at: i64,
    ) -> StorageResult<()> {
        if let Some(e) = self.take_fault(Operation::Update) {
            return Err(e);
        }

        let key = codec::slot_key(namespace, id);

        let mut data = self.data.write();
        let current = match data.get(&key).map(|v| codec::decode_record(v)) {
            Some(Ok(current)) => current,
            Some(Err(_)) | None => return Err(StorageError::Conflict),
        };

        if current.owner.as_ref() != expected_owner {
            return Err(StorageError::Conflict);
        }

        let updated = SlotRecord { expires_at, ..current };
        data.insert(key, Bytes::from(codec::encode_record(&updated)?));
        Ok(())
    }
}

impl MetricsCollector for MemoryBackend {
    fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

#[async_trait]
impl SlotStore for MemoryBackend {
    async fn scan_all(&self, namespace: &str) -> StorageResult<Vec<ScannedSlot>> {
        let start = Instant::now();
        let result = self.scan_inner(namespace);
        self.metrics.record(Operation::Scan, start.elapsed(), &result);
        result
    }

    async fn conditional_insert(
        &self,
        namespace: &str,
        record: SlotRecord,
        now: i64,
    ) -> StorageResult<()> {
        let start = Instant::now();
        let result = self.insert_inner(namespace, &record, now);
        self.metrics.record(Operation::Insert, start.elapsed(), &result);
        result
    }

    async fn conditional_update(
        &self,
        namespace: &str,
        id: i64,
        expected_owner: &[u8],
        expires_at: i64,
    ) -> StorageResult<()> {
        let start = Instant::now();
        let result = self.update_inner(namespace, id, expected_owner, expires_at);
        self.metrics.record(Operation::Update, start.elapsed(), &result);
        result
    }

    async fn health_check(&self) -> StorageResult<()> {
        let result = match self.take_fault(Operation::HealthCheck) {
            Some(e) => Err(e),
            None => Ok(()),
        };
        self.metrics.record(Operation::HealthCheck, std::time::Duration::ZERO, &result);
        result
    }
}
