//! FoundationDB slot store
//!
//! Conditional writes run inside FDB transactions: the precondition read and
//! the write commit together, so two processes claiming the same slot are
//! serialized by FDB's optimistic concurrency control and exactly one commits.
//!
//! Keys live under a fixed root subspace followed by the shared slot key
//! layout from [`crate::codec`].

use std::{
    sync::{Arc, Once},
    time::Instant,
};

use async_trait::async_trait;
use foundationdb::{Database, FdbBindingError, RangeOption, tuple::Subspace};
use futures::StreamExt;
use tracing::debug;

use crate::backend::{ScannedSlot, SlotRecord, SlotStore, StorageError, StorageResult};
use crate::codec;
use crate::metrics::{Metrics, MetricsCollector, Operation};

// The FDB client library requires that select_api_version (called by boot())
// is only called once per process
static FDB_INIT: Once = Once::new();

/// FDB error codes that signal the cluster is shedding load
const FDB_PROCESS_BEHIND: i32 = 1037;
const FDB_TAG_THROTTLED: i32 = 1213;

/// Transaction timed out on the client side
const FDB_TRANSACTION_TIMED_OUT: i32 = 1031;

/// FoundationDB storage backend
#[derive(Clone)]
pub struct FdbBackend {
    db: Arc<Database>,
    root: Subspace,
    metrics: Metrics,
}

impl FdbBackend {
    /// Create a new FoundationDB backend with default cluster file
    pub async fn new() -> StorageResult<Self> {
        Self::with_cluster_file(None).await
    }

    /// Create a new FoundationDB backend with a specific cluster file
    ///
    /// # Errors
    ///
    /// Returns an error if FDB initialization or connection fails
    pub async fn with_cluster_file(cluster_file: Option<String>) -> StorageResult<Self> {
        FDB_INIT.call_once(|| {
            let network = unsafe { foundationdb::boot() };
            // The network thread must outlive every database handle
            std::mem::forget(network);
        });

        let db = if let Some(path) = cluster_file {
            Database::from_path(&path).map_err(|e| {
                StorageError::Connection(format!("Failed to open cluster file: {}", e))
            })?
        } else {
            Database::default().map_err(|e| {
                StorageError::Connection(format!("Failed to open default cluster: {}", e))
            })?
        };

        debug!("FoundationDB slot store initialized");

        Ok(Self { db: Arc::new(db), root: Subspace::from_bytes(b"idlease"), metrics: Metrics::new() })
    }

    fn full_key(&self, key: &[u8]) -> Vec<u8> {
        let mut full = self.root.bytes().to_vec();
        full.extend_from_slice(key);
        full
    }

    async fn scan_inner(&self, namespace: &str) -> StorageResult<Vec<ScannedSlot>> {
        let start = self.full_key(&codec::namespace_prefix(namespace));
        let end = self.full_key(&codec::namespace_end(namespace));
        let db = Arc::clone(&self.db);

        let all_kvs = db
            .run({
                let start = start.clone();
                let end = end.clone();
                move |trx, _maybe_committed| {
                    let start = start.clone();
                    let end = end.clone();
                    async move {
                        let range_opt = RangeOption::from((start.as_slice(), end.as_slice()));
                        // Snapshot read: the scan is advisory and must not
                        // conflict with concurrent claims
                        let mut range_stream = trx.get_ranges(range_opt, true);
                        let mut all_results = Vec::new();

                        while let Some(batch) = range_stream.next().await {
                            for kv in batch?.iter() {
                                all_results.push((kv.key().to_vec(), kv.value().to_vec()));
                            }
                        }

                        Ok(all_results)
                    }
                }
            })
            .await
            .map_err(|e| classify(e, "scan"))?;

        let root_len = self.root.bytes().len();
        let prefix = codec::namespace_prefix(namespace);
        Ok(all_kvs
            .into_iter()
            .map(|(key, value)| codec::decode_scanned(&prefix, &key[root_len..], &value))
            .collect())
    }

    async fn insert_inner(&self, namespace: &str, record: SlotRecord, now: i64) -> StorageResult<()> {
        let key = self.full_key(&codec::slot_key(namespace, record.id));
        let value = codec::encode_record(&record)?;
        let owner = record.owner.to_vec();
        let db = Arc::clone(&self.db);

        let claimed = db
            .run({
                let key = key.clone();
                let value = value.clone();
                let owner = owner.clone();
                move |trx, maybe_committed| {
                    let key = key.clone();
                    let value = value.clone();
                    let owner = owner.clone();
                    let maybe_committed: bool = maybe_committed.into();
                    async move {
                        let existing = trx.get(&key, false).await?;
                        match claim_decision(existing.as_deref(), &owner, now, maybe_committed) {
                            ClaimDecision::Write => {
                                trx.set(&key, &value);
                                Ok(true)
                            }
                            ClaimDecision::AlreadyOurs => Ok(true),
                            ClaimDecision::Occupied => Ok(false),
                        }
                    }
                }
            })
            .await
            .map_err(|e| classify(e, "conditional insert"))?;

        if claimed { Ok(()) } else { Err(StorageError::Conflict) }
    }

    async fn update_inner(
        &self,
        namespace: &str,
        id: i64,
        expected_owner: &[u8],
        expires_at: i64,
    ) -> StorageResult<()> {
        let key = self.full_key(&codec::slot_key(namespace, id));
        let expected_owner = expected_owner.to_vec();
        let db = Arc::clone(&self.db);

        let updated = db
            .run({
                let key = key.clone();
                let expected_owner = expected_owner.clone();
                move |trx, _maybe_committed| {
                    let key = key.clone();
                    let expected_owner = expected_owner.clone();
                    async move {
                        let current = match trx.get(&key, false).await? {
                            Some(bytes) => match codec::decode_record(&bytes) {
                                Ok(current) => current,
                                Err(_) => return Ok(false),
                            },
                            None => return Ok(false),
                        };

                        if current.owner.as_ref() != expected_owner.as_slice() {
                            return Ok(false);
                        }

                        let value = codec::encode_record(&SlotRecord { expires_at, ..current })
                            .map_err(|e| {
                                FdbBindingError::new_custom_error(Box::new(std::io::Error::other(
                                    e.to_string(),
                                )))
                            })?;
                        trx.set(&key, &value);
                        Ok(true)
                    }
                }
            })
            .await
            .map_err(|e| classify(e, "conditional update"))?;

        if updated { Ok(()) } else { Err(StorageError::Conflict) }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ClaimDecision {
    Write,
    AlreadyOurs,
    Occupied,
}

/// Decide a conditional insert from the value currently stored under the slot key
///
/// A record carrying our own owner only counts as ours when the previous
/// attempt may have committed; otherwise it is an ordinary live record.
fn claim_decision(
    existing: Option<&[u8]>,
    owner: &[u8],
    now: i64,
    maybe_committed: bool,
) -> ClaimDecision {
    let Some(bytes) = existing else {
        return ClaimDecision::Write;
    };

    match codec::decode_record(bytes) {
        Ok(current) if current.is_expired(now) => ClaimDecision::Write,
        Ok(current) if maybe_committed && current.owner.as_ref() == owner => {
            ClaimDecision::AlreadyOurs
        }
        _ => ClaimDecision::Occupied,
    }
}

/// Map an FDB failure onto the storage error taxonomy
fn classify(error: FdbBindingError, op: &str) -> StorageError {
    match error.get_fdb_error() {
        Some(e) if matches!(e.code(), FDB_PROCESS_BEHIND | FDB_TAG_THROTTLED) => {
            StorageError::CapacityExceeded(format!("FDB {} throttled: {}", op, e))
        }
        Some(e) if e.code() == FDB_TRANSACTION_TIMED_OUT => StorageError::Timeout,
        Some(e) if e.is_retryable() => {
            StorageError::Internal(format!("FDB {} failed: {}", op, e))
        }
        Some(e) => StorageError::Connection(format!("FDB {} failed: {}", op, e)),
        None => StorageError::Serialization(format!("FDB {} failed: {}", op, error)),
    }
}

impl MetricsCollector for FdbBackend {
    fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

#[async_trait]
impl SlotStore for FdbBackend {
    async fn scan_all(&self, namespace: &str) -> StorageResult<Vec<ScannedSlot>> {
        let start = Instant::now();
        let result = self.scan_inner(namespace).await;
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
        let result = self.insert_inner(namespace, record, now).await;
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
        let result = self.update_inner(namespace, id, expected_owner, expires_at).await;
        self.metrics.record(Operation::Update, start.elapsed(), &result);
        result
    }

    async fn health_check(&self) -> StorageResult<()> {
        let start = Instant::now();
        let key = self.full_key(b"__health_check__");
        let db = Arc::clone(&self.db);

        let result = db
            .run({
                let key = key.clone();
                move |trx, _maybe_committed| {
                    let key = key.clone();
                    async move {
                        trx.get(&key, true).await?;
                        Ok(())
                    }
                }
            })
            .await
            .map_err(|e| classify(e, "health check"));

        self.metrics.record(Operation::HealthCheck, start.elapsed(), &result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NS: &str = "fdb-test";

    fn stored(owner: &[u8], expires_at: i64) -> Vec<u8> {
        codec::encode_record(&SlotRecord::new(7, owner.to_vec(), expires_at)).unwrap()
    }

    #[test]
    fn test_claim_decision_free_and_expired_slots() {
        assert_eq!(claim_decision(None, b"me", 100, false), ClaimDecision::Write);

        let expired = stored(b"other", 100);
        assert_eq!(claim_decision(Some(&expired), b"me", 100, false), ClaimDecision::Write);
    }

    #[test]
    fn test_claim_decision_own_record_needs_maybe_committed() {
        let ours = stored(b"me", 200);

        assert_eq!(claim_decision(Some(&ours), b"me", 100, false), ClaimDecision::Occupied);
        assert_eq!(claim_decision(Some(&ours), b"me", 100, true), ClaimDecision::AlreadyOurs);
    }

    #[test]
    fn test_claim_decision_foreign_or_malformed_is_occupied() {
        let theirs = stored(b"other", 200);
        assert_eq!(claim_decision(Some(&theirs), b"me", 100, true), ClaimDecision::Occupied);
        assert_eq!(claim_decision(Some(b"not json"), b"me", 100, true), ClaimDecision::Occupied);
    }

    async fn create_test_backend() -> StorageResult<FdbBackend> {
        FdbBackend::new().await
    }

    #[tokio::test]
    #[ignore] // Requires running FDB instance
    async fn test_claim_and_renew() -> StorageResult<()> {
        let backend = create_test_backend().await?;
        let record = SlotRecord::new(42, b"owner-a".to_vec(), 2_000);

        backend.conditional_insert(NS, record, 1_000).await?;

        let rival = SlotRecord::new(42, b"owner-b".to_vec(), 2_000);
        assert_eq!(
            backend.conditional_insert(NS, rival, 1_000).await,
            Err(StorageError::Conflict)
        );

        backend.conditional_update(NS, 42, b"owner-a", 3_000).await?;
        assert_eq!(
            backend.conditional_update(NS, 42, b"owner-b", 4_000).await,
            Err(StorageError::Conflict)
        );

        let slots = backend.scan_all(NS).await?;
        assert!(slots.contains(&ScannedSlot::Record(SlotRecord::new(
            42,
            b"owner-a".to_vec(),
            3_000
        ))));

        Ok(())
    }

    #[tokio::test]
    #[ignore] // Requires running FDB instance
    async fn test_health_check() -> StorageResult<()> {
        let backend = create_test_backend().await?;
        backend.health_check().await?;
        Ok(())
    }
}
