use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use idlease_storage::{ScannedSlot, SlotRecord, SlotStore, StorageError};
use tracing::{debug, info, warn};

use crate::candidates::CandidateOrder;
use crate::clock::{Clock, SystemClock};
use crate::config::LeaseConfig;
use crate::error::{Error, Result};
use crate::metrics::{self, ClaimOutcome};
use crate::owner::OwnerToken;
use crate::renewal::LeaseRenewer;

/// An identifier held by this process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    /// The allocated identifier
    pub id: i64,
    /// Token written into the slot record
    pub owner: OwnerToken,
    /// Expiry written by the claim, in unix seconds
    pub expires_at: i64,
}

/// Claims one identifier from a bounded range
///
/// # Allocation Algorithm
///
/// 1. Scan the namespace and exclude IDs with a live or unreadable record
/// 2. Walk the range in a random order, skipping excluded IDs
/// 3. Conditionally insert a record for each candidate; the first insert
///    whose "absent or expired" precondition holds wins the ID
/// 4. A conflict means another process got there first, so move on
///
/// The scan is only a hint. Two allocators may both see an ID as free, but the
/// conditional insert lets exactly one of them have it.
pub struct Allocator<S: SlotStore> {
    store: S,
    config: LeaseConfig,
    owner: OwnerToken,
    clock: Arc<dyn Clock>,
}

impl<S: SlotStore> Allocator<S> {
    /// Create an allocator
    ///
    /// # Arguments
    ///
    /// * `store` - Slot store shared by every process allocating from the range
    /// * `config` - Namespace, range and TTL
    /// * `owner` - This process's owner token
    /// * `clock` - Time source for expiry
    pub fn new(store: S, config: LeaseConfig, owner: OwnerToken, clock: Arc<dyn Clock>) -> Self {
        Self { store, config, owner, clock }
    }

    /// Create an allocator that reads the system clock
    pub fn with_system_clock(store: S, config: LeaseConfig, owner: OwnerToken) -> Self {
        Self::new(store, config, owner, Arc::new(SystemClock))
    }

    pub fn owner(&self) -> &OwnerToken {
        &self.owner
    }

    pub fn config(&self) -> &LeaseConfig {
        &self.config
    }

    /// Claim an identifier from the configured range
    ///
    /// # Errors
    ///
    /// - [`Error::NoAvailableId`] if every ID in the range is held
    /// - [`Error::Storage`] if the scan or a claim fails for any reason other
    ///   than a lost race
    /// - [`Error::Config`] if the lease configuration is invalid
    pub async fn obtain_id(&self) -> Result<Lease> {
        self.config.validate()?;
        let started = Instant::now();
        let namespace = self.config.table.as_str();

        let excluded = self.discover_occupied(self.clock.now()).await?;
        debug!(
            namespace = namespace,
            excluded = excluded.len(),
            range_size = self.config.range_size(),
            "Discovery scan complete"
        );

        for offset in CandidateOrder::new(self.config.range_size()) {
            let id = self.config.min_id + offset as i64;
            if excluded.contains(&id) {
                continue;
            }

            if let Some(lease) = self.try_claim(id).await? {
                metrics::record_allocation(
                    lease.id,
                    lease.expires_at,
                    started.elapsed().as_secs_f64(),
                );
                info!(
                    id = lease.id,
                    namespace = namespace,
                    owner = %self.owner,
                    expires_at = lease.expires_at,
                    "Obtained ID"
                );
                return Ok(lease);
            }
        }

        warn!(
            namespace = namespace,
            min_id = self.config.min_id,
            max_id = self.config.max_id,
            "No available ID in range"
        );
        Err(Error::NoAvailableId { min_id: self.config.min_id, max_id: self.config.max_id })
    }

    /// Scan the namespace for IDs that must not be probed
    ///
    /// An ID is excluded when its record is unexpired at `now`, or when its
    /// record cannot be decoded. Expired records stay claimable.
    pub async fn discover_occupied(&self, now: i64) -> Result<HashSet<i64>> {
        let namespace = self.config.table.as_str();
        let slots = self.store.scan_all(namespace).await?;

        let mut excluded = HashSet::new();
        let mut skipped = 0;

        for slot in slots {
            match slot {
                ScannedSlot::Record(record) => {
                    if self.config.contains(record.id) && !record.is_expired(now) {
                        excluded.insert(record.id);
                    }
                }
                ScannedSlot::Malformed { id, reason } => {
                    if self.config.contains(id) {
                        warn!(
                            id = id,
                            namespace = namespace,
                            reason = %reason,
                            "Malformed slot record, treating ID as occupied"
                        );
                        excluded.insert(id);
                    }
                }
                ScannedSlot::Unidentified { key, reason } => {
                    skipped += 1;
                    warn!(
                        key = %String::from_utf8_lossy(&key),
                        namespace = namespace,
                        reason = %reason,
                        "Ignoring unidentifiable slot entry"
                    );
                }
            }
        }

        metrics::record_discovery(excluded.len(), skipped);
        Ok(excluded)
    }

    /// Attempt the conditional claim of a single ID
    ///
    /// Returns `Ok(None)` when the slot is held by someone else.
    async fn try_claim(&self, id: i64) -> Result<Option<Lease>> {
        let now = self.clock.now();
        let expires_at = now.saturating_add(self.config.ttl_secs());
        let record = SlotRecord::new(id, self.owner.to_bytes(), expires_at);

        match self.store.conditional_insert(&self.config.table, record, now).await {
            Ok(()) => {
                metrics::record_claim_attempt(ClaimOutcome::Claimed);
                Ok(Some(Lease { id, owner: self.owner.clone(), expires_at }))
            }
            Err(StorageError::Conflict) => {
                metrics::record_claim_attempt(ClaimOutcome::Conflict);
                debug!(id = id, namespace = %self.config.table, "ID already claimed, trying next");
                Ok(None)
            }
            Err(e) => {
                metrics::record_claim_attempt(ClaimOutcome::Error);
                warn!(id = id, namespace = %self.config.table, error = %e, "Claim failed");
                Err(Error::Storage(e))
            }
        }
    }
}

impl<S: SlotStore + Clone + 'static> Allocator<S> {
    /// Build the renewal loop for a lease obtained from this allocator
    pub fn renewer(&self, lease: Lease) -> LeaseRenewer<S> {
        LeaseRenewer::new(self.store.clone(), self.config.clone(), lease, Arc::clone(&self.clock))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::renewal::TickResult;
    use idlease_storage::{MemoryBackend, MetricsCollector, Operation, codec};

    const NS: &str = "workers";
    const NOW: i64 = 1_700_000_000;

    fn allocator(store: &MemoryBackend, min_id: i64, max_id: i64) -> Allocator<MemoryBackend> {
        let config = LeaseConfig::new(NS).with_range(min_id, max_id).with_ttl_seconds(60);
        Allocator::new(
            store.clone(),
            config,
            OwnerToken::generate(),
            Arc::new(ManualClock::new(NOW)),
        )
    }

    fn foreign(id: i64, expires_at: i64) -> SlotRecord {
        SlotRecord::new(id, b"someone-else".to_vec(), expires_at)
    }

    #[tokio::test]
    async fn test_obtain_from_empty_store() {
        let store = MemoryBackend::new();
        let allocator = allocator(&store, 0, 3);

        let lease = allocator.obtain_id().await.unwrap();

        assert!((0..=3).contains(&lease.id));
        assert_eq!(lease.expires_at, NOW + 60);
        assert_eq!(store.len(), 1);

        let record = store.get_record(NS, lease.id).unwrap();
        assert_eq!(record.owner.as_ref(), allocator.owner().as_bytes());
        assert_eq!(record.expires_at, NOW + 60);
    }

    #[tokio::test]
    async fn test_single_slot_held_by_other_owner() {
        let store = MemoryBackend::new();
        store.put_record(NS, &foreign(0, NOW + 30)).unwrap();

        let result = allocator(&store, 0, 0).obtain_id().await;

        assert!(matches!(result, Err(Error::NoAvailableId { min_id: 0, max_id: 0 })));
        assert_eq!(store.get_record(NS, 0), Some(foreign(0, NOW + 30)));
    }

    #[tokio::test]
    async fn test_full_range_makes_no_claim_attempts() {
        let store = MemoryBackend::new();
        for id in 10..=14 {
            store.put_record(NS, &foreign(id, NOW + 1)).unwrap();
        }

        let result = allocator(&store, 10, 14).obtain_id().await;

        assert!(matches!(result, Err(Error::NoAvailableId { .. })));
        let snapshot = store.metrics().snapshot();
        assert_eq!(snapshot.scan_count, 1);
        assert_eq!(snapshot.insert_count, 0);
    }

    #[tokio::test]
    async fn test_only_free_id_is_chosen() {
        let store = MemoryBackend::new();
        for id in [0, 1, 3] {
            store.put_record(NS, &foreign(id, NOW + 100)).unwrap();
        }

        let lease = allocator(&store, 0, 3).obtain_id().await.unwrap();

        assert_eq!(lease.id, 2);
        assert_eq!(store.metrics().snapshot().insert_count, 1);
    }

    #[tokio::test]
    async fn test_expired_record_is_claimable() {
        let store = MemoryBackend::new();
        // Expiry equal to now counts as expired
        store.put_record(NS, &foreign(5, NOW)).unwrap();

        let allocator = allocator(&store, 5, 5);
        let lease = allocator.obtain_id().await.unwrap();

        assert_eq!(lease.id, 5);
        let record = store.get_record(NS, 5).unwrap();
        assert_eq!(record.owner.as_ref(), allocator.owner().as_bytes());
    }

    #[tokio::test]
    async fn test_malformed_record_is_excluded() {
        let store = MemoryBackend::new();
        store.put_raw(codec::slot_key(NS, 1), b"{not json".to_vec());

        let allocator = allocator(&store, 0, 1);
        let excluded = allocator.discover_occupied(NOW).await.unwrap();
        assert_eq!(excluded, HashSet::from([1]));

        let lease = allocator.obtain_id().await.unwrap();
        assert_eq!(lease.id, 0);

        let single = self::allocator(&store, 1, 1).obtain_id().await;
        assert!(matches!(single, Err(Error::NoAvailableId { .. })));
    }

    #[tokio::test]
    async fn test_unidentifiable_and_out_of_range_entries_are_ignored() {
        let store = MemoryBackend::new();
        let mut bad_key = codec::namespace_prefix(NS);
        bad_key.extend_from_slice(b"not-a-number");
        store.put_raw(bad_key, b"{}".to_vec());
        store.put_record(NS, &foreign(99, NOW + 100)).unwrap();

        let excluded = allocator(&store, 0, 3).discover_occupied(NOW).await.unwrap();

        assert!(excluded.is_empty());
    }

    #[tokio::test]
    async fn test_conflict_moves_to_next_candidate() {
        let store = MemoryBackend::new();
        let allocator = allocator(&store, 0, 1);
        // The scan sees an empty namespace, then the first claim loses a race
        store.fail_next(Operation::Insert, StorageError::Conflict);

        let lease = allocator.obtain_id().await.unwrap();

        assert!((0..=1).contains(&lease.id));
        let snapshot = store.metrics().snapshot();
        assert_eq!(snapshot.insert_count, 2);
        assert_eq!(snapshot.conflict_count, 1);
    }

    #[tokio::test]
    async fn test_claim_error_aborts_allocation() {
        let store = MemoryBackend::new();
        store.fail_next(Operation::Insert, StorageError::Connection("reset".into()));

        let result = allocator(&store, 0, 9).obtain_id().await;

        assert!(matches!(result, Err(Error::Storage(StorageError::Connection(_)))));
        assert!(store.is_empty());
        assert_eq!(store.metrics().snapshot().insert_count, 1);
    }

    #[tokio::test]
    async fn test_transient_claim_error_also_aborts() {
        let store = MemoryBackend::new();
        store.fail_next(Operation::Insert, StorageError::CapacityExceeded("throttled".into()));

        let result = allocator(&store, 0, 9).obtain_id().await;

        assert!(matches!(result, Err(Error::Storage(StorageError::CapacityExceeded(_)))));
    }

    #[tokio::test]
    async fn test_scan_error_aborts_allocation() {
        let store = MemoryBackend::new();
        store.fail_next(Operation::Scan, StorageError::Timeout);

        let result = allocator(&store, 0, 9).obtain_id().await;

        assert!(matches!(result, Err(Error::Storage(StorageError::Timeout))));
        assert_eq!(store.metrics().snapshot().insert_count, 0);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let store = MemoryBackend::new();
        let allocator = Allocator::new(
            store.clone(),
            LeaseConfig::new("").with_range(0, 3),
            OwnerToken::generate(),
            Arc::new(ManualClock::new(NOW)),
        );

        assert!(matches!(allocator.obtain_id().await, Err(Error::Config(_))));
        assert_eq!(store.metrics().snapshot().scan_count, 0);
    }

    #[tokio::test]
    async fn test_oversized_ttl_is_rejected() {
        let store = MemoryBackend::new();
        let allocator = Allocator::new(
            store.clone(),
            LeaseConfig::new(NS).with_range(0, 0).with_ttl_seconds(u64::MAX),
            OwnerToken::generate(),
            Arc::new(ManualClock::new(NOW)),
        );

        assert!(matches!(allocator.obtain_id().await, Err(Error::Config(_))));
        assert!(store.get_record(NS, 0).is_none());
    }

    #[tokio::test]
    async fn test_renewer_extends_obtained_lease() {
        let store = MemoryBackend::new();
        let clock = ManualClock::new(NOW);
        let allocator = Allocator::new(
            store.clone(),
            LeaseConfig::new(NS).with_range(0, 3).with_ttl_seconds(60),
            OwnerToken::generate(),
            Arc::new(clock.clone()),
        );

        let lease = allocator.obtain_id().await.unwrap();
        let mut renewer = allocator.renewer(lease.clone());
        assert_eq!(renewer.lease(), &lease);

        clock.advance(24);
        let result = renewer.renew_once().await.unwrap();

        assert_eq!(result, TickResult::Renewed { expires_at: NOW + 24 + 60 });
        assert_eq!(store.get_record(NS, lease.id).unwrap().expires_at, NOW + 84);
        assert_eq!(renewer.expires_at(), NOW + 84);
    }

    #[tokio::test]
    async fn test_negative_range() {
        let store = MemoryBackend::new();

        let lease = allocator(&store, -3, -3).obtain_id().await.unwrap();

        assert_eq!(lease.id, -3);
        assert!(store.get_record(NS, -3).is_some());
    }
}
