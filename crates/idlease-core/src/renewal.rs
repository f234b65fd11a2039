//! Lease renewal
//!
//! A held lease is kept alive by a background task that pushes the record's
//! expiry forward every `ttl * 2 / 5`, conditioned on the record still naming
//! this process as owner. Two failed ticks in a row still leave a fifth of the
//! TTL before the lease lapses.
//!
//! ```text
//!            tick ok / transient error
//!              ┌──────────────┐
//!              ▼              │
//!  Claimed ─► Renewing ───────┘
//!              │
//!              │ conflict or other error
//!              ▼
//!             Lost (task exits with the error)
//! ```
//!
//! Stopping the loop never deletes the record; the slot frees itself once the
//! last written expiry passes.

use std::sync::Arc;
use std::time::Duration;

use idlease_storage::{SlotStore, StorageError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::allocator::Lease;
use crate::clock::Clock;
use crate::config::LeaseConfig;
use crate::error::{Error, Result};
use crate::metrics::{self, RenewalOutcome};

/// Result of a single renewal tick that did not end the lease
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickResult {
    /// The record now expires at `expires_at`
    Renewed { expires_at: i64 },
    /// A transient store error; the record was left as it was
    Skipped { error: StorageError },
}

/// Extends the TTL of one held lease
pub struct LeaseRenewer<S: SlotStore> {
    store: S,
    config: LeaseConfig,
    lease: Lease,
    clock: Arc<dyn Clock>,
    /// Latest expiry known to be stored
    last_expires_at: i64,
}

impl<S: SlotStore + 'static> LeaseRenewer<S> {
    pub fn new(store: S, config: LeaseConfig, lease: Lease, clock: Arc<dyn Clock>) -> Self {
        let last_expires_at = lease.expires_at;
        Self { store, config, lease, clock, last_expires_at }
    }

    pub fn lease(&self) -> &Lease {
        &self.lease
    }

    /// Latest expiry confirmed by the store
    pub fn expires_at(&self) -> i64 {
        self.last_expires_at
    }

    /// Perform one conditional renewal
    ///
    /// The new expiry is `now + ttl`, but never earlier than the last expiry
    /// written, so a clock stepping backwards cannot shorten the lease.
    ///
    /// # Errors
    ///
    /// - [`Error::LeaseLost`] if the record is gone or owned by someone else
    /// - [`Error::Storage`] for any non-transient store error
    pub async fn renew_once(&mut self) -> Result<TickResult> {
        let id = self.lease.id;
        let now = self.clock.now();
        let expires_at =
            now.saturating_add(self.config.ttl_secs()).max(self.last_expires_at);

        let result = self
            .store
            .conditional_update(&self.config.table, id, self.lease.owner.as_bytes(), expires_at)
            .await;

        match result {
            Ok(()) => {
                self.last_expires_at = expires_at;
                metrics::record_renewal(RenewalOutcome::Renewed);
                metrics::set_lease_expires_at(expires_at);
                debug!(
                    id = id,
                    namespace = %self.config.table,
                    expires_at = expires_at,
                    "Lease renewed"
                );
                Ok(TickResult::Renewed { expires_at })
            }
            Err(StorageError::Conflict) => {
                metrics::record_renewal(RenewalOutcome::Lost);
                Err(Error::LeaseLost { id })
            }
            Err(e) if e.is_transient() => {
                metrics::record_renewal(RenewalOutcome::Skipped);
                warn!(
                    id = id,
                    namespace = %self.config.table,
                    error = %e,
                    expires_at = self.last_expires_at,
                    "Transient error renewing lease, will retry next tick"
                );
                Ok(TickResult::Skipped { error: e })
            }
            Err(e) => {
                metrics::record_renewal(RenewalOutcome::Error);
                Err(Error::Storage(e))
            }
        }
    }

    /// Start the renewal loop as a background task
    ///
    /// The first tick fires one renewal period after this call. Dropping the
    /// returned handle stops the loop just like [`RenewalHandle::stop`].
    pub fn start(mut self) -> RenewalHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let (expires_tx, expires_rx) = watch::channel(self.last_expires_at);
        let period = self.config.renewal_period().max(Duration::from_millis(1));
        let id = self.lease.id;

        info!(id = id, period_ms = period.as_millis() as u64, "Lease renewal started");

        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;

                    // Stop requested, or the handle was dropped
                    _ = shutdown_rx.changed() => {
                        info!(id = id, "Lease renewal stopped");
                        return Ok(());
                    }
                    _ = ticker.tick() => {
                        match self.renew_once().await {
                            Ok(TickResult::Renewed { expires_at }) => {
                                // Receivers may all be gone; the loop does not care
                                let _ = expires_tx.send(expires_at);
                            }
                            Ok(TickResult::Skipped { .. }) => {}
                            Err(e) => {
                                error!(
                                    id = id,
                                    error = %e,
                                    code = e.error_code(),
                                    "Lease renewal failed, ID can no longer be trusted"
                                );
                                return Err(e);
                            }
                        }
                    }
                }
            }
        });

        RenewalHandle { shutdown_tx, expires_at: expires_rx, task: Some(task) }
    }
}

/// Owner's handle on a running renewal loop
pub struct RenewalHandle {
    shutdown_tx: watch::Sender<bool>,
    expires_at: watch::Receiver<i64>,
    task: Option<JoinHandle<Result<()>>>,
}

impl RenewalHandle {
    /// Receiver for the most recently confirmed expiry
    pub fn expires_at(&self) -> watch::Receiver<i64> {
        self.expires_at.clone()
    }

    /// Whether the loop has already exited
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }

    /// Wait for the loop to exit on its own
    ///
    /// Resolves only on a fatal renewal error, which is returned. Cancel-safe,
    /// so it can sit in a `select!` next to a shutdown signal. Once the loop
    /// has been joined, further calls return `Ok(())` immediately.
    pub async fn wait(&mut self) -> Result<()> {
        let Some(task) = self.task.as_mut() else {
            return Ok(());
        };

        let joined = task.await;
        self.task = None;

        joined.map_err(|e| Error::Internal(format!("Renewal task failed: {}", e)))?
    }

    /// Stop the loop and wait for it to exit
    ///
    /// No renewal write is issued after this returns. If the loop had already
    /// died, its error is returned instead.
    pub async fn stop(mut self) -> Result<()> {
        // Send fails only if the task already exited
        let _ = self.shutdown_tx.send(true);
        self.wait().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::owner::OwnerToken;
    use idlease_storage::{MemoryBackend, MetricsCollector, Operation, SlotRecord};

    const NS: &str = "workers";
    const NOW: i64 = 1_700_000_000;
    const TTL: u64 = 10;

    struct Fixture {
        store: MemoryBackend,
        clock: ManualClock,
        lease: Lease,
    }

    fn fixture() -> Fixture {
        let store = MemoryBackend::new();
        let clock = ManualClock::new(NOW);
        let lease = Lease {
            id: 3,
            owner: OwnerToken::from_bytes(b"me".to_vec()),
            expires_at: NOW + TTL as i64,
        };
        store
            .put_record(NS, &SlotRecord::new(3, b"me".to_vec(), lease.expires_at))
            .unwrap();
        Fixture { store, clock, lease }
    }

    impl Fixture {
        fn renewer(&self) -> LeaseRenewer<MemoryBackend> {
            LeaseRenewer::new(
                self.store.clone(),
                LeaseConfig::new(NS).with_range(0, 9).with_ttl_seconds(TTL),
                self.lease.clone(),
                Arc::new(self.clock.clone()),
            )
        }

        fn stored_expiry(&self) -> i64 {
            self.store.get_record(NS, 3).unwrap().expires_at
        }
    }

    #[tokio::test]
    async fn test_renewal_moves_expiry_forward() {
        let fx = fixture();
        let mut renewer = fx.renewer();

        fx.clock.advance(4);
        let first = renewer.renew_once().await.unwrap();
        assert_eq!(first, TickResult::Renewed { expires_at: NOW + 14 });

        fx.clock.advance(4);
        let second = renewer.renew_once().await.unwrap();
        assert_eq!(second, TickResult::Renewed { expires_at: NOW + 18 });

        let record = fx.store.get_record(NS, 3).unwrap();
        assert_eq!(record, SlotRecord::new(3, b"me".to_vec(), NOW + 18));
        assert_eq!(renewer.expires_at(), NOW + 18);
    }

    #[tokio::test]
    async fn test_expiry_never_moves_backwards() {
        let fx = fixture();
        let mut renewer = fx.renewer();

        fx.clock.advance(5);
        renewer.renew_once().await.unwrap();
        assert_eq!(fx.stored_expiry(), NOW + 15);

        // Clock steps back by a minute
        fx.clock.set(NOW - 60);
        let result = renewer.renew_once().await.unwrap();

        assert_eq!(result, TickResult::Renewed { expires_at: NOW + 15 });
        assert_eq!(fx.stored_expiry(), NOW + 15);
    }

    #[tokio::test]
    async fn test_lost_lease_is_fatal_and_leaves_record() {
        let fx = fixture();
        let mut renewer = fx.renewer();
        let usurper = SlotRecord::new(3, b"usurper".to_vec(), NOW + 500);
        fx.store.put_record(NS, &usurper).unwrap();

        let result = renewer.renew_once().await;

        assert!(matches!(result, Err(Error::LeaseLost { id: 3 })));
        assert_eq!(fx.store.get_record(NS, 3), Some(usurper));
    }

    #[tokio::test]
    async fn test_transient_error_skips_tick() {
        let fx = fixture();
        let mut renewer = fx.renewer();
        fx.store.fail_next(Operation::Update, StorageError::CapacityExceeded("throttled".into()));

        fx.clock.advance(4);
        let result = renewer.renew_once().await.unwrap();
        assert!(matches!(result, TickResult::Skipped { .. }));
        assert_eq!(fx.stored_expiry(), NOW + TTL as i64);
        assert_eq!(renewer.lease().id, 3);

        let result = renewer.renew_once().await.unwrap();
        assert_eq!(result, TickResult::Renewed { expires_at: NOW + 14 });
    }

    #[tokio::test]
    async fn test_other_error_is_fatal() {
        let fx = fixture();
        let mut renewer = fx.renewer();
        fx.store.fail_next(Operation::Update, StorageError::Unavailable("no table".into()));

        let result = renewer.renew_once().await;

        assert!(matches!(result, Err(Error::Storage(StorageError::Unavailable(_)))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_renews_each_period() {
        let fx = fixture();
        let handle = fx.renewer().start();
        let mut expires = handle.expires_at();

        // Nothing happens before the first period (4s for a 10s TTL)
        time::sleep(Duration::from_millis(3_900)).await;
        assert_eq!(fx.store.metrics().snapshot().update_count, 0);

        fx.clock.advance(4);
        expires.changed().await.unwrap();
        assert_eq!(*expires.borrow(), NOW + 14);
        assert_eq!(fx.stored_expiry(), NOW + 14);

        fx.clock.advance(4);
        expires.changed().await.unwrap();
        assert_eq!(*expires.borrow(), NOW + 18);

        handle.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_prevents_further_writes() {
        let fx = fixture();
        let handle = fx.renewer().start();

        time::sleep(Duration::from_millis(4_100)).await;
        let updates = fx.store.metrics().snapshot().update_count;
        assert_eq!(updates, 1);

        handle.stop().await.unwrap();

        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fx.store.metrics().snapshot().update_count, updates);
        // Stopping releases nothing
        assert!(fx.store.get_record(NS, 3).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_survives_transient_errors() {
        let fx = fixture();
        fx.store.fail_next(Operation::Update, StorageError::Internal("500".into()));
        let handle = fx.renewer().start();

        time::sleep(Duration::from_millis(8_100)).await;

        assert!(!handle.is_finished());
        let snapshot = fx.store.metrics().snapshot();
        assert_eq!(snapshot.update_count, 2);
        assert_eq!(snapshot.transient_error_count, 1);

        handle.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_returns_fatal_error() {
        let fx = fixture();
        let mut handle = fx.renewer().start();
        fx.store.put_record(NS, &SlotRecord::new(3, b"usurper".to_vec(), NOW + 500)).unwrap();

        let result = handle.wait().await;

        assert!(matches!(result, Err(Error::LeaseLost { id: 3 })));
        assert!(handle.is_finished());
        // The error is only reported once
        assert!(handle.wait().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_after_failure_reports_error() {
        let fx = fixture();
        fx.store.fail_next(Operation::Update, StorageError::Timeout);
        let handle = fx.renewer().start();

        time::sleep(Duration::from_millis(4_100)).await;

        assert!(matches!(handle.stop().await, Err(Error::Storage(StorageError::Timeout))));
    }
}
