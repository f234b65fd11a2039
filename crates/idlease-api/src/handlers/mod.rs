pub mod health;
pub mod lease;
pub mod metrics;

use std::sync::Arc;
use std::time::SystemTime;

use idlease_core::{Clock, Lease, OwnerToken, SystemClock};
use idlease_storage::Backend;
use tokio::sync::watch;

pub use health::{health_detailed, health_live, health_ready};
pub use lease::{get_id, get_lease};
pub use metrics::{init_exporter, metrics_handler};

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<Backend>,
    /// Namespace the identifier was allocated from
    pub namespace: Arc<str>,
    pub id: i64,
    pub owner: OwnerToken,
    /// Latest expiry confirmed by the renewal loop
    pub expires_at: watch::Receiver<i64>,
    pub metrics_enabled: bool,
    pub start_time: SystemTime,
    /// Time source used to report remaining lease time
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Create state for a held lease
    ///
    /// `expires_at` is normally [`idlease_core::RenewalHandle::expires_at`].
    pub fn new(
        storage: Arc<Backend>,
        namespace: impl Into<Arc<str>>,
        lease: &Lease,
        expires_at: watch::Receiver<i64>,
    ) -> Self {
        Self {
            storage,
            namespace: namespace.into(),
            id: lease.id,
            owner: lease.owner.clone(),
            expires_at,
            metrics_enabled: true,
            start_time: SystemTime::now(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Report lease time against `clock`, normally the allocator's clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }

    /// Most recently confirmed lease expiry
    pub fn current_expires_at(&self) -> i64 {
        *self.expires_at.borrow()
    }
}
