//! Storage metrics collection
//!
//! Per-backend counters for slot operations:
//!
//! - Operation counts and cumulative latencies (scan, insert, update)
//! - Conditional write conflicts
//! - Errors, split into transient and other
//!
//! Counters are process-local atomics; the core crate mirrors the interesting
//! ones into the global `metrics` registry for Prometheus export.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tracing::warn;

use crate::backend::StorageError;

/// Metrics snapshot for export
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Total SCAN operations
    pub scan_count: u64,
    /// Total conditional INSERT operations
    pub insert_count: u64,
    /// Total conditional UPDATE operations
    pub update_count: u64,
    /// Total health checks
    pub health_check_count: u64,

    /// Total SCAN latency in microseconds
    pub scan_latency_us: u64,
    /// Total INSERT latency in microseconds
    pub insert_latency_us: u64,
    /// Total UPDATE latency in microseconds
    pub update_latency_us: u64,

    /// Conditional writes rejected by their precondition
    pub conflict_count: u64,
    /// Transient errors (capacity, internal)
    pub transient_error_count: u64,
    /// All other errors
    pub error_count: u64,
}

impl MetricsSnapshot {
    /// Calculate average INSERT latency in microseconds
    pub fn avg_insert_latency_us(&self) -> f64 {
        if self.insert_count == 0 {
            0.0
        } else {
            self.insert_latency_us as f64 / self.insert_count as f64
        }
    }

    /// Calculate average UPDATE latency in microseconds
    pub fn avg_update_latency_us(&self) -> f64 {
        if self.update_count == 0 {
            0.0
        } else {
            self.update_latency_us as f64 / self.update_count as f64
        }
    }

    /// Fraction of conditional writes that hit a conflict (0.0 - 1.0)
    pub fn conflict_rate(&self) -> f64 {
        let writes = self.insert_count + self.update_count;
        if writes == 0 { 0.0 } else { self.conflict_count as f64 / writes as f64 }
    }

    /// Total operations count
    pub fn total_operations(&self) -> u64 {
        self.scan_count + self.insert_count + self.update_count
    }
}

/// Slot operation kinds tracked by [`Metrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Scan,
    Insert,
    Update,
    HealthCheck,
}

/// Metrics collector for storage operations
#[derive(Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    scan_count: AtomicU64,
    insert_count: AtomicU64,
    update_count: AtomicU64,
    health_check_count: AtomicU64,

    scan_latency_us: AtomicU64,
    insert_latency_us: AtomicU64,
    update_latency_us: AtomicU64,

    conflict_count: AtomicU64,
    transient_error_count: AtomicU64,
    error_count: AtomicU64,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed operation and classify its error, if any
    pub fn record<T>(&self, op: Operation, duration: Duration, result: &Result<T, StorageError>) {
        let micros = duration.as_micros() as u64;
        let inner = &self.inner;

        match op {
            Operation::Scan => {
                inner.scan_count.fetch_add(1, Ordering::Relaxed);
                inner.scan_latency_us.fetch_add(micros, Ordering::Relaxed);
            }
            Operation::Insert => {
                inner.insert_count.fetch_add(1, Ordering::Relaxed);
                inner.insert_latency_us.fetch_add(micros, Ordering::Relaxed);
            }
            Operation::Update => {
                inner.update_count.fetch_add(1, Ordering::Relaxed);
                inner.update_latency_us.fetch_add(micros, Ordering::Relaxed);
            }
            Operation::HealthCheck => {
                inner.health_check_count.fetch_add(1, Ordering::Relaxed);
            }
        }

        if let Err(e) = result {
            if e.is_conflict() {
                inner.conflict_count.fetch_add(1, Ordering::Relaxed);
            } else if e.is_transient() {
                inner.transient_error_count.fetch_add(1, Ordering::Relaxed);
            } else {
                inner.error_count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = &self.inner;
        MetricsSnapshot {
            scan_count: inner.scan_count.load(Ordering::Relaxed),
            insert_count: inner.insert_count.load(Ordering::Relaxed),
            update_count: inner.update_count.load(Ordering::Relaxed),
            health_check_count: inner.health_check_count.load(Ordering::Relaxed),
            scan_latency_us: inner.scan_latency_us.load(Ordering::Relaxed),
            insert_latency_us: inner.insert_latency_us.load(Ordering::Relaxed),
            update_latency_us: inner.update_latency_us.load(Ordering::Relaxed),
            conflict_count: inner.conflict_count.load(Ordering::Relaxed),
            transient_error_count: inner.transient_error_count.load(Ordering::Relaxed),
            error_count: inner.error_count.load(Ordering::Relaxed),
        }
    }

    /// Log current metrics at INFO level
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();

        if snapshot.total_operations() == 0 {
            return;
        }

        tracing::info!(
            scan_count = snapshot.scan_count,
            insert_count = snapshot.insert_count,
            update_count = snapshot.update_count,
            avg_insert_latency_us = snapshot.avg_insert_latency_us(),
            avg_update_latency_us = snapshot.avg_update_latency_us(),
            conflict_count = snapshot.conflict_count,
            transient_error_count = snapshot.transient_error_count,
            error_count = snapshot.error_count,
            "Storage metrics snapshot"
        );

        if snapshot.conflict_rate() > 0.5 {
            warn!(
                conflict_rate = snapshot.conflict_rate(),
                conflict_count = snapshot.conflict_count,
                "High slot conflict rate, range may be nearly exhausted"
            );
        }
    }
}

/// Trait for collecting metrics from storage backends
pub trait MetricsCollector {
    /// Get metrics instance
    fn metrics(&self) -> &Metrics;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = Metrics::new();

        metrics.record(Operation::Scan, Duration::from_micros(100), &Ok::<(), _>(()));
        metrics.record(Operation::Insert, Duration::from_micros(200), &Ok::<(), _>(()));
        metrics.record(Operation::Update, Duration::from_micros(150), &Ok::<(), _>(()));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.scan_count, 1);
        assert_eq!(snapshot.insert_count, 1);
        assert_eq!(snapshot.update_count, 1);
        assert_eq!(snapshot.insert_latency_us, 200);
        assert_eq!(snapshot.total_operations(), 3);
    }

    #[test]
    fn test_error_classification() {
        let metrics = Metrics::new();
        let d = Duration::from_micros(10);

        metrics.record::<()>(Operation::Insert, d, &Err(StorageError::Conflict));
        metrics.record::<()>(Operation::Update, d, &Err(StorageError::CapacityExceeded("x".into())));
        metrics.record::<()>(Operation::Update, d, &Err(StorageError::Timeout));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.conflict_count, 1);
        assert_eq!(snapshot.transient_error_count, 1);
        assert_eq!(snapshot.error_count, 1);
    }

    #[test]
    fn test_conflict_rate() {
        let metrics = Metrics::new();
        let d = Duration::from_micros(10);

        metrics.record::<()>(Operation::Insert, d, &Err(StorageError::Conflict));
        metrics.record::<()>(Operation::Insert, d, &Ok(()));
        metrics.record::<()>(Operation::Insert, d, &Ok(()));
        metrics.record::<()>(Operation::Update, d, &Ok(()));

        assert_eq!(metrics.snapshot().conflict_rate(), 0.25);
    }

    #[test]
    fn test_log_metrics_leaves_counters_untouched() {
        let metrics = Metrics::new();
        metrics.log_metrics();

        metrics.record::<()>(Operation::Insert, Duration::from_micros(10), &Err(StorageError::Conflict));
        metrics.log_metrics();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.insert_count, 1);
        assert_eq!(snapshot.conflict_count, 1);
        assert_eq!(snapshot.total_operations(), 1);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = Metrics::new();
        let clone = metrics.clone();

        clone.record(Operation::HealthCheck, Duration::ZERO, &Ok::<(), _>(()));
        assert_eq!(metrics.snapshot().health_check_count, 1);
    }
}
