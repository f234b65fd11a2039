use std::sync::Once;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

static METRICS_INIT: Once = Once::new();

/// Initialize Prometheus metrics descriptions
///
/// This should be called once during application startup.
/// It registers all metric names and descriptions with the metrics registry.
pub fn init() {
    METRICS_INIT.call_once(|| {
        // Counter metrics
        describe_counter!(
            "idlease_claim_attempts_total",
            "Total number of conditional claims attempted, by outcome"
        );
        describe_counter!("idlease_renewals_total", "Total number of lease renewal ticks, by outcome");
        describe_counter!(
            "idlease_discovery_skipped_total",
            "Total number of scanned entries that could not be mapped to an ID"
        );

        // Histogram metrics
        describe_histogram!(
            "idlease_allocation_duration_seconds",
            "Time from discovery scan to a claimed ID, in seconds"
        );

        // Gauge metrics
        describe_gauge!("idlease_allocated_id", "Identifier currently held by this process");
        describe_gauge!("idlease_lease_expires_at", "Unix time at which the held lease expires");
        describe_gauge!(
            "idlease_discovery_excluded",
            "IDs excluded as occupied by the most recent discovery scan"
        );
    });
}

/// Outcome label for a single conditional claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    Conflict,
    Error,
}

impl ClaimOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimOutcome::Claimed => "claimed",
            ClaimOutcome::Conflict => "conflict",
            ClaimOutcome::Error => "error",
        }
    }
}

/// Outcome label for a renewal tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalOutcome {
    Renewed,
    Skipped,
    Lost,
    Error,
}

impl RenewalOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenewalOutcome::Renewed => "renewed",
            RenewalOutcome::Skipped => "skipped",
            RenewalOutcome::Lost => "lost",
            RenewalOutcome::Error => "error",
        }
    }
}

/// Record a conditional claim attempt
pub fn record_claim_attempt(outcome: ClaimOutcome) {
    counter!("idlease_claim_attempts_total", "outcome" => outcome.as_str()).increment(1);
}

/// Record a renewal tick
pub fn record_renewal(outcome: RenewalOutcome) {
    counter!("idlease_renewals_total", "outcome" => outcome.as_str()).increment(1);
}

/// Record the result of a discovery scan
///
/// # Arguments
///
/// * `excluded` - IDs treated as occupied
/// * `skipped` - entries whose key could not be mapped to an ID
pub fn record_discovery(excluded: usize, skipped: usize) {
    gauge!("idlease_discovery_excluded").set(excluded as f64);
    if skipped > 0 {
        counter!("idlease_discovery_skipped_total").increment(skipped as u64);
    }
}

/// Record a completed allocation
pub fn record_allocation(id: i64, expires_at: i64, duration_secs: f64) {
    histogram!("idlease_allocation_duration_seconds").record(duration_secs);
    gauge!("idlease_allocated_id").set(id as f64);
    gauge!("idlease_lease_expires_at").set(expires_at as f64);
}

/// Set the expiry of the held lease
pub fn set_lease_expires_at(expires_at: i64) {
    gauge!("idlease_lease_expires_at").set(expires_at as f64);
}
