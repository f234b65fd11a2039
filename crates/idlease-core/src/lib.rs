pub mod allocator;
pub mod candidates;
pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod owner;
pub mod renewal;
pub mod startup;

pub use allocator::{Allocator, Lease};
pub use candidates::CandidateOrder;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{IdleaseConfig, LeaseConfig, ObservabilityConfig, ServerConfig, StorageConfig};
pub use error::{Error, Result};
pub use owner::OwnerToken;
pub use renewal::{LeaseRenewer, RenewalHandle, TickResult};
pub use startup::{ConfigEntry, ServiceInfo, StartupDisplay};
