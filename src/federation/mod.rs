//! Outbound federation delivery
//!
//! Handles:
//! - Delivery jobs and destination domain keys
//! - Per-domain circuit breaking with escalating backoff
//! - The shared delivery transport
//! - Worker pool sizing and the bounded dispatch queue

mod circuit;
mod clock;
mod domain;
mod job;
mod pool;
mod sizing;
mod transport;

pub use circuit::{BACKOFF_SCHEDULE, CircuitBreaker, DomainFailure, DomainStatus, backoff_for};
pub use clock::{Clock, ManualClock, SystemClock};
pub use domain::{domain_of, extract_domain};
pub use job::DeliveryJob;
pub use pool::{Admission, FanoutSummary, OutboundPool};
pub use sizing::{
    DEFAULT_WORKERS, FollowerCount, MAX_WORKERS, MIN_WORKERS, outbound_pool_size,
    workers_for_followers,
};
pub use transport::{DeliveryOutcome, DeliveryTransport};
