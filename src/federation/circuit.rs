//! Per-domain circuit breaker
//!
//! Tracks delivery failures per destination domain and suppresses new jobs
//! for a domain while it is inside its backoff window.
//!
//! ```text
//!   HEALTHY (no record) ──failure──▶ BACKING OFF (count = 1, 1 min)
//!        ▲                               │   ▲
//!        │                       failure │   │ count += 1, window from schedule
//!        └────────── success ────────────┴───┘
//! ```
//!
//! The window elapsing does not clear a record. A domain whose window has
//! passed is admitted again, and its next failure escalates from the stored
//! count. Only a successful delivery deletes the record.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use prometheus::IntGauge;
use tokio::sync::RwLock;

use super::clock::{Clock, SystemClock, add_duration};

/// Backoff window by failure count (1-indexed), clamped to the last entry.
pub const BACKOFF_SCHEDULE: [Duration; 5] = [
    Duration::from_secs(60),
    Duration::from_secs(5 * 60),
    Duration::from_secs(15 * 60),
    Duration::from_secs(30 * 60),
    Duration::from_secs(60 * 60),
];

/// Backoff window for the given number of consecutive failures.
pub fn backoff_for(failure_count: u32) -> Duration {
    let index = (failure_count.max(1) as usize - 1).min(BACKOFF_SCHEDULE.len() - 1);
    BACKOFF_SCHEDULE[index]
}

/// Failure record for one destination domain.
///
/// Exists only while the domain has failed at least once since its last
/// successful delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainFailure {
    /// Consecutive failures since the last success
    pub failure_count: u32,
    /// When the most recent failure was recorded
    pub last_failed_at: DateTime<Utc>,
    /// Deliveries are suppressed until this instant
    pub backoff_until: DateTime<Utc>,
}

impl DomainFailure {
    /// Window applied by the most recent failure.
    pub fn backoff(&self) -> Duration {
        backoff_for(self.failure_count)
    }

    fn is_backing_off(&self, now: DateTime<Utc>) -> bool {
        now < self.backoff_until
    }
}

/// Registry entry as exposed on the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct DomainStatus {
    pub domain: String,
    pub failure_count: u32,
    pub last_failed_at: DateTime<Utc>,
    pub backoff_until: DateTime<Utc>,
    pub backoff_seconds: u64,
    pub backing_off: bool,
}

/// Circuit breaker shared by the enqueue path and all workers.
///
/// Admission checks take the read lock; failure and success reports take the
/// write lock, so concurrent reports for the same domain are applied one at a
/// time in whatever order they arrive.
///
/// Every breaker adds its own records to the process-wide
/// `outbox_relay_domains_backing_off` gauge, so with several pools the gauge
/// reports their total.
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Failure records: domain -> record
    failures: RwLock<HashMap<String, DomainFailure>>,
    clock: Arc<dyn Clock>,
    backing_off: IntGauge,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreaker {
    /// Create a breaker using the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a breaker with an explicit time source
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::with_gauge(clock, crate::metrics::DOMAINS_BACKING_OFF.clone())
    }

    fn with_gauge(clock: Arc<dyn Clock>, backing_off: IntGauge) -> Self {
        Self {
            failures: RwLock::new(HashMap::new()),
            clock,
            backing_off,
        }
    }

    /// Whether jobs for `domain` should currently be dropped.
    ///
    /// Read-only: repeated calls without an intervening report return the
    /// same answer for the same instant.
    pub async fn should_skip(&self, domain: &str) -> bool {
        let failures = self.failures.read().await;
        failures
            .get(domain)
            .is_some_and(|failure| failure.is_backing_off(self.clock.now()))
    }

    /// Record a failed delivery and escalate the domain's backoff.
    ///
    /// # Returns
    /// The new backoff window
    pub async fn record_failure(&self, domain: &str) -> Duration {
        let now = self.clock.now();
        let mut failures = self.failures.write().await;

        let failure = failures.entry(domain.to_string()).or_insert_with(|| {
            self.backing_off.inc();
            DomainFailure {
                failure_count: 0,
                last_failed_at: now,
                backoff_until: now,
            }
        });

        failure.failure_count = failure.failure_count.saturating_add(1);
        failure.last_failed_at = now;
        let backoff = failure.backoff();
        failure.backoff_until = add_duration(now, backoff);

        tracing::warn!(
            domain = %domain,
            failures = failure.failure_count,
            backoff_seconds = backoff.as_secs(),
            "Domain failed {} times, backing off for {:?}",
            failure.failure_count,
            backoff
        );

        backoff
    }

    /// Record a successful delivery, returning the domain to healthy.
    ///
    /// # Returns
    /// `true` if a failure record was cleared
    pub async fn record_success(&self, domain: &str) -> bool {
        let mut failures = self.failures.write().await;
        let Some(previous) = failures.remove(domain) else {
            return false;
        };

        tracing::debug!(
            domain = %domain,
            failures = previous.failure_count,
            "Resetting failure count after successful delivery"
        );

        self.backing_off.dec();
        true
    }

    /// Current failure record for a domain, if any
    pub async fn failure(&self, domain: &str) -> Option<DomainFailure> {
        self.failures.read().await.get(domain).cloned()
    }

    /// Number of domains with a failure record
    pub async fn len(&self) -> usize {
        self.failures.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.failures.read().await.is_empty()
    }

    /// All failure records, sorted by domain
    pub async fn snapshot(&self) -> Vec<DomainStatus> {
        let now = self.clock.now();
        let failures = self.failures.read().await;

        let mut statuses: Vec<DomainStatus> = failures
            .iter()
            .map(|(domain, failure)| DomainStatus {
                domain: domain.clone(),
                failure_count: failure.failure_count,
                last_failed_at: failure.last_failed_at,
                backoff_until: failure.backoff_until,
                backoff_seconds: failure.backoff().as_secs(),
                backing_off: failure.is_backing_off(now),
            })
            .collect();
        statuses.sort_by(|a, b| a.domain.cmp(&b.domain));
        statuses
    }
}
