//! Delivery transport
//!
//! One shared HTTP client per worker pool, configured once from
//! `DeliveryConfig`, plus classification of each attempt into a
//! `DeliveryOutcome` for the circuit breaker.

use std::time::Instant;

use reqwest::StatusCode;

use crate::config::DeliveryConfig;
use crate::error::AppError;

use super::job::DeliveryJob;

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Remote answered with a status below 400
    Delivered { status: u16 },
    /// Remote answered with a client or server error status
    Rejected { status: u16, reason: String },
    /// No HTTP exchange completed (connect, DNS, TLS, timeout)
    TransportError { message: String, timed_out: bool },
}

impl DeliveryOutcome {
    /// Classify a completed HTTP exchange by status code.
    ///
    /// 4xx and 5xx both count against the destination.
    pub fn from_status(status: StatusCode) -> Self {
        if status.as_u16() >= 400 {
            DeliveryOutcome::Rejected {
                status: status.as_u16(),
                reason: status.to_string(),
            }
        } else {
            DeliveryOutcome::Delivered {
                status: status.as_u16(),
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }

    /// HTTP status if an exchange completed
    pub fn status(&self) -> Option<u16> {
        match self {
            DeliveryOutcome::Delivered { status } | DeliveryOutcome::Rejected { status, .. } => {
                Some(*status)
            }
            DeliveryOutcome::TransportError { .. } => None,
        }
    }

    /// Label for the `outcome` metric dimension
    pub fn label(&self) -> &'static str {
        match self {
            DeliveryOutcome::Delivered { .. } => "delivered",
            DeliveryOutcome::Rejected { .. } => "rejected",
            DeliveryOutcome::TransportError { .. } => "transport_error",
        }
    }
}

impl std::fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryOutcome::Delivered { status } => write!(f, "delivered (HTTP {})", status),
            DeliveryOutcome::Rejected { reason, .. } => write!(f, "rejected: HTTP {}", reason),
            DeliveryOutcome::TransportError { message, .. } => write!(f, "{}", message),
        }
    }
}

/// Shared HTTP client for outbound deliveries
///
/// Safe for concurrent use by all workers. Idle connections are kept per
/// destination host and recycled after the configured idle timeout.
#[derive(Debug, Clone)]
pub struct DeliveryTransport {
    client: reqwest::Client,
    config: DeliveryConfig,
}

impl DeliveryTransport {
    /// Build the transport from delivery configuration.
    ///
    /// # Errors
    /// Returns `AppError::HttpClient` if the client cannot be constructed
    pub fn new(config: &DeliveryConfig) -> Result<Self, AppError> {
        // reqwest only bounds idle connections per host; the global cap is
        // enforced indirectly by the fixed number of workers.
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.request_timeout())
            .pool_max_idle_per_host(config.max_idle_connections_per_host)
            .pool_idle_timeout(config.idle_timeout())
            .build()?;

        tracing::debug!(
            timeout_seconds = config.request_timeout_seconds,
            max_idle = config.max_idle_connections,
            max_idle_per_host = config.max_idle_connections_per_host,
            idle_timeout_seconds = config.idle_timeout_seconds,
            "Delivery transport initialized"
        );

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Attempt a single delivery.
    ///
    /// Never fails: every result, including transport errors, is returned
    /// as a `DeliveryOutcome`. The response body is read to the end so the
    /// connection can go back to the pool.
    pub async fn deliver(&self, job: &DeliveryJob) -> DeliveryOutcome {
        let started = Instant::now();

        let result = self
            .client
            .request(job.method().clone(), job.url().clone())
            .headers(job.headers().clone())
            .body(job.body().clone())
            .send()
            .await;

        let outcome = match result {
            Ok(response) => {
                let outcome = DeliveryOutcome::from_status(response.status());
                if let Err(error) = response.bytes().await {
                    tracing::debug!(
                        job_id = %job.id(),
                        url = %job.url(),
                        %error,
                        "Failed to drain delivery response body"
                    );
                }
                outcome
            }
            Err(error) => DeliveryOutcome::TransportError {
                timed_out: error.is_timeout(),
                message: error.to_string(),
            },
        };

        crate::metrics::observe_delivery(outcome.label(), started.elapsed());
        outcome
    }
}
