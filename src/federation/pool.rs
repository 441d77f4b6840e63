//! Outbound worker pool
//!
//! A fixed number of workers drain one bounded dispatch queue. The queue
//! holds at most as many jobs as there are workers; producers wait when it
//! is full. Jobs for a domain the circuit breaker is backing off are dropped
//! at enqueue time and never retried here.
//!
//! Two workers may deliver to the same domain at the same time. Their
//! outcomes are applied to the breaker in completion order, so the final
//! record reflects whichever report lands last.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::DeliveryConfig;
use crate::error::AppError;

use super::circuit::CircuitBreaker;
use super::job::DeliveryJob;
use super::transport::DeliveryTransport;

/// What happened to a job handed to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Accepted into the dispatch queue
    Queued,
    /// Dropped because the destination domain is backing off
    Skipped,
}

/// Counts from a fan-out over many inboxes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutSummary {
    pub queued: usize,
    pub skipped: usize,
    /// Targets whose job could not be built
    pub invalid: usize,
}

type JobReceiver = Arc<Mutex<mpsc::Receiver<DeliveryJob>>>;

/// Bounded queue plus the workers draining it.
///
/// Every pool owns its own queue, transport and circuit breaker; creating
/// two pools yields two independent delivery engines.
pub struct OutboundPool {
    sender: mpsc::Sender<DeliveryJob>,
    breaker: Arc<CircuitBreaker>,
    transport: Arc<DeliveryTransport>,
    cancellation_token: CancellationToken,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl OutboundPool {
    /// Start `pool_size` workers with a fresh circuit breaker.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// Returns error if `pool_size` is zero or the transport cannot be built
    pub fn initialize(pool_size: usize, config: &DeliveryConfig) -> Result<Self, AppError> {
        Self::with_circuit_breaker(pool_size, config, Arc::new(CircuitBreaker::new()))
    }

    /// Start `pool_size` workers sharing the given circuit breaker.
    pub fn with_circuit_breaker(
        pool_size: usize,
        config: &DeliveryConfig,
        breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, AppError> {
        if pool_size == 0 {
            return Err(AppError::Validation(
                "Outbound pool size must be greater than 0".to_string(),
            ));
        }

        let transport = Arc::new(DeliveryTransport::new(config)?);
        let (sender, receiver) = mpsc::channel(pool_size);
        let receiver: JobReceiver = Arc::new(Mutex::new(receiver));
        let cancellation_token = CancellationToken::new();

        let worker_handles = (1..=pool_size)
            .map(|worker_id| {
                let worker = Worker {
                    id: worker_id,
                    receiver: receiver.clone(),
                    breaker: breaker.clone(),
                    transport: transport.clone(),
                    cancellation_token: cancellation_token.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        crate::metrics::WORKERS.add(pool_size as i64);
        tracing::info!(workers = pool_size, "Outbound worker pool started");

        Ok(Self {
            sender,
            breaker,
            transport,
            cancellation_token,
            worker_handles: Mutex::new(worker_handles),
            size: pool_size,
        })
    }

    /// Number of workers, which is also the queue capacity
    pub fn size(&self) -> usize {
        self.size
    }

    /// Free slots in the dispatch queue right now
    pub fn available_capacity(&self) -> usize {
        self.sender.capacity()
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn transport(&self) -> &DeliveryTransport {
        &self.transport
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Queue a job, waiting for a free slot if the queue is full.
    ///
    /// There is no bound on the wait; use `enqueue_timeout` or
    /// `try_enqueue` to apply your own backpressure policy.
    ///
    /// # Errors
    /// Returns `AppError::QueueClosed` once shutdown has started
    pub async fn enqueue(&self, job: DeliveryJob) -> Result<Admission, AppError> {
        let Some(job) = self.admit(job).await? else {
            return Ok(Admission::Skipped);
        };

        match self.sender.try_send(job) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(job)) => {
                tracing::debug!("Outbound job queue is full");
                crate::metrics::QUEUE_FULL_TOTAL.inc();
                self.send_blocking(job).await?;
            }
            Err(mpsc::error::TrySendError::Closed(_)) => return Err(AppError::QueueClosed),
        }

        Ok(Admission::Queued)
    }

    /// Queue a job without waiting.
    ///
    /// # Errors
    /// Returns `AppError::QueueFull` if no slot is free
    pub async fn try_enqueue(&self, job: DeliveryJob) -> Result<Admission, AppError> {
        let Some(job) = self.admit(job).await? else {
            return Ok(Admission::Skipped);
        };

        match self.sender.try_send(job) {
            Ok(()) => Ok(Admission::Queued),
            Err(mpsc::error::TrySendError::Full(_)) => {
                crate::metrics::QUEUE_FULL_TOTAL.inc();
                Err(AppError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(AppError::QueueClosed),
        }
    }

    /// Queue a job, waiting at most `wait` for a free slot.
    ///
    /// # Errors
    /// Returns `AppError::QueueFull` if the wait expires
    pub async fn enqueue_timeout(
        &self,
        job: DeliveryJob,
        wait: Duration,
    ) -> Result<Admission, AppError> {
        let Some(job) = self.admit(job).await? else {
            return Ok(Admission::Skipped);
        };

        match self.sender.try_send(job) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(job)) => {
                tracing::debug!(wait_ms = wait.as_millis() as u64, "Outbound job queue is full");
                crate::metrics::QUEUE_FULL_TOTAL.inc();
                tokio::time::timeout(wait, self.send_blocking(job))
                    .await
                    .map_err(|_| AppError::QueueFull)??;
            }
            Err(mpsc::error::TrySendError::Closed(_)) => return Err(AppError::QueueClosed),
        }

        Ok(Admission::Queued)
    }

    /// Build and queue one job per distinct inbox.
    ///
    /// Identical inbox URIs are delivered once; distinct inboxes on the same
    /// domain each get their own job. `build_job` is where a caller attaches
    /// per-request signature headers.
    pub async fn fan_out<F>(
        &self,
        inbox_uris: Vec<String>,
        mut build_job: F,
    ) -> Result<FanoutSummary, AppError>
    where
        F: FnMut(&str) -> Result<DeliveryJob, AppError>,
    {
        let total_targets = inbox_uris.len();
        let targets = unique_inbox_targets(inbox_uris);

        tracing::info!(
            "Delivering to {} unique inboxes (deduplicated from {} total)",
            targets.len(),
            total_targets
        );

        let mut summary = FanoutSummary::default();
        for inbox_uri in targets {
            let job = match build_job(&inbox_uri) {
                Ok(job) => job,
                Err(error) => {
                    tracing::warn!(inbox = %inbox_uri, %error, "Skipping inbox with invalid job");
                    summary.invalid += 1;
                    continue;
                }
            };

            match self.enqueue(job).await? {
                Admission::Queued => summary.queued += 1,
                Admission::Skipped => summary.skipped += 1,
            }
        }

        Ok(summary)
    }

    /// Stop accepting jobs, let workers drain what is queued, and wait for
    /// them to exit.
    ///
    /// In-flight deliveries run to completion or to the transport timeout.
    /// Workers still running when `timeout` expires are kept, so a later call
    /// waits for them again.
    ///
    /// # Errors
    /// Returns `AppError::Internal` if workers are still running after
    /// `timeout`
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), AppError> {
        let mut handles = self.worker_handles.lock().await;
        let running = handles.len();
        tracing::info!(
            workers = running,
            timeout_seconds = timeout.as_secs(),
            "Shutting down outbound worker pool"
        );

        self.cancellation_token.cancel();

        let joined =
            tokio::time::timeout(timeout, futures::future::join_all(handles.iter_mut())).await;
        match joined {
            Ok(results) => {
                for (index, result) in results.into_iter().enumerate() {
                    if let Err(error) = result {
                        tracing::error!(worker_id = index + 1, %error, "Outbound worker panicked");
                    }
                }
                handles.clear();
                crate::metrics::WORKERS.sub(running as i64);
                tracing::info!("Outbound worker pool stopped");
                Ok(())
            }
            Err(_) => {
                handles.retain(|handle| !handle.is_finished());
                crate::metrics::WORKERS.sub((running - handles.len()) as i64);
                tracing::error!(
                    timeout_seconds = timeout.as_secs(),
                    still_running = handles.len(),
                    "Outbound worker shutdown timed out"
                );
                Err(AppError::Internal(anyhow::anyhow!(
                    "{} outbound workers did not stop within {:?}",
                    handles.len(),
                    timeout
                )))
            }
        }
    }

    /// Admission control shared by all enqueue variants.
    ///
    /// Returns `None` when the job was dropped by the circuit breaker.
    async fn admit(&self, job: DeliveryJob) -> Result<Option<DeliveryJob>, AppError> {
        if self.cancellation_token.is_cancelled() {
            return Err(AppError::QueueClosed);
        }

        if self.breaker.should_skip(job.domain()).await {
            tracing::debug!(
                domain = %job.domain(),
                job_id = %job.id(),
                "Skipping request due to circuit breaker"
            );
            crate::metrics::JOBS_SKIPPED_TOTAL.inc();
            return Ok(None);
        }

        Ok(Some(job))
    }

    async fn send_blocking(&self, job: DeliveryJob) -> Result<(), AppError> {
        let job_id = job.id().to_string();
        tokio::select! {
            biased;
            _ = self.cancellation_token.cancelled() => Err(AppError::QueueClosed),
            sent = self.sender.send(job) => {
                sent.map_err(|_| AppError::QueueClosed)?;
                tracing::trace!(job_id = %job_id, "Queued job after waiting for a free slot");
                Ok(())
            }
        }
    }
}

/// Deduplicate identical inbox URIs while keeping distinct personal inboxes.
fn unique_inbox_targets(inbox_uris: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    inbox_uris
        .into_iter()
        .filter(|inbox_uri| seen.insert(inbox_uri.clone()))
        .collect()
}

struct Worker {
    id: usize,
    receiver: JobReceiver,
    breaker: Arc<CircuitBreaker>,
    transport: Arc<DeliveryTransport>,
    cancellation_token: CancellationToken,
}

impl Worker {
    async fn run(self) {
        tracing::debug!(worker_id = self.id, "Started outbound worker");

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => None,
                job = async { self.receiver.lock().await.recv().await } => job,
            };
            let Some(job) = next else { break };
            self.process(job).await;
        }

        // Closing before every drain step means any send that succeeded is
        // already buffered; later sends fail with `QueueClosed`.
        loop {
            let next = {
                let mut receiver = self.receiver.lock().await;
                receiver.close();
                receiver.try_recv()
            };
            match next {
                Ok(job) => self.process(job).await,
                Err(_) => break,
            }
        }

        tracing::debug!(worker_id = self.id, "Outbound worker stopped");
    }

    async fn process(&self, job: DeliveryJob) {
        let outcome = self.transport.deliver(&job).await;

        if outcome.is_success() {
            self.breaker.record_success(job.domain()).await;
        } else {
            tracing::error!(
                job_id = %job.id(),
                url = %job.url(),
                status = ?outcome.status(),
                "Delivery to {} failed: {}",
                job.url(),
                outcome
            );
            self.breaker.record_failure(job.domain()).await;
        }

        tracing::trace!(
            job_id = %job.id(),
            worker_id = self.id,
            outcome = outcome.label(),
            "Done with delivery"
        );
    }
}
