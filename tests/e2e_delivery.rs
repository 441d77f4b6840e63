//! E2E tests for outbound delivery
//!
//! Remote inboxes are real axum servers on loopback ports; each port is a
//! distinct destination domain for the circuit breaker.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use common::{MockInbox, eventually, unused_addr};
use outbox_relay::config::DeliveryConfig;
use outbox_relay::error::AppError;
use outbox_relay::federation::{Admission, CircuitBreaker, DeliveryJob, ManualClock, OutboundPool};

const WAIT: Duration = Duration::from_secs(10);
const MINUTE: Duration = Duration::from_secs(60);

async fn failure_count(pool: &OutboundPool, domain: &str) -> Option<u32> {
    pool.circuit_breaker()
        .failure(domain)
        .await
        .map(|failure| failure.failure_count)
}

async fn wait_for_records(breaker: &CircuitBreaker, expected: usize) -> bool {
    eventually(WAIT, || async move { breaker.len().await == expected }).await
}

async fn wait_for_record(breaker: &CircuitBreaker, domain: &str, present: bool) -> bool {
    eventually(WAIT, || async move { breaker.failure(domain).await.is_some() == present }).await
}

async fn wait_for_hits(inbox: &MockInbox, expected: usize) -> bool {
    eventually(WAIT, || async move { inbox.hits() == expected }).await
}

#[tokio::test]
async fn failing_domains_back_off_and_later_jobs_are_dropped() {
    let pool = OutboundPool::initialize(5, &DeliveryConfig::default()).unwrap();

    let mut inboxes = Vec::new();
    for _ in 0..5 {
        inboxes.push(MockInbox::start(StatusCode::SERVICE_UNAVAILABLE).await);
    }

    for inbox in &inboxes {
        assert_eq!(
            pool.enqueue(inbox.job("/inbox")).await.unwrap(),
            Admission::Queued
        );
    }

    let breaker = pool.circuit_breaker().clone();
    assert!(wait_for_records(&breaker, 5).await);

    for inbox in &inboxes {
        let failure = breaker.failure(&inbox.domain()).await.unwrap();
        assert_eq!(failure.failure_count, 1);
        assert_eq!(failure.backoff(), MINUTE);
        assert!(breaker.should_skip(&inbox.domain()).await);
        assert_eq!(inbox.hits(), 1);
    }

    let sixth = inboxes[0].job("/inbox");
    assert_eq!(pool.enqueue(sixth).await.unwrap(), Admission::Skipped);

    pool.shutdown(WAIT).await.unwrap();
    assert_eq!(inboxes[0].hits(), 1);
}

#[tokio::test]
async fn successful_delivery_clears_failure_record() {
    let clock = Arc::new(ManualClock::default());
    let breaker = Arc::new(CircuitBreaker::with_clock(clock.clone()));
    let pool =
        OutboundPool::with_circuit_breaker(2, &DeliveryConfig::default(), breaker.clone()).unwrap();
    let inbox = MockInbox::start(StatusCode::OK).await;

    for _ in 0..3 {
        breaker.record_failure(&inbox.domain()).await;
    }
    assert_eq!(
        pool.enqueue(inbox.job("/inbox")).await.unwrap(),
        Admission::Skipped
    );

    clock.advance(15 * MINUTE + Duration::from_secs(1));
    assert_eq!(
        pool.enqueue(inbox.job("/inbox")).await.unwrap(),
        Admission::Queued
    );

    let domain = inbox.domain();
    assert!(wait_for_record(&breaker, &domain, false).await);
    assert_eq!(inbox.hits(), 1);

    // A fresh failure restarts the schedule at the first tier.
    assert_eq!(breaker.record_failure(&domain).await, MINUTE);

    pool.shutdown(WAIT).await.unwrap();
}

#[tokio::test]
async fn client_and_server_errors_count_as_failures() {
    let pool = OutboundPool::initialize(2, &DeliveryConfig::default()).unwrap();
    let not_found = MockInbox::start(StatusCode::NOT_FOUND).await;
    let server_error = MockInbox::start(StatusCode::INTERNAL_SERVER_ERROR).await;

    pool.enqueue(not_found.job("/users/alice/inbox")).await.unwrap();
    pool.enqueue(server_error.job("/inbox")).await.unwrap();

    assert!(wait_for_records(pool.circuit_breaker(), 2).await);

    assert_eq!(failure_count(&pool, &not_found.domain()).await, Some(1));
    assert_eq!(failure_count(&pool, &server_error.domain()).await, Some(1));

    pool.shutdown(WAIT).await.unwrap();
}

#[tokio::test]
async fn no_content_status_is_a_success() {
    let pool = OutboundPool::initialize(1, &DeliveryConfig::default()).unwrap();
    let inbox = MockInbox::start(StatusCode::NO_CONTENT).await;

    pool.enqueue(inbox.job("/inbox")).await.unwrap();
    pool.shutdown(WAIT).await.unwrap();

    assert_eq!(inbox.hits(), 1);
    assert!(pool.circuit_breaker().is_empty().await);
}

#[tokio::test]
async fn connection_refused_counts_as_failure() {
    let pool = OutboundPool::initialize(1, &DeliveryConfig::default()).unwrap();
    let addr = unused_addr().await;
    let job = DeliveryJob::activity(&format!("http://{}/inbox", addr), Default::default(), "{}")
        .unwrap();

    pool.enqueue(job).await.unwrap();

    let domain = addr.to_string();
    assert!(wait_for_record(pool.circuit_breaker(), &domain, true).await);
    assert!(pool.circuit_breaker().should_skip(&domain).await);

    pool.shutdown(WAIT).await.unwrap();
}

#[tokio::test]
async fn slow_remote_times_out_and_counts_as_failure() {
    let config = DeliveryConfig {
        request_timeout_seconds: 1,
        ..Default::default()
    };
    let pool = OutboundPool::initialize(1, &config).unwrap();
    let inbox = MockInbox::start_with_delay(StatusCode::OK, Duration::from_secs(5)).await;

    pool.enqueue(inbox.job("/inbox")).await.unwrap();

    assert!(wait_for_record(pool.circuit_breaker(), &inbox.domain(), true).await);
    assert_eq!(inbox.hits(), 1);

    pool.shutdown(WAIT).await.unwrap();
}

#[tokio::test]
async fn full_queue_is_reported_to_non_blocking_callers() {
    let pool = OutboundPool::initialize(1, &DeliveryConfig::default()).unwrap();
    let inbox = MockInbox::start_with_delay(StatusCode::OK, Duration::from_secs(1)).await;

    assert_eq!(
        pool.try_enqueue(inbox.job("/a")).await.unwrap(),
        Admission::Queued
    );
    assert!(wait_for_hits(&inbox, 1).await);

    // The worker is busy; one slot remains in the queue.
    assert_eq!(
        pool.try_enqueue(inbox.job("/b")).await.unwrap(),
        Admission::Queued
    );
    assert!(matches!(
        pool.try_enqueue(inbox.job("/c")).await,
        Err(AppError::QueueFull)
    ));
    assert!(matches!(
        pool.enqueue_timeout(inbox.job("/d"), Duration::from_millis(100))
            .await,
        Err(AppError::QueueFull)
    ));

    pool.shutdown(WAIT).await.unwrap();
    assert_eq!(inbox.hits(), 2);
    assert!(pool.circuit_breaker().is_empty().await);
}

#[tokio::test]
async fn blocking_enqueue_waits_for_a_free_slot() {
    let pool = OutboundPool::initialize(1, &DeliveryConfig::default()).unwrap();
    let inbox = MockInbox::start_with_delay(StatusCode::OK, Duration::from_millis(300)).await;

    pool.enqueue(inbox.job("/a")).await.unwrap();
    assert!(wait_for_hits(&inbox, 1).await);
    pool.enqueue(inbox.job("/b")).await.unwrap();

    let admission = tokio::time::timeout(WAIT, pool.enqueue(inbox.job("/c")))
        .await
        .expect("enqueue should unblock once a worker frees a slot")
        .unwrap();
    assert_eq!(admission, Admission::Queued);

    pool.shutdown(WAIT).await.unwrap();
    assert_eq!(inbox.hits(), 3);
}

#[tokio::test]
async fn shutdown_releases_blocked_producers_and_drains_queue() {
    let pool = Arc::new(OutboundPool::initialize(1, &DeliveryConfig::default()).unwrap());
    let inbox = MockInbox::start_with_delay(StatusCode::OK, Duration::from_millis(500)).await;

    pool.enqueue(inbox.job("/a")).await.unwrap();
    assert!(wait_for_hits(&inbox, 1).await);
    pool.enqueue(inbox.job("/b")).await.unwrap();

    let blocked = {
        let pool = pool.clone();
        let job = inbox.job("/c");
        tokio::spawn(async move { pool.enqueue(job).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    pool.shutdown(WAIT).await.unwrap();

    let result = blocked.await.unwrap();
    assert!(matches!(result, Err(AppError::QueueClosed)));
    assert_eq!(inbox.hits(), 2);
}

#[tokio::test]
async fn fan_out_deduplicates_inboxes_and_skips_backing_off_domains() {
    let pool = OutboundPool::initialize(4, &DeliveryConfig::default()).unwrap();
    let healthy = MockInbox::start(StatusCode::ACCEPTED).await;
    let down = MockInbox::start(StatusCode::OK).await;
    pool.circuit_breaker().record_failure(&down.domain()).await;

    let inboxes = vec![
        healthy.url("/users/alice/inbox"),
        healthy.url("/users/bob/inbox"),
        healthy.url("/users/alice/inbox"),
        down.url("/inbox"),
        "not a url".to_string(),
    ];

    let summary = pool
        .fan_out(inboxes, |inbox| {
            DeliveryJob::activity(inbox, Default::default(), r#"{"type":"Announce"}"#)
        })
        .await
        .unwrap();

    assert_eq!(summary.queued, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.invalid, 1);

    pool.shutdown(WAIT).await.unwrap();
    assert_eq!(healthy.hits(), 2);
    assert_eq!(down.hits(), 0);
}

#[tokio::test]
async fn timed_out_shutdown_keeps_waiting_for_running_workers() {
    let config = DeliveryConfig {
        request_timeout_seconds: 1,
        ..Default::default()
    };
    let pool = OutboundPool::initialize(1, &config).unwrap();
    let inbox = MockInbox::start_with_delay(StatusCode::OK, Duration::from_secs(30)).await;

    pool.enqueue(inbox.job("/inbox")).await.unwrap();
    assert!(wait_for_hits(&inbox, 1).await);

    assert!(matches!(
        pool.shutdown(Duration::from_millis(50)).await,
        Err(AppError::Internal(_))
    ));
    assert!(pool.circuit_breaker().is_empty().await);

    // The second call must still wait for the worker, which only exits after
    // its delivery timed out and was recorded.
    pool.shutdown(WAIT).await.unwrap();
    assert_eq!(failure_count(&pool, &inbox.domain()).await, Some(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_job_accepted_while_shutting_down_is_delivered() {
    for _ in 0..5 {
        let pool = Arc::new(OutboundPool::initialize(4, &DeliveryConfig::default()).unwrap());
        let inbox = MockInbox::start(StatusCode::OK).await;

        let producers: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                let inbox = inbox.clone();
                tokio::spawn(async move {
                    let mut queued = 0usize;
                    loop {
                        match pool.try_enqueue(inbox.job("/inbox")).await {
                            Ok(Admission::Queued) => queued += 1,
                            Ok(Admission::Skipped) | Err(AppError::QueueFull) => {
                                tokio::task::yield_now().await
                            }
                            Err(AppError::QueueClosed) => return queued,
                            Err(error) => panic!("unexpected enqueue error: {error}"),
                        }
                    }
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.shutdown(WAIT).await.unwrap();

        let mut queued = 0;
        for producer in producers {
            queued += producer.await.unwrap();
        }

        assert!(queued > 0);
        assert_eq!(inbox.hits(), queued);
    }
}
