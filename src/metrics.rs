//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use std::sync::Once;
use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Delivery Metrics
    pub static ref DELIVERIES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("outbox_relay_deliveries_total", "Total number of delivery attempts by outcome"),
        &["outcome"]
    ).expect("metric can be created");
    pub static ref DELIVERY_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "outbox_relay_delivery_duration_seconds",
            "Outbound delivery duration in seconds"
        ).buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0]),
        &["outcome"]
    ).expect("metric can be created");
    pub static ref JOBS_SKIPPED_TOTAL: IntCounter = IntCounter::new(
        "outbox_relay_jobs_skipped_total",
        "Total number of jobs dropped because their domain was backing off"
    ).expect("metric can be created");
    pub static ref QUEUE_FULL_TOTAL: IntCounter = IntCounter::new(
        "outbox_relay_queue_full_total",
        "Total number of enqueues that found the dispatch queue full"
    ).expect("metric can be created");

    // Pool Metrics
    pub static ref DOMAINS_BACKING_OFF: IntGauge = IntGauge::new(
        "outbox_relay_domains_backing_off",
        "Number of destination domains with a recorded failure"
    ).expect("metric can be created");
    pub static ref WORKERS: IntGauge = IntGauge::new(
        "outbox_relay_workers",
        "Number of running delivery workers"
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("outbox_relay_errors_total", "Total number of errors"),
        &["error_type"]
    ).expect("metric can be created");
}

static INIT: Once = Once::new();

/// Initialize metrics registry.
///
/// Safe to call more than once; registration only happens on the first call.
pub fn init_metrics() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(DELIVERIES_TOTAL.clone()))
            .expect("DELIVERIES_TOTAL can be registered");
        REGISTRY
            .register(Box::new(DELIVERY_DURATION_SECONDS.clone()))
            .expect("DELIVERY_DURATION_SECONDS can be registered");
        REGISTRY
            .register(Box::new(JOBS_SKIPPED_TOTAL.clone()))
            .expect("JOBS_SKIPPED_TOTAL can be registered");
        REGISTRY
            .register(Box::new(QUEUE_FULL_TOTAL.clone()))
            .expect("QUEUE_FULL_TOTAL can be registered");
        REGISTRY
            .register(Box::new(DOMAINS_BACKING_OFF.clone()))
            .expect("DOMAINS_BACKING_OFF can be registered");
        REGISTRY
            .register(Box::new(WORKERS.clone()))
            .expect("WORKERS can be registered");
        REGISTRY
            .register(Box::new(ERRORS_TOTAL.clone()))
            .expect("ERRORS_TOTAL can be registered");

        tracing::info!("Metrics registry initialized");
    });
}

/// Record one finished delivery attempt.
pub fn observe_delivery(outcome: &str, elapsed: Duration) {
    DELIVERIES_TOTAL.with_label_values(&[outcome]).inc();
    DELIVERY_DURATION_SECONDS
        .with_label_values(&[outcome])
        .observe(elapsed.as_secs_f64());
}
