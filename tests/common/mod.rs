//! Common test utilities for E2E tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::{Router, extract::State, http::StatusCode};
use outbox_relay::federation::DeliveryJob;
use outbox_relay::{AppState, config};
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Test server instance serving the admin surface
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub _temp_dir: TempDir,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a test server with a fixed outbound pool size
    pub async fn new() -> Self {
        Self::with_pool_size(Some(3)).await
    }

    /// Create a test server; `None` sizes the pool from the follower count
    pub async fn with_pool_size(pool_size: Option<usize>) -> Self {
        let temp_dir = TempDir::new().unwrap();
        Self::start(temp_dir, pool_size).await
    }

    /// Create a test server on an existing data directory
    pub async fn start(temp_dir: TempDir, pool_size: Option<usize>) -> Self {
        let config = test_config(&temp_dir, pool_size);

        let state = AppState::new(config).await.unwrap();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = outbox_relay::build_router(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr: format!("http://{}", addr),
            state,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }
}

/// Configuration pointing at a database inside `temp_dir`
pub fn test_config(temp_dir: &TempDir, pool_size: Option<usize>) -> config::AppConfig {
    config::AppConfig {
        server: config::ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        database: config::DatabaseConfig {
            path: temp_dir.path().join("test.db"),
        },
        delivery: config::DeliveryConfig {
            pool_size,
            ..Default::default()
        },
        logging: config::LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        },
    }
}

/// Stand-in remote inbox answering every request with a fixed status
#[derive(Clone)]
pub struct MockInbox {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

#[derive(Clone)]
struct InboxBehavior {
    status: StatusCode,
    delay: Duration,
    hits: Arc<AtomicUsize>,
}

impl MockInbox {
    /// Start an inbox that responds immediately
    pub async fn start(status: StatusCode) -> Self {
        Self::start_with_delay(status, Duration::ZERO).await
    }

    /// Start an inbox that waits `delay` before responding
    pub async fn start_with_delay(status: StatusCode, delay: Duration) -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let behavior = InboxBehavior {
            status,
            delay,
            hits: hits.clone(),
        };

        let app = Router::new().fallback(respond).with_state(behavior);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, hits }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Domain key the circuit breaker uses for this inbox
    pub fn domain(&self) -> String {
        self.addr.to_string()
    }

    /// Requests received so far
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Signed-activity job addressed to `path` on this inbox
    pub fn job(&self, path: &str) -> DeliveryJob {
        DeliveryJob::activity(&self.url(path), Default::default(), r#"{"type":"Note"}"#).unwrap()
    }
}

async fn respond(State(behavior): State<InboxBehavior>) -> StatusCode {
    behavior.hits.fetch_add(1, Ordering::SeqCst);
    if !behavior.delay.is_zero() {
        tokio::time::sleep(behavior.delay).await;
    }
    behavior.status
}

/// An address nothing listens on
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Poll `check` until it returns true or `timeout` passes
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
