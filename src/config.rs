//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration files (config/default.toml, config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::{path::PathBuf, time::Duration};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub delivery: DeliveryConfig,
    pub logging: LoggingConfig,
}

/// Admin HTTP surface configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file holding follower records
    pub path: PathBuf,
}

/// Outbound delivery configuration
///
/// Transport values are fixed for the lifetime of a worker pool.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Per-request timeout in seconds (default: 15)
    pub request_timeout_seconds: u64,
    /// Global idle connection cap (default: 20)
    pub max_idle_connections: usize,
    /// Idle connections kept per destination host (default: 2)
    pub max_idle_connections_per_host: usize,
    /// Idle connection lifetime in seconds (default: 10)
    pub idle_timeout_seconds: u64,
    /// User-Agent header sent with every delivery
    pub user_agent: String,
    /// Fixed worker count; bypasses follower-based sizing when set
    pub pool_size: Option<usize>,
    /// How long shutdown waits for workers to drain (default: 30)
    pub shutdown_timeout_seconds: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 15,
            max_idle_connections: 20,
            max_idle_connections_per_host: 2,
            idle_timeout_seconds: 10,
            user_agent: default_user_agent(),
            pool_size: None,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl DeliveryConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}

fn default_user_agent() -> String {
    format!("OutboxRelay/{}", env!("CARGO_PKG_VERSION"))
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

/// Output format of the fmt layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LoggingConfig {
    pub fn log_format(&self) -> LogFormat {
        if self.format.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }

    /// Filter directives used when `RUST_LOG` is not set
    pub fn filter_directives(&self) -> String {
        format!(
            "outbox_relay={},tower_http=info",
            self.level.to_ascii_lowercase()
        )
    }

    /// Build the subscriber filter. `RUST_LOG` overrides the configured level.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(self.filter_directives()))
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (OUTBOX_RELAY__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let defaults = DeliveryConfig::default();
        let config = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("database.path", "data/outbox-relay.db")?
            .set_default(
                "delivery.request_timeout_seconds",
                defaults.request_timeout_seconds,
            )?
            .set_default(
                "delivery.max_idle_connections",
                defaults.max_idle_connections as u64,
            )?
            .set_default(
                "delivery.max_idle_connections_per_host",
                defaults.max_idle_connections_per_host as u64,
            )?
            .set_default("delivery.idle_timeout_seconds", defaults.idle_timeout_seconds)?
            .set_default("delivery.user_agent", defaults.user_agent)?
            .set_default(
                "delivery.shutdown_timeout_seconds",
                defaults.shutdown_timeout_seconds,
            )?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("OUTBOX_RELAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    fn validate(&self) -> Result<(), crate::error::AppError> {
        let delivery = &self.delivery;

        if delivery.request_timeout_seconds == 0 {
            return Err(crate::error::AppError::Config(
                "delivery.request_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if delivery.idle_timeout_seconds == 0 {
            return Err(crate::error::AppError::Config(
                "delivery.idle_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if delivery.max_idle_connections_per_host == 0 {
            return Err(crate::error::AppError::Config(
                "delivery.max_idle_connections_per_host must be greater than 0".to_string(),
            ));
        }

        if delivery.max_idle_connections < delivery.max_idle_connections_per_host {
            tracing::warn!(
                global = delivery.max_idle_connections,
                per_host = delivery.max_idle_connections_per_host,
                "Global idle connection cap is below the per-host cap"
            );
        }

        if delivery.pool_size == Some(0) {
            return Err(crate::error::AppError::Config(
                "delivery.pool_size must be greater than 0 when set".to_string(),
            ));
        }

        if self.logging.level.parse::<tracing::Level>().is_err() {
            return Err(crate::error::AppError::Config(format!(
                "logging.level must be one of trace, debug, info, warn, error (got {})",
                self.logging.level
            )));
        }

        if !matches!(
            self.logging.format.to_ascii_lowercase().as_str(),
            "pretty" | "json"
        ) {
            return Err(crate::error::AppError::Config(format!(
                "logging.format must be \"pretty\" or \"json\" (got {})",
                self.logging.format
            )));
        }

        Ok(())
    }
}
