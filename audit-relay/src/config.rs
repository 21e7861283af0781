//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to lowest):
//! 1. Environment variables (prefix: `AUDIT_RELAY_`, nested keys separated by `__`)
//! 2. Current working directory: ./config.toml
//! 3. XDG config directory: ~/.config/audit-relay/config.toml
//! 4. System directory: /etc/audit-relay/config.toml
//! 5. Default values
//!
//! Broker and store URLs have no defaults; a deployment must supply them.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "AUDIT_RELAY_";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,

    /// Delivery queue configuration
    #[serde(default)]
    pub queue: QueueConfig,

    /// Persister (consumer) configuration
    #[serde(default)]
    pub persister: PersisterConfig,

    /// Event store configuration
    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    /// NATS configuration
    #[serde(default)]
    pub nats: Option<NatsConfig>,

    /// Bearer token authentication (disabled when absent)
    #[serde(default)]
    pub auth: Option<AuthConfig>,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name
    pub name: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level or `EnvFilter` directive
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Request body size limit in MB
    #[serde(default = "default_body_limit_mb")]
    pub body_limit_mb: usize,

    /// CORS mode: permissive or restrictive
    #[serde(default = "default_cors_mode")]
    pub cors_mode: String,
}

/// Which delivery queue implementation to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    /// NATS JetStream (durable)
    #[default]
    Jetstream,
    /// In-process queue, lost on restart
    Memory,
}

/// Delivery queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Backend implementation
    #[serde(default)]
    pub backend: QueueBackend,

    /// Well-known queue name; also the stream and durable consumer name
    #[serde(default = "default_queue_name")]
    pub name: String,

    /// Dead-letter channel name
    #[serde(default = "default_dead_letter_name")]
    pub dead_letter_name: String,

    /// Seconds a delivered message stays claimed before the broker redelivers it
    #[serde(default = "default_ack_wait")]
    pub ack_wait_secs: u64,
}

impl QueueConfig {
    /// Ack wait as Duration
    pub fn ack_wait(&self) -> Duration {
        Duration::from_secs(self.ack_wait_secs)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::default(),
            name: default_queue_name(),
            dead_letter_name: default_dead_letter_name(),
            ack_wait_secs: default_ack_wait(),
        }
    }
}

/// Persister configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersisterConfig {
    /// Upper bound for a single store insert, in milliseconds
    #[serde(default = "default_insert_timeout_ms")]
    pub insert_timeout_ms: u64,

    /// Delay before a failed message is redelivered, in milliseconds
    #[serde(default = "default_redelivery_delay_ms")]
    pub redelivery_delay_ms: u64,

    /// Deliveries after which a failing message is dead-lettered (0 = never)
    #[serde(default = "default_max_deliveries")]
    pub max_deliveries: u64,

    /// Messages processed concurrently
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Seconds of continuous store failure before an outage is reported
    #[serde(default = "default_outage_alert_secs")]
    pub outage_alert_secs: u64,
}

impl PersisterConfig {
    pub fn insert_timeout(&self) -> Duration {
        Duration::from_millis(self.insert_timeout_ms)
    }

    pub fn redelivery_delay(&self) -> Duration {
        Duration::from_millis(self.redelivery_delay_ms)
    }

    /// Retry ceiling, `None` when redelivery is unbounded
    pub fn retry_ceiling(&self) -> Option<u64> {
        (self.max_deliveries > 0).then_some(self.max_deliveries)
    }
}

impl Default for PersisterConfig {
    fn default() -> Self {
        Self {
            insert_timeout_ms: default_insert_timeout_ms(),
            redelivery_delay_ms: default_redelivery_delay_ms(),
            max_deliveries: default_max_deliveries(),
            max_in_flight: default_max_in_flight(),
            outage_alert_secs: default_outage_alert_secs(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum idle connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Maximum retry attempts for establishing the connection at startup
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay between retry attempts in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
}

/// NATS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,

    /// Connection name
    #[serde(default)]
    pub name: Option<String>,

    /// Max reconnection attempts once connected
    #[serde(default = "default_max_reconnects")]
    pub max_reconnects: usize,

    /// Maximum retry attempts for the initial connection
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay between retry attempts in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
}

/// JWT bearer authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Path to the verification key (PEM public key, or raw secret for HS*)
    pub key_path: PathBuf,

    /// JWT algorithm (RS256, ES256, HS256, ...)
    #[serde(default = "default_jwt_algorithm")]
    pub algorithm: String,

    /// JWT issuer to validate
    #[serde(default)]
    pub issuer: Option<String>,

    /// JWT audience to validate
    #[serde(default)]
    pub audience: Option<String>,
}

// Default value functions
fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_body_limit_mb() -> usize {
    1
}

fn default_cors_mode() -> String {
    "permissive".to_string()
}

fn default_queue_name() -> String {
    "audit-events".to_string()
}

fn default_dead_letter_name() -> String {
    "audit-events-dlq".to_string()
}

fn default_ack_wait() -> u64 {
    120
}

fn default_insert_timeout_ms() -> u64 {
    100_000
}

fn default_redelivery_delay_ms() -> u64 {
    1_000
}

fn default_max_deliveries() -> u64 {
    10
}

fn default_max_in_flight() -> usize {
    1
}

fn default_outage_alert_secs() -> u64 {
    60
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connection_timeout() -> u64 {
    10
}

fn default_max_reconnects() -> usize {
    10
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay() -> u64 {
    2
}

fn default_jwt_algorithm() -> String {
    "HS256".to_string()
}

impl Config {
    /// Load configuration from all sources
    ///
    /// Files are merged lowest priority first; environment variables override
    /// everything.
    pub fn load() -> Result<Self> {
        let config_paths = Self::find_config_paths();

        tracing::debug!("Searching for config files in order:");
        for path in &config_paths {
            tracing::debug!("  - {}", path.display());
        }

        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        for path in config_paths.iter().rev() {
            if path.exists() {
                tracing::info!("Loading configuration from: {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    ///
    /// This bypasses XDG directories and loads directly from the given path.
    pub fn load_from(path: &str) -> Result<Self> {
        let config: Self = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would break delivery guarantees
    ///
    /// A message must stay claimed for the whole insert attempt: an ack wait
    /// at or below the insert timeout lets the broker redeliver a message
    /// that is still being written.
    pub fn validate(&self) -> Result<()> {
        if self.queue.ack_wait() <= self.persister.insert_timeout() {
            return Err(Error::Config(Box::new(figment::Error::from(format!(
                "queue.ack_wait_secs ({:?}) must exceed persister.insert_timeout_ms ({:?})",
                self.queue.ack_wait(),
                self.persister.insert_timeout()
            )))));
        }
        Ok(())
    }

    /// Config file locations, highest priority first
    fn find_config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("config.toml")];

        let xdg_dirs = xdg::BaseDirectories::with_prefix("audit-relay");
        if let Some(path) = xdg_dirs.find_config_file("config.toml") {
            paths.push(path);
        }

        paths.push(PathBuf::from("/etc/audit-relay/config.toml"));
        paths
    }

    /// Get database URL
    pub fn database_url(&self) -> Option<&str> {
        self.database.as_ref().map(|db| db.url.as_str())
    }

    /// Get NATS URL
    pub fn nats_url(&self) -> Option<&str> {
        self.nats.as_ref().map(|n| n.url.as_str())
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "audit-relay".to_string(),
            port: default_port(),
            log_level: default_log_level(),
            timeout_secs: default_timeout(),
            body_limit_mb: default_body_limit_mb(),
            cors_mode: default_cors_mode(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            queue: QueueConfig::default(),
            persister: PersisterConfig::default(),
            database: None,
            nats: None,
            auth: None,
        }
    }
}
