//! Configuration type definitions
//!
//! This module contains all the configuration structures read from the agent's
//! TOML file.

use crate::connection::{Backoff, ConnectionSettings};
use crate::types::{
    HostName, InstanceName, Port, QueueCapacity, WorkerCount, duration_serde,
    option_duration_serde,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::defaults;

/// Main agent configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct Config {
    /// FreeSWITCH instances to collect from
    #[serde(default)]
    pub instances: Vec<InstanceConfig>,
    /// Channel state backend
    #[serde(default)]
    pub storage: StorageConfig,
    /// Which event families to subscribe to and process
    #[serde(default)]
    pub events: EventsConfig,
    /// Metrics export
    #[serde(default)]
    pub opentelemetry: OtelConfig,
    /// Health and metrics endpoint
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    /// Event socket session tuning
    #[serde(default)]
    pub connection: ConnectionConfig,
}

/// One FreeSWITCH event socket endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceConfig {
    pub name: InstanceName,
    pub host: HostName,
    #[serde(default = "defaults::event_socket_port")]
    pub port: Port,
    #[serde(default = "defaults::event_socket_password", skip_serializing)]
    pub password: String,
}

impl InstanceConfig {
    /// Instance with the default port and password
    pub fn new(name: &str, host: &str) -> Result<Self, crate::types::ValidationError> {
        Ok(Self {
            name: InstanceName::new(name.to_string())?,
            host: HostName::new(host.to_string())?,
            port: defaults::event_socket_port(),
            password: defaults::event_socket_password(),
        })
    }

    #[must_use]
    pub fn with_port(mut self, port: Port) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }
}

/// Channel state backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Redis,
}

impl StorageBackend {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Redis => "redis",
        }
    }
}

/// Channel state storage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    #[serde(rename = "type", default)]
    pub backend: StorageBackend,
    /// How long state lives without a termination event
    #[serde(with = "duration_serde", default = "defaults::state_ttl")]
    pub ttl: Duration,
    /// Expiry sweep interval of the in-memory backend
    #[serde(with = "duration_serde", default = "defaults::sweep_interval")]
    pub sweep_interval: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            ttl: defaults::state_ttl(),
            sweep_interval: defaults::sweep_interval(),
            redis: None,
        }
    }
}

/// Redis connection parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RedisConfig {
    pub host: HostName,
    #[serde(default = "defaults::redis_port")]
    pub port: Port,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default)]
    pub db: i64,
    /// Bound on each command and each connection attempt
    #[serde(with = "duration_serde", default = "defaults::redis_timeout")]
    pub timeout: Duration,
}

impl RedisConfig {
    #[must_use]
    pub fn url(&self) -> String {
        crate::store::connection_url(
            self.host.as_str(),
            self.port.get(),
            self.password.as_deref(),
            self.db,
        )
    }
}

/// Event families to process
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventsConfig {
    /// Real-time RTCP samples
    #[serde(default = "defaults::enabled")]
    pub rtcp: bool,
    /// End-of-call QoS summaries
    #[serde(default = "defaults::enabled")]
    pub qos: bool,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            rtcp: true,
            qos: true,
        }
    }
}

/// OpenTelemetry export
///
/// An empty `endpoint` selects the logging exporter instead of OTLP.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OtelConfig {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "defaults::service_name")]
    pub service_name: String,
    #[serde(with = "duration_serde", default = "defaults::export_interval")]
    pub export_interval: Duration,
    #[serde(with = "duration_serde", default = "defaults::export_timeout")]
    pub timeout: Duration,
    #[serde(default = "defaults::exporter_queue_capacity")]
    pub queue_capacity: QueueCapacity,
}

impl OtelConfig {
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.endpoint.trim().is_empty()
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            service_name: defaults::service_name(),
            export_interval: defaults::export_interval(),
            timeout: defaults::export_timeout(),
            queue_capacity: defaults::exporter_queue_capacity(),
        }
    }
}

/// Health and metrics HTTP endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: Port,
}

impl HttpConfig {
    /// Default listen host (all interfaces)
    pub const DEFAULT_HOST: &'static str = "0.0.0.0";

    #[must_use]
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port.get())
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: Self::DEFAULT_HOST.to_string(),
            port: Port::HTTP,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
    /// Also write logs to this file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

/// Event processor worker pool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessorConfig {
    #[serde(default)]
    pub workers: WorkerCount,
    /// Per-worker queue capacity
    #[serde(default = "defaults::processor_queue_capacity")]
    pub queue_capacity: QueueCapacity,
    /// Bound on draining the worker queues at shutdown
    #[serde(with = "duration_serde", default = "defaults::processor_stop_timeout")]
    pub stop_timeout: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            workers: WorkerCount::default(),
            queue_capacity: defaults::processor_queue_capacity(),
            stop_timeout: defaults::processor_stop_timeout(),
        }
    }
}

/// Event socket session tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Capacity of the queue between sessions and the processor
    pub queue_capacity: QueueCapacity,
    #[serde(with = "duration_serde")]
    pub dial_timeout: Duration,
    #[serde(with = "duration_serde")]
    pub auth_timeout: Duration,
    #[serde(with = "duration_serde")]
    pub keepalive_interval: Duration,
    #[serde(with = "duration_serde")]
    pub keepalive_timeout: Duration,
    #[serde(with = "duration_serde")]
    pub backoff_base: Duration,
    #[serde(with = "duration_serde")]
    pub backoff_cap: Duration,
    pub backoff_jitter: f64,
    #[serde(with = "duration_serde")]
    pub startup_window: Duration,
    #[serde(
        with = "option_duration_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub stop_timeout: Option<Duration>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        let settings = ConnectionSettings::default();
        let backoff = Backoff::default();
        Self {
            queue_capacity: settings.queue_capacity,
            dial_timeout: settings.dial_timeout,
            auth_timeout: settings.auth_timeout,
            keepalive_interval: settings.keepalive_interval,
            keepalive_timeout: settings.keepalive_timeout,
            backoff_base: backoff.base(),
            backoff_cap: backoff.cap(),
            backoff_jitter: defaults::backoff_jitter(),
            startup_window: settings.startup_window,
            stop_timeout: None,
        }
    }
}

impl ConnectionConfig {
    /// Runtime settings shared by every session
    #[must_use]
    pub fn settings(&self) -> ConnectionSettings {
        let defaults = ConnectionSettings::default();
        ConnectionSettings {
            dial_timeout: self.dial_timeout,
            auth_timeout: self.auth_timeout,
            keepalive_interval: self.keepalive_interval,
            keepalive_timeout: self.keepalive_timeout,
            backoff: Backoff::new(self.backoff_base, self.backoff_cap, self.backoff_jitter),
            queue_capacity: self.queue_capacity,
            startup_window: self.startup_window,
            stop_timeout: self.stop_timeout.unwrap_or(defaults.stop_timeout),
            stable_after: defaults.stable_after,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [[instances]]
            name = "fs1"
            host = "10.0.0.1"
            "#,
        )
        .unwrap();

        assert_eq!(config.instances.len(), 1);
        let instance = &config.instances[0];
        assert_eq!(instance.port, Port::EVENT_SOCKET);
        assert_eq!(instance.password, "ClueCon");
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.storage.ttl, Duration::from_secs(86_400));
        assert!(config.events.rtcp && config.events.qos);
        assert!(!config.opentelemetry.is_enabled());
        assert_eq!(config.http.port, Port::HTTP);
        assert_eq!(config.processor.workers.get(), 8);
        assert_eq!(config.processor.queue_capacity.get(), 1024);
    }

    #[test]
    fn test_full_config_parses() {
        let config: Config = toml::from_str(
            r#"
            [[instances]]
            name = "fs1"
            host = "fs1.example.com"
            port = 8022
            password = "secret"

            [storage]
            type = "redis"
            ttl = "12h"

            [storage.redis]
            host = "redis.local"
            password = "p@ss"
            db = 2

            [events]
            rtcp = false

            [opentelemetry]
            endpoint = "http://otel:4317"
            service_name = "fsagent-test"
            export_interval = 5
            queue_capacity = 100

            [http]
            port = 9090

            [logging]
            level = "debug"
            format = "json"

            [processor]
            workers = 4
            queue_capacity = 64

            [connection]
            keepalive_interval = 15
            backoff_base = "500ms"
            backoff_jitter = 0.1
            "#,
        )
        .unwrap();

        assert_eq!(config.instances[0].port.get(), 8022);
        assert_eq!(config.storage.backend, StorageBackend::Redis);
        assert_eq!(config.storage.ttl, Duration::from_secs(12 * 3600));
        let redis = config.storage.redis.as_ref().unwrap();
        assert_eq!(redis.port, Port::REDIS);
        assert_eq!(redis.db, 2);
        assert!(!config.events.rtcp);
        assert!(config.events.qos);
        assert!(config.opentelemetry.is_enabled());
        assert_eq!(config.opentelemetry.export_interval, Duration::from_secs(5));
        assert_eq!(config.http.port.get(), 9090);
        assert!(config.http.enabled);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.processor.workers.get(), 4);

        let settings = config.connection.settings();
        assert_eq!(settings.keepalive_interval, Duration::from_secs(15));
        assert_eq!(settings.keepalive_timeout, Duration::from_secs(10));
        assert_eq!(settings.backoff.base(), Duration::from_millis(500));
    }

    #[test]
    fn test_password_not_serialized() {
        let instance = InstanceConfig::new("fs1", "localhost")
            .unwrap()
            .with_password("hunter2");
        let text = toml::to_string(&instance).unwrap();
        assert!(!text.contains("hunter2"));
    }

    #[test]
    fn test_invalid_port_rejected() {
        let result: Result<Config, _> = toml::from_str(
            r#"
            [[instances]]
            name = "fs1"
            host = "h"
            port = 0
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_redis_url() {
        let redis = RedisConfig {
            host: HostName::new("r".to_string()).unwrap(),
            port: Port::REDIS,
            password: None,
            db: 1,
            timeout: Duration::from_secs(2),
        };
        assert_eq!(redis.url(), "redis://r:6379/1");
    }
}
