//! Configuration module
//!
//! This module handles all configuration types and loading for the agent.

mod defaults;
mod loading;
mod types;
mod validation;

pub use loading::{
    ConfigSource, load_config, load_config_with_source, load_instances_from_env,
    load_instances_with, parse_config,
};
pub use types::{
    Config, ConnectionConfig, EventsConfig, HttpConfig, InstanceConfig, LogFormat, LoggingConfig,
    OtelConfig, ProcessorConfig, RedisConfig, StorageBackend, StorageConfig,
};

// Re-export default functions for use in tests and other modules
pub use defaults::{event_socket_password, state_ttl};
