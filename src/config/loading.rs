//! Configuration loading from files and environment variables
//!
//! This module handles loading configuration from TOML files and environment
//! variables, with environment variables taking precedence for container
//! deployments.

use anyhow::{Context, Result};

use super::defaults;
use super::types::{Config, InstanceConfig};
use crate::types::{HostName, InstanceName, Port};

/// Prefix of the indexed instance variables
const INSTANCE_ENV_PREFIX: &str = "FSAGENT_INSTANCE_";

/// Load instance configuration from environment variables
///
/// Supports indexed environment variables for container deployments:
/// - `FSAGENT_INSTANCE_0_HOST`, `FSAGENT_INSTANCE_0_PORT`, `FSAGENT_INSTANCE_0_NAME`,
///   `FSAGENT_INSTANCE_0_PASSWORD`
/// - `FSAGENT_INSTANCE_1_HOST`, ...
///
/// Indices are read in order until the first missing `_HOST`. `PORT`
/// defaults to 8021, `NAME` to `fs<N>`, `PASSWORD` to the FreeSWITCH default.
pub fn load_instances_from_env() -> Result<Option<Vec<InstanceConfig>>> {
    load_instances_with(|key| std::env::var(key).ok())
}

/// Same as [`load_instances_from_env`] with an injectable variable lookup
pub fn load_instances_with<F>(lookup: F) -> Result<Option<Vec<InstanceConfig>>>
where
    F: Fn(&str) -> Option<String>,
{
    let mut instances = Vec::new();

    for index in 0.. {
        let var = |field: &str| lookup(&format!("{INSTANCE_ENV_PREFIX}{index}_{field}"));

        let Some(host) = var("HOST") else {
            break;
        };
        let host = HostName::new(host)
            .with_context(|| format!("{INSTANCE_ENV_PREFIX}{index}_HOST"))?;

        let port = match var("PORT") {
            Some(p) => p
                .parse::<Port>()
                .with_context(|| format!("{INSTANCE_ENV_PREFIX}{index}_PORT"))?,
            None => defaults::event_socket_port(),
        };

        let name = InstanceName::new(var("NAME").unwrap_or_else(|| format!("fs{index}")))
            .with_context(|| format!("{INSTANCE_ENV_PREFIX}{index}_NAME"))?;

        let password = var("PASSWORD").unwrap_or_else(defaults::event_socket_password);

        instances.push(InstanceConfig {
            name,
            host,
            port,
            password,
        });
    }

    Ok((!instances.is_empty()).then_some(instances))
}

/// Where the effective configuration came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    File,
    FileWithEnvInstances,
    Environment,
}

impl ConfigSource {
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::File => "configuration file",
            Self::FileWithEnvInstances => "configuration file (instances from environment)",
            Self::Environment => "environment variables",
        }
    }
}

/// Parse configuration text, apply environment overrides and validate
pub fn parse_config(text: &str) -> Result<Config> {
    let mut config: Config = toml::from_str(text).context("Failed to parse configuration")?;
    if let Some(instances) = load_instances_from_env()? {
        config.instances = instances;
    }
    config.validate()?;
    Ok(config)
}

/// Load configuration from a TOML file, with environment variable overrides
///
/// Environment variables for instances replace the file's `[[instances]]`
/// list entirely. This allows container deployments to point the agent at
/// different servers without modifying the config file.
pub fn load_config(config_path: &str) -> Result<Config> {
    load_config_with_source(config_path).map(|(config, _)| config)
}

/// Load configuration, falling back to environment-only when the file is absent
pub fn load_config_with_source(config_path: &str) -> Result<(Config, ConfigSource)> {
    let env_instances = load_instances_from_env()?;

    let (mut config, source) = match std::fs::read_to_string(config_path) {
        Ok(text) => {
            let config: Config = toml::from_str(&text)
                .with_context(|| format!("Failed to parse config file '{}'", config_path))?;
            let source = if env_instances.is_some() {
                ConfigSource::FileWithEnvInstances
            } else {
                ConfigSource::File
            };
            (config, source)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && env_instances.is_some() => {
            (Config::default(), ConfigSource::Environment)
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read config file '{}'", config_path));
        }
    };

    if let Some(instances) = env_instances {
        tracing::info!(
            count = instances.len(),
            "Using instances from environment variables (overriding config file)"
        );
        config.instances = instances;
    }

    config.validate()?;
    Ok((config, source))
}
