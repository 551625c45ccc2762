//! Configuration validation
//!
//! Field-level invariants (non-empty names, non-zero ports and capacities) are
//! enforced by the types at deserialization. This checks what spans fields.

use anyhow::{Result, bail};
use std::collections::HashSet;
use std::time::Duration;

use super::types::{Config, StorageBackend};
use crate::constants::timeout::MAX_CONFIGURED;

impl Config {
    /// Validate configuration for correctness
    ///
    /// - At least one instance, with unique names
    /// - A `[storage.redis]` section when the Redis backend is selected
    /// - At least one of RTCP and QoS processing enabled
    /// - Keepalive timeout shorter than the keepalive interval
    /// - No configured duration longer than 30 days
    pub fn validate(&self) -> Result<()> {
        if self.instances.is_empty() {
            bail!("Configuration must have at least one instance");
        }

        let mut seen = HashSet::new();
        for instance in &self.instances {
            if !seen.insert(instance.name.as_str()) {
                bail!("Duplicate instance name '{}'", instance.name);
            }
        }

        if self.storage.backend == StorageBackend::Redis && self.storage.redis.is_none() {
            bail!("storage type is 'redis' but no [storage.redis] section is configured");
        }
        if self.storage.ttl.is_zero() {
            bail!("storage.ttl must be greater than zero");
        }

        if !self.events.rtcp && !self.events.qos {
            bail!("At least one of events.rtcp and events.qos must be enabled");
        }

        let connection = &self.connection;
        if connection.keepalive_timeout >= connection.keepalive_interval {
            bail!(
                "connection.keepalive_timeout ({:?}) must be shorter than keepalive_interval ({:?})",
                connection.keepalive_timeout,
                connection.keepalive_interval
            );
        }
        if !(0.0..1.0).contains(&connection.backoff_jitter) {
            bail!(
                "connection.backoff_jitter must be in [0, 1), got {}",
                connection.backoff_jitter
            );
        }
        if connection.backoff_base.is_zero() {
            bail!("connection.backoff_base must be greater than zero");
        }

        if self.opentelemetry.is_enabled() && self.opentelemetry.export_interval.is_zero() {
            bail!("opentelemetry.export_interval must be greater than zero");
        }

        for (name, value) in self.durations() {
            if value > MAX_CONFIGURED {
                bail!("{name} ({value:?}) exceeds the maximum of {MAX_CONFIGURED:?}");
            }
        }

        Ok(())
    }

    fn durations(&self) -> Vec<(&'static str, Duration)> {
        let connection = &self.connection;
        let mut durations = vec![
            ("storage.ttl", self.storage.ttl),
            ("storage.sweep_interval", self.storage.sweep_interval),
            ("connection.dial_timeout", connection.dial_timeout),
            ("connection.auth_timeout", connection.auth_timeout),
            ("connection.keepalive_interval", connection.keepalive_interval),
            ("connection.keepalive_timeout", connection.keepalive_timeout),
            ("connection.backoff_base", connection.backoff_base),
            ("connection.backoff_cap", connection.backoff_cap),
            ("connection.startup_window", connection.startup_window),
            ("processor.stop_timeout", self.processor.stop_timeout),
            ("opentelemetry.export_interval", self.opentelemetry.export_interval),
            ("opentelemetry.timeout", self.opentelemetry.timeout),
        ];
        if let Some(stop) = connection.stop_timeout {
            durations.push(("connection.stop_timeout", stop));
        }
        if let Some(redis) = &self.storage.redis {
            durations.push(("storage.redis.timeout", redis.timeout));
        }
        durations
    }
}
