//! Default values for configuration fields
//!
//! This module centralizes all default value functions used in serde deserialization.

use crate::constants::{backoff, state, timeout};
use crate::types::{Port, QueueCapacity};
use std::time::Duration;

/// Default event socket port
#[inline]
pub fn event_socket_port() -> Port {
    Port::EVENT_SOCKET
}

/// FreeSWITCH's stock event socket password
#[inline]
pub fn event_socket_password() -> String {
    "ClueCon".to_string()
}

#[inline]
pub fn redis_port() -> Port {
    Port::REDIS
}

/// Default bound on a Redis command or connection attempt
#[inline]
pub fn redis_timeout() -> Duration {
    timeout::REDIS
}

/// Default channel state TTL (24 hours)
#[inline]
pub fn state_ttl() -> Duration {
    state::TTL
}

/// Default in-memory expiry sweep interval
#[inline]
pub fn sweep_interval() -> Duration {
    state::SWEEP_INTERVAL
}

#[inline]
pub fn enabled() -> bool {
    true
}

#[inline]
pub fn service_name() -> String {
    "fsagent".to_string()
}

/// Default OTLP push interval
#[inline]
pub fn export_interval() -> Duration {
    Duration::from_secs(10)
}

/// Default OTLP request timeout
#[inline]
pub fn export_timeout() -> Duration {
    Duration::from_secs(10)
}

#[inline]
pub fn exporter_queue_capacity() -> QueueCapacity {
    QueueCapacity::EXPORTER
}

#[inline]
pub fn processor_queue_capacity() -> QueueCapacity {
    QueueCapacity::PROCESSOR
}

/// Default bound on draining processor queues at shutdown
#[inline]
pub fn processor_stop_timeout() -> Duration {
    Duration::from_secs(10)
}

#[inline]
pub fn backoff_jitter() -> f64 {
    backoff::JITTER
}

#[inline]
pub fn log_level() -> String {
    "info".to_string()
}
