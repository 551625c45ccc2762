//! Event socket connections
//!
//! One [`ProtocolConnection`] per configured FreeSWITCH instance keeps a
//! session alive: connect, authenticate, subscribe, read frames, probe with
//! keepalives and reconnect with backoff on any failure. The
//! [`ConnectionManager`] owns all of them, reports their status and forwards
//! their events to the registered [`EventSink`].
//!
//! Every hand-off is a bounded queue with a non-blocking producer; a slow
//! consumer costs dropped (and counted) events, never a stalled socket.

mod backoff;
mod manager;
mod session;
mod status;

pub use backoff::Backoff;
pub use manager::{ConnectionManager, ManagerError};
pub use session::ProtocolConnection;
pub use status::{ConnectionStatus, SessionState, StatusCell};

use std::time::Duration;

use thiserror::Error;

use crate::constants::timeout;
use crate::protocol::Event;
use crate::types::QueueCapacity;

/// Result of offering an event downstream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Accepted,
    Dropped,
}

/// Non-blocking consumer of events
///
/// `offer` must return promptly: implementations queue or drop, they never
/// wait for capacity.
pub trait EventSink: Send + Sync {
    fn offer(&self, event: Event) -> Delivery;
}

/// Session timing and queueing parameters shared by all connections
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub dial_timeout: Duration,
    pub auth_timeout: Duration,
    pub keepalive_interval: Duration,
    pub keepalive_timeout: Duration,
    pub backoff: Backoff,
    pub queue_capacity: QueueCapacity,
    pub startup_window: Duration,
    pub stop_timeout: Duration,
    /// A session that ends sooner than this extends the failure streak
    pub stable_after: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            dial_timeout: timeout::DIAL,
            auth_timeout: timeout::AUTH,
            keepalive_interval: timeout::KEEPALIVE_INTERVAL,
            keepalive_timeout: timeout::KEEPALIVE_TIMEOUT,
            backoff: Backoff::default(),
            queue_capacity: QueueCapacity::CONNECTION,
            startup_window: timeout::STARTUP_WINDOW,
            stop_timeout: timeout::CONNECTION_STOP,
            stable_after: timeout::STABLE_SESSION,
        }
    }
}

/// Failure to stop a connection task
#[derive(Debug, Error)]
pub enum StopError {
    #[error("connection '{instance}' did not stop within {after:?}")]
    Timeout { instance: String, after: Duration },

    #[error("connection '{instance}' task failed: {reason}")]
    TaskFailed { instance: String, reason: String },
}

/// Log an error at the level it classifies itself as
macro_rules! log_at_level {
    ($level:expr, $($arg:tt)+) => {
        match $level {
            tracing::Level::ERROR => tracing::error!($($arg)+),
            tracing::Level::WARN => tracing::warn!($($arg)+),
            tracing::Level::INFO => tracing::info!($($arg)+),
            tracing::Level::DEBUG => tracing::debug!($($arg)+),
            _ => tracing::trace!($($arg)+),
        }
    };
}

pub(crate) use log_at_level;
