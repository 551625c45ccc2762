//! Connection error types for event socket sessions
//!
//! Every variant is transient from the agent's point of view: the session
//! logs it at the level returned by [`ConnectionError::log_level`] and
//! schedules a reconnect with backoff.

use std::fmt;
use std::time::Duration;

use crate::protocol::FrameError;

/// Errors that can occur while establishing or running a session
#[derive(Debug)]
#[non_exhaustive]
pub enum ConnectionError {
    /// TCP connection failed
    TcpConnect {
        host: String,
        port: u16,
        source: std::io::Error,
    },

    /// A handshake step did not finish before its deadline
    Timeout {
        instance: String,
        stage: &'static str,
        after: Duration,
    },

    /// The server did not open with an auth request
    UnexpectedGreeting { instance: String, content_type: String },

    /// The server rejected the password
    AuthenticationFailed { instance: String, reply: String },

    /// The server rejected the event subscription
    SubscriptionFailed { instance: String, reply: String },

    /// A keepalive probe went unanswered
    KeepaliveTimeout { instance: String, after: Duration },

    /// The server sent a disconnect notice or closed the stream
    Disconnected { instance: String },

    /// The frame stream cannot be resynchronized
    Framing {
        instance: String,
        source: FrameError,
    },

    /// I/O error during communication
    IoError(std::io::Error),
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TcpConnect { host, port, source } => {
                write!(f, "Failed to connect to {}:{}: {}", host, port, source)
            }
            Self::Timeout {
                instance,
                stage,
                after,
            } => {
                write!(
                    f,
                    "Instance '{}' timed out during {} after {:?}",
                    instance, stage, after
                )
            }
            Self::UnexpectedGreeting {
                instance,
                content_type,
            } => {
                write!(
                    f,
                    "Unexpected greeting from instance '{}': {}",
                    instance, content_type
                )
            }
            Self::AuthenticationFailed { instance, reply } => {
                write!(
                    f,
                    "Authentication failed for instance '{}': {}",
                    instance, reply
                )
            }
            Self::SubscriptionFailed { instance, reply } => {
                write!(
                    f,
                    "Event subscription rejected by instance '{}': {}",
                    instance, reply
                )
            }
            Self::KeepaliveTimeout { instance, after } => {
                write!(
                    f,
                    "Keepalive to instance '{}' unanswered after {:?}",
                    instance, after
                )
            }
            Self::Disconnected { instance } => {
                write!(f, "Instance '{}' closed the connection", instance)
            }
            Self::Framing { instance, source } => {
                write!(f, "Unrecoverable stream from '{}': {}", instance, source)
            }
            Self::IoError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::TcpConnect { source, .. } => Some(source),
            Self::Framing { source, .. } => Some(source),
            Self::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl ConnectionError {
    /// Check if this is an authentication error
    #[must_use]
    pub const fn is_authentication_error(&self) -> bool {
        matches!(self, Self::AuthenticationFailed { .. })
    }

    /// Check if this is a network connectivity error
    #[must_use]
    pub const fn is_network_error(&self) -> bool {
        matches!(
            self,
            Self::TcpConnect { .. } | Self::IoError(_) | Self::Disconnected { .. }
        )
    }

    /// Get the appropriate log level for this error
    #[must_use]
    pub fn log_level(&self) -> tracing::Level {
        match self {
            // A bad password or subscription will not fix itself
            Self::AuthenticationFailed { .. } | Self::SubscriptionFailed { .. } => {
                tracing::Level::ERROR
            }
            // Orderly shutdown of the peer (e.g. FreeSWITCH restart)
            Self::Disconnected { .. } => tracing::Level::INFO,
            _ => tracing::Level::WARN,
        }
    }
}

impl From<std::io::Error> for ConnectionError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err)
    }
}
