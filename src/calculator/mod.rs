//! Event to metric calculators
//!
//! Calculators are pure functions of one event. They never touch the state
//! store; correlation identity is resolved by the processor and attached to
//! the result afterwards.

mod qos;
mod rtcp;

pub use qos::{MediaInfo, QosCalculator, QosMetrics};
pub use rtcp::{Direction, RtcpCalculator, RtcpMetrics};

use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

use crate::protocol::Event;

/// Calculator outcomes other than a metric
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum CalculatorError {
    /// The event does not carry what this calculator needs; not a failure
    #[error("skipped: {0}")]
    Skip(&'static str),

    #[error("event is missing required header {0}")]
    MissingHeader(&'static str),
}

impl CalculatorError {
    #[must_use]
    pub const fn is_skip(&self) -> bool {
        matches!(self, Self::Skip(_))
    }
}

/// A pure event to metric function
pub trait Calculator {
    type Output;

    fn calculate(&self, event: &Event, instance: &str) -> Result<Self::Output, CalculatorError>;
}

/// Who a metric belongs to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CallIdentity {
    pub channel_id: String,
    pub correlation_id: String,
    pub domain_name: String,
    pub instance_name: String,
}

impl CallIdentity {
    /// Identity with correlation fields left for the processor to resolve
    #[must_use]
    pub fn new(channel_id: impl Into<String>, instance_name: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            instance_name: instance_name.into(),
            ..Self::default()
        }
    }
}

/// Parse a numeric header, treating absent or unparsable values as the default
#[inline]
pub(crate) fn header_or_default<T: FromStr + Default>(event: &Event, name: &str) -> T {
    header_opt(event, name).unwrap_or_default()
}

#[inline]
pub(crate) fn header_opt<T: FromStr>(event: &Event, name: &str) -> Option<T> {
    event
        .headers()
        .get_non_empty(name)
        .and_then(|v| v.trim().parse().ok())
}

/// Non-blank string header, owned
#[inline]
pub(crate) fn header_string(event: &Event, name: &str) -> String {
    event
        .headers()
        .get_non_empty(name)
        .map(str::to_string)
        .unwrap_or_default()
}
