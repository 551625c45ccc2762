//! Metric export
//!
//! The processor hands every computed metric to a [`MetricsExporter`] and
//! moves on. Exporters put records on a bounded queue (dropping and counting
//! on overflow) and a background task writes them to the backend:
//!
//! - [`OtelWriter`]: OpenTelemetry gauges exported over OTLP/gRPC
//! - [`LogWriter`]: one structured log line per record, for dry runs

mod log;
mod otlp;
mod queue;

pub use log::LogWriter;
pub use otlp::{OtelSettings, OtelWriter};
pub use queue::QueuedExporter;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::calculator::{CallIdentity, QosMetrics, RtcpMetrics};

/// A computed metric on its way out
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MetricRecord {
    Qos(QosMetrics),
    Rtcp(RtcpMetrics),
}

impl MetricRecord {
    #[must_use]
    pub fn identity(&self) -> &CallIdentity {
        match self {
            Self::Qos(m) => &m.identity,
            Self::Rtcp(m) => &m.identity,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Qos(_) => "qos",
            Self::Rtcp(_) => "rtcp",
        }
    }
}

/// Exporter failures, surfaced only at startup and shutdown
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExporterError {
    #[error("failed to build exporter: {0}")]
    Build(String),

    #[error("exporter already started")]
    AlreadyStarted,

    #[error("exporter did not stop within {0:?}")]
    StopTimeout(Duration),

    #[error("flush failed: {0}")]
    Flush(String),
}

/// Fire-and-forget sink for metric records
#[async_trait]
pub trait MetricsExporter: Send + Sync {
    /// Queue a record without blocking; drops and counts when full
    fn export(&self, record: MetricRecord);

    /// Start background delivery, failing if the backend cannot be set up in time
    async fn start(&self, deadline: Duration) -> Result<(), ExporterError>;

    /// Drain the queue and flush the backend within `deadline`
    async fn stop(&self, deadline: Duration) -> Result<(), ExporterError>;

    /// Records dropped because the queue was full
    fn dropped(&self) -> u64;
}

/// Backend that records are written to, one at a time, from the queue task
pub trait RecordWriter: Send + 'static {
    fn write(&mut self, record: &MetricRecord);

    /// Push buffered data to the backend; may block
    fn flush(&mut self) -> Result<(), ExporterError> {
        Ok(())
    }
}
