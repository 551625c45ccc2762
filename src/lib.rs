//! FreeSWITCH call-quality telemetry agent
//!
//! Collects events from FreeSWITCH instances over the event socket, keeps
//! short-lived per-call correlation state, turns RTCP reports and end-of-call
//! summaries into metric records and exports them over OTLP.
//!
//! Pipeline: [`ProtocolConnection`] → [`ConnectionManager`] →
//! [`EventProcessor`] → {[`ChannelStateStore`], calculators,
//! [`MetricsExporter`]}. Every hand-off is a bounded queue that drops
//! (and counts) rather than blocks.

pub mod agent;
pub mod args;
pub mod calculator;
pub mod config;
pub mod connection;
pub mod connection_error;
pub mod constants;
pub mod exporter;
pub mod logging;
pub mod metrics;
pub mod processor;
pub mod protocol;
pub mod runtime;
pub mod server;
pub mod store;
pub mod types;

pub use agent::Agent;
pub use config::{Config, InstanceConfig, load_config};
pub use connection::{
    ConnectionManager, ConnectionSettings, ConnectionStatus, Delivery, EventSink,
    ProtocolConnection, SessionState,
};
pub use connection_error::ConnectionError;
pub use exporter::{MetricRecord, MetricsExporter};
pub use processor::{EventProcessor, ProcessorSettings};
pub use protocol::{Event, EventKind};
pub use store::{ChannelState, ChannelStateStore, MemoryStore, RedisStore, StoreError};
