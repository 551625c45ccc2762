//! Core type definitions
//!
//! Validated newtypes used by configuration and throughout the pipeline.

#[macro_use]
mod config;
mod validated;

pub use config::duration;
pub use config::{Port, QueueCapacity, WorkerCount, duration_serde, option_duration_serde};
pub use validated::{HostName, InstanceName, ValidationError};
