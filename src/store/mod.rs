//! Channel state store
//!
//! Holds per-leg correlation state between the early-call events that create
//! it and the termination event that consumes it. Every entry carries its own
//! expiry, so state for calls whose termination event is lost disappears
//! after the TTL.
//!
//! Two backends implement [`ChannelStateStore`]:
//! - [`MemoryStore`]: in-process `DashMap` with lazy expiry and a periodic sweep
//! - [`RedisStore`]: networked, server-side expiry via `SET ... EX`

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use self::redis::{RedisStore, connection_url};

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metrics::{StoreOp, stats};

/// Correlation state for one call leg
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelState {
    pub channel_id: String,
    pub correlation_id: String,
    pub domain_name: String,
    pub instance_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_media_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_media_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_media_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_media_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec_name: Option<String>,
}

impl ChannelState {
    /// New state stamped with the current time
    #[must_use]
    pub fn new(
        channel_id: impl Into<String>,
        correlation_id: impl Into<String>,
        domain_name: impl Into<String>,
        instance_name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            channel_id: channel_id.into(),
            correlation_id: correlation_id.into(),
            domain_name: domain_name.into(),
            instance_name: instance_name.into(),
            created_at: now,
            updated_at: now,
            local_media_ip: None,
            local_media_port: None,
            remote_media_ip: None,
            remote_media_port: None,
            codec_name: None,
        }
    }

    /// Merge `self` as the newer version of `previous`
    ///
    /// Keeps the original creation time, and media descriptors the newer
    /// event did not carry.
    #[must_use]
    pub fn merged_over(mut self, previous: &ChannelState) -> Self {
        self.created_at = previous.created_at;
        if self.local_media_ip.is_none() {
            self.local_media_ip.clone_from(&previous.local_media_ip);
        }
        if self.local_media_port.is_none() {
            self.local_media_port = previous.local_media_port;
        }
        if self.remote_media_ip.is_none() {
            self.remote_media_ip.clone_from(&previous.remote_media_ip);
        }
        if self.remote_media_port.is_none() {
            self.remote_media_port = previous.remote_media_port;
        }
        if self.codec_name.is_none() {
            self.codec_name.clone_from(&previous.codec_name);
        }
        self
    }
}

/// Store failures
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Key absent or expired; callers fall back to event headers
    #[error("channel state not found")]
    NotFound,

    #[error("state serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store backend error: {0}")]
    Backend(String),

    #[error("store is closed")]
    Closed,
}

impl StoreError {
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// Keyed, expiring storage of [`ChannelState`]
///
/// Operations on disjoint keys never serialize behind each other. `set`
/// overwrites and resets the expiry; an expired entry reads as
/// [`StoreError::NotFound`] regardless of when it is physically removed.
#[async_trait]
pub trait ChannelStateStore: Send + Sync + std::fmt::Debug {
    async fn get(&self, channel_id: &str) -> Result<ChannelState, StoreError>;

    async fn set(
        &self,
        channel_id: &str,
        state: ChannelState,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    /// Remove the entry; deleting a missing key succeeds
    async fn delete(&self, channel_id: &str) -> Result<(), StoreError>;

    /// Insert or refresh, preserving `created_at` of a live entry
    ///
    /// The default reads then writes. Callers that need it atomic per key
    /// either use a backend that overrides this or serialize by key.
    async fn upsert(
        &self,
        channel_id: &str,
        state: ChannelState,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let state = match self.get(channel_id).await {
            Ok(previous) => state.merged_over(&previous),
            Err(StoreError::NotFound) => state,
            Err(e) => return Err(e),
        };
        self.set(channel_id, state, ttl).await
    }

    /// Verify the backend is reachable
    async fn ping(&self) -> Result<(), StoreError>;

    /// Release background tasks and connections
    async fn close(&self) -> Result<(), StoreError>;
}

/// Count one store operation; a miss is a successful read
pub(crate) fn record<T>(op: StoreOp, result: &Result<T, StoreError>) {
    let ok = matches!(result, Ok(_) | Err(StoreError::NotFound));
    stats().storage_operation(op, ok);
}
