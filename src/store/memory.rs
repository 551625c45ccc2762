//! In-process channel state store

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ChannelState, ChannelStateStore, StoreError, record};
use crate::metrics::StoreOp;
use crate::runtime::deadline_after;

#[derive(Debug, Clone)]
struct Entry {
    state: ChannelState,
    expires_at: Instant,
}

impl Entry {
    #[inline]
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// `DashMap`-backed store with lazy expiry and an optional background sweep
///
/// Reads treat expired entries as absent and remove them; the sweep only
/// bounds memory held by entries nobody reads again.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, Entry>>,
    shutdown: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryStore {
    /// Store without a background sweep
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that sweeps expired entries every `interval`
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn with_sweep(interval: Duration) -> Self {
        let store = Self::new();
        let entries = Arc::clone(&store.entries);
        let shutdown = store.shutdown.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = sweep(&entries, Instant::now());
                        if removed > 0 {
                            debug!(removed, remaining = entries.len(), "Swept expired channel state");
                        }
                    }
                }
            }
        });
        *store.sweeper.lock() = Some(handle);
        store
    }

    /// Number of entries held, expired or not
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every expired entry now, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        sweep(&self.entries, Instant::now())
    }

    fn check_open(&self) -> Result<(), StoreError> {
        if self.shutdown.is_cancelled() {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }
}

fn sweep(entries: &DashMap<String, Entry>, now: Instant) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| entry.is_live(now));
    before.saturating_sub(entries.len())
}

#[async_trait]
impl ChannelStateStore for MemoryStore {
    async fn get(&self, channel_id: &str) -> Result<ChannelState, StoreError> {
        let result = self.check_open().and_then(|()| {
            let now = Instant::now();
            match self.entries.get(channel_id) {
                Some(entry) if entry.is_live(now) => return Ok(entry.state.clone()),
                Some(_) => {}
                None => return Err(StoreError::NotFound),
            }
            // Expired: drop it unless a concurrent set refreshed it meanwhile
            self.entries
                .remove_if(channel_id, |_, entry| !entry.is_live(now));
            Err(StoreError::NotFound)
        });
        record(StoreOp::Get, &result);
        result
    }

    async fn set(
        &self,
        channel_id: &str,
        state: ChannelState,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let result = self.check_open().map(|()| {
            self.entries.insert(
                channel_id.to_string(),
                Entry {
                    state,
                    expires_at: deadline_after(Instant::now(), ttl),
                },
            );
        });
        record(StoreOp::Set, &result);
        result
    }

    async fn delete(&self, channel_id: &str) -> Result<(), StoreError> {
        let result = self.check_open().map(|()| {
            self.entries.remove(channel_id);
        });
        record(StoreOp::Delete, &result);
        result
    }

    /// Atomic per key: the shard lock is held across read and write
    async fn upsert(
        &self,
        channel_id: &str,
        state: ChannelState,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let result = self.check_open().map(|()| {
            let now = Instant::now();
            let expires_at = deadline_after(now, ttl);
            match self.entries.entry(channel_id.to_string()) {
                MapEntry::Occupied(mut occupied) => {
                    let merged = if occupied.get().is_live(now) {
                        state.merged_over(&occupied.get().state)
                    } else {
                        state
                    };
                    occupied.insert(Entry {
                        state: merged,
                        expires_at,
                    });
                }
                MapEntry::Vacant(vacant) => {
                    vacant.insert(Entry { state, expires_at });
                }
            }
        });
        record(StoreOp::Set, &result);
        result
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_open()
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.shutdown.cancel();
        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|e| StoreError::Backend(format!("sweeper task failed: {e}")))?;
        }
        self.entries.clear();
        Ok(())
    }
}
