//! Process-wide internal statistics
//!
//! A single lazily constructed registry of counters and gauges updated from
//! hot paths. Map-shaped counters live in `DashMap`s keyed by their label
//! values; the leaves are atomics, so an increment on an existing series
//! never takes more than a shard read lock.
//!
//! The registry is rendered in Prometheus text format by [`Stats::render_prometheus`]
//! and served on `/metrics`.

mod render;

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// Two-label counter family
type LabeledCounters = DashMap<(String, String), AtomicU64>;

/// Pipeline stage at which an event was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropStage {
    /// Connection outbound queue full
    Connection,
    /// Manager forwarding queue full or no sink registered
    Manager,
    /// Processor shard queue full
    Processor,
    /// Exporter queue full
    Exporter,
}

impl DropStage {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Manager => "manager",
            Self::Processor => "processor",
            Self::Exporter => "exporter",
        }
    }
}

/// Store operation label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    Set,
    Delete,
}

impl StoreOp {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Set => "set",
            Self::Delete => "delete",
        }
    }
}

/// Internal statistics registry
#[derive(Debug, Default)]
pub struct Stats {
    events_received: LabeledCounters,
    events_processed: LabeledCounters,
    events_skipped: LabeledCounters,
    events_dropped: LabeledCounters,
    malformed_frames: DashMap<String, AtomicU64>,
    rtcp_processed: LabeledCounters,
    qos_generated: DashMap<String, AtomicU64>,
    storage_operations: LabeledCounters,
    connections: DashMap<String, AtomicU64>,
    reconnects: DashMap<String, AtomicU64>,
    records_exported: AtomicU64,
    export_failures: AtomicU64,
}

/// The process-wide registry
pub fn stats() -> &'static Stats {
    static STATS: OnceLock<Stats> = OnceLock::new();
    STATS.get_or_init(Stats::default)
}

#[inline]
fn bump2(map: &LabeledCounters, a: &str, b: &str) {
    let key = (a.to_string(), b.to_string());
    // Fast path: existing series only needs the shard read lock
    if let Some(counter) = map.get(&key) {
        counter.fetch_add(1, Ordering::Relaxed);
        return;
    }
    map.entry(key)
        .or_insert_with(|| AtomicU64::new(0))
        .fetch_add(1, Ordering::Relaxed);
}

#[inline]
fn bump1(map: &DashMap<String, AtomicU64>, a: &str) {
    if let Some(counter) = map.get(a) {
        counter.fetch_add(1, Ordering::Relaxed);
        return;
    }
    map.entry(a.to_string())
        .or_insert_with(|| AtomicU64::new(0))
        .fetch_add(1, Ordering::Relaxed);
}

fn read2(map: &LabeledCounters, a: &str, b: &str) -> u64 {
    map.get(&(a.to_string(), b.to_string()))
        .map_or(0, |c| c.load(Ordering::Relaxed))
}

fn read1(map: &DashMap<String, AtomicU64>, a: &str) -> u64 {
    map.get(a).map_or(0, |c| c.load(Ordering::Relaxed))
}

impl Stats {
    // Ingestion

    pub fn event_received(&self, instance: &str, event_type: &str) {
        bump2(&self.events_received, instance, event_type);
    }

    pub fn event_processed(&self, instance: &str, event_type: &str) {
        bump2(&self.events_processed, instance, event_type);
    }

    /// Event intentionally not processed (missing marker, unknown type, feature off)
    pub fn event_skipped(&self, instance: &str, reason: &str) {
        bump2(&self.events_skipped, instance, reason);
    }

    pub fn event_dropped(&self, stage: DropStage, instance: &str) {
        bump2(&self.events_dropped, stage.as_str(), instance);
    }

    pub fn malformed_frame(&self, instance: &str) {
        bump1(&self.malformed_frames, instance);
    }

    // Calculators

    pub fn rtcp_processed(&self, instance: &str, direction: &str) {
        bump2(&self.rtcp_processed, instance, direction);
    }

    pub fn qos_generated(&self, instance: &str) {
        bump1(&self.qos_generated, instance);
    }

    // Store

    pub fn storage_operation(&self, op: StoreOp, ok: bool) {
        bump2(
            &self.storage_operations,
            op.as_str(),
            if ok { "success" } else { "error" },
        );
    }

    // Connections

    pub fn set_connected(&self, instance: &str, connected: bool) {
        let value = u64::from(connected);
        if let Some(gauge) = self.connections.get(instance) {
            gauge.store(value, Ordering::Relaxed);
            return;
        }
        self.connections
            .entry(instance.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .store(value, Ordering::Relaxed);
    }

    pub fn reconnect_scheduled(&self, instance: &str) {
        bump1(&self.reconnects, instance);
    }

    // Exporter

    pub fn records_exported(&self, count: u64) {
        self.records_exported.fetch_add(count, Ordering::Relaxed);
    }

    pub fn export_failure(&self) {
        self.export_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Readers, mostly for tests and the health surface

    #[must_use]
    pub fn events_received(&self, instance: &str, event_type: &str) -> u64 {
        read2(&self.events_received, instance, event_type)
    }

    #[must_use]
    pub fn events_processed(&self, instance: &str, event_type: &str) -> u64 {
        read2(&self.events_processed, instance, event_type)
    }

    #[must_use]
    pub fn events_skipped(&self, instance: &str, reason: &str) -> u64 {
        read2(&self.events_skipped, instance, reason)
    }

    #[must_use]
    pub fn events_dropped(&self, stage: DropStage, instance: &str) -> u64 {
        read2(&self.events_dropped, stage.as_str(), instance)
    }

    #[must_use]
    pub fn malformed_frames(&self, instance: &str) -> u64 {
        read1(&self.malformed_frames, instance)
    }

    #[must_use]
    pub fn rtcp_count(&self, instance: &str, direction: &str) -> u64 {
        read2(&self.rtcp_processed, instance, direction)
    }

    #[must_use]
    pub fn qos_count(&self, instance: &str) -> u64 {
        read1(&self.qos_generated, instance)
    }

    #[must_use]
    pub fn storage_operations(&self, op: StoreOp, ok: bool) -> u64 {
        read2(
            &self.storage_operations,
            op.as_str(),
            if ok { "success" } else { "error" },
        )
    }

    #[must_use]
    pub fn is_connected(&self, instance: &str) -> bool {
        read1(&self.connections, instance) == 1
    }

    #[must_use]
    pub fn reconnects(&self, instance: &str) -> u64 {
        read1(&self.reconnects, instance)
    }

    #[must_use]
    pub fn exported_total(&self) -> u64 {
        self.records_exported.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn export_failures(&self) -> u64 {
        self.export_failures.load(Ordering::Relaxed)
    }
}
