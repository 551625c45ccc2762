//! Event correlation and dispatch
//!
//! The [`EventProcessor`] receives events from the connection manager and
//! runs them on a fixed pool of workers. Events are sharded by channel id,
//! so every event of one leg is handled by the same worker in arrival order
//! while different legs proceed in parallel.
//!
//! Dispatch by event family:
//! - early-call events (`CHANNEL_CREATE`, `CHANNEL_ANSWER`, `CHANNEL_BRIDGE`)
//!   upsert the leg's [`ChannelState`]
//! - RTCP events become real-time samples, identified from state if present
//! - `CHANNEL_DESTROY` becomes the end-of-call summary; the leg's state is
//!   consumed and deleted, or derived from headers when it is gone

pub mod correlation;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinSet;
use tracing::{debug, info, trace, warn};

use crate::calculator::{Calculator, CalculatorError, MediaInfo, QosCalculator, RtcpCalculator};
use crate::config::Config;
use crate::connection::{Delivery, EventSink};
use crate::constants::state;
use crate::exporter::{MetricRecord, MetricsExporter};
use crate::metrics::{DropStage, stats};
use crate::protocol::{Event, EventKind};
use crate::store::{ChannelState, ChannelStateStore, StoreError};
use crate::types::{QueueCapacity, WorkerCount};

use correlation::{domain_name, early_correlation_id, fallback_correlation_id, shard_for};

/// Worker pool and dispatch parameters
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub workers: WorkerCount,
    /// Per-worker queue capacity
    pub queue_capacity: QueueCapacity,
    /// TTL applied on every state upsert
    pub ttl: Duration,
    pub rtcp: bool,
    pub qos: bool,
    pub stop_timeout: Duration,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            workers: WorkerCount::DEFAULT,
            queue_capacity: QueueCapacity::PROCESSOR,
            ttl: state::TTL,
            rtcp: true,
            qos: true,
            stop_timeout: Duration::from_secs(10),
        }
    }
}

impl ProcessorSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            workers: config.processor.workers,
            queue_capacity: config.processor.queue_capacity,
            ttl: config.storage.ttl,
            rtcp: config.events.rtcp,
            qos: config.events.qos,
            stop_timeout: config.processor.stop_timeout,
        }
    }
}

/// Why one event produced no metric or state change
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("skipped: {0}")]
    Skip(&'static str),

    #[error("event has no Unique-ID")]
    MissingChannelId,

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("calculator: {0}")]
    Calculator(#[from] CalculatorError),
}

impl ProcessError {
    /// Label used when counting the event as skipped
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Skip(reason) => *reason,
            Self::MissingChannelId => "missing_channel_id",
            Self::Store(_) => "store_error",
            Self::Calculator(e) if e.is_skip() => "calculator_skip",
            Self::Calculator(_) => "calculator_error",
        }
    }

    /// Expected outcomes that are not worth a warning
    #[must_use]
    pub fn is_benign(&self) -> bool {
        match self {
            Self::Skip(_) => true,
            Self::Calculator(e) => e.is_skip(),
            _ => false,
        }
    }
}

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("processor already started")]
    AlreadyStarted,

    #[error("workers did not drain within {0:?}")]
    StopTimeout(Duration),
}

/// What a worker does with one event
struct Pipeline {
    store: Arc<dyn ChannelStateStore>,
    exporter: Arc<dyn MetricsExporter>,
    settings: ProcessorSettings,
    qos: QosCalculator,
    rtcp: RtcpCalculator,
}

impl Pipeline {
    async fn handle(&self, event: Event) {
        let instance = event.instance();
        match self.process(&event).await {
            Ok(()) => stats().event_processed(instance, event.name()),
            Err(e) => {
                if e.is_benign() {
                    trace!(instance, event = event.name(), reason = %e, "Event skipped");
                } else {
                    warn!(
                        instance,
                        event = event.name(),
                        channel_id = event.channel_id().unwrap_or_default(),
                        error = %e,
                        "Event processing failed"
                    );
                }
                stats().event_skipped(instance, e.reason());
            }
        }
    }

    async fn process(&self, event: &Event) -> Result<(), ProcessError> {
        match event.kind() {
            Some(EventKind::ChannelCreate | EventKind::ChannelAnswer | EventKind::ChannelBridge) => {
                self.on_early_call(event).await
            }
            Some(EventKind::RecvRtcpMessage | EventKind::SendRtcpMessage) => {
                if !self.settings.rtcp {
                    return Err(ProcessError::Skip("rtcp_disabled"));
                }
                self.on_rtcp(event).await
            }
            Some(EventKind::ChannelDestroy) => {
                if !self.settings.qos {
                    return Err(ProcessError::Skip("qos_disabled"));
                }
                self.on_termination(event).await
            }
            None => Err(ProcessError::Skip("unsupported_event")),
        }
    }

    async fn on_early_call(&self, event: &Event) -> Result<(), ProcessError> {
        let channel_id = event.channel_id().ok_or(ProcessError::MissingChannelId)?;
        let headers = event.headers();

        let mut state = ChannelState::new(
            channel_id,
            early_correlation_id(headers),
            domain_name(headers),
            event.instance(),
        );
        let media = MediaInfo::from_event(event);
        state.local_media_ip = media.local_ip;
        state.local_media_port = media.local_port;
        state.remote_media_ip = media.remote_ip;
        state.remote_media_port = media.remote_port;
        state.codec_name = media.codec_name;

        self.store
            .upsert(channel_id, state, self.settings.ttl)
            .await?;
        trace!(instance = event.instance(), channel_id, event = event.name(), "Channel state updated");
        Ok(())
    }

    async fn on_rtcp(&self, event: &Event) -> Result<(), ProcessError> {
        let mut metrics = self.rtcp.calculate(event, event.instance())?;
        let channel_id = metrics.identity.channel_id.clone();

        let (correlation_id, domain) = match self.store.get(&channel_id).await {
            Ok(state) => identity_from_state(state, event),
            Err(StoreError::NotFound) => header_identity(event),
            Err(e) => {
                debug!(channel_id = %channel_id, error = %e, "State lookup failed, using headers");
                header_identity(event)
            }
        };
        metrics.identity.correlation_id = correlation_id;
        metrics.identity.domain_name = domain;

        stats().rtcp_processed(event.instance(), metrics.direction.as_str());
        self.exporter.export(MetricRecord::Rtcp(metrics));
        Ok(())
    }

    async fn on_termination(&self, event: &Event) -> Result<(), ProcessError> {
        let mut metrics = self.qos.calculate(event, event.instance())?;
        let channel_id = metrics.identity.channel_id.clone();

        let (correlation_id, domain) = match self.store.get(&channel_id).await {
            Ok(state) => {
                if let Err(e) = self.store.delete(&channel_id).await {
                    warn!(channel_id = %channel_id, error = %e, "Failed to delete channel state");
                }
                identity_from_state(state, event)
            }
            Err(StoreError::NotFound) => {
                debug!(channel_id = %channel_id, "No channel state, correlating from headers");
                header_identity(event)
            }
            Err(e) => {
                warn!(channel_id = %channel_id, error = %e, "State lookup failed, correlating from headers");
                header_identity(event)
            }
        };
        metrics.identity.correlation_id = correlation_id;
        metrics.identity.domain_name = domain;

        debug!(
            instance = event.instance(),
            channel_id = %channel_id,
            correlation_id = %metrics.identity.correlation_id,
            mos = metrics.mos,
            avg_jitter = metrics.avg_jitter,
            "QoS summary computed"
        );
        stats().qos_generated(event.instance());
        self.exporter.export(MetricRecord::Qos(metrics));
        Ok(())
    }
}

fn header_identity(event: &Event) -> (String, String) {
    let headers = event.headers();
    (fallback_correlation_id(headers), domain_name(headers))
}

/// Stored identity, with blanks filled from headers
fn identity_from_state(state: ChannelState, event: &Event) -> (String, String) {
    let headers = event.headers();
    let correlation_id = if state.correlation_id.is_empty() {
        fallback_correlation_id(headers)
    } else {
        state.correlation_id
    };
    let domain = if state.domain_name.is_empty() {
        domain_name(headers)
    } else {
        state.domain_name
    };
    (correlation_id, domain)
}

/// Sharded correlation engine
pub struct EventProcessor {
    pipeline: Arc<Pipeline>,
    senders: RwLock<Option<Vec<mpsc::Sender<Event>>>>,
    receivers: Mutex<Vec<mpsc::Receiver<Event>>>,
    workers: Mutex<Option<JoinSet<()>>>,
    dropped: AtomicU64,
}

impl std::fmt::Debug for EventProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventProcessor")
            .field("workers", &self.pipeline.settings.workers)
            .field("dropped", &self.dropped.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl EventProcessor {
    pub fn new(
        store: Arc<dyn ChannelStateStore>,
        exporter: Arc<dyn MetricsExporter>,
        settings: ProcessorSettings,
    ) -> Self {
        let (senders, receivers) = (0..settings.workers.get())
            .map(|_| mpsc::channel(settings.queue_capacity.get()))
            .unzip();
        Self {
            pipeline: Arc::new(Pipeline {
                store,
                exporter,
                settings,
                qos: QosCalculator,
                rtcp: RtcpCalculator,
            }),
            senders: RwLock::new(Some(senders)),
            receivers: Mutex::new(receivers),
            workers: Mutex::new(None),
            dropped: AtomicU64::new(0),
        }
    }

    /// Spawn one worker per shard
    pub fn start(&self) -> Result<(), ProcessorError> {
        let receivers = std::mem::take(&mut *self.receivers.lock());
        if receivers.is_empty() {
            return Err(ProcessorError::AlreadyStarted);
        }

        let mut workers = JoinSet::new();
        for (shard, mut rx) in receivers.into_iter().enumerate() {
            let pipeline = Arc::clone(&self.pipeline);
            workers.spawn(async move {
                while let Some(event) = rx.recv().await {
                    pipeline.handle(event).await;
                }
                trace!(shard, "Processor worker drained");
            });
        }
        info!(
            workers = self.pipeline.settings.workers.get(),
            queue_capacity = self.pipeline.settings.queue_capacity.get(),
            "Event processor started"
        );
        *self.workers.lock() = Some(workers);
        Ok(())
    }

    /// Close the shard queues and wait for workers to drain them
    ///
    /// Workers still busy after the stop timeout are aborted.
    pub async fn stop(&self) -> Result<(), ProcessorError> {
        self.senders.write().take();
        let workers = self.workers.lock().take();
        let Some(mut workers) = workers else {
            return Ok(());
        };

        let timeout = self.pipeline.settings.stop_timeout;
        let drained = tokio::time::timeout(timeout, async {
            while workers.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(?timeout, "Processor workers did not drain in time, aborting");
            workers.abort_all();
            return Err(ProcessorError::StopTimeout(timeout));
        }
        info!(dropped = self.dropped(), "Event processor stopped");
        Ok(())
    }

    /// Events refused because a shard queue was full or closed
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn count_drop(&self, event: &Event) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        stats().event_dropped(DropStage::Processor, event.instance());
    }
}

impl EventSink for EventProcessor {
    fn offer(&self, event: Event) -> Delivery {
        let senders = self.senders.read();
        let Some(senders) = senders.as_ref() else {
            self.count_drop(&event);
            return Delivery::Dropped;
        };

        let shard = shard_for(event.channel_id().unwrap_or_default(), senders.len());
        match senders[shard].try_send(event) {
            Ok(()) => Delivery::Accepted,
            Err(TrySendError::Full(event) | TrySendError::Closed(event)) => {
                self.count_drop(&event);
                Delivery::Dropped
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::ExporterError;
    use crate::protocol::Headers;
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    #[derive(Default)]
    struct Collect(Mutex<Vec<MetricRecord>>);

    #[async_trait]
    impl MetricsExporter for Collect {
        fn export(&self, record: MetricRecord) {
            self.0.lock().push(record);
        }
        async fn start(&self, _deadline: Duration) -> Result<(), ExporterError> {
            Ok(())
        }
        async fn stop(&self, _deadline: Duration) -> Result<(), ExporterError> {
            Ok(())
        }
        fn dropped(&self) -> u64 {
            0
        }
    }

    fn event(instance: &str, pairs: &[(&str, &str)]) -> Event {
        let headers: Headers = pairs.iter().copied().collect();
        Event::new(instance, headers, None).unwrap()
    }

    fn pipeline(store: Arc<MemoryStore>, exporter: Arc<Collect>) -> Pipeline {
        Pipeline {
            store,
            exporter,
            settings: ProcessorSettings::default(),
            qos: QosCalculator,
            rtcp: RtcpCalculator,
        }
    }

    const DESTROY_U1: &[(&str, &str)] = &[
        ("Event-Name", "CHANNEL_DESTROY"),
        ("Unique-ID", "U1"),
        ("variable_rtp_use_codec_rate", "8000"),
        ("variable_rtp_audio_in_mos", "4.2"),
        ("variable_rtp_audio_in_jitter_min_variance", "1.0"),
        ("variable_rtp_audio_in_jitter_max_variance", "3.0"),
    ];

    #[tokio::test]
    async fn test_early_call_then_termination_uses_state() {
        let store = Arc::new(MemoryStore::new());
        let exporter = Arc::new(Collect::default());
        let p = pipeline(store.clone(), exporter.clone());

        p.process(&event(
            "proc-a",
            &[
                ("Event-Name", "CHANNEL_CREATE"),
                ("Unique-ID", "U1"),
                ("variable_sip_call_id", "C1"),
                ("variable_domain_name", "d.com"),
            ],
        ))
        .await
        .unwrap();
        assert_eq!(store.get("U1").await.unwrap().correlation_id, "C1");

        p.process(&event("proc-a", DESTROY_U1)).await.unwrap();

        let records = exporter.0.lock();
        let MetricRecord::Qos(m) = &records[0] else {
            panic!("expected a QoS record");
        };
        assert_eq!(m.identity.correlation_id, "C1");
        assert_eq!(m.identity.domain_name, "d.com");
        assert_eq!(m.mos, 4.2);
        assert_eq!(m.avg_jitter, 2.0);
        assert!(store.get("U1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_termination_without_state_falls_back_to_headers() {
        let store = Arc::new(MemoryStore::new());
        let exporter = Arc::new(Collect::default());
        let p = pipeline(store, exporter.clone());

        let mut pairs = DESTROY_U1.to_vec();
        pairs.push(("Other-Leg-Unique-ID", "U2"));
        pairs.push(("variable_sip_from_host", "a.com"));
        p.process(&event("proc-b", &pairs)).await.unwrap();

        let records = exporter.0.lock();
        assert_eq!(records[0].identity().correlation_id, "U2");
        assert_eq!(records[0].identity().domain_name, "a.com");
    }

    #[tokio::test]
    async fn test_termination_without_codec_marker_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let exporter = Arc::new(Collect::default());
        let p = pipeline(store, exporter.clone());

        let err = p
            .process(&event("proc-c", &[("Event-Name", "CHANNEL_DESTROY"), ("Unique-ID", "U1")]))
            .await
            .unwrap_err();
        assert!(err.is_benign());
        assert_eq!(err.reason(), "calculator_skip");
        assert!(exporter.0.lock().is_empty());
    }

    #[tokio::test]
    async fn test_early_call_preserves_created_at_and_media() {
        let store = Arc::new(MemoryStore::new());
        let p = pipeline(store.clone(), Arc::new(Collect::default()));

        p.process(&event(
            "proc-d",
            &[
                ("Event-Name", "CHANNEL_CREATE"),
                ("Unique-ID", "U3"),
                ("variable_remote_media_ip", "192.0.2.1"),
            ],
        ))
        .await
        .unwrap();
        let created = store.get("U3").await.unwrap().created_at;

        p.process(&event(
            "proc-d",
            &[("Event-Name", "CHANNEL_ANSWER"), ("Unique-ID", "U3")],
        ))
        .await
        .unwrap();
        let state = store.get("U3").await.unwrap();
        assert_eq!(state.created_at, created);
        assert_eq!(state.remote_media_ip.as_deref(), Some("192.0.2.1"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_rtcp_uses_state_identity_without_consuming_it() {
        let store = Arc::new(MemoryStore::new());
        let exporter = Arc::new(Collect::default());
        let p = pipeline(store.clone(), exporter.clone());

        store
            .set("U4", ChannelState::new("U4", "CALL4", "x.com", "proc-e"), state::TTL)
            .await
            .unwrap();
        p.process(&event(
            "proc-e",
            &[
                ("Event-Name", "RECV_RTCP_MESSAGE"),
                ("Unique-ID", "U4"),
                ("Source0-SSRC", "1234"),
                ("Source0-Jitter", "80"),
            ],
        ))
        .await
        .unwrap();

        let records = exporter.0.lock();
        assert_eq!(records[0].kind(), "rtcp");
        assert_eq!(records[0].identity().correlation_id, "CALL4");
        assert!(store.get("U4").await.is_ok());
        assert_eq!(stats().rtcp_count("proc-e", "inbound"), 1);
    }

    #[tokio::test]
    async fn test_disabled_and_unknown_events() {
        let store = Arc::new(MemoryStore::new());
        let mut p = pipeline(store, Arc::new(Collect::default()));
        p.settings.rtcp = false;

        let err = p
            .process(&event("proc-f", &[("Event-Name", "SEND_RTCP_MESSAGE"), ("Unique-ID", "U5")]))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "rtcp_disabled");

        let err = p
            .process(&event("proc-f", &[("Event-Name", "HEARTBEAT")]))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "unsupported_event");
    }

    #[tokio::test]
    async fn test_offer_drops_newest_when_shard_full() {
        let settings = ProcessorSettings {
            workers: WorkerCount::new(1).unwrap(),
            queue_capacity: QueueCapacity::new(2).unwrap(),
            ..ProcessorSettings::default()
        };
        let processor = EventProcessor::new(
            Arc::new(MemoryStore::new()),
            Arc::new(Collect::default()),
            settings,
        );

        // Not started: nothing drains the queue
        let create = |id: &str| event("proc-g", &[("Event-Name", "CHANNEL_CREATE"), ("Unique-ID", id)]);
        assert_eq!(processor.offer(create("a")), Delivery::Accepted);
        assert_eq!(processor.offer(create("b")), Delivery::Accepted);
        assert_eq!(processor.offer(create("c")), Delivery::Dropped);
        assert_eq!(processor.dropped(), 1);
        assert_eq!(stats().events_dropped(DropStage::Processor, "proc-g"), 1);
    }

    #[tokio::test]
    async fn test_start_stop_drains_queued_events() {
        let store = Arc::new(MemoryStore::new());
        let processor = EventProcessor::new(
            store.clone(),
            Arc::new(Collect::default()),
            ProcessorSettings::default(),
        );
        for i in 0..50 {
            let id = format!("leg-{i}");
            processor.offer(event(
                "proc-h",
                &[("Event-Name", "CHANNEL_CREATE"), ("Unique-ID", id.as_str())],
            ));
        }
        processor.start().unwrap();
        assert!(matches!(processor.start(), Err(ProcessorError::AlreadyStarted)));
        processor.stop().await.unwrap();

        assert_eq!(store.len(), 50);
        assert_eq!(stats().events_processed("proc-h", "CHANNEL_CREATE"), 50);
        assert_eq!(
            processor.offer(event("proc-h", &[("Event-Name", "CHANNEL_CREATE"), ("Unique-ID", "late")])),
            Delivery::Dropped
        );
    }
}
