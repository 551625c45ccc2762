//! End-to-end tests: server → manager → processor → store → exporter

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fsagent::connection::ConnectionManager;
use fsagent::exporter::{ExporterError, MetricRecord, MetricsExporter};
use fsagent::processor::{EventProcessor, ProcessorSettings};
use fsagent::protocol::commands;
use fsagent::store::{ChannelStateStore, MemoryStore};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

mod test_helpers;
use test_helpers::{MockEslServer, fast_settings, wait_until};

const WAIT: Duration = Duration::from_secs(3);

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

struct Pipeline {
    server: MockEslServer,
    manager: Arc<ConnectionManager>,
    processor: Arc<EventProcessor>,
    store: Arc<MemoryStore>,
    exporter: Arc<Collect>,
}

impl Pipeline {
    async fn start(instance: &str) -> Self {
        let server = MockEslServer::start("ClueCon").await;
        let store = Arc::new(MemoryStore::new());
        let exporter = Arc::new(Collect::default());
        let processor = Arc::new(EventProcessor::new(
            store.clone(),
            exporter.clone(),
            ProcessorSettings::default(),
        ));
        processor.start().unwrap();

        let manager = Arc::new(ConnectionManager::new(
            vec![server.instance(instance, "ClueCon")],
            fast_settings(),
            &commands::subscription(true, true),
            &CancellationToken::new(),
        ));
        manager.set_event_forwarder(processor.clone());
        manager.start().await.unwrap();

        Self {
            server,
            manager,
            processor,
            store,
            exporter,
        }
    }

    async fn stop(self) {
        self.manager.stop().await.unwrap();
        self.processor.stop().await.unwrap();
        self.store.close().await.unwrap();
    }
}

const QOS_SUMMARY: &[(&str, &str)] = &[
    ("variable_rtp_use_codec_rate", "8000"),
    ("variable_rtp_use_codec_name", "PCMU"),
    ("variable_rtp_audio_in_mos", "4.1"),
    ("variable_rtp_audio_in_packet_count", "1500"),
    ("variable_rtp_audio_in_jitter_min_variance", "2.0"),
    ("variable_rtp_audio_in_jitter_max_variance", "6.0"),
];

fn destroy<'a>(unique_id: &'a str, extra: &[(&'a str, &'a str)]) -> Vec<(&'a str, &'a str)> {
    let mut pairs = vec![("Event-Name", "CHANNEL_DESTROY"), ("Unique-ID", unique_id)];
    pairs.extend_from_slice(QOS_SUMMARY);
    pairs.extend_from_slice(extra);
    pairs
}

#[tokio::test]
async fn test_state_created_early_identifies_end_of_call_summary() {
    let p = Pipeline::start("e2e-a").await;

    p.server.push_event(&[
        ("Event-Name", "CHANNEL_CREATE"),
        ("Unique-ID", "U1"),
        ("variable_sip_call_id", "C1"),
        ("variable_domain_name", "d.com"),
    ]);
    assert!(wait_until(WAIT, || p.store.len() == 1).await);
    let state = p.store.get("U1").await.unwrap();
    assert_eq!(state.correlation_id, "C1");
    assert_eq!(state.domain_name, "d.com");
    assert_eq!(state.instance_name, "e2e-a");

    p.server.push_event(&destroy("U1", &[]));
    assert!(wait_until(WAIT, || !p.exporter.0.lock().is_empty()).await);

    {
        let records = p.exporter.0.lock();
        assert_eq!(records.len(), 1);
        let MetricRecord::Qos(m) = &records[0] else {
            panic!("expected a QoS record, got {:?}", records[0]);
        };
        assert_eq!(m.identity.channel_id, "U1");
        assert_eq!(m.identity.correlation_id, "C1");
        assert_eq!(m.identity.domain_name, "d.com");
        assert_eq!(m.identity.instance_name, "e2e-a");
        assert_eq!(m.mos, 4.1);
        assert_eq!(m.avg_jitter, 4.0);
    }
    // Consumed by the summary
    assert!(wait_until(WAIT, || p.store.is_empty()).await);

    p.stop().await;
}

#[tokio::test]
async fn test_summary_without_state_falls_back_to_headers() {
    let p = Pipeline::start("e2e-b").await;

    p.server.push_event(&destroy(
        "U1",
        &[
            ("Other-Leg-Unique-ID", "U2"),
            ("variable_sip_call_id", "C9"),
            ("variable_sip_from_host", "a.com"),
        ],
    ));
    assert!(wait_until(WAIT, || !p.exporter.0.lock().is_empty()).await);

    let records = p.exporter.0.lock().clone();
    assert_eq!(records[0].kind(), "qos");
    assert_eq!(records[0].identity().correlation_id, "U2");
    assert_eq!(records[0].identity().domain_name, "a.com");

    p.stop().await;
}

#[tokio::test]
async fn test_rtcp_reports_use_state_without_consuming_it() {
    let p = Pipeline::start("e2e-rtcp").await;

    p.server.push_event(&[
        ("Event-Name", "CHANNEL_ANSWER"),
        ("Unique-ID", "U7"),
        ("variable_sip_call_id", "C7"),
        ("variable_domain_name", "r.com"),
    ]);
    assert!(wait_until(WAIT, || p.store.len() == 1).await);

    for name in ["RECV_RTCP_MESSAGE", "SEND_RTCP_MESSAGE"] {
        p.server.push_event(&[
            ("Event-Name", name),
            ("Unique-ID", "U7"),
            ("Source0-SSRC", "4242"),
            ("Source0-Jitter", "80"),
            ("RTP-Rate", "8000"),
        ]);
    }
    assert!(wait_until(WAIT, || p.exporter.0.lock().len() == 2).await);

    for record in p.exporter.0.lock().iter() {
        assert_eq!(record.kind(), "rtcp");
        assert_eq!(record.identity().correlation_id, "C7");
        assert_eq!(record.identity().domain_name, "r.com");
    }
    assert!(p.store.get("U7").await.is_ok());

    p.stop().await;
}

#[tokio::test]
async fn test_events_for_one_leg_are_processed_in_order() {
    let p = Pipeline::start("e2e-order").await;

    // Create then destroy back to back: the summary must see the state
    for i in 0..20 {
        let id = format!("L{i}");
        let call = format!("call-{i}");
        p.server.push_event(&[
            ("Event-Name", "CHANNEL_CREATE"),
            ("Unique-ID", id.as_str()),
            ("variable_sip_call_id", call.as_str()),
        ]);
        p.server.push_event(&destroy(&id, &[]));
    }
    assert!(wait_until(WAIT, || p.exporter.0.lock().len() == 20).await);

    for record in p.exporter.0.lock().iter() {
        let channel = &record.identity().channel_id;
        let expected = format!("call-{}", &channel[1..]);
        assert_eq!(record.identity().correlation_id, expected);
    }

    p.stop().await;
}
