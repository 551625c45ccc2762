//! OpenTelemetry OTLP writer

use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Gauge, Meter, MeterProvider};
use opentelemetry_otlp::{MetricExporter, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::exporter::PushMetricExporter;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider, Temporality};
use tracing::info;

use super::{ExporterError, MetricRecord, RecordWriter};
use crate::calculator::{CallIdentity, QosMetrics, RtcpMetrics};

/// Settings for the OTLP pipeline
#[derive(Debug, Clone)]
pub struct OtelSettings {
    /// gRPC collector endpoint, e.g. `http://localhost:4317`
    pub endpoint: String,
    pub service_name: String,
    pub export_interval: Duration,
    pub timeout: Duration,
}

struct QosGauges {
    mos: Gauge<f64>,
    jitter_avg: Gauge<f64>,
    jitter_min: Gauge<f64>,
    jitter_max: Gauge<f64>,
    delta: Gauge<f64>,
    packets: Gauge<i64>,
    packet_loss: Gauge<i64>,
    bytes: Gauge<i64>,
}

struct RtcpGauges {
    jitter: Gauge<f64>,
    fraction_lost: Gauge<f64>,
    packets_lost: Gauge<i64>,
}

/// Gauges carry per-leg identity, so every export must drain the series it
/// sent or the attribute sets pile up until the SDK's cardinality limit
/// folds new legs into an anonymous overflow series.
const TEMPORALITY: Temporality = Temporality::Delta;

/// Writes records as gauge observations on an [`SdkMeterProvider`]
///
/// A periodic reader pushes the observations made since the previous export
/// to the collector every `export_interval`; `flush` forces a final push and
/// shuts the provider down.
pub struct OtelWriter {
    provider: SdkMeterProvider,
    qos: QosGauges,
    rtcp: RtcpGauges,
}

impl std::fmt::Debug for OtelWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtelWriter").finish_non_exhaustive()
    }
}

impl OtelWriter {
    /// Build the OTLP pipeline
    ///
    /// Must be called within a Tokio runtime; the gRPC channel connects lazily.
    pub fn new(settings: &OtelSettings) -> Result<Self, ExporterError> {
        let exporter = MetricExporter::builder()
            .with_tonic()
            .with_endpoint(settings.endpoint.clone())
            .with_timeout(settings.timeout)
            .with_temporality(TEMPORALITY)
            .build()
            .map_err(|e| ExporterError::Build(e.to_string()))?;

        let writer = Self::with_exporter(exporter, settings);
        info!(
            endpoint = %settings.endpoint,
            service = %settings.service_name,
            interval = ?settings.export_interval,
            "OTLP metrics pipeline configured"
        );
        Ok(writer)
    }

    fn with_exporter<E: PushMetricExporter>(exporter: E, settings: &OtelSettings) -> Self {
        let reader = PeriodicReader::builder(exporter)
            .with_interval(settings.export_interval)
            .build();

        let resource = Resource::builder()
            .with_service_name(settings.service_name.clone())
            .build();

        let provider = SdkMeterProvider::builder()
            .with_reader(reader)
            .with_resource(resource)
            .build();

        let meter = provider.meter("fsagent");
        Self {
            qos: qos_gauges(&meter),
            rtcp: rtcp_gauges(&meter),
            provider,
        }
    }

    fn record_qos(&self, m: &QosMetrics) {
        let mut attrs = identity_attributes(&m.identity);
        attrs.push(KeyValue::new("codec", m.codec_name.clone()));
        attrs.push(KeyValue::new("clock_rate", i64::from(m.clock_rate)));

        self.qos.mos.record(m.mos, &attrs);
        self.qos.jitter_avg.record(m.avg_jitter, &attrs);
        self.qos.jitter_min.record(m.min_jitter, &attrs);
        self.qos.jitter_max.record(m.max_jitter, &attrs);
        self.qos.delta.record(m.delta, &attrs);
        self.qos.packets.record(m.total_packets, &attrs);
        self.qos.packet_loss.record(m.packet_loss, &attrs);
        self.qos.bytes.record(m.total_bytes, &attrs);
    }

    fn record_rtcp(&self, m: &RtcpMetrics) {
        let mut attrs = identity_attributes(&m.identity);
        attrs.push(KeyValue::new("direction", m.direction.as_str()));
        attrs.push(KeyValue::new("ssrc", i64::from(m.ssrc)));

        self.rtcp.jitter.record(m.jitter_ms, &attrs);
        self.rtcp.fraction_lost.record(m.fraction_lost, &attrs);
        self.rtcp.packets_lost.record(m.packets_lost, &attrs);
    }
}

impl RecordWriter for OtelWriter {
    fn write(&mut self, record: &MetricRecord) {
        match record {
            MetricRecord::Qos(m) => self.record_qos(m),
            MetricRecord::Rtcp(m) => self.record_rtcp(m),
        }
    }

    fn flush(&mut self) -> Result<(), ExporterError> {
        self.provider
            .force_flush()
            .map_err(|e| ExporterError::Flush(e.to_string()))?;
        self.provider
            .shutdown()
            .map_err(|e| ExporterError::Flush(e.to_string()))
    }
}

fn identity_attributes(identity: &CallIdentity) -> Vec<KeyValue> {
    vec![
        KeyValue::new("channel_id", identity.channel_id.clone()),
        KeyValue::new("correlation_id", identity.correlation_id.clone()),
        KeyValue::new("domain_name", identity.domain_name.clone()),
        KeyValue::new("instance", identity.instance_name.clone()),
    ]
}

fn qos_gauges(meter: &Meter) -> QosGauges {
    QosGauges {
        mos: meter
            .f64_gauge("fsagent.qos.mos")
            .with_description("Mean opinion score of the inbound audio stream")
            .build(),
        jitter_avg: meter
            .f64_gauge("fsagent.qos.jitter.avg")
            .with_description("Average of min and max jitter variance")
            .with_unit("ms")
            .build(),
        jitter_min: meter
            .f64_gauge("fsagent.qos.jitter.min")
            .with_description("Minimum jitter variance")
            .with_unit("ms")
            .build(),
        jitter_max: meter
            .f64_gauge("fsagent.qos.jitter.max")
            .with_description("Maximum jitter variance")
            .with_unit("ms")
            .build(),
        delta: meter
            .f64_gauge("fsagent.qos.delta")
            .with_description("Mean packet interval")
            .with_unit("ms")
            .build(),
        packets: meter
            .i64_gauge("fsagent.qos.packets")
            .with_description("Media packets sent and received")
            .build(),
        packet_loss: meter
            .i64_gauge("fsagent.qos.packet_loss")
            .with_description("Skipped packets in both directions")
            .build(),
        bytes: meter
            .i64_gauge("fsagent.qos.bytes")
            .with_description("Media bytes sent and received")
            .with_unit("By")
            .build(),
    }
}

fn rtcp_gauges(meter: &Meter) -> RtcpGauges {
    RtcpGauges {
        jitter: meter
            .f64_gauge("fsagent.rtcp.jitter")
            .with_description("Interarrival jitter reported by RTCP")
            .with_unit("ms")
            .build(),
        fraction_lost: meter
            .f64_gauge("fsagent.rtcp.fraction_lost")
            .with_description("Fraction of packets lost since the previous report")
            .build(),
        packets_lost: meter
            .i64_gauge("fsagent.rtcp.packets_lost")
            .with_description("Cumulative packets lost reported by RTCP")
            .build(),
    }
}
