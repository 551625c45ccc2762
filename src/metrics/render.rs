//! Prometheus text exposition of the stats registry

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use super::{LabeledCounters, Stats};

fn header(out: &mut String, name: &str, help: &str, kind: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
}

/// Escape a label value per the exposition format
fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn family2(out: &mut String, name: &str, help: &str, labels: (&str, &str), map: &LabeledCounters) {
    header(out, name, help, "counter");
    let mut rows: Vec<_> = map
        .iter()
        .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
        .collect();
    rows.sort();
    for ((a, b), value) in rows {
        let _ = writeln!(
            out,
            "{name}{{{}=\"{}\",{}=\"{}\"}} {value}",
            labels.0,
            escape(&a),
            labels.1,
            escape(&b)
        );
    }
}

fn family1(
    out: &mut String,
    name: &str,
    help: &str,
    kind: &str,
    label: &str,
    map: &DashMap<String, AtomicU64>,
) {
    header(out, name, help, kind);
    let mut rows: Vec<_> = map
        .iter()
        .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
        .collect();
    rows.sort();
    for (a, value) in rows {
        let _ = writeln!(out, "{name}{{{label}=\"{}\"}} {value}", escape(&a));
    }
}

impl Stats {
    /// Render all series in Prometheus text format
    ///
    /// Series within a family are sorted by label values so output is stable.
    #[must_use]
    pub fn render_prometheus(&self) -> String {
        let mut out = String::with_capacity(4096);

        family2(
            &mut out,
            "fsagent_events_received_total",
            "Total number of events received from FreeSWITCH",
            ("instance", "event_type"),
            &self.events_received,
        );
        family2(
            &mut out,
            "fsagent_events_processed_total",
            "Total number of events processed successfully",
            ("instance", "event_type"),
            &self.events_processed,
        );
        family2(
            &mut out,
            "fsagent_events_skipped_total",
            "Total number of events intentionally not processed",
            ("instance", "reason"),
            &self.events_skipped,
        );
        family2(
            &mut out,
            "fsagent_events_dropped_total",
            "Total number of events dropped on a full queue",
            ("stage", "instance"),
            &self.events_dropped,
        );
        family1(
            &mut out,
            "fsagent_malformed_frames_total",
            "Total number of malformed frames discarded",
            "counter",
            "instance",
            &self.malformed_frames,
        );
        family2(
            &mut out,
            "fsagent_rtcp_messages_processed_total",
            "Total number of RTCP messages processed",
            ("instance", "direction"),
            &self.rtcp_processed,
        );
        family1(
            &mut out,
            "fsagent_qos_metrics_generated_total",
            "Total number of QoS summaries generated",
            "counter",
            "instance",
            &self.qos_generated,
        );
        family2(
            &mut out,
            "fsagent_storage_operations_total",
            "Total number of state store operations",
            ("operation", "status"),
            &self.storage_operations,
        );
        family1(
            &mut out,
            "fsagent_fs_connections",
            "FreeSWITCH connection status (1=connected, 0=disconnected)",
            "gauge",
            "instance",
            &self.connections,
        );
        family1(
            &mut out,
            "fsagent_reconnects_total",
            "Total number of scheduled reconnect attempts",
            "counter",
            "instance",
            &self.reconnects,
        );

        header(
            &mut out,
            "fsagent_records_exported_total",
            "Total number of metric records handed to the OTLP pipeline",
            "counter",
        );
        let _ = writeln!(
            out,
            "fsagent_records_exported_total {}",
            self.records_exported.load(Ordering::Relaxed)
        );
        header(
            &mut out,
            "fsagent_export_failures_total",
            "Total number of failed exporter flushes",
            "counter",
        );
        let _ = writeln!(
            out,
            "fsagent_export_failures_total {}",
            self.export_failures.load(Ordering::Relaxed)
        );

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_series() {
        let stats = Stats::default();
        stats.event_received("fs1", "CHANNEL_CREATE");
        stats.set_connected("fs1", true);

        let text = stats.render_prometheus();
        assert!(text.contains("# TYPE fsagent_events_received_total counter"));
        assert!(text.contains(
            "fsagent_events_received_total{instance=\"fs1\",event_type=\"CHANNEL_CREATE\"} 1"
        ));
        assert!(text.contains("# TYPE fsagent_fs_connections gauge"));
        assert!(text.contains("fsagent_fs_connections{instance=\"fs1\"} 1"));
    }

    #[test]
    fn test_render_empty_registry_has_headers() {
        let text = Stats::default().render_prometheus();
        assert!(text.contains("# HELP fsagent_storage_operations_total"));
        assert!(text.contains("fsagent_records_exported_total 0"));
    }

    #[test]
    fn test_label_escaping() {
        assert_eq!(escape("a\"b\\c"), "a\\\"b\\\\c");
    }

    #[test]
    fn test_series_sorted() {
        let stats = Stats::default();
        stats.qos_generated("fs2");
        stats.qos_generated("fs1");
        let text = stats.render_prometheus();
        let first = text.find("qos_metrics_generated_total{instance=\"fs1\"}").unwrap();
        let second = text.find("qos_metrics_generated_total{instance=\"fs2\"}").unwrap();
        assert!(first < second);
    }
}
