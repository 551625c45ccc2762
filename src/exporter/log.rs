//! Logging writer for running without a collector

use tracing::{info, warn};

use super::{MetricRecord, RecordWriter};

/// Emits each record as one structured `info` event with a JSON payload
#[derive(Debug, Default, Clone, Copy)]
pub struct LogWriter;

impl RecordWriter for LogWriter {
    fn write(&mut self, record: &MetricRecord) {
        let identity = record.identity();
        match serde_json::to_string(record) {
            Ok(json) => info!(
                target: "fsagent::metrics",
                kind = record.kind(),
                channel_id = %identity.channel_id,
                correlation_id = %identity.correlation_id,
                instance = %identity.instance_name,
                record = %json,
                "Metric record"
            ),
            Err(e) => warn!(error = %e, kind = record.kind(), "Failed to serialize metric record"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculator::{CallIdentity, RtcpMetrics};

    #[test]
    fn test_record_serializes_flat_with_kind_tag() {
        let record = MetricRecord::Rtcp(RtcpMetrics {
            identity: CallIdentity::new("u1", "fs1"),
            jitter_ms: 2.5,
            ..RtcpMetrics::default()
        });
        let json: serde_json::Value = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "rtcp");
        assert_eq!(json["channel_id"], "u1");
        assert_eq!(json["direction"], "inbound");
        assert_eq!(json["jitter_ms"], 2.5);

        LogWriter.write(&record);
    }
}
