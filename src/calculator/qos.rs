//! End-of-call QoS summary from `CHANNEL_DESTROY`

use serde::Serialize;
use tracing::debug;

use super::{
    CallIdentity, Calculator, CalculatorError, header_opt, header_or_default, header_string,
};
use crate::constants::headers::{CODEC_RATE, EVENT_DATE_TIMESTAMP, UNIQUE_ID};
use crate::protocol::Event;

mod vars {
    pub const MOS: &str = "variable_rtp_audio_in_mos";
    pub const JITTER_MIN: &str = "variable_rtp_audio_in_jitter_min_variance";
    pub const JITTER_MAX: &str = "variable_rtp_audio_in_jitter_max_variance";
    pub const MEAN_INTERVAL: &str = "variable_rtp_audio_in_mean_interval";
    pub const IN_PACKETS: &str = "variable_rtp_audio_in_packet_count";
    pub const OUT_PACKETS: &str = "variable_rtp_audio_out_packet_count";
    pub const IN_BYTES: &str = "variable_rtp_audio_in_media_bytes";
    pub const OUT_BYTES: &str = "variable_rtp_audio_out_media_bytes";
    pub const IN_SKIP: &str = "variable_rtp_audio_in_skip_packet_count";
    pub const OUT_SKIP: &str = "variable_rtp_audio_out_skip_packet_count";
    pub const CODEC_NAME: &str = "variable_rtp_use_codec_name";
    pub const CODEC_PT: &str = "variable_rtp_use_codec_pt";
    pub const CODEC_PTIME: &str = "variable_rtp_use_codec_ptime";
    pub const LOCAL_IP: &str = "variable_local_media_ip";
    pub const LOCAL_PORT: &str = "variable_local_media_port";
    pub const REMOTE_IP: &str = "variable_remote_media_ip";
    pub const REMOTE_PORT: &str = "variable_remote_media_port";
}

/// Per-leg quality summary
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QosMetrics {
    #[serde(flatten)]
    pub identity: CallIdentity,

    pub mos: f64,
    pub min_jitter: f64,
    pub max_jitter: f64,
    /// `(min + max) / 2`, zero when neither bound is positive
    pub avg_jitter: f64,
    /// Mean packet interval
    pub delta: f64,

    pub total_packets: i64,
    pub packet_loss: i64,
    pub total_bytes: i64,

    pub codec_name: String,
    pub codec_pt: i32,
    pub ptime: i32,
    pub clock_rate: i32,

    pub src_ip: String,
    pub src_port: u16,
    pub dst_ip: String,
    pub dst_port: u16,

    /// `Event-Date-Timestamp` (microseconds since epoch)
    pub report_timestamp: i64,
}

/// Computes [`QosMetrics`] from a termination event
///
/// Requires the `variable_rtp_use_codec_rate` marker; legs that never
/// negotiated media lack it and are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct QosCalculator;

impl Calculator for QosCalculator {
    type Output = QosMetrics;

    fn calculate(&self, event: &Event, instance: &str) -> Result<QosMetrics, CalculatorError> {
        if event.headers().get_non_empty(CODEC_RATE).is_none() {
            return Err(CalculatorError::Skip("variable_rtp_use_codec_rate not present"));
        }
        let channel_id = event
            .channel_id()
            .ok_or(CalculatorError::MissingHeader(UNIQUE_ID))?;

        let min_jitter: f64 = header_or_default(event, vars::JITTER_MIN);
        let max_jitter: f64 = header_or_default(event, vars::JITTER_MAX);
        let avg_jitter = if min_jitter > 0.0 || max_jitter > 0.0 {
            (min_jitter + max_jitter) / 2.0
        } else {
            0.0
        };

        let sum = |a: &str, b: &str| -> i64 {
            header_or_default::<i64>(event, a).saturating_add(header_or_default(event, b))
        };

        let metrics = QosMetrics {
            identity: CallIdentity::new(channel_id, instance),
            mos: header_or_default(event, vars::MOS),
            min_jitter,
            max_jitter,
            avg_jitter,
            delta: header_or_default(event, vars::MEAN_INTERVAL),
            total_packets: sum(vars::IN_PACKETS, vars::OUT_PACKETS),
            packet_loss: sum(vars::IN_SKIP, vars::OUT_SKIP),
            total_bytes: sum(vars::IN_BYTES, vars::OUT_BYTES),
            codec_name: header_string(event, vars::CODEC_NAME),
            codec_pt: header_or_default(event, vars::CODEC_PT),
            ptime: header_or_default(event, vars::CODEC_PTIME),
            clock_rate: header_or_default(event, CODEC_RATE),
            src_ip: header_string(event, vars::LOCAL_IP),
            src_port: header_opt(event, vars::LOCAL_PORT).unwrap_or(0),
            dst_ip: header_string(event, vars::REMOTE_IP),
            dst_port: header_opt(event, vars::REMOTE_PORT).unwrap_or(0),
            report_timestamp: header_or_default(event, EVENT_DATE_TIMESTAMP),
        };

        debug!(
            channel_id = %metrics.identity.channel_id,
            instance,
            mos = metrics.mos,
            avg_jitter = metrics.avg_jitter,
            packet_loss = metrics.packet_loss,
            codec = %metrics.codec_name,
            "Calculated QoS summary"
        );
        Ok(metrics)
    }
}

/// Media descriptors carried by call setup events
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaInfo {
    pub local_ip: Option<String>,
    pub local_port: Option<u16>,
    pub remote_ip: Option<String>,
    pub remote_port: Option<u16>,
    pub codec_name: Option<String>,
}

impl MediaInfo {
    #[must_use]
    pub fn from_event(event: &Event) -> Self {
        let text = |name: &str| event.headers().get_non_empty(name).map(str::to_string);
        Self {
            local_ip: text(vars::LOCAL_IP),
            local_port: header_opt(event, vars::LOCAL_PORT),
            remote_ip: text(vars::REMOTE_IP),
            remote_port: header_opt(event, vars::REMOTE_PORT),
            codec_name: text(vars::CODEC_NAME),
        }
    }
}
