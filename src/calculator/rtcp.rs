//! Real-time samples from RTCP report events
//!
//! RTCP receiver report blocks carry cumulative loss and the current
//! interarrival jitter estimate, so each sample stands on its own and no
//! per-channel history is kept.

use serde::Serialize;

use super::{CallIdentity, Calculator, CalculatorError, header_opt, header_or_default};
use crate::constants::headers::{CODEC_RATE, EVENT_DATE_TIMESTAMP, UNIQUE_ID};
use crate::protocol::{Event, EventKind};

/// Clock rate assumed when the event does not state one
pub const DEFAULT_CLOCK_RATE: u32 = 8000;

mod fields {
    pub const SSRC: &str = "SSRC";
    pub const RTP_RATE: &str = "RTP-Rate";
    pub const SENDER_PACKETS: &str = "Sender-Packet-Count";
    pub const SENDER_OCTETS: &str = "Octect-Packet-Count";
    pub const SOURCE_SSRC: &str = "Source0-SSRC";
    pub const FRACTION: &str = "Source0-Fraction";
    pub const LOST: &str = "Source0-Lost";
    pub const HIGHEST_SEQ: &str = "Source0-Highest-Sequence-Number-Received";
    pub const JITTER: &str = "Source0-Jitter";
    pub const LSR: &str = "Source0-LSR";
    pub const DLSR: &str = "Source0-DLSR";
}

/// Which side produced the report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Report received from the remote party
    #[default]
    Inbound,
    /// Report sent by FreeSWITCH
    Outbound,
}

impl Direction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

/// One RTCP report sample
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RtcpMetrics {
    #[serde(flatten)]
    pub identity: CallIdentity,
    pub direction: Direction,

    /// SSRC of the reported source
    pub ssrc: u32,
    /// Cumulative packets lost
    pub packets_lost: i64,
    /// Fraction lost since the previous report, 0.0 to 1.0
    pub fraction_lost: f64,
    /// Interarrival jitter in milliseconds
    pub jitter_ms: f64,
    pub highest_sequence: u32,
    pub lsr: u32,
    pub dlsr: u32,
    pub sender_packets: u64,
    pub sender_octets: u64,
    pub clock_rate: u32,
    pub report_timestamp: i64,
}

/// Computes [`RtcpMetrics`] from `RECV_RTCP_MESSAGE` / `SEND_RTCP_MESSAGE`
#[derive(Debug, Clone, Copy, Default)]
pub struct RtcpCalculator;

impl Calculator for RtcpCalculator {
    type Output = RtcpMetrics;

    fn calculate(&self, event: &Event, instance: &str) -> Result<RtcpMetrics, CalculatorError> {
        let direction = match event.kind() {
            Some(EventKind::RecvRtcpMessage) => Direction::Inbound,
            Some(EventKind::SendRtcpMessage) => Direction::Outbound,
            _ => return Err(CalculatorError::Skip("not an RTCP event")),
        };
        let channel_id = event
            .channel_id()
            .ok_or(CalculatorError::MissingHeader(UNIQUE_ID))?;

        // A sender report without a reception block has nothing to sample
        if event.headers().get_non_empty(fields::SOURCE_SSRC).is_none()
            && event.headers().get_non_empty(fields::JITTER).is_none()
        {
            return Err(CalculatorError::Skip("no reception report block"));
        }

        let clock_rate = header_opt::<u32>(event, fields::RTP_RATE)
            .or_else(|| header_opt(event, CODEC_RATE))
            .filter(|rate| *rate > 0)
            .unwrap_or(DEFAULT_CLOCK_RATE);

        let jitter_units: f64 = header_or_default(event, fields::JITTER);
        let fraction_raw: f64 = header_or_default(event, fields::FRACTION);

        let ssrc = header_opt(event, fields::SOURCE_SSRC)
            .or_else(|| header_opt(event, fields::SSRC))
            .unwrap_or(0);

        Ok(RtcpMetrics {
            identity: CallIdentity::new(channel_id, instance),
            direction,
            ssrc,
            packets_lost: header_or_default(event, fields::LOST),
            fraction_lost: fraction_lost(fraction_raw),
            jitter_ms: jitter_to_ms(jitter_units, clock_rate),
            highest_sequence: header_or_default(event, fields::HIGHEST_SEQ),
            lsr: header_or_default(event, fields::LSR),
            dlsr: header_or_default(event, fields::DLSR),
            sender_packets: header_or_default(event, fields::SENDER_PACKETS),
            sender_octets: header_or_default(event, fields::SENDER_OCTETS),
            clock_rate,
            report_timestamp: header_or_default(event, EVENT_DATE_TIMESTAMP),
        })
    }
}

/// RTP timestamp units to milliseconds
#[inline]
#[must_use]
pub fn jitter_to_ms(units: f64, clock_rate: u32) -> f64 {
    if clock_rate == 0 {
        return 0.0;
    }
    units * 1000.0 / f64::from(clock_rate)
}

/// The report's 8-bit fixed point fraction as a ratio
#[inline]
#[must_use]
fn fraction_lost(raw: f64) -> f64 {
    (raw / 256.0).clamp(0.0, 1.0)
}
