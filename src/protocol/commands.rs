//! Event socket command construction helpers
//!
//! Every command is a single line terminated by an empty line.

use super::event::EventKind;

/// Keepalive probe, answered with an `api/response` frame
pub const API_STATUS: &[u8] = b"api status\n\n";

/// Polite close before dropping the socket
pub const EXIT: &[u8] = b"exit\n\n";

/// Construct the `auth` command
#[inline]
pub fn auth(password: &str) -> String {
    format!("auth {}\n\n", password)
}

/// Construct the `event plain` subscription command
#[inline]
pub fn event_plain(events: &[EventKind]) -> String {
    let names: Vec<&str> = events.iter().map(|k| k.as_str()).collect();
    format!("event plain {}\n\n", names.join(" "))
}

/// Event types to subscribe to for the enabled features
///
/// Channel lifecycle events are always needed for correlation; destroy
/// events carry the QoS summary and RTCP messages the real-time samples.
#[must_use]
pub fn subscription(rtcp: bool, qos: bool) -> Vec<EventKind> {
    let mut events = vec![
        EventKind::ChannelCreate,
        EventKind::ChannelAnswer,
        EventKind::ChannelBridge,
    ];
    if qos {
        events.push(EventKind::ChannelDestroy);
    }
    if rtcp {
        events.push(EventKind::RecvRtcpMessage);
        events.push(EventKind::SendRtcpMessage);
    }
    events
}
