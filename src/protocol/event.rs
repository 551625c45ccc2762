//! Parsed events

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::frame::{Frame, FrameError, parse_header_block};
use super::headers::Headers;
use crate::constants::headers::{CONTENT_LENGTH, EVENT_NAME, UNIQUE_ID};

/// Event types the agent subscribes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ChannelCreate,
    ChannelAnswer,
    ChannelBridge,
    ChannelDestroy,
    RecvRtcpMessage,
    SendRtcpMessage,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        Self::ChannelCreate,
        Self::ChannelAnswer,
        Self::ChannelBridge,
        Self::ChannelDestroy,
        Self::RecvRtcpMessage,
        Self::SendRtcpMessage,
    ];

    /// Wire name as it appears in `Event-Name` and in subscriptions
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ChannelCreate => "CHANNEL_CREATE",
            Self::ChannelAnswer => "CHANNEL_ANSWER",
            Self::ChannelBridge => "CHANNEL_BRIDGE",
            Self::ChannelDestroy => "CHANNEL_DESTROY",
            Self::RecvRtcpMessage => "RECV_RTCP_MESSAGE",
            Self::SendRtcpMessage => "SEND_RTCP_MESSAGE",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event received from an instance
///
/// Immutable after construction; header values are already percent-decoded.
#[derive(Debug, Clone)]
pub struct Event {
    name: String,
    instance: Arc<str>,
    headers: Headers,
    body: Option<String>,
    received_at: DateTime<Utc>,
}

impl Event {
    /// Build an event from decoded headers
    ///
    /// Fails if `Event-Name` is missing or blank.
    pub fn new(
        instance: impl Into<Arc<str>>,
        headers: Headers,
        body: Option<String>,
    ) -> Result<Self, FrameError> {
        let name = headers
            .get_non_empty(EVENT_NAME)
            .ok_or(FrameError::MissingEventName)?
            .to_string();
        Ok(Self {
            name,
            instance: instance.into(),
            headers,
            body,
            received_at: Utc::now(),
        })
    }

    /// Interpret a `text/event-plain` frame
    ///
    /// The frame body is itself a header block with percent-encoded values,
    /// optionally followed by a nested body sized by its own `Content-Length`.
    pub fn from_frame(frame: &Frame, instance: impl Into<Arc<str>>) -> Result<Self, FrameError> {
        let raw = frame.body.as_deref().ok_or(FrameError::MissingEventName)?;
        let (headers, offset) = parse_header_block(raw, true)?;

        let body = headers
            .get(CONTENT_LENGTH)
            .and_then(|len| len.trim().parse::<usize>().ok())
            .filter(|len| *len > 0)
            .map(|len| {
                let rest = &raw.as_bytes()[offset.min(raw.len())..];
                String::from_utf8_lossy(&rest[..len.min(rest.len())]).into_owned()
            });

        Self::new(instance, headers, body)
    }

    /// Value of `Event-Name`
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Known event type, if this is one the agent subscribes to
    #[must_use]
    pub fn kind(&self) -> Option<EventKind> {
        EventKind::from_name(&self.name)
    }

    /// Name of the instance the event came from
    #[must_use]
    pub fn instance(&self) -> &str {
        &self.instance
    }

    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Channel identifier (`Unique-ID`)
    #[must_use]
    pub fn channel_id(&self) -> Option<&str> {
        self.headers.get_non_empty(UNIQUE_ID)
    }

    #[must_use]
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    #[must_use]
    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }
}
