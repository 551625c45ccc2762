//! Per-connection status tracking

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// Position in the session state machine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Authenticating,
    Subscribing,
    Connected,
    Closing,
}

impl SessionState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Subscribing => "subscribing",
            Self::Connected => "connected",
            Self::Closing => "closing",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub state: SessionState,
    pub last_event_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Consecutive failed connection attempts
    pub retry_count: u32,
    /// Events dropped on a full outbound queue
    pub dropped_events: u64,
}

#[derive(Debug, Default)]
struct Slow {
    state: SessionState,
    last_error: Option<String>,
    retry_count: u32,
}

/// Shared, concurrently updated status of one connection
///
/// The per-event fields are atomics; state transitions and errors are rare
/// and sit behind a lock.
#[derive(Debug, Default)]
pub struct StatusCell {
    slow: RwLock<Slow>,
    /// Milliseconds since the epoch, 0 when no event has arrived yet
    last_event_ms: AtomicI64,
    dropped: AtomicU64,
}

impl StatusCell {
    pub fn set_state(&self, state: SessionState) {
        self.slow.write().state = state;
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.slow.read().state
    }

    /// Entered Connected: the failure streak is over
    pub fn mark_connected(&self) {
        let mut slow = self.slow.write();
        slow.state = SessionState::Connected;
        slow.retry_count = 0;
    }

    /// A connection attempt failed
    pub fn record_failure(&self, error: &impl std::fmt::Display, consecutive: u32) {
        let mut slow = self.slow.write();
        slow.state = SessionState::Disconnected;
        slow.last_error = Some(error.to_string());
        slow.retry_count = consecutive;
    }

    /// An established session ended with an error
    pub fn record_error(&self, error: &impl std::fmt::Display) {
        let mut slow = self.slow.write();
        slow.state = SessionState::Disconnected;
        slow.last_error = Some(error.to_string());
    }

    #[inline]
    pub fn touch(&self, at: DateTime<Utc>) {
        self.last_event_ms
            .store(at.timestamp_millis(), Ordering::Relaxed);
    }

    #[inline]
    pub fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> ConnectionStatus {
        let slow = self.slow.read();
        let ms = self.last_event_ms.load(Ordering::Relaxed);
        ConnectionStatus {
            connected: slow.state == SessionState::Connected,
            state: slow.state,
            last_event_time: (ms != 0).then(|| DateTime::from_timestamp_millis(ms)).flatten(),
            last_error: slow.last_error.clone(),
            retry_count: slow.retry_count,
            dropped_events: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_snapshot() {
        let cell = StatusCell::default();
        let s = cell.snapshot();
        assert!(!s.connected);
        assert_eq!(s.state, SessionState::Disconnected);
        assert!(s.last_event_time.is_none());
        assert_eq!(s.retry_count, 0);
    }

    #[test]
    fn test_failure_then_connect_resets_retry_count() {
        let cell = StatusCell::default();
        cell.record_failure(&"refused", 3);
        let s = cell.snapshot();
        assert_eq!(s.retry_count, 3);
        assert_eq!(s.last_error.as_deref(), Some("refused"));

        cell.mark_connected();
        let s = cell.snapshot();
        assert!(s.connected);
        assert_eq!(s.retry_count, 0);
        // Last error is kept for diagnosis
        assert_eq!(s.last_error.as_deref(), Some("refused"));
    }

    #[test]
    fn test_touch_and_drops() {
        let cell = StatusCell::default();
        let now = Utc::now();
        cell.touch(now);
        cell.record_drop();
        cell.record_drop();
        let s = cell.snapshot();
        assert_eq!(
            s.last_event_time.map(|t| t.timestamp_millis()),
            Some(now.timestamp_millis())
        );
        assert_eq!(s.dropped_events, 2);
    }

    #[test]
    fn test_status_serializes_state_snake_case() {
        let cell = StatusCell::default();
        cell.set_state(SessionState::Authenticating);
        let json = serde_json::to_value(cell.snapshot()).unwrap();
        assert_eq!(json["state"], "authenticating");
        assert_eq!(json["connected"], false);
    }
}
