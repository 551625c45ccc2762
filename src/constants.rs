//! Constants used throughout the agent
//!
//! Centralizes protocol limits, timing defaults and header names so the
//! numbers that shape runtime behaviour live in one place.

use std::time::Duration;

/// Frame reader limits
pub mod buffer {
    /// BufReader capacity for the event socket stream (64KB)
    pub const READER_CAPACITY: usize = 64 * 1024;

    /// Maximum length of a single header line (8KB)
    ///
    /// A longer line means the stream is out of sync or hostile; the session
    /// treats it as unrecoverable and reconnects.
    pub const MAX_HEADER_LINE: usize = 8 * 1024;

    /// Maximum number of header lines in one frame
    pub const MAX_HEADERS: usize = 512;

    /// Maximum accepted Content-Length (4MB)
    ///
    /// CHANNEL_DESTROY bodies carry every channel variable and can reach a
    /// few hundred KB on busy systems.
    pub const MAX_BODY: usize = 4 * 1024 * 1024;

    const _LIMITS_ORDERED: () = assert!(MAX_HEADER_LINE < MAX_BODY);
}

/// Timeout constants
pub mod timeout {
    use super::Duration;

    /// Deadline for the TCP dial
    pub const DIAL: Duration = Duration::from_secs(5);

    /// Deadline for the auth exchange and the subscription reply
    pub const AUTH: Duration = Duration::from_secs(5);

    /// Interval between keepalive probes on a connected session
    pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

    /// How long a keepalive probe may remain unanswered
    pub const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(10);

    /// Uptime after which a session that ends no longer counts as a failed attempt
    pub const STABLE_SESSION: Duration = Duration::from_secs(10);

    /// Window in which at least one instance must connect at startup
    pub const STARTUP_WINDOW: Duration = Duration::from_secs(10);

    /// Bound on waiting for each connection to stop
    pub const CONNECTION_STOP: Duration = Duration::from_secs(5);

    /// Bound on the whole process shutdown sequence
    pub const SHUTDOWN: Duration = Duration::from_secs(30);

    /// Bound on each Redis command and each Redis connection attempt
    pub const REDIS: Duration = Duration::from_secs(2);

    /// Bound on startup validation of the store and exporter
    pub const STARTUP_VALIDATION: Duration = Duration::from_secs(5);

    /// Largest duration accepted for any configured timeout, interval or TTL (30 days)
    pub const MAX_CONFIGURED: Duration = Duration::from_secs(30 * 24 * 60 * 60);

    /// Stand-in deadline for a duration too large to add to the clock (30 years)
    pub const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);
}

/// Reconnect backoff constants
pub mod backoff {
    use super::Duration;

    /// First retry delay
    pub const BASE: Duration = Duration::from_secs(1);

    /// Upper bound on any retry delay
    pub const CAP: Duration = Duration::from_secs(30);

    /// Symmetric jitter as a fraction of the computed delay
    pub const JITTER: f64 = 0.2;

    /// Highest exponent used when doubling (2^16 · base already exceeds any sane cap)
    pub const MAX_EXPONENT: u32 = 16;
}

/// Channel state constants
pub mod state {
    use super::Duration;

    /// How long correlation state lives without a termination event
    pub const TTL: Duration = Duration::from_secs(24 * 60 * 60);

    /// Interval of the in-memory store expiry sweep
    pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

    /// Key prefix used by the Redis backend
    pub const REDIS_KEY_PREFIX: &str = "fsagent:channel:";
}

/// Event socket header names the pipeline reads
pub mod headers {
    pub const EVENT_NAME: &str = "Event-Name";
    pub const UNIQUE_ID: &str = "Unique-ID";
    pub const OTHER_LEG_UNIQUE_ID: &str = "Other-Leg-Unique-ID";
    pub const SIP_CALL_ID: &str = "variable_sip_call_id";
    pub const GLOBAL_CALL_ID: &str = "variable_global_call_id";
    pub const DOMAIN_NAME: &str = "variable_domain_name";
    pub const SIP_FROM_HOST: &str = "variable_sip_from_host";
    pub const SIP_TO_HOST: &str = "variable_sip_to_host";
    pub const CODEC_RATE: &str = "variable_rtp_use_codec_rate";
    pub const EVENT_DATE_TIMESTAMP: &str = "Event-Date-Timestamp";
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const CONTENT_LENGTH: &str = "Content-Length";
    pub const REPLY_TEXT: &str = "Reply-Text";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_bounds() {
        assert!(backoff::BASE < backoff::CAP);
        assert!(backoff::JITTER > 0.0 && backoff::JITTER < 1.0);
    }

    #[test]
    fn test_keepalive_timeout_shorter_than_interval() {
        assert!(timeout::KEEPALIVE_TIMEOUT < timeout::KEEPALIVE_INTERVAL);
    }

    #[test]
    fn test_state_ttl_is_one_day() {
        assert_eq!(state::TTL, Duration::from_secs(86_400));
        assert!(state::SWEEP_INTERVAL < state::TTL);
    }

    #[test]
    fn test_shutdown_exceeds_connection_stop() {
        assert!(timeout::SHUTDOWN > timeout::CONNECTION_STOP);
    }

    #[test]
    fn test_defaults_within_configurable_bound() {
        assert!(state::TTL <= timeout::MAX_CONFIGURED);
        assert!(timeout::MAX_CONFIGURED < timeout::FAR_FUTURE);
    }
}
