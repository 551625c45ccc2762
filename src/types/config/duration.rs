//! Duration serialization helpers for configuration files
//!
//! Durations are written either as a bare integer number of seconds
//! (`keepalive_interval = 30`) or as a string with a unit suffix
//! (`ttl = "24h"`, `backoff_base = "500ms"`).

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(u64),
    Text(String),
}

/// Parse a duration string with a `ms`, `s`, `m` or `h` suffix
///
/// A string without suffix is read as seconds.
///
/// # Examples
/// ```
/// use fsagent::types::duration::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
/// assert_eq!(parse_duration("24h"), Some(Duration::from_secs(86_400)));
/// assert_eq!(parse_duration("15"), Some(Duration::from_secs(15)));
/// assert_eq!(parse_duration("soon"), None);
/// ```
#[must_use]
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (digits, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => s.split_at(idx),
        None => (s, "s"),
    };
    let value: u64 = digits.parse().ok()?;
    match unit.trim() {
        "ms" => Some(Duration::from_millis(value)),
        "s" => Some(Duration::from_secs(value)),
        "m" => Some(Duration::from_secs(value.checked_mul(60)?)),
        "h" => Some(Duration::from_secs(value.checked_mul(3600)?)),
        _ => None,
    }
}

fn from_raw<E: serde::de::Error>(raw: RawDuration) -> Result<Duration, E> {
    match raw {
        RawDuration::Seconds(secs) => Ok(Duration::from_secs(secs)),
        RawDuration::Text(text) => parse_duration(&text)
            .ok_or_else(|| E::custom(format!("invalid duration '{}'", text))),
    }
}

/// Serde adapter for `Duration` fields
pub mod duration_serde {
    use super::*;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_nanos() == 0 {
            serializer.serialize_u64(duration.as_secs())
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        from_raw(RawDuration::deserialize(deserializer)?)
    }
}

/// Serde adapter for `Option<Duration>` fields
pub mod option_duration_serde {
    use super::*;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => duration_serde::serialize(d, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<RawDuration>::deserialize(deserializer)?
            .map(from_raw)
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Holder {
        #[serde(with = "duration_serde")]
        value: Duration,
        #[serde(with = "option_duration_serde", default)]
        maybe: Option<Duration>,
    }

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("3s"), Some(Duration::from_secs(3)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("ms"), None);
        assert_eq!(parse_duration("10 days"), None);
    }

    #[test]
    fn test_deserialize_integer_and_string() {
        let h: Holder = toml::from_str("value = 30\nmaybe = \"5s\"").unwrap();
        assert_eq!(h.value, Duration::from_secs(30));
        assert_eq!(h.maybe, Some(Duration::from_secs(5)));

        let h: Holder = toml::from_str("value = \"24h\"").unwrap();
        assert_eq!(h.value, Duration::from_secs(86_400));
        assert_eq!(h.maybe, None);
    }

    #[test]
    fn test_deserialize_invalid_string() {
        let result: Result<Holder, _> = toml::from_str("value = \"forever\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_serialize_sub_second_as_millis() {
        let h = Holder {
            value: Duration::from_millis(1500),
            maybe: None,
        };
        let json = serde_json::to_string(&h).unwrap();
        assert!(json.contains("\"1500ms\""));
        let back: Holder = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }
}
