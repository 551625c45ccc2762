//! Network-related configuration types

use std::num::NonZeroU16;
use std::str::FromStr;

use crate::types::ValidationError;

nonzero_newtype! {
    /// A validated network port number that cannot be zero
    ///
    /// # Examples
    /// ```
    /// use fsagent::types::Port;
    ///
    /// let port = Port::new(8021).unwrap();
    /// assert_eq!(port.get(), 8021);
    ///
    /// assert!(Port::new(0).is_none());
    /// assert_eq!(Port::EVENT_SOCKET.get(), 8021);
    /// ```
    #[doc(alias = "tcp_port")]
    pub struct Port(NonZeroU16: u16, serialize as serialize_u16);
}

impl Port {
    /// FreeSWITCH event socket port (8021)
    pub const EVENT_SOCKET: Self = Self(NonZeroU16::new(8021).unwrap());

    /// Default health/metrics HTTP port (8080)
    pub const HTTP: Self = Self(NonZeroU16::new(8080).unwrap());

    /// Default Redis port (6379)
    pub const REDIS: Self = Self(NonZeroU16::new(6379).unwrap());
}

impl Default for Port {
    fn default() -> Self {
        Self::EVENT_SOCKET
    }
}

impl FromStr for Port {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let port = s
            .parse::<u16>()
            .map_err(|_| ValidationError::InvalidPortNumber(s.to_string()))?;
        Self::new(port).ok_or(ValidationError::InvalidPort)
    }
}

impl TryFrom<u16> for Port {
    type Error = ValidationError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(ValidationError::InvalidPort)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_default_is_event_socket() {
        assert_eq!(Port::default(), Port::EVENT_SOCKET);
        assert_eq!(Port::default().get(), 8021);
    }

    #[test]
    fn test_port_from_str_valid() {
        let port: Port = "8022".parse().unwrap();
        assert_eq!(port.get(), 8022);
    }

    #[test]
    fn test_port_from_str_zero() {
        let result: Result<Port, _> = "0".parse();
        assert!(matches!(result, Err(ValidationError::InvalidPort)));
    }

    #[test]
    fn test_port_from_str_invalid() {
        let result: Result<Port, _> = "esl".parse();
        assert!(matches!(result, Err(ValidationError::InvalidPortNumber(_))));
        assert!("65536".parse::<Port>().is_err());
    }

    #[test]
    fn test_port_try_from() {
        assert_eq!(Port::try_from(6379).unwrap(), Port::REDIS);
        assert!(Port::try_from(0).is_err());
    }

    #[test]
    fn test_port_deserialize_rejects_zero() {
        let result: Result<Port, _> = serde_json::from_str("0");
        assert!(result.is_err());
        let port: Port = serde_json::from_str("8021").unwrap();
        assert_eq!(port, Port::EVENT_SOCKET);
    }
}
