//! Validated string types that enforce invariants at construction time

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Validation errors for configuration values
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationError {
    #[error("hostname cannot be empty or whitespace")]
    EmptyHostName,

    #[error("instance name cannot be empty or whitespace")]
    EmptyInstanceName,

    #[error("instance name '{0}' contains whitespace")]
    InstanceNameWhitespace(String),

    #[error("port cannot be 0")]
    InvalidPort,

    #[error("invalid port number: {0}")]
    InvalidPortNumber(String),
}

/// Macro to generate validated string newtypes.
///
/// Each type gets a validating `new()`, `as_str()`, `AsRef<str>`, `Deref`,
/// `Display`, `TryFrom<String>` and serde impls that validate on the way in.
macro_rules! validated_string {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident(String) {
            validation: |$s_param:ident| $validation:expr,
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        $vis struct $name(String);

        impl $name {
            #[doc = concat!("Create a new ", stringify!($name), " after validation")]
            pub fn new($s_param: String) -> Result<Self, ValidationError> {
                let validate = || $validation;
                validate()?;
                Ok(Self($s_param))
            }

            #[doc = concat!("Get the ", stringify!($name), " as a string slice")]
            #[must_use]
            #[inline]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            #[inline]
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;

            #[inline]
            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from($s_param: String) -> Result<Self, Self::Error> {
                Self::new($s_param)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = ValidationError;

            fn try_from(s: &str) -> Result<Self, Self::Error> {
                Self::new(s.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::new(s).map_err(serde::de::Error::custom)
            }
        }
    };
}

validated_string! {
    /// A validated hostname that cannot be empty or whitespace-only
    ///
    /// # Examples
    /// ```
    /// use fsagent::types::HostName;
    ///
    /// let host = HostName::new("fs1.example.com".to_string()).unwrap();
    /// assert_eq!(host.as_str(), "fs1.example.com");
    ///
    /// assert!(HostName::new("".to_string()).is_err());
    /// assert!(HostName::new("   ".to_string()).is_err());
    /// ```
    #[doc(alias = "host")]
    pub struct HostName(String) {
        validation: |s| {
            if s.trim().is_empty() {
                Err(ValidationError::EmptyHostName)
            } else {
                Ok(())
            }
        },
    }
}

validated_string! {
    /// Name of a configured FreeSWITCH instance
    ///
    /// Used as a map key, a metric label and a log field, so it must be
    /// non-empty and free of whitespace.
    ///
    /// # Examples
    /// ```
    /// use fsagent::types::InstanceName;
    ///
    /// assert!(InstanceName::new("fs-east-1".to_string()).is_ok());
    /// assert!(InstanceName::new("fs east".to_string()).is_err());
    /// ```
    pub struct InstanceName(String) {
        validation: |s| {
            if s.trim().is_empty() {
                Err(ValidationError::EmptyInstanceName)
            } else if s.chars().any(char::is_whitespace) {
                Err(ValidationError::InstanceNameWhitespace(s.clone()))
            } else {
                Ok(())
            }
        },
    }
}
