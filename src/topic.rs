//! MQTT topic naming for a single device.
//!
//! Topics have four segments:
//!
//! ```text
//! <fleet>/<device id>/<direction>/<category>
//! test/0001/DT/CMD    - commands to the device (subscribed)
//! test/0001/MT/CMD    - messages back to a mobile client (publish)
//! ```
//!
//! The fleet groups devices, the device id names one of them, and the last
//! two segments form the channel: who terminates the message and what kind
//! of message it is.

use core::fmt;
use core::fmt::Write as _;

use thiserror::Error;

use crate::config::{LongString, ShortString, MAX_SHORT_STRING};

/// Which side of the system a message is addressed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TopicDirection {
    /// Terminated at the device (`DT`).
    DeviceTerminated,
    /// Terminated at a mobile client (`MT`).
    MobileTerminated,
}

impl TopicDirection {
    /// Returns the topic segment for this direction.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DeviceTerminated => "DT",
            Self::MobileTerminated => "MT",
        }
    }
}

/// Kind of message carried on a topic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TopicCategory {
    /// Commands (`CMD`).
    Command,
    /// Control messages (`CTRL`).
    Control,
}

impl TopicCategory {
    /// Returns the topic segment for this category.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Command => "CMD",
            Self::Control => "CTRL",
        }
    }
}

/// Rejected fleet or device identifier.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TopicError {
    /// The identifier was empty.
    #[error("{0} must not be empty")]
    Empty(&'static str),
    /// The identifier contains `/`, `+` or `#`.
    #[error("{field} {value:?} contains a reserved MQTT character")]
    Reserved {
        /// Which identifier was rejected.
        field: &'static str,
        /// The rejected value.
        value: ShortString,
    },
    /// The identifier is longer than a topic segment may be.
    #[error("{field} is longer than {max} bytes")]
    TooLong {
        /// Which identifier was rejected.
        field: &'static str,
        /// Maximum length in bytes.
        max: usize,
    },
}

/// A fully qualified device topic.
///
/// # Example
///
/// ```rust
/// use servo_node::TopicAddress;
///
/// let sub = TopicAddress::subscribe("test", "0001").unwrap();
/// assert_eq!(sub.as_topic().as_str(), "test/0001/DT/CMD");
///
/// let publish = TopicAddress::publish("test", "0001").unwrap();
/// assert_eq!(publish.to_string(), "test/0001/MT/CMD");
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicAddress {
    fleet: ShortString,
    device_id: ShortString,
    direction: TopicDirection,
    category: TopicCategory,
}

impl TopicAddress {
    /// Builds a topic, validating both identifiers.
    pub fn new(
        fleet: &str,
        device_id: &str,
        direction: TopicDirection,
        category: TopicCategory,
    ) -> Result<Self, TopicError> {
        Ok(Self {
            fleet: segment("fleet id", fleet)?,
            device_id: segment("device id", device_id)?,
            direction,
            category,
        })
    }

    /// The inbound command topic: `<fleet>/<device>/DT/CMD`.
    pub fn subscribe(fleet: &str, device_id: &str) -> Result<Self, TopicError> {
        Self::new(
            fleet,
            device_id,
            TopicDirection::DeviceTerminated,
            TopicCategory::Command,
        )
    }

    /// The outbound topic towards mobile clients: `<fleet>/<device>/MT/CMD`.
    pub fn publish(fleet: &str, device_id: &str) -> Result<Self, TopicError> {
        Self::new(
            fleet,
            device_id,
            TopicDirection::MobileTerminated,
            TopicCategory::Command,
        )
    }

    /// Fleet identifier.
    pub fn fleet(&self) -> &str {
        self.fleet.as_str()
    }

    /// Device identifier.
    pub fn device_id(&self) -> &str {
        self.device_id.as_str()
    }

    /// Message direction.
    pub fn direction(&self) -> TopicDirection {
        self.direction
    }

    /// Message category.
    pub fn category(&self) -> TopicCategory {
        self.category
    }

    /// Renders the topic into a fixed-capacity string.
    pub fn as_topic(&self) -> LongString {
        let mut topic = LongString::new();
        // two 64-byte ids plus separators and channel always fit in 128 bytes
        let _ = write!(topic, "{}", self);
        topic
    }

    /// Returns true if `topic` is exactly this address.
    pub fn matches(&self, topic: &str) -> bool {
        let mut parts = topic.split('/');
        parts.next() == Some(self.fleet())
            && parts.next() == Some(self.device_id())
            && parts.next() == Some(self.direction.as_str())
            && parts.next() == Some(self.category.as_str())
            && parts.next().is_none()
    }
}

impl fmt::Display for TopicAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.fleet,
            self.device_id,
            self.direction.as_str(),
            self.category.as_str()
        )
    }
}

fn segment(field: &'static str, value: &str) -> Result<ShortString, TopicError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(TopicError::Empty(field));
    }
    let value: ShortString = ShortString::try_from(value).map_err(|_| TopicError::TooLong {
        field,
        max: MAX_SHORT_STRING,
    })?;
    if value.contains(['/', '+', '#']) {
        return Err(TopicError::Reserved { field, value });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_topic_layout() {
        let topic = TopicAddress::subscribe("test", "0001").unwrap();
        assert_eq!(topic.as_topic().as_str(), "test/0001/DT/CMD");
        assert_eq!(topic.direction(), TopicDirection::DeviceTerminated);
        assert_eq!(topic.category(), TopicCategory::Command);
    }

    #[test]
    fn publish_topic_layout() {
        let topic = TopicAddress::publish("garden", "valve-7").unwrap();
        assert_eq!(topic.as_topic().as_str(), "garden/valve-7/MT/CMD");
    }

    #[test]
    fn control_category() {
        let topic = TopicAddress::new(
            "test",
            "0001",
            TopicDirection::DeviceTerminated,
            TopicCategory::Control,
        )
        .unwrap();
        assert_eq!(topic.as_topic().as_str(), "test/0001/DT/CTRL");
    }

    #[test]
    fn matches_only_exact_topic() {
        let topic = TopicAddress::subscribe("test", "0001").unwrap();
        assert!(topic.matches("test/0001/DT/CMD"));
        assert!(!topic.matches("test/0001/MT/CMD"));
        assert!(!topic.matches("test/0002/DT/CMD"));
        assert!(!topic.matches("test/0001/DT/CMD/extra"));
        assert!(!topic.matches("test/0001/DT"));
    }

    #[test]
    fn rejects_empty_identifiers() {
        assert_eq!(
            TopicAddress::subscribe("", "0001"),
            Err(TopicError::Empty("fleet id"))
        );
        assert_eq!(
            TopicAddress::subscribe("test", "  "),
            Err(TopicError::Empty("device id"))
        );
    }

    #[test]
    fn rejects_overlong_identifiers() {
        let id = "x".repeat(MAX_SHORT_STRING + 1);
        assert_eq!(
            TopicAddress::subscribe("test", &id),
            Err(TopicError::TooLong {
                field: "device id",
                max: MAX_SHORT_STRING
            })
        );
        assert!(TopicAddress::subscribe("test", &id[1..]).is_ok());
    }

    #[test]
    fn rejects_reserved_characters() {
        for bad in ["a/b", "dev+", "#"] {
            assert!(matches!(
                TopicAddress::subscribe("test", bad),
                Err(TopicError::Reserved { field: "device id", .. })
            ));
        }
    }
}
