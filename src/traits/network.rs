//! Network abstraction for the MQTT transport.
//!
//! The node consumes the broker through the [`MqttClient`] trait so the
//! cleanup path can be exercised against [`MockMqtt`](crate::hal::MockMqtt)
//! and run against `rumqttc` in production.
//!
//! # Topics
//!
//! ```text
//! <fleet>/<device>/DT/CMD  - commands to the device (subscribed)
//! <fleet>/<device>/MT/CMD  - messages to mobile clients (publish)
//! ```

extern crate alloc;
use alloc::borrow::Cow;
use alloc::string::String;
use alloc::vec::Vec;

// ============================================================================
// MQTT Client Trait (Sync-First Design)
// ============================================================================

/// MQTT client trait for pub/sub messaging.
///
/// This trait uses a **sync-first design**: every call only queues the request
/// with the client and returns, so it can be used from synchronous cleanup
/// code as well as from async tasks.
///
/// # Implementation Notes
///
/// - Delivery of incoming messages is not part of this trait; adapters hand
///   received [`MqttMessage`]s to the node through a channel
/// - The client should handle reconnection internally
/// - `unsubscribe` and `disconnect` may be called during teardown after the
///   connection already failed; they report errors rather than panic
pub trait MqttClient {
    /// Error type for MQTT operations.
    type Error: core::fmt::Display;

    /// Publish a message to a topic.
    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), Self::Error>;

    /// Subscribe to a topic with the requested QoS.
    fn subscribe(&mut self, topic: &str, qos: QosLevel) -> Result<(), Self::Error>;

    /// Remove a subscription.
    fn unsubscribe(&mut self, topic: &str) -> Result<(), Self::Error>;

    /// Close the connection to the broker.
    fn disconnect(&mut self) -> Result<(), Self::Error>;

    /// Check if connected to broker.
    fn is_connected(&self) -> bool;
}

/// MQTT delivery guarantee requested for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, PartialOrd, Ord, Hash)]
pub enum QosLevel {
    /// QoS 0: fire and forget.
    AtMostOnce = 0,
    /// QoS 1: acknowledged delivery, may duplicate.
    #[default]
    AtLeastOnce = 1,
    /// QoS 2: exactly once.
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QosLevel {
    type Error = u8;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            other => Err(other),
        }
    }
}

/// An MQTT message received from a subscription.
///
/// Contains the topic and payload of a published message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttMessage {
    /// Topic the message was published to.
    pub topic: String,
    /// Message payload as raw bytes.
    pub payload: Vec<u8>,
}

impl MqttMessage {
    /// Create a new MQTT message.
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Returns the payload as text; invalid UTF-8 sequences become U+FFFD.
    pub fn payload_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos_from_u8() {
        assert_eq!(QosLevel::try_from(0), Ok(QosLevel::AtMostOnce));
        assert_eq!(QosLevel::try_from(1), Ok(QosLevel::AtLeastOnce));
        assert_eq!(QosLevel::try_from(2), Ok(QosLevel::ExactlyOnce));
        assert_eq!(QosLevel::try_from(7), Err(7));
    }

    #[test]
    fn payload_str_replaces_invalid_utf8() {
        let msg = MqttMessage::new("test/0001/DT/CMD", vec![b'O', 0xff, b'N']);
        assert_eq!(msg.payload_str(), "O\u{fffd}N");

        let msg = MqttMessage::new("test/0001/DT/CMD", "SHOWER ON");
        assert!(matches!(msg.payload_str(), Cow::Borrowed("SHOWER ON")));
    }
}
