//! Mock implementations for testing without hardware.
//!
//! This module provides test doubles for the hardware and network traits,
//! enabling development and testing on desktop without a servo or broker.
//!
//! # Available Mocks
//!
//! | Mock | Trait | Purpose |
//! |------|-------|---------|
//! | [`MockServo`] | [`PwmOutput`] | Records every output call as a [`ServoEvent`] |
//! | [`MockMqtt`] | [`MqttClient`] | Captures subscribe/unsubscribe/disconnect calls |
//!
//! # Example
//!
//! ```rust
//! use servo_node::hal::{MockServo, ServoEvent};
//! use servo_node::traits::PwmOutput;
//!
//! let mut servo = MockServo::new();
//! servo.start(6.5).unwrap();
//! servo.set_duty_cycle(9.75).unwrap();
//!
//! assert_eq!(servo.events, vec![ServoEvent::Start(6.5), ServoEvent::SetDuty(9.75)]);
//! assert_eq!(servo.duty, Some(9.75));
//! ```
//!
//! [`PwmOutput`]: crate::traits::PwmOutput
//! [`MqttClient`]: crate::traits::MqttClient

extern crate alloc;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use thiserror::Error;

use crate::traits::{MqttClient, PwmOutput, QosLevel};

// ============================================================================
// Hardware Mocks
// ============================================================================

/// One call observed by [`MockServo`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ServoEvent {
    /// `start(duty)`
    Start(f32),
    /// `set_duty_cycle(duty)`
    SetDuty(f32),
    /// `stop()`
    Stop,
    /// `release()` (recorded once)
    Release,
}

/// Errors produced by [`MockServo`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum MockServoError {
    /// The output was used after `release()`.
    #[error("servo output already released")]
    Released,
    /// A failure injected with [`MockServo::fail_next`].
    #[error("injected servo driver failure")]
    Injected,
}

/// Mock servo output for testing.
///
/// Records every successful call in [`events`](Self::events) and tracks the
/// duty cycle currently applied. Failures can be injected with
/// [`fail_next`](Self::fail_next).
#[derive(Debug, Default)]
pub struct MockServo {
    /// Calls in the order they succeeded.
    pub events: Vec<ServoEvent>,
    /// Duty cycle currently output, `None` while stopped.
    pub duty: Option<f32>,
    released: bool,
    failures_remaining: usize,
}

impl MockServo {
    /// Creates a stopped, unreleased mock servo.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` calls fail with [`MockServoError::Injected`].
    pub fn fail_next(&mut self, count: usize) {
        self.failures_remaining = count;
    }

    /// Returns true while a duty cycle is being output.
    pub fn is_active(&self) -> bool {
        self.duty.is_some()
    }

    fn check(&mut self) -> Result<(), MockServoError> {
        if self.failures_remaining > 0 {
            self.failures_remaining -= 1;
            return Err(MockServoError::Injected);
        }
        Ok(())
    }
}

impl PwmOutput for MockServo {
    type Error = MockServoError;

    fn start(&mut self, duty_percent: f32) -> Result<(), Self::Error> {
        if self.released {
            return Err(MockServoError::Released);
        }
        self.check()?;
        self.duty = Some(duty_percent);
        self.events.push(ServoEvent::Start(duty_percent));
        Ok(())
    }

    fn set_duty_cycle(&mut self, duty_percent: f32) -> Result<(), Self::Error> {
        if self.released {
            return Err(MockServoError::Released);
        }
        self.check()?;
        self.duty = Some(duty_percent);
        self.events.push(ServoEvent::SetDuty(duty_percent));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Self::Error> {
        if self.released {
            return Ok(());
        }
        self.check()?;
        self.duty = None;
        self.events.push(ServoEvent::Stop);
        Ok(())
    }

    fn release(&mut self) -> Result<(), Self::Error> {
        if self.released {
            return Ok(());
        }
        self.check()?;
        self.duty = None;
        self.released = true;
        self.events.push(ServoEvent::Release);
        Ok(())
    }

    fn is_released(&self) -> bool {
        self.released
    }
}

// ============================================================================
// Network Mocks
// ============================================================================

/// Errors produced by [`MockMqtt`].
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum MockMqttError {
    /// The client is not connected.
    #[error("not connected")]
    NotConnected,
    /// A failure injected through the `fail_*` flags.
    #[error("injected {0} failure")]
    Injected(&'static str),
}

/// Mock MQTT client for testing.
///
/// Records all publish/subscribe/unsubscribe operations.
///
/// # Example
///
/// ```rust
/// use servo_node::hal::MockMqtt;
/// use servo_node::traits::{MqttClient, QosLevel};
///
/// let mut mqtt = MockMqtt::new();
/// mqtt.subscribe("test/0001/DT/CMD", QosLevel::AtLeastOnce).unwrap();
/// assert!(mqtt.is_subscribed("test/0001/DT/CMD"));
///
/// mqtt.unsubscribe("test/0001/DT/CMD").unwrap();
/// mqtt.disconnect().unwrap();
/// assert!(!mqtt.is_subscribed("test/0001/DT/CMD"));
/// assert!(!mqtt.is_connected());
/// ```
#[derive(Debug, Default)]
pub struct MockMqtt {
    /// Messages that have been published (topic, payload, retain).
    pub published: Vec<(String, Vec<u8>, bool)>,
    /// Active subscriptions with their QoS.
    pub subscriptions: Vec<(String, QosLevel)>,
    /// Topics passed to `unsubscribe`, in call order.
    pub unsubscribed: Vec<String>,
    /// Number of successful `disconnect` calls.
    pub disconnects: usize,
    /// Whether the client is connected.
    pub connected: bool,
    /// Fail every `unsubscribe` call while set.
    pub fail_unsubscribe: bool,
    /// Fail every `disconnect` call while set.
    pub fail_disconnect: bool,
}

impl MockMqtt {
    /// Creates a new mock MQTT client in connected state.
    pub fn new() -> Self {
        Self {
            connected: true,
            ..Default::default()
        }
    }

    /// Check if a topic is currently subscribed
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions.iter().any(|(t, _)| t == topic)
    }

    /// Get published messages for a topic
    pub fn published_to(&self, topic: &str) -> Vec<&(String, Vec<u8>, bool)> {
        self.published
            .iter()
            .filter(|(t, _, _)| t == topic)
            .collect()
    }
}

impl MqttClient for MockMqtt {
    type Error = MockMqttError;

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), Self::Error> {
        if !self.connected {
            return Err(MockMqttError::NotConnected);
        }
        self.published
            .push((topic.to_string(), payload.to_vec(), retain));
        Ok(())
    }

    fn subscribe(&mut self, topic: &str, qos: QosLevel) -> Result<(), Self::Error> {
        if !self.connected {
            return Err(MockMqttError::NotConnected);
        }
        self.subscriptions.push((topic.to_string(), qos));
        Ok(())
    }

    fn unsubscribe(&mut self, topic: &str) -> Result<(), Self::Error> {
        if self.fail_unsubscribe {
            return Err(MockMqttError::Injected("unsubscribe"));
        }
        if !self.connected {
            return Err(MockMqttError::NotConnected);
        }
        self.subscriptions.retain(|(t, _)| t != topic);
        self.unsubscribed.push(topic.to_string());
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), Self::Error> {
        if self.fail_disconnect {
            return Err(MockMqttError::Injected("disconnect"));
        }
        self.connected = false;
        self.disconnects += 1;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn servo_rejects_use_after_release() {
        let mut servo = MockServo::new();
        servo.start(6.5).unwrap();
        servo.release().unwrap();

        assert_eq!(servo.start(6.5), Err(MockServoError::Released));
        assert_eq!(servo.set_duty_cycle(8.0), Err(MockServoError::Released));
        // stop and release stay harmless
        assert_eq!(servo.stop(), Ok(()));
        assert_eq!(servo.release(), Ok(()));
        assert_eq!(servo.events, vec![ServoEvent::Start(6.5), ServoEvent::Release]);
    }

    #[test]
    fn servo_injected_failures_are_consumed() {
        let mut servo = MockServo::new();
        servo.fail_next(1);
        assert_eq!(servo.stop(), Err(MockServoError::Injected));
        assert_eq!(servo.stop(), Ok(()));
        assert_eq!(servo.events, vec![ServoEvent::Stop]);
    }

    #[test]
    fn mqtt_records_publish() {
        let mut mqtt = MockMqtt::new();
        mqtt.publish("test/0001/MT/CMD", b"hello", false).unwrap();
        assert_eq!(mqtt.published_to("test/0001/MT/CMD").len(), 1);
    }

    #[test]
    fn mqtt_disconnected_publish_fails() {
        let mut mqtt = MockMqtt::new();
        mqtt.disconnect().unwrap();
        assert_eq!(
            mqtt.publish("t", b"x", false),
            Err(MockMqttError::NotConnected)
        );
    }

    #[test]
    fn mqtt_injected_unsubscribe_failure() {
        let mut mqtt = MockMqtt::new();
        mqtt.fail_unsubscribe = true;
        assert_eq!(
            mqtt.unsubscribe("t"),
            Err(MockMqttError::Injected("unsubscribe"))
        );
    }
}
