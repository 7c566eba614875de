//! Trait definitions for hardware and network abstraction.
//!
//! These traits let the node run against real hardware (ESP32 LEDC, rumqttc)
//! or against the mocks in [`crate::hal::mock`] in tests.
//!
//! # Submodules
//!
//! - `hardware`: [`PwmOutput`] for the servo signal
//! - `network`: [`MqttClient`], [`MqttMessage`] and [`QosLevel`]

pub mod hardware;
pub mod network;

pub use hardware::*;
pub use network::*;
