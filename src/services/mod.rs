//! Runtime services for the servo node.
//!
//! - `handler` (`runtime` feature): the message-arrival path, turning
//!   [`MqttMessage`](crate::traits::MqttMessage)s into state machine calls
//! - `transport` (`mqtt` feature): `rumqttc` adapter implementing
//!   [`MqttClient`](crate::traits::MqttClient)
//! - `node` (`mqtt` feature): [`ServoNode`], which wires transport, handler,
//!   event loop and cleanup together

pub mod handler;

#[cfg(feature = "mqtt")]
pub mod node;

#[cfg(feature = "mqtt")]
pub mod transport;

pub use handler::*;

#[cfg(feature = "mqtt")]
pub use node::*;

#[cfg(feature = "mqtt")]
pub use transport::*;
