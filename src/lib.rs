//! # servo-node
//!
//! An MQTT-controlled servo actuator. The node subscribes to a command topic,
//! turns `SHOWER ON`, `SHOWER OFF` and `ROTATE;<degrees>` payloads into PWM
//! duty cycles, and tears everything down cleanly when powered off or
//! interrupted.
//!
//! ## Features
//!
//! - **Strict command parsing**: malformed payloads are rejected, never half-applied
//! - **Linear angle mapping**: 0..=180° onto a configurable duty-cycle span
//! - **Monotone lifecycle**: `Running` to `Stopped`, never back
//! - **Exactly-once cleanup**: unsubscribe, disconnect, stop and release the output
//!
//! ## Architecture
//!
//! The crate is structured to allow testing on desktop without hardware:
//!
//! - `traits` - PWM output and MQTT client abstractions
//! - `commands` - Command types and the payload parser
//! - `angle` - Angle validation and the duty-cycle mapping
//! - `device` - Lifecycle state and the command state machine
//! - `cleanup` - Step-tracked teardown
//! - `event_loop` - Polling loop that ends the lifecycle (`runtime` feature)
//! - `services` - Command handler, rumqttc transport and node runner
//! - `hal` - Concrete implementations (mock for testing, esp32 for hardware)
//!
//! ## Example
//!
//! ```rust
//! use servo_node::{
//!     parse, DeviceState, DeviceStateMachine, PwmParameters,
//!     hal::{MockServo, ServoEvent},
//! };
//!
//! let machine = DeviceStateMachine::new(MockServo::new(), PwmParameters::default());
//!
//! for payload in ["SHOWER ON", "ROTATE;45", "SHOWER OFF"] {
//!     machine.apply(parse(payload).unwrap()).unwrap();
//! }
//!
//! assert_eq!(machine.state(), DeviceState::Stopped);
//! assert_eq!(
//!     machine.output().lock().unwrap().events,
//!     vec![ServoEvent::Start(6.5), ServoEvent::SetDuty(9.75), ServoEvent::Stop],
//! );
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]

extern crate alloc;

/// Angle validation and the angle-to-duty-cycle mapping.
pub mod angle;
/// Command types and the payload parser.
pub mod commands;
/// Shared configuration, loadable from TOML.
pub mod config;
/// Hardware abstraction layer with mock implementations for testing.
pub mod hal;
/// MQTT topic naming.
pub mod topic;
/// Core traits for hardware and network abstraction.
pub mod traits;

/// Step-tracked teardown of the broker session and the PWM output.
#[cfg(feature = "std")]
pub mod cleanup;
/// Device lifecycle state and the command state machine.
#[cfg(feature = "std")]
pub mod device;

/// Polling loop that ends the node's lifecycle.
#[cfg(feature = "runtime")]
pub mod event_loop;
/// Command handler, MQTT transport and node runner (feature-gated).
#[cfg(feature = "runtime")]
pub mod services;
/// First-reason-wins shutdown signalling.
#[cfg(feature = "runtime")]
pub mod shutdown;

// Re-exports for convenience
pub use angle::{duty_cycle, Angle, PwmParameters, PwmParametersError};
pub use commands::{parse, ArgumentError, Command, ParseError};
pub use config::{Config, ConfigError, DeviceConfig, MqttConfig, ServoConfig};
pub use topic::{TopicAddress, TopicCategory, TopicDirection, TopicError};
pub use traits::{MqttClient, MqttMessage, PwmOutput, QosLevel};

#[cfg(feature = "std")]
pub use cleanup::{CleanupHandler, CleanupReport, CleanupStep, StepOutcome};
#[cfg(feature = "std")]
pub use device::{
    transition, Applied, DeviceState, DeviceStateCell, DeviceStateMachine, HardwareError,
    OutputEffect, SharedOutput,
};

#[cfg(feature = "runtime")]
pub use event_loop::EventLoop;
#[cfg(feature = "runtime")]
pub use services::CommandHandler;
#[cfg(feature = "runtime")]
pub use shutdown::{Shutdown, ShutdownReason};

#[cfg(feature = "mqtt")]
pub use services::{NodeError, RumqttTransport, ServoNode, TransportError};
