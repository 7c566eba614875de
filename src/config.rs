//! Node configuration, fixed at startup.
//!
//! Uses `heapless::String` so the same structures work on `no_std` targets,
//! and derives serde (behind the `serde` feature) so desktop builds can load
//! them from a TOML file.
//!
//! # Example
//!
//! ```rust
//! use servo_node::config::{Config, DeviceConfig, MqttConfig, ServoConfig};
//!
//! let config = Config::default()
//!     .with_device(DeviceConfig::default().with_fleet_id("garden").with_device_id("valve-7"))
//!     .with_mqtt(MqttConfig::default().with_host("broker.local").with_port(8883))
//!     .with_servo(ServoConfig::default().with_duty(5.0, 10.0));
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.subscribe_topic().unwrap().to_string(), "garden/valve-7/DT/CMD");
//! ```

extern crate alloc;

use alloc::string::String;
use core::time::Duration;

use heapless::String as HString;
use log::warn;
use thiserror::Error;

use crate::angle::{PwmParameters, PwmParametersError};
use crate::topic::{TopicAddress, TopicError};
use crate::traits::QosLevel;

/// Maximum length for short config strings (hostnames, identifiers)
pub const MAX_SHORT_STRING: usize = 64;

/// Maximum length for longer config strings (topics, paths)
pub const MAX_LONG_STRING: usize = 128;

/// Type alias for short config strings
pub type ShortString = HString<MAX_SHORT_STRING>;

/// Type alias for longer config strings
pub type LongString = HString<MAX_LONG_STRING>;

// ============================================================================
// Helpers for creating heapless strings
// ============================================================================

fn truncated<const N: usize>(s: &str) -> HString<N> {
    let mut hs = HString::new();
    let valid_end = s
        .char_indices()
        .map(|(i, c)| i + c.len_utf8())
        .take_while(|end| *end <= N)
        .last()
        .unwrap_or(0);
    let _ = hs.push_str(&s[..valid_end]);
    hs
}

/// Create a ShortString from a &str, truncating if too long
pub fn short_string(s: &str) -> ShortString {
    truncated(s)
}

/// Create a LongString from a &str, truncating if too long
pub fn long_string(s: &str) -> LongString {
    truncated(s)
}

/// Builder helper: stores `s`, remembering `field` in `overflow` if it had
/// to be cut so that `validate` can reject it.
fn bounded<const N: usize>(
    field: &'static str,
    s: &str,
    overflow: &mut Option<&'static str>,
) -> HString<N> {
    let value = truncated(s);
    if value.len() < s.len() {
        warn!("{} is longer than {} bytes", field, N);
        overflow.get_or_insert(field);
    }
    value
}

// ============================================================================
// Errors
// ============================================================================

/// Configuration that cannot be loaded or used.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("could not read config file {path}: {message}")]
    Read {
        /// Path that was read.
        path: String,
        /// Underlying I/O error.
        message: String,
    },
    /// The config file is not valid TOML for [`Config`].
    #[error("could not parse config: {0}")]
    Parse(String),
    /// Fleet or device identifier is unusable in a topic.
    #[error(transparent)]
    Topic(#[from] TopicError),
    /// PWM parameters break the angle mapping.
    #[error("invalid PWM parameters: {0}")]
    Pwm(#[from] PwmParametersError),
    /// QoS level outside 0..=2.
    #[error("QoS level {0} is not 0, 1 or 2")]
    InvalidQos(u8),
    /// An interval is negative, zero where not allowed, or not finite.
    #[error("{0} must be a finite, non-negative number of seconds")]
    InvalidInterval(&'static str),
    /// A string setting did not fit its fixed capacity.
    #[error("{0} is too long")]
    TooLong(&'static str),
}

// ============================================================================
// Main Config
// ============================================================================

/// Complete node configuration
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    /// Device identification
    pub device: DeviceConfig,
    /// MQTT broker connection
    pub mqtt: MqttConfig,
    /// Servo output and timing
    pub servo: ServoConfig,
}

impl Config {
    /// Set device configuration
    pub fn with_device(mut self, device: DeviceConfig) -> Self {
        self.device = device;
        self
    }

    /// Set MQTT configuration
    pub fn with_mqtt(mut self, mqtt: MqttConfig) -> Self {
        self.mqtt = mqtt;
        self
    }

    /// Set servo configuration
    pub fn with_servo(mut self, servo: ServoConfig) -> Self {
        self.servo = servo;
        self
    }

    /// The topic the node subscribes to for commands.
    pub fn subscribe_topic(&self) -> Result<TopicAddress, ConfigError> {
        Ok(TopicAddress::subscribe(
            self.device.fleet_id.as_str(),
            self.device.device_id.as_str(),
        )?)
    }

    /// The topic reserved for messages back to mobile clients.
    pub fn publish_topic(&self) -> Result<TopicAddress, ConfigError> {
        Ok(TopicAddress::publish(
            self.device.fleet_id.as_str(),
            self.device.device_id.as_str(),
        )?)
    }

    /// Checks every derived value once, so startup fails before connecting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.device.validate()?;
        self.subscribe_topic()?;
        self.publish_topic()?;
        self.mqtt.validate()?;
        self.servo.pwm_parameters()?;
        self.servo.settle_delay()?;
        self.servo.poll_interval()?;
        Ok(())
    }

    /// Parses a TOML document.
    #[cfg(feature = "toml")]
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Reads and validates a TOML config file.
    #[cfg(feature = "toml")]
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|err| ConfigError::Read {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        let config = Self::from_toml_str(&content)?;
        config.validate()?;
        Ok(config)
    }
}

// ============================================================================
// Device Config
// ============================================================================

/// Device identification configuration
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DeviceConfig {
    /// Group of devices this one belongs to (first topic segment)
    pub fleet_id: ShortString,
    /// Unique device identifier; also used as the MQTT client id
    pub device_id: ShortString,
    #[cfg_attr(feature = "serde", serde(skip))]
    overflow: Option<&'static str>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            fleet_id: short_string("test"),
            device_id: short_string("0001"),
            overflow: None,
        }
    }
}

impl DeviceConfig {
    /// Set the fleet id
    pub fn with_fleet_id(mut self, fleet_id: &str) -> Self {
        self.fleet_id = bounded("fleet_id", fleet_id, &mut self.overflow);
        self
    }

    /// Set the device id
    pub fn with_device_id(mut self, device_id: &str) -> Self {
        self.device_id = bounded("device_id", device_id, &mut self.overflow);
        self
    }

    /// Rejects identifiers that were cut by a builder.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.overflow {
            Some(field) => Err(ConfigError::TooLong(field)),
            None => Ok(()),
        }
    }
}

// ============================================================================
// MQTT Config
// ============================================================================

/// MQTT broker configuration
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MqttConfig {
    /// Broker hostname or IP
    pub host: ShortString,
    /// Broker port
    pub port: u16,
    /// Whether to use TLS with client certificate authentication
    pub tls: bool,
    /// CA certificate (PEM) used to verify the broker
    pub ca_cert_path: LongString,
    /// Client private key (PEM)
    pub key_path: LongString,
    /// Client certificate (PEM)
    pub cert_path: LongString,
    /// QoS level requested for the command subscription (0, 1 or 2)
    pub qos: u8,
    /// Keep-alive interval in seconds
    pub keep_alive_secs: u16,
    /// How long to wait for the broker to accept the connection
    pub connect_timeout_secs: u16,
    /// How long to wait for subscribe acknowledgements
    pub operation_timeout_secs: u16,
    /// Minimum delay between queued outgoing packets in milliseconds
    pub drain_interval_ms: u32,
    #[cfg_attr(feature = "serde", serde(skip))]
    overflow: Option<&'static str>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: short_string("localhost"),
            port: 8883,
            tls: true,
            ca_cert_path: long_string("certs/ca.crt"),
            key_path: long_string("certs/priv.key"),
            cert_path: long_string("certs/cert.crt"),
            qos: 1,
            keep_alive_secs: 30,
            connect_timeout_secs: 10,
            operation_timeout_secs: 5,
            drain_interval_ms: 500,
            overflow: None,
        }
    }
}

impl MqttConfig {
    /// Set the broker host
    pub fn with_host(mut self, host: &str) -> Self {
        self.host = bounded("host", host, &mut self.overflow);
        self
    }

    /// Set the broker port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set certificate paths and enable TLS
    pub fn with_credentials(mut self, ca_cert: &str, key: &str, cert: &str) -> Self {
        self.tls = true;
        self.ca_cert_path = bounded("ca_cert_path", ca_cert, &mut self.overflow);
        self.key_path = bounded("key_path", key, &mut self.overflow);
        self.cert_path = bounded("cert_path", cert, &mut self.overflow);
        self
    }

    /// Enable or disable TLS
    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    /// Set the subscription QoS level
    pub fn with_qos(mut self, qos: u8) -> Self {
        self.qos = qos;
        self
    }

    /// Set the connect timeout
    pub fn with_connect_timeout_secs(mut self, secs: u16) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    /// Set the subscribe acknowledgement timeout
    pub fn with_operation_timeout_secs(mut self, secs: u16) -> Self {
        self.operation_timeout_secs = secs;
        self
    }

    /// Set the keep-alive interval
    pub fn with_keep_alive_secs(mut self, secs: u16) -> Self {
        self.keep_alive_secs = secs;
        self
    }

    /// Checks string lengths, the QoS level and that the timeouts are non-zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(field) = self.overflow {
            return Err(ConfigError::TooLong(field));
        }
        self.qos()?;
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidInterval("connect_timeout_secs"));
        }
        if self.operation_timeout_secs == 0 {
            return Err(ConfigError::InvalidInterval("operation_timeout_secs"));
        }
        Ok(())
    }

    /// Validated QoS level
    pub fn qos(&self) -> Result<QosLevel, ConfigError> {
        QosLevel::try_from(self.qos).map_err(|_| ConfigError::InvalidQos(self.qos))
    }

    /// Connect timeout as a duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs as u64)
    }

    /// Operation timeout as a duration
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs as u64)
    }

    /// Minimum spacing between queued outgoing requests
    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms as u64)
    }
}

// ============================================================================
// Servo Config
// ============================================================================

/// Servo output configuration
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ServoConfig {
    /// Output pin driving the servo signal line
    pub gpio_pin: u8,
    /// PWM pulse frequency in Hz
    pub pulse_frequency_hz: u32,
    /// Duty cycle (percent) for 0°
    pub duty_at_zero: f32,
    /// Duty cycle span (percent) between 0° and 180°
    pub duty_span: f32,
    /// Time the servo is given to reach 0° after power on
    pub settle_delay_secs: f32,
    /// Period of the lifecycle polling loop
    pub poll_interval_secs: f32,
}

impl Default for ServoConfig {
    fn default() -> Self {
        let pwm = PwmParameters::default();
        Self {
            gpio_pin: 7,
            pulse_frequency_hz: pwm.pulse_frequency_hz,
            duty_at_zero: pwm.duty_at_zero,
            duty_span: pwm.duty_span,
            settle_delay_secs: 1.0,
            poll_interval_secs: 1.0,
        }
    }
}

impl ServoConfig {
    /// Set the output pin
    pub fn with_gpio_pin(mut self, pin: u8) -> Self {
        self.gpio_pin = pin;
        self
    }

    /// Set the pulse frequency
    pub fn with_pulse_frequency_hz(mut self, hz: u32) -> Self {
        self.pulse_frequency_hz = hz;
        self
    }

    /// Set the 0° duty cycle and the 0°..180° span
    pub fn with_duty(mut self, duty_at_zero: f32, duty_span: f32) -> Self {
        self.duty_at_zero = duty_at_zero;
        self.duty_span = duty_span;
        self
    }

    /// Set the power-on settle delay
    pub fn with_settle_delay_secs(mut self, secs: f32) -> Self {
        self.settle_delay_secs = secs;
        self
    }

    /// Set the polling interval
    pub fn with_poll_interval_secs(mut self, secs: f32) -> Self {
        self.poll_interval_secs = secs;
        self
    }

    /// Validated PWM parameters
    pub fn pwm_parameters(&self) -> Result<PwmParameters, ConfigError> {
        Ok(PwmParameters::new(
            self.duty_at_zero,
            self.duty_span,
            self.pulse_frequency_hz,
        )?)
    }

    /// Power-on settle delay; zero disables it
    pub fn settle_delay(&self) -> Result<Duration, ConfigError> {
        seconds("settle_delay_secs", self.settle_delay_secs)
    }

    /// Lifecycle polling period; must be non-zero
    pub fn poll_interval(&self) -> Result<Duration, ConfigError> {
        let interval = seconds("poll_interval_secs", self.poll_interval_secs)?;
        if interval.is_zero() {
            return Err(ConfigError::InvalidInterval("poll_interval_secs"));
        }
        Ok(interval)
    }
}

fn seconds(field: &'static str, secs: f32) -> Result<Duration, ConfigError> {
    if secs < 0.0 {
        return Err(ConfigError::InvalidInterval(field));
    }
    Duration::try_from_secs_f32(secs).map_err(|_| ConfigError::InvalidInterval(field))
}

// ============================================================================
// Tests
// ============================================================================
