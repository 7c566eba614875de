//! Servo node binary.
//!
//! Connects to the broker described by a TOML config file. Built with the
//! `esp32` feature it drives an LEDC channel on `servo.gpio_pin` at
//! `servo.pulse_frequency_hz`; otherwise it drives a mock servo output and
//! logs every duty-cycle change.
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=debug cargo run --features mqtt --bin servo-node -- servo.toml
//!
//! # On the board (network and the config file's filesystem already up)
//! cargo build --release --features mqtt,esp32 --bin servo-node
//! ```
//!
//! Exits 0 after `SHOWER OFF` or an interrupt, 1 after a hardware failure or
//! a startup error.

use std::process::ExitCode;

use anyhow::{Context, Result};
use log::{error, info};

use servo_node::{Config, ServoNode};

const DEFAULT_CONFIG_PATH: &str = "servo.toml";

fn main() -> ExitCode {
    #[cfg(feature = "esp32")]
    esp_idf_hal::sys::link_patches();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run() {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<u8> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&path).with_context(|| format!("loading {}", path))?;

    info!(
        "Device {}/{} on {}:{}",
        config.device.fleet_id, config.device.device_id, config.mqtt.host, config.mqtt.port
    );

    let output = servo_output(&config)?;
    let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
    let reason = runtime
        .block_on(ServoNode::new(config, output).run())
        .context("servo node failed to start")?;

    info!("Exiting: {}", reason);
    Ok(reason.exit_code())
}

#[cfg(feature = "esp32")]
fn servo_output(config: &Config) -> Result<servo_node::hal::esp32::Esp32Servo<'static>> {
    use esp_idf_hal::peripherals::Peripherals;
    use servo_node::hal::esp32::{output_pin, Esp32Servo};

    let gpio = config.servo.gpio_pin;
    let frequency = config.servo.pulse_frequency_hz;
    let peripherals = Peripherals::take().context("taking peripherals")?;
    let pin = output_pin(peripherals.pins, gpio)
        .with_context(|| format!("GPIO{} cannot drive the servo", gpio))?;
    let servo = Esp32Servo::new(
        pin,
        peripherals.ledc.timer0,
        peripherals.ledc.channel0,
        frequency,
    )
    .with_context(|| format!("configuring LEDC on GPIO{} at {} Hz", gpio, frequency))?;

    info!("Servo on GPIO{} at {} Hz", gpio, frequency);
    Ok(servo)
}

#[cfg(not(feature = "esp32"))]
fn servo_output(config: &Config) -> Result<servo_node::hal::MockServo> {
    info!(
        "Mock servo standing in for GPIO{} at {} Hz",
        config.servo.gpio_pin, config.servo.pulse_frequency_hz
    );
    Ok(servo_node::hal::MockServo::new())
}
