//! ESP32 hardware implementations.
//!
//! The servo signal pin comes from `servo.gpio_pin` in the config;
//! [`output_pin`] turns that number into a pin the LEDC driver can use.

use esp_idf_hal::gpio::{AnyOutputPin, OutputPin, Pins};

mod servo;

pub use servo::{Esp32Servo, Esp32ServoError};

/// Takes GPIO `gpio` out of `pins` as an output.
///
/// Only the general purpose header pins (GPIO0 to GPIO10 on the C3
/// SuperMini) are offered; any other number returns `None`.
pub fn output_pin(pins: Pins, gpio: u8) -> Option<AnyOutputPin> {
    let pin = match gpio {
        0 => pins.gpio0.downgrade_output(),
        1 => pins.gpio1.downgrade_output(),
        2 => pins.gpio2.downgrade_output(),
        3 => pins.gpio3.downgrade_output(),
        4 => pins.gpio4.downgrade_output(),
        5 => pins.gpio5.downgrade_output(),
        6 => pins.gpio6.downgrade_output(),
        7 => pins.gpio7.downgrade_output(),
        8 => pins.gpio8.downgrade_output(),
        9 => pins.gpio9.downgrade_output(),
        10 => pins.gpio10.downgrade_output(),
        _ => return None,
    };
    Some(pin)
}
