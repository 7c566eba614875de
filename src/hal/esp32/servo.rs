//! Servo output on the ESP32 LEDC peripheral.
//!
//! The servo signal is a single LEDC channel running at the configured pulse
//! frequency (100 Hz by default) with 14-bit duty resolution. Duty cycles in
//! percent are scaled onto the channel's maximum duty value.

use esp_idf_hal::ledc::{config::TimerConfig, LedcDriver, LedcTimerDriver, Resolution};
use esp_idf_hal::peripheral::Peripheral;
use esp_idf_hal::prelude::*;
use esp_idf_hal::sys::EspError;
use thiserror::Error;

use crate::traits::PwmOutput;

/// Errors from [`Esp32Servo`].
#[derive(Debug, Error)]
pub enum Esp32ServoError {
    /// The LEDC driver reported an error.
    #[error("LEDC: {0}")]
    Esp(#[from] EspError),
    /// The channel was already released.
    #[error("LEDC channel released")]
    Released,
}

/// Hobby servo driven by one LEDC channel.
///
/// # Example
///
/// ```ignore
/// use servo_node::hal::esp32::Esp32Servo;
/// use servo_node::traits::PwmOutput;
///
/// let peripherals = Peripherals::take()?;
/// let mut servo = Esp32Servo::new(
///     peripherals.pins.gpio7,
///     peripherals.ledc.timer0,
///     peripherals.ledc.channel0,
///     100,
/// )?;
///
/// servo.start(6.5)?;          // 0°
/// servo.set_duty_cycle(13.0)?; // 90°
/// servo.release()?;
/// ```
pub struct Esp32Servo<'d> {
    ledc: Option<LedcDriver<'d>>,
    max_duty: u32,
}

impl<'d> Esp32Servo<'d> {
    /// PWM resolution (14-bit is the widest available on the C3)
    const PWM_RESOLUTION: Resolution = Resolution::Bits14;

    /// Configures the LEDC timer at `frequency_hz` and attaches `pin`.
    ///
    /// The channel starts with zero duty (no pulses).
    pub fn new<T, TI, C, CI, P, PI>(
        pin: P,
        timer: T,
        channel: C,
        frequency_hz: u32,
    ) -> Result<Self, EspError>
    where
        TI: esp_idf_hal::ledc::LedcTimer + 'd,
        T: Peripheral<P = TI> + 'd,
        CI: esp_idf_hal::ledc::LedcChannel<SpeedMode = TI::SpeedMode> + 'd,
        C: Peripheral<P = CI> + 'd,
        PI: esp_idf_hal::gpio::OutputPin + 'd,
        P: Peripheral<P = PI> + 'd,
    {
        let timer_config = TimerConfig::default()
            .frequency(frequency_hz.Hz())
            .resolution(Self::PWM_RESOLUTION);
        let timer_driver = LedcTimerDriver::new(timer, &timer_config)?;

        let mut ledc = LedcDriver::new(channel, &timer_driver, pin)?;
        ledc.set_duty(0)?;
        let max_duty = ledc.get_max_duty();

        Ok(Self {
            ledc: Some(ledc),
            max_duty,
        })
    }

    fn raw_duty(&self, duty_percent: f32) -> u32 {
        (duty_percent.clamp(0.0, 100.0) / 100.0 * self.max_duty as f32) as u32
    }

    fn channel(&mut self) -> Result<&mut LedcDriver<'d>, Esp32ServoError> {
        self.ledc.as_mut().ok_or(Esp32ServoError::Released)
    }
}

impl PwmOutput for Esp32Servo<'_> {
    type Error = Esp32ServoError;

    fn start(&mut self, duty_percent: f32) -> Result<(), Self::Error> {
        let raw = self.raw_duty(duty_percent);
        let ledc = self.channel()?;
        ledc.enable()?;
        ledc.set_duty(raw)?;
        Ok(())
    }

    fn set_duty_cycle(&mut self, duty_percent: f32) -> Result<(), Self::Error> {
        let raw = self.raw_duty(duty_percent);
        self.channel()?.set_duty(raw)?;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Self::Error> {
        if let Some(ledc) = self.ledc.as_mut() {
            ledc.set_duty(0)?;
            ledc.disable()?;
        }
        Ok(())
    }

    fn release(&mut self) -> Result<(), Self::Error> {
        if let Some(mut ledc) = self.ledc.take() {
            ledc.set_duty(0)?;
            // dropping the driver stops the channel and frees the pin
        }
        Ok(())
    }

    fn is_released(&self) -> bool {
        self.ledc.is_none()
    }
}
