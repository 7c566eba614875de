//! Hardware abstraction for the servo's PWM output.
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`PwmOutput`] | Duty-cycle controlled signal line driving the servo |
//!
//! For testing and desktop development, use [`MockServo`](crate::hal::MockServo).
//! For ESP32 hardware, use `hal::esp32::Esp32Servo` (requires `esp32` feature).
//!
//! # Example
//!
//! ```rust
//! use servo_node::hal::MockServo;
//! use servo_node::traits::PwmOutput;
//!
//! let mut servo = MockServo::new();
//! servo.start(6.5).unwrap();
//! servo.set_duty_cycle(13.0).unwrap();
//! servo.stop().unwrap();
//! servo.release().unwrap();
//!
//! assert!(servo.is_released());
//! assert!(servo.set_duty_cycle(10.0).is_err());
//! ```

/// A PWM output whose duty cycle positions a servo.
///
/// Duty cycles are percentages of the pulse period (`0.0..=100.0`).
///
/// # Implementation Notes
///
/// - `start` enables the signal at the given duty cycle
/// - `set_duty_cycle` changes the duty cycle of a running signal
/// - `stop` must be idempotent and must succeed on an already stopped output
/// - `release` hands the pin back to the platform; it must be idempotent,
///   and `start`/`set_duty_cycle` after it must fail rather than touch the pin
///
/// # Example Implementation
///
/// ```rust,ignore
/// use servo_node::traits::PwmOutput;
///
/// struct MyServo { /* timer and pin handles */ }
///
/// impl PwmOutput for MyServo {
///     type Error = MyDriverError;
///
///     fn start(&mut self, duty_percent: f32) -> Result<(), Self::Error> {
///         self.enable()?;
///         self.set_duty_cycle(duty_percent)
///     }
///
///     fn set_duty_cycle(&mut self, duty_percent: f32) -> Result<(), Self::Error> {
///         let raw = (duty_percent.clamp(0.0, 100.0) / 100.0 * self.max_duty() as f32) as u32;
///         self.write_duty(raw)
///     }
///
///     fn stop(&mut self) -> Result<(), Self::Error> { self.write_duty(0) }
///
///     fn release(&mut self) -> Result<(), Self::Error> { self.free_pin() }
///
///     fn is_released(&self) -> bool { self.pin.is_none() }
/// }
/// ```
pub trait PwmOutput {
    /// Error type reported by the driver.
    type Error: core::fmt::Display;

    /// Starts the signal at `duty_percent`.
    fn start(&mut self, duty_percent: f32) -> Result<(), Self::Error>;

    /// Changes the duty cycle of the running signal.
    fn set_duty_cycle(&mut self, duty_percent: f32) -> Result<(), Self::Error>;

    /// Stops the signal (output held low).
    fn stop(&mut self) -> Result<(), Self::Error>;

    /// Releases the pin and timer back to the platform.
    fn release(&mut self) -> Result<(), Self::Error>;

    /// Returns true once `release` has succeeded.
    fn is_released(&self) -> bool;
}
