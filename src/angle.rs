//! Servo angle validation and the angle-to-duty-cycle mapping.
//!
//! A hobby servo expects one pulse per period whose width encodes the target
//! angle. The node drives it with a PWM output whose duty cycle (percent of
//! the period held high) moves linearly from [`PwmParameters::duty_at_zero`]
//! at 0° to `duty_at_zero + duty_span` at 180°.
//!
//! # Example
//!
//! ```rust
//! use servo_node::angle::{duty_cycle, Angle, PwmParameters};
//!
//! let params = PwmParameters::default(); // 6.5% at 0°, 13% span
//! assert_eq!(duty_cycle(0.0, &params), 6.5);
//! assert_eq!(duty_cycle(90.0, &params), 13.0);
//!
//! let angle = Angle::new(180.0).unwrap();
//! assert_eq!(params.duty_for(angle), 19.5);
//! ```

use thiserror::Error;

/// Smallest accepted angle in degrees.
pub const MIN_DEGREES: f32 = 0.0;

/// Largest accepted angle in degrees.
pub const MAX_DEGREES: f32 = 180.0;

/// A servo angle in degrees, guaranteed finite and within `0.0..=180.0`.
///
/// The only way to obtain an `Angle` is [`Angle::new`], so any value carried by
/// a [`Command::Rotate`](crate::Command::Rotate) is already in range.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct Angle(f32);

impl Angle {
    /// The 0° position.
    pub const ZERO: Angle = Angle(MIN_DEGREES);

    /// The 180° position.
    pub const MAX: Angle = Angle(MAX_DEGREES);

    /// Validates `degrees`, returning `None` when it is NaN, infinite or
    /// outside `0.0..=180.0`.
    pub fn new(degrees: f32) -> Option<Self> {
        if degrees.is_finite() && (MIN_DEGREES..=MAX_DEGREES).contains(&degrees) {
            Some(Self(degrees))
        } else {
            None
        }
    }

    /// Returns the angle in degrees.
    #[inline]
    pub const fn degrees(self) -> f32 {
        self.0
    }
}

/// PWM output parameters fixed at startup.
///
/// The defaults match an FS5106B servo driven at 100 Hz: the nominal 5% duty
/// for 0° had to be raised to 6.5% on real hardware.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PwmParameters {
    /// Duty cycle (percent) that positions the servo at 0°.
    pub duty_at_zero: f32,
    /// Duty cycle span (percent) between 0° and 180°.
    pub duty_span: f32,
    /// Pulse frequency of the PWM output in Hz.
    pub pulse_frequency_hz: u32,
}

impl Default for PwmParameters {
    fn default() -> Self {
        Self {
            duty_at_zero: 6.5,
            duty_span: 13.0,
            pulse_frequency_hz: 100,
        }
    }
}

/// Reasons a set of [`PwmParameters`] is rejected.
#[derive(Clone, Copy, Debug, PartialEq, Error)]
pub enum PwmParametersError {
    /// A duty value was NaN or infinite.
    #[error("duty cycle values must be finite")]
    NotFinite,
    /// The duty cycle at 0° was negative.
    #[error("duty at zero must not be negative (got {0})")]
    NegativeBase(f32),
    /// The span was zero or negative, which would break monotonicity.
    #[error("duty span must be positive (got {0})")]
    NonPositiveSpan(f32),
    /// The duty cycle at 180° would exceed 100%.
    #[error("duty at 180 degrees exceeds 100% (got {0})")]
    AboveFullScale(f32),
    /// The pulse frequency was zero.
    #[error("pulse frequency must be non-zero")]
    ZeroFrequency,
}

impl PwmParameters {
    /// Creates and validates a parameter set.
    pub fn new(
        duty_at_zero: f32,
        duty_span: f32,
        pulse_frequency_hz: u32,
    ) -> Result<Self, PwmParametersError> {
        let params = Self {
            duty_at_zero,
            duty_span,
            pulse_frequency_hz,
        };
        params.validate()?;
        Ok(params)
    }

    /// Checks the invariants the mapping relies on.
    pub fn validate(&self) -> Result<(), PwmParametersError> {
        if !self.duty_at_zero.is_finite() || !self.duty_span.is_finite() {
            return Err(PwmParametersError::NotFinite);
        }
        if self.duty_at_zero < 0.0 {
            return Err(PwmParametersError::NegativeBase(self.duty_at_zero));
        }
        if self.duty_span <= 0.0 {
            return Err(PwmParametersError::NonPositiveSpan(self.duty_span));
        }
        let full_scale = self.duty_at_zero + self.duty_span;
        if full_scale > 100.0 {
            return Err(PwmParametersError::AboveFullScale(full_scale));
        }
        if self.pulse_frequency_hz == 0 {
            return Err(PwmParametersError::ZeroFrequency);
        }
        Ok(())
    }

    /// Duty cycle (percent) for a validated angle.
    #[inline]
    pub fn duty_for(&self, angle: Angle) -> f32 {
        (angle.degrees() / MAX_DEGREES) * self.duty_span + self.duty_at_zero
    }

    /// Duty cycle (percent) at 180°.
    #[inline]
    pub fn duty_at_max(&self) -> f32 {
        self.duty_at_zero + self.duty_span
    }
}

/// Maps an angle in degrees to a duty cycle percentage.
///
/// Inputs outside `0.0..=180.0` are clamped and NaN is treated as 0°, so the
/// result always lies between `duty_at_zero` and `duty_at_zero + duty_span`.
/// Prefer [`PwmParameters::duty_for`] when an [`Angle`] is at hand.
pub fn duty_cycle(angle: f32, params: &PwmParameters) -> f32 {
    let degrees = if angle.is_nan() {
        MIN_DEGREES
    } else {
        angle.clamp(MIN_DEGREES, MAX_DEGREES)
    };
    params.duty_for(Angle(degrees))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fs5106b() -> PwmParameters {
        PwmParameters::new(6.5, 13.0, 100).unwrap()
    }

    #[test]
    fn endpoints_are_exact() {
        let p = fs5106b();
        assert_eq!(duty_cycle(0.0, &p), p.duty_at_zero);
        assert_eq!(duty_cycle(180.0, &p), p.duty_at_zero + p.duty_span);
    }

    #[test]
    fn midpoint_of_default_servo() {
        assert_eq!(duty_cycle(90.0, &fs5106b()), 13.0);
    }

    #[test]
    fn quarter_turn() {
        let p = fs5106b();
        let expected = p.duty_at_zero + 0.25 * p.duty_span;
        assert!((duty_cycle(45.0, &p) - expected).abs() < 1e-5);
    }

    #[test]
    fn out_of_range_inputs_are_clamped() {
        let p = fs5106b();
        assert_eq!(duty_cycle(-5.0, &p), p.duty_at_zero);
        assert_eq!(duty_cycle(200.0, &p), p.duty_at_max());
        assert_eq!(duty_cycle(f32::INFINITY, &p), p.duty_at_max());
        assert_eq!(duty_cycle(f32::NAN, &p), p.duty_at_zero);
    }

    #[test]
    fn angle_rejects_invalid_values() {
        assert!(Angle::new(-0.1).is_none());
        assert!(Angle::new(180.1).is_none());
        assert!(Angle::new(f32::NAN).is_none());
        assert!(Angle::new(f32::NEG_INFINITY).is_none());
        assert_eq!(Angle::new(0.0), Some(Angle::ZERO));
        assert_eq!(Angle::new(180.0), Some(Angle::MAX));
    }

    #[test]
    fn parameter_validation() {
        assert_eq!(
            PwmParameters::new(6.5, 0.0, 100),
            Err(PwmParametersError::NonPositiveSpan(0.0))
        );
        assert_eq!(
            PwmParameters::new(-1.0, 13.0, 100),
            Err(PwmParametersError::NegativeBase(-1.0))
        );
        assert_eq!(
            PwmParameters::new(90.0, 20.0, 100),
            Err(PwmParametersError::AboveFullScale(110.0))
        );
        assert_eq!(
            PwmParameters::new(6.5, 13.0, 0),
            Err(PwmParametersError::ZeroFrequency)
        );
        assert_eq!(
            PwmParameters::new(f32::NAN, 13.0, 100),
            Err(PwmParametersError::NotFinite)
        );
        assert!(PwmParameters::default().validate().is_ok());
    }

    proptest! {
        #[test]
        fn mapping_is_monotonic(a in 0.0f32..=180.0, b in 0.0f32..=180.0) {
            let p = fs5106b();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(duty_cycle(lo, &p) <= duty_cycle(hi, &p));
        }

        #[test]
        fn mapping_stays_within_span(angle in -1000.0f32..1000.0) {
            let p = fs5106b();
            let duty = duty_cycle(angle, &p);
            prop_assert!(duty >= p.duty_at_zero);
            prop_assert!(duty <= p.duty_at_max());
        }
    }
}
