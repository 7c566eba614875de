//! Device lifecycle state and the command state machine.
//!
//! The device has two states. It starts [`Running`](DeviceState::Running) and
//! moves to [`Stopped`](DeviceState::Stopped) on `SHOWER OFF`; nothing moves it
//! back. The state lives in a [`DeviceStateCell`] shared between the command
//! path (the only writer) and the polling loop (a reader).
//!
//! Applying a command is split in two:
//!
//! - [`transition`] is a pure planner deciding the [`OutputEffect`] and the
//!   next state
//! - [`DeviceStateMachine::apply`] executes that effect on the PWM output
//!   while holding the output lock, then publishes the new state
//!
//! # Example
//!
//! ```rust
//! use servo_node::device::{DeviceState, DeviceStateMachine, OutputEffect};
//! use servo_node::hal::MockServo;
//! use servo_node::{parse, PwmParameters};
//!
//! let machine = DeviceStateMachine::new(MockServo::new(), PwmParameters::default());
//!
//! let applied = machine.apply(parse("ROTATE;90").unwrap()).unwrap();
//! assert_eq!(applied.effect, OutputEffect::SetDuty { duty: 13.0 });
//!
//! let applied = machine.apply(parse("SHOWER OFF").unwrap()).unwrap();
//! assert_eq!(applied.state, DeviceState::Stopped);
//! assert!(machine.is_stopped());
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info};
use thiserror::Error;

use crate::angle::PwmParameters;
use crate::commands::Command;
use crate::traits::PwmOutput;

// ============================================================================
// Device State
// ============================================================================

/// Lifecycle state of the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeviceState {
    /// Accepting commands. Initial state.
    Running = 0,
    /// Powered off. Terminal.
    Stopped = 1,
}

impl DeviceState {
    /// Returns true for the terminal state.
    pub fn is_terminal(self) -> bool {
        self == Self::Stopped
    }

    fn from_u8(raw: u8) -> Self {
        if raw == Self::Stopped as u8 {
            Self::Stopped
        } else {
            Self::Running
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => f.write_str("running"),
            Self::Stopped => f.write_str("stopped"),
        }
    }
}

/// Atomically shared [`DeviceState`].
///
/// The only write is [`stop`](Self::stop), so the state can never leave
/// `Stopped` once it is there.
#[derive(Debug)]
pub struct DeviceStateCell(AtomicU8);

impl DeviceStateCell {
    /// Creates a cell in the `Running` state.
    pub const fn new() -> Self {
        Self(AtomicU8::new(DeviceState::Running as u8))
    }

    /// Reads the current state.
    #[inline]
    pub fn get(&self) -> DeviceState {
        DeviceState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Returns true once the device is stopped.
    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.get().is_terminal()
    }

    /// Moves to `Stopped`, returning the previous state.
    pub fn stop(&self) -> DeviceState {
        DeviceState::from_u8(self.0.swap(DeviceState::Stopped as u8, Ordering::AcqRel))
    }
}

impl Default for DeviceStateCell {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Planning
// ============================================================================

/// Side effect on the PWM output chosen for a command.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OutputEffect {
    /// Enable the output at `duty` percent.
    Start {
        /// Duty cycle in percent.
        duty: f32,
    },
    /// Change the duty cycle of the running output.
    SetDuty {
        /// Duty cycle in percent.
        duty: f32,
    },
    /// Stop the output.
    Stop,
    /// Leave the output untouched.
    Ignored,
}

/// Plans the effect of `command` in `state`.
///
/// | State | Command | Effect | Next |
/// |-------|---------|--------|------|
/// | Running | `PowerOn` | `Start { duty_at_zero }` | Running |
/// | Running | `Rotate(a)` | `SetDuty { duty_for(a) }` | Running |
/// | any | `PowerOff` | `Stop` | Stopped |
/// | Stopped | `PowerOn` / `Rotate` | `Ignored` | Stopped |
pub fn transition(
    state: DeviceState,
    command: Command,
    params: &PwmParameters,
) -> (OutputEffect, DeviceState) {
    match (state, command) {
        (_, Command::PowerOff) => (OutputEffect::Stop, DeviceState::Stopped),
        (DeviceState::Stopped, _) => (OutputEffect::Ignored, DeviceState::Stopped),
        (DeviceState::Running, Command::PowerOn) => (
            OutputEffect::Start {
                duty: params.duty_at_zero,
            },
            DeviceState::Running,
        ),
        (DeviceState::Running, Command::Rotate(angle)) => (
            OutputEffect::SetDuty {
                duty: params.duty_for(angle),
            },
            DeviceState::Running,
        ),
    }
}

// ============================================================================
// Shared Output
// ============================================================================

/// PWM output shared between the state machine and the cleanup handler.
pub type SharedOutput<P> = Arc<Mutex<P>>;

/// Wraps `output` for sharing.
pub fn shared_output<P>(output: P) -> SharedOutput<P> {
    Arc::new(Mutex::new(output))
}

/// Locks a shared output, recovering it if a previous holder panicked.
pub(crate) fn lock_output<P>(output: &Mutex<P>) -> MutexGuard<'_, P> {
    output.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Failure reported by the PWM output.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum HardwareError {
    /// The driver rejected the operation.
    #[error("servo driver error: {0}")]
    Driver(String),
    /// The output was already handed back to the platform.
    #[error("servo output already released")]
    Released,
}

impl HardwareError {
    pub(crate) fn driver(err: impl fmt::Display) -> Self {
        Self::Driver(err.to_string())
    }
}

/// Result of a successfully applied command.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Applied {
    /// The command that was applied.
    pub command: Command,
    /// Effect executed on the output.
    pub effect: OutputEffect,
    /// Device state after the command.
    pub state: DeviceState,
}

// ============================================================================
// State Machine
// ============================================================================

/// Applies commands to the PWM output and owns all writes to the device state.
pub struct DeviceStateMachine<P> {
    state: Arc<DeviceStateCell>,
    output: SharedOutput<P>,
    params: PwmParameters,
}

impl<P> Clone for DeviceStateMachine<P> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            output: Arc::clone(&self.output),
            params: self.params,
        }
    }
}

impl<P: PwmOutput> DeviceStateMachine<P> {
    /// Creates a running state machine owning `output`.
    pub fn new(output: P, params: PwmParameters) -> Self {
        Self::with_shared(
            Arc::new(DeviceStateCell::new()),
            shared_output(output),
            params,
        )
    }

    /// Creates a state machine over an existing state cell and output.
    pub fn with_shared(
        state: Arc<DeviceStateCell>,
        output: SharedOutput<P>,
        params: PwmParameters,
    ) -> Self {
        Self {
            state,
            output,
            params,
        }
    }

    /// Current device state.
    pub fn state(&self) -> DeviceState {
        self.state.get()
    }

    /// Returns true once the device is stopped.
    pub fn is_stopped(&self) -> bool {
        self.state.is_stopped()
    }

    /// Shared handle to the state cell, for readers such as the event loop.
    pub fn state_cell(&self) -> Arc<DeviceStateCell> {
        Arc::clone(&self.state)
    }

    /// Shared handle to the PWM output.
    pub fn output(&self) -> SharedOutput<P> {
        Arc::clone(&self.output)
    }

    /// PWM parameters used to compute duty cycles.
    pub fn params(&self) -> &PwmParameters {
        &self.params
    }

    /// Applies `command`.
    ///
    /// The output lock is held across reading the state, driving the output
    /// and writing the state, so commands are applied one at a time.
    ///
    /// # Errors
    ///
    /// Returns [`HardwareError`] when the output fails. For `PowerOff` the
    /// device is still moved to `Stopped` before the error is returned.
    pub fn apply(&self, command: Command) -> Result<Applied, HardwareError> {
        let mut output = lock_output(&self.output);
        let (effect, next) = transition(self.state.get(), command, &self.params);

        let result = match effect {
            OutputEffect::Start { duty } => {
                info!("Power on, duty {:.2}%", duty);
                ensure_attached(&*output)
                    .and_then(|_| output.start(duty).map_err(HardwareError::driver))
            }
            OutputEffect::SetDuty { duty } => {
                debug!("{} -> duty {:.2}%", command, duty);
                ensure_attached(&*output)
                    .and_then(|_| output.set_duty_cycle(duty).map_err(HardwareError::driver))
            }
            OutputEffect::Stop => {
                info!("Power off");
                output.stop().map_err(HardwareError::driver)
            }
            OutputEffect::Ignored => {
                debug!("Ignoring {} while {}", command, self.state.get());
                Ok(())
            }
        };

        if next.is_terminal() {
            self.state.stop();
        }
        drop(output);

        result.map(|_| Applied {
            command,
            effect,
            state: next,
        })
    }
}

fn ensure_attached<P: PwmOutput>(output: &P) -> Result<(), HardwareError> {
    if output.is_released() {
        Err(HardwareError::Released)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::angle::Angle;
    use crate::hal::{MockServo, ServoEvent};

    fn rotate(degrees: f32) -> Command {
        Command::Rotate(Angle::new(degrees).unwrap())
    }

    fn events(machine: &DeviceStateMachine<MockServo>) -> Vec<ServoEvent> {
        lock_output(&machine.output()).events.clone()
    }

    #[test]
    fn transition_table() {
        let p = PwmParameters::default();
        use DeviceState::*;

        assert_eq!(
            transition(Running, Command::PowerOn, &p),
            (OutputEffect::Start { duty: 6.5 }, Running)
        );
        assert_eq!(
            transition(Running, rotate(180.0), &p),
            (OutputEffect::SetDuty { duty: 19.5 }, Running)
        );
        assert_eq!(
            transition(Running, Command::PowerOff, &p),
            (OutputEffect::Stop, Stopped)
        );
        assert_eq!(
            transition(Stopped, Command::PowerOff, &p),
            (OutputEffect::Stop, Stopped)
        );
        assert_eq!(
            transition(Stopped, Command::PowerOn, &p),
            (OutputEffect::Ignored, Stopped)
        );
        assert_eq!(
            transition(Stopped, rotate(10.0), &p),
            (OutputEffect::Ignored, Stopped)
        );
    }

    #[test]
    fn state_cell_is_monotone() {
        let cell = DeviceStateCell::new();
        assert_eq!(cell.get(), DeviceState::Running);
        assert_eq!(cell.stop(), DeviceState::Running);
        assert_eq!(cell.stop(), DeviceState::Stopped);
        assert!(cell.is_stopped());
    }

    #[test]
    fn power_on_then_rotate_drives_output() {
        let machine = DeviceStateMachine::new(MockServo::new(), PwmParameters::default());

        machine.apply(Command::PowerOn).unwrap();
        machine.apply(rotate(45.0)).unwrap();

        assert_eq!(
            events(&machine),
            vec![ServoEvent::Start(6.5), ServoEvent::SetDuty(9.75)]
        );
        assert_eq!(machine.state(), DeviceState::Running);
    }

    #[test]
    fn rotate_without_power_on_still_sets_duty() {
        let machine = DeviceStateMachine::new(MockServo::new(), PwmParameters::default());
        let applied = machine.apply(rotate(90.0)).unwrap();
        assert_eq!(applied.effect, OutputEffect::SetDuty { duty: 13.0 });
    }

    #[test]
    fn commands_after_power_off_are_ignored() {
        let machine = DeviceStateMachine::new(MockServo::new(), PwmParameters::default());
        machine.apply(Command::PowerOff).unwrap();

        let applied = machine.apply(rotate(90.0)).unwrap();
        assert_eq!(applied.effect, OutputEffect::Ignored);
        let applied = machine.apply(Command::PowerOn).unwrap();
        assert_eq!(applied.effect, OutputEffect::Ignored);

        assert_eq!(events(&machine), vec![ServoEvent::Stop]);
        assert!(machine.is_stopped());
    }

    #[test]
    fn power_off_is_idempotent() {
        let machine = DeviceStateMachine::new(MockServo::new(), PwmParameters::default());
        machine.apply(Command::PowerOff).unwrap();
        let applied = machine.apply(Command::PowerOff).unwrap();
        assert_eq!(applied.state, DeviceState::Stopped);
    }

    #[test]
    fn power_off_stops_even_when_output_fails() {
        let machine = DeviceStateMachine::new(MockServo::new(), PwmParameters::default());
        lock_output(&machine.output()).fail_next(1);

        let err = machine.apply(Command::PowerOff).unwrap_err();
        assert!(matches!(err, HardwareError::Driver(_)));
        assert!(machine.is_stopped());
    }

    #[test]
    fn rotate_after_release_reports_released() {
        let machine = DeviceStateMachine::new(MockServo::new(), PwmParameters::default());
        lock_output(&machine.output()).release().unwrap();

        assert_eq!(machine.apply(rotate(30.0)), Err(HardwareError::Released));
        assert_eq!(machine.state(), DeviceState::Running);
    }

    #[test]
    fn driver_failure_keeps_running_state() {
        let machine = DeviceStateMachine::new(MockServo::new(), PwmParameters::default());
        lock_output(&machine.output()).fail_next(1);

        let err = machine.apply(Command::PowerOn).unwrap_err();
        assert_eq!(err.to_string(), "servo driver error: injected servo driver failure");
        assert_eq!(machine.state(), DeviceState::Running);
    }
}
