//! Teardown of the broker session and the PWM output.
//!
//! [`CleanupHandler`] runs four steps in order:
//!
//! 1. unsubscribe from the command topic
//! 2. disconnect from the broker
//! 3. stop the PWM output
//! 4. release the output back to the platform
//!
//! Each step is remembered once it succeeds, so calling
//! [`cleanup`](CleanupHandler::cleanup) again only retries what failed.
//! Broker failures never block the hardware steps.
//!
//! [`run_once`](CleanupHandler::run_once) is the entry point used by the event
//! loop and by `Drop`; only its first call does any work.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{error, info, warn};

use crate::device::{lock_output, SharedOutput};
use crate::traits::{MqttClient, PwmOutput};

/// One teardown step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CleanupStep {
    /// Remove the command subscription.
    Unsubscribe,
    /// Close the broker connection.
    Disconnect,
    /// Stop the PWM signal.
    StopOutput,
    /// Release the pin and timer.
    ReleaseOutput,
}

impl CleanupStep {
    /// All steps in execution order.
    pub const ALL: [CleanupStep; 4] = [
        Self::Unsubscribe,
        Self::Disconnect,
        Self::StopOutput,
        Self::ReleaseOutput,
    ];
}

impl fmt::Display for CleanupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unsubscribe => "unsubscribe",
            Self::Disconnect => "disconnect",
            Self::StopOutput => "stop output",
            Self::ReleaseOutput => "release output",
        };
        f.write_str(name)
    }
}

/// Outcome of one step during a [`cleanup`](CleanupHandler::cleanup) call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// Performed by this call.
    Done,
    /// Already succeeded on an earlier call.
    AlreadyDone,
    /// Failed with the given message; retried on the next call.
    Failed(String),
}

impl StepOutcome {
    /// True unless the step failed.
    pub fn is_ok(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }
}

/// Per-step outcomes of one cleanup call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CleanupReport {
    /// Unsubscribe outcome.
    pub unsubscribe: StepOutcome,
    /// Disconnect outcome.
    pub disconnect: StepOutcome,
    /// Output stop outcome.
    pub stop_output: StepOutcome,
    /// Output release outcome.
    pub release_output: StepOutcome,
}

impl CleanupReport {
    /// Outcome of `step`.
    pub fn outcome(&self, step: CleanupStep) -> &StepOutcome {
        match step {
            CleanupStep::Unsubscribe => &self.unsubscribe,
            CleanupStep::Disconnect => &self.disconnect,
            CleanupStep::StopOutput => &self.stop_output,
            CleanupStep::ReleaseOutput => &self.release_output,
        }
    }

    /// True when every step has succeeded, now or earlier.
    pub fn is_complete(&self) -> bool {
        CleanupStep::ALL.iter().all(|s| self.outcome(*s).is_ok())
    }

    /// Steps that failed in this call.
    pub fn failed(&self) -> Vec<CleanupStep> {
        CleanupStep::ALL
            .iter()
            .copied()
            .filter(|s| !self.outcome(*s).is_ok())
            .collect()
    }
}

#[derive(Debug, Default)]
struct Progress {
    unsubscribed: bool,
    disconnected: bool,
    stopped: bool,
    released: bool,
}

/// Tears down the broker session and the PWM output.
pub struct CleanupHandler<P: PwmOutput, C: MqttClient> {
    output: SharedOutput<P>,
    client: Mutex<C>,
    topic: String,
    progress: Mutex<Progress>,
    done: AtomicBool,
}

impl<P: PwmOutput, C: MqttClient> CleanupHandler<P, C> {
    /// Creates a handler that will unsubscribe `topic` on `client` and shut
    /// down `output`.
    pub fn new(output: SharedOutput<P>, client: C, topic: impl Into<String>) -> Self {
        Self {
            output,
            client: Mutex::new(client),
            topic: topic.into(),
            progress: Mutex::new(Progress::default()),
            done: AtomicBool::new(false),
        }
    }

    /// Topic unsubscribed during cleanup.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Locks the broker client.
    pub fn client(&self) -> MutexGuard<'_, C> {
        self.client.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True once [`run_once`](Self::run_once) has been called.
    pub fn has_run(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Runs every step that has not yet succeeded.
    pub fn cleanup(&self) -> CleanupReport {
        let mut progress = self.progress.lock().unwrap_or_else(PoisonError::into_inner);

        let (unsubscribe, disconnect) = {
            let mut client = self.client();
            let unsubscribe = step(&mut progress.unsubscribed, || {
                client.unsubscribe(&self.topic).map_err(|e| e.to_string())
            });
            let disconnect = step(&mut progress.disconnected, || {
                client.disconnect().map_err(|e| e.to_string())
            });
            (unsubscribe, disconnect)
        };
        for (name, outcome) in [("unsubscribe", &unsubscribe), ("disconnect", &disconnect)] {
            if let StepOutcome::Failed(msg) = outcome {
                warn!("Cleanup: {} failed: {}", name, msg);
            }
        }

        let (stop_output, release_output) = {
            let mut output = lock_output(&self.output);
            let stop = step(&mut progress.stopped, || output.stop().map_err(|e| e.to_string()));
            let release = step(&mut progress.released, || {
                output.release().map_err(|e| e.to_string())
            });
            (stop, release)
        };
        for (name, outcome) in [("stop", &stop_output), ("release", &release_output)] {
            if let StepOutcome::Failed(msg) = outcome {
                error!("Cleanup: output {} failed: {}", name, msg);
            }
        }

        CleanupReport {
            unsubscribe,
            disconnect,
            stop_output,
            release_output,
        }
    }

    /// Runs [`cleanup`](Self::cleanup) on the first call only.
    ///
    /// Returns true if this call performed the cleanup.
    pub fn run_once(&self) -> bool {
        if self.done.swap(true, Ordering::AcqRel) {
            return false;
        }
        let report = self.cleanup();
        if report.is_complete() {
            info!("Cleanup complete");
        } else {
            warn!("Cleanup finished with failed steps: {:?}", report.failed());
        }
        true
    }
}

impl<P: PwmOutput, C: MqttClient> Drop for CleanupHandler<P, C> {
    fn drop(&mut self) {
        self.run_once();
    }
}

fn step(done: &mut bool, action: impl FnOnce() -> Result<(), String>) -> StepOutcome {
    if *done {
        return StepOutcome::AlreadyDone;
    }
    match action() {
        Ok(()) => {
            *done = true;
            StepOutcome::Done
        }
        Err(msg) => StepOutcome::Failed(msg),
    }
}
