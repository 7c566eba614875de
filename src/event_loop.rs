//! Fixed-cadence polling loop that ends the node's lifecycle.
//!
//! The loop checks the device state once per poll interval. It leaves when
//! the device is `Stopped` or when the shared [`Shutdown`] fires, runs the
//! cleanup handler once and reports why it stopped. It never writes the
//! device state.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::time::{interval, MissedTickBehavior};

use crate::cleanup::CleanupHandler;
use crate::device::DeviceStateCell;
use crate::shutdown::{Shutdown, ShutdownReason};
use crate::traits::{MqttClient, PwmOutput};

/// Polls the device state until the node must shut down.
pub struct EventLoop {
    state: Arc<DeviceStateCell>,
    shutdown: Shutdown,
    poll_interval: Duration,
}

impl EventLoop {
    /// Creates a loop over `state` polling every `poll_interval`.
    ///
    /// `poll_interval` must be non-zero; [`Config::validate`] rejects zero.
    ///
    /// [`Config::validate`]: crate::config::Config::validate
    pub fn new(state: Arc<DeviceStateCell>, shutdown: Shutdown, poll_interval: Duration) -> Self {
        Self {
            state,
            shutdown,
            poll_interval,
        }
    }

    /// Poll interval.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Waits until the device is stopped or shutdown is signalled.
    ///
    /// Does not run cleanup; see [`run`](Self::run).
    pub async fn wait_for_exit(&self) -> ShutdownReason {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let reason = loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.state.is_stopped() {
                        break ShutdownReason::DeviceStopped;
                    }
                    debug!("Device running");
                }
                reason = self.shutdown.wait() => break reason,
            }
        };

        // record our reason for the other tasks; an earlier one is kept
        self.shutdown.trigger(reason);
        self.shutdown.reason().unwrap_or(reason)
    }

    /// Runs until exit, then cleans up exactly once.
    pub async fn run<P: PwmOutput, C: MqttClient>(
        &self,
        cleanup: &CleanupHandler<P, C>,
    ) -> ShutdownReason {
        let reason = self.wait_for_exit().await;
        info!("Shutting down: {}", reason);
        cleanup.run_once();
        reason
    }
}
