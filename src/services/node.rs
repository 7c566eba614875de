//! The servo node runner.
//!
//! [`ServoNode::run`] wires the pieces together:
//!
//! ```text
//! rumqttc event loop task --mpsc--> CommandHandler task --> DeviceStateMachine --> PwmOutput
//!                                                                 |
//!                         EventLoop (polls DeviceState) <---------+
//!                               |
//!                               +--> CleanupHandler::run_once
//! ```
//!
//! Startup failures are returned as [`NodeError`] after the output has been
//! released; once running, the node returns the [`ShutdownReason`].

use std::sync::Arc;

use log::{error, info, warn};
use thiserror::Error;

use crate::cleanup::CleanupHandler;
use crate::config::{Config, ConfigError};
use crate::device::{
    lock_output, shared_output, DeviceStateCell, DeviceStateMachine, SharedOutput,
};
use crate::event_loop::EventLoop;
use crate::shutdown::{wait_for_interrupt, Shutdown, ShutdownReason};
use crate::traits::PwmOutput;

use super::handler::CommandHandler;
use super::transport::{connect, RumqttTransport, TransportError};

/// Errors that stop the node before it starts taking commands.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Invalid configuration.
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    /// Broker connection or subscription failed.
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
}

/// A servo actuator attached to an MQTT broker.
pub struct ServoNode<P> {
    config: Config,
    output: P,
}

impl<P: PwmOutput + Send + 'static> ServoNode<P> {
    /// Creates a node driving `output`.
    pub fn new(config: Config, output: P) -> Self {
        Self { config, output }
    }

    /// Runs until `SHOWER OFF`, an interrupt or a hardware failure.
    pub async fn run(self) -> Result<ShutdownReason, NodeError> {
        let Self { config, output } = self;
        let output = shared_output(output);

        let prepared = config.validate().and_then(|_| {
            Ok((
                config.subscribe_topic()?,
                config.mqtt.qos()?,
                config.servo.pwm_parameters()?,
                config.servo.settle_delay()?,
                config.servo.poll_interval()?,
            ))
        });
        let (address, qos, params, settle_delay, poll_interval) = match prepared {
            Ok(values) => values,
            Err(err) => {
                release(&output);
                return Err(err.into());
            }
        };
        let topic = address.as_topic();

        let client_id = config.device.device_id.as_str();
        let (mut transport, inbound) = match connect(&config.mqtt, client_id).await {
            Ok(connected) => connected,
            Err(err) => {
                release(&output);
                return Err(err.into());
            }
        };
        let link = transport.link();

        if let Err(err) = transport.subscribe_acked(topic.as_str(), qos).await {
            CleanupHandler::new(output, transport, topic.as_str()).run_once();
            return Err(err.into());
        }
        let cleanup = CleanupHandler::new(output.clone(), transport, topic.as_str());

        let shutdown = Shutdown::new();
        let machine =
            DeviceStateMachine::with_shared(Arc::new(DeviceStateCell::new()), output, params);
        let state = machine.state_cell();
        let handler = CommandHandler::new(machine, address, settle_delay);

        let worker = tokio::spawn(handler.run(inbound, shutdown.clone()));
        let interrupt = tokio::spawn(listen_for_interrupt(shutdown.clone()));
        info!("Servo node ready on {}", topic);

        let reason = EventLoop::new(state, shutdown, poll_interval)
            .run(&cleanup)
            .await;

        if !RumqttTransport::wait_closed(link, config.mqtt.operation_timeout()).await {
            warn!("Broker connection did not close cleanly");
        }
        interrupt.abort();
        worker.abort();
        drop(cleanup);

        info!("Servo node stopped: {}", reason);
        Ok(reason)
    }
}

async fn listen_for_interrupt(shutdown: Shutdown) {
    match wait_for_interrupt().await {
        Ok(()) => {
            info!("Interrupt received");
            shutdown.trigger(ShutdownReason::Interrupted);
        }
        Err(err) => warn!("Cannot listen for interrupts: {}", err),
    }
}

fn release<P: PwmOutput>(output: &SharedOutput<P>) {
    if let Err(err) = lock_output(output).release() {
        error!("Failed to release servo output: {}", err);
    }
}
