//! Message-arrival path: inbound MQTT messages to device commands.
//!
//! The transport task forwards every received PUBLISH into a channel;
//! [`CommandHandler::run`] drains it one message at a time, so commands are
//! applied strictly in arrival order. Rejected payloads are logged and
//! dropped. A hardware failure triggers shutdown and ends the task.

use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use crate::commands::parse;
use crate::device::{Applied, DeviceStateMachine, HardwareError, OutputEffect};
use crate::shutdown::{Shutdown, ShutdownReason};
use crate::topic::TopicAddress;
use crate::traits::{MqttMessage, PwmOutput};

/// Applies commands received on the device's command topic.
pub struct CommandHandler<P> {
    machine: DeviceStateMachine<P>,
    topic: TopicAddress,
    settle_delay: Duration,
}

impl<P: PwmOutput> CommandHandler<P> {
    /// Creates a handler for messages on `topic`.
    ///
    /// `settle_delay` is awaited after the output is started so the servo
    /// reaches its 0° position before the next command.
    pub fn new(machine: DeviceStateMachine<P>, topic: TopicAddress, settle_delay: Duration) -> Self {
        Self {
            machine,
            topic,
            settle_delay,
        }
    }

    /// The state machine driven by this handler.
    pub fn machine(&self) -> &DeviceStateMachine<P> {
        &self.machine
    }

    /// Parses and applies one message without waiting for the settle delay.
    ///
    /// Returns `Ok(None)` for messages on other topics and for payloads that
    /// do not parse.
    pub fn handle(&self, msg: &MqttMessage) -> Result<Option<Applied>, HardwareError> {
        if !self.topic.matches(&msg.topic) {
            debug!("Ignoring message on {}", msg.topic);
            return Ok(None);
        }

        let payload = msg.payload_str();
        info!("Received '{}' on {}", payload, msg.topic);

        let command = match parse(&payload) {
            Ok(cmd) => cmd,
            Err(err) => {
                warn!("Rejected command '{}': {}", payload, err);
                return Ok(None);
            }
        };

        self.machine.apply(command).map(Some)
    }

    /// Handles one message, then waits out the settle delay after a start.
    pub async fn process(&self, msg: &MqttMessage) -> Result<Option<Applied>, HardwareError> {
        let applied = self.handle(msg)?;
        if let Some(Applied {
            effect: OutputEffect::Start { .. },
            ..
        }) = applied
        {
            debug!("Settling for {:?}", self.settle_delay);
            tokio::time::sleep(self.settle_delay).await;
        }
        Ok(applied)
    }

    /// Processes messages until the channel closes or shutdown fires.
    pub async fn run(self, mut inbound: mpsc::Receiver<MqttMessage>, shutdown: Shutdown) {
        loop {
            let msg = tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                msg = inbound.recv() => match msg {
                    Some(msg) => msg,
                    None => {
                        debug!("Inbound channel closed");
                        break;
                    }
                },
            };

            if let Err(err) = self.process(&msg).await {
                if shutdown.trigger(ShutdownReason::HardwareFailure) {
                    error!("Hardware failure: {}", err);
                } else {
                    warn!("Command dropped during shutdown: {}", err);
                }
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::angle::PwmParameters;
    use crate::device::DeviceState;
    use crate::hal::{MockServo, ServoEvent};

    const TOPIC: &str = "test/0001/DT/CMD";

    fn handler() -> CommandHandler<MockServo> {
        let machine = DeviceStateMachine::new(MockServo::new(), PwmParameters::default());
        let topic = TopicAddress::subscribe("test", "0001").unwrap();
        CommandHandler::new(machine, topic, Duration::from_secs(1))
    }

    fn events(handler: &CommandHandler<MockServo>) -> Vec<ServoEvent> {
        handler.machine().output().lock().unwrap().events.clone()
    }

    #[test]
    fn ignores_other_topics() {
        let handler = handler();
        let msg = MqttMessage::new("test/0002/DT/CMD", "SHOWER OFF");
        assert_eq!(handler.handle(&msg), Ok(None));
        assert_eq!(handler.machine().state(), DeviceState::Running);
    }

    #[test]
    fn ignores_outbound_and_nested_topics() {
        let handler = handler();
        for topic in ["test/0001/MT/CMD", "test/0001/DT/CMD/extra", "test/0001/DT"] {
            let msg = MqttMessage::new(topic, "SHOWER OFF");
            assert_eq!(handler.handle(&msg), Ok(None), "topic {:?}", topic);
        }
        assert_eq!(handler.machine().state(), DeviceState::Running);
    }

    #[test]
    fn drops_malformed_payloads() {
        let handler = handler();
        for payload in ["FOO", "ROTATE", "ROTATE;abc", "ROTATE;200", ""] {
            let msg = MqttMessage::new(TOPIC, payload);
            assert_eq!(handler.handle(&msg), Ok(None), "payload {:?}", payload);
        }
        assert!(events(&handler).is_empty());
    }

    #[test]
    fn invalid_utf8_is_rejected_not_fatal() {
        let handler = handler();
        let msg = MqttMessage::new(TOPIC, vec![0xff, 0x00, 0xfe]);
        assert_eq!(handler.handle(&msg), Ok(None));
    }

    #[tokio::test(start_paused = true)]
    async fn power_on_waits_for_settle_delay() {
        let handler = handler();
        let start = tokio::time::Instant::now();

        handler.process(&MqttMessage::new(TOPIC, "SHOWER ON")).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(1));

        handler.process(&MqttMessage::new(TOPIC, "ROTATE;45")).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(1));
        assert_eq!(
            events(&handler),
            vec![ServoEvent::Start(6.5), ServoEvent::SetDuty(9.75)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_applies_in_order_until_channel_closes() {
        let handler = handler();
        let output = handler.machine().output();
        let (tx, rx) = mpsc::channel(8);
        let shutdown = Shutdown::new();

        for payload in ["SHOWER ON", "ROTATE;90", "garbage", "SHOWER OFF"] {
            tx.send(MqttMessage::new(TOPIC, payload)).await.unwrap();
        }
        drop(tx);

        handler.run(rx, shutdown.clone()).await;

        assert_eq!(
            output.lock().unwrap().events,
            vec![ServoEvent::Start(6.5), ServoEvent::SetDuty(13.0), ServoEvent::Stop]
        );
        assert!(!shutdown.is_triggered());
    }

    #[tokio::test]
    async fn hardware_failure_triggers_shutdown() {
        let handler = handler();
        handler.machine().output().lock().unwrap().fail_next(1);
        let (tx, rx) = mpsc::channel(8);
        let shutdown = Shutdown::new();

        tx.send(MqttMessage::new(TOPIC, "ROTATE;10")).await.unwrap();
        handler.run(rx, shutdown.clone()).await;

        assert_eq!(shutdown.reason(), Some(ShutdownReason::HardwareFailure));
    }

    #[tokio::test]
    async fn stops_taking_messages_after_shutdown() {
        let handler = handler();
        let output = handler.machine().output();
        let (tx, rx) = mpsc::channel(8);
        let shutdown = Shutdown::new();

        shutdown.trigger(ShutdownReason::Interrupted);
        tx.send(MqttMessage::new(TOPIC, "SHOWER ON")).await.unwrap();
        handler.run(rx, shutdown).await;

        assert!(output.lock().unwrap().events.is_empty());
    }
}
