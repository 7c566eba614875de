//! MQTT transport over `rumqttc`.
//!
//! [`connect`] builds the client from [`MqttConfig`], spawns a task that
//! drives the `rumqttc` event loop and waits for the broker's CONNACK. The
//! task forwards every incoming PUBLISH as an [`MqttMessage`] and keeps
//! polling after errors, which is how `rumqttc` reconnects. When the broker
//! answers a reconnect without a stored session, the task subscribes to
//! every active topic again.
//!
//! [`RumqttTransport`] implements [`MqttClient`] with the non-blocking
//! `try_*` client calls so the cleanup handler can use it synchronously.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, SubscribeReasonCode,
    TlsConfiguration, Transport,
};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::MqttConfig;
use crate::traits::{MqttClient, MqttMessage, QosLevel};

/// Capacity of the client request queue.
const REQUEST_CAPACITY: usize = 10;

/// Capacity of the inbound message channel.
pub const INBOUND_CAPACITY: usize = 64;

/// Pause before polling again after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Topics to restore after the broker drops the session.
type Subscriptions = Arc<Mutex<Vec<(String, QoS)>>>;

fn lock(subscriptions: &Subscriptions) -> MutexGuard<'_, Vec<(String, QoS)>> {
    subscriptions.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Errors from the MQTT transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The broker could not be reached or refused the connection.
    #[error("connect failed: {0}")]
    Connect(String),
    /// The subscription was not queued or the broker rejected it.
    #[error("subscribe failed: {0}")]
    Subscribe(String),
    /// The unsubscribe request could not be queued.
    #[error("unsubscribe failed: {0}")]
    Unsubscribe(String),
    /// The publish request could not be queued.
    #[error("publish failed: {0}")]
    Publish(String),
    /// The disconnect request could not be queued.
    #[error("disconnect failed: {0}")]
    Disconnect(String),
    /// An operation did not complete in time.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Operation that timed out.
        operation: &'static str,
        /// Time waited.
        after: Duration,
    },
    /// A TLS credential file could not be read.
    #[error("cannot read {path}: {message}")]
    Credentials {
        /// File path.
        path: String,
        /// Underlying I/O error.
        message: String,
    },
}

impl From<QosLevel> for QoS {
    fn from(level: QosLevel) -> Self {
        match level {
            QosLevel::AtMostOnce => QoS::AtMostOnce,
            QosLevel::AtLeastOnce => QoS::AtLeastOnce,
            QosLevel::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}

/// Connection status published by the event loop task.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LinkState {
    /// A CONNACK has been received and no error seen since.
    pub connected: bool,
    /// Number of SUBACKs received.
    pub suback_count: u32,
    /// Number of SUBACKs that rejected a filter.
    pub suback_rejected: u32,
    /// The event loop task has stopped after an outgoing DISCONNECT.
    pub closed: bool,
    /// Most recent connection error.
    pub last_error: Option<String>,
}

/// [`MqttClient`] backed by a `rumqttc` [`AsyncClient`].
pub struct RumqttTransport {
    client: AsyncClient,
    link: watch::Receiver<LinkState>,
    subscriptions: Subscriptions,
    task: JoinHandle<()>,
    operation_timeout: Duration,
}

impl RumqttTransport {
    /// Receiver observing the connection status.
    pub fn link(&self) -> watch::Receiver<LinkState> {
        self.link.clone()
    }

    /// Subscribes to `topic` and waits for the broker's SUBACK.
    pub async fn subscribe_acked(
        &mut self,
        topic: &str,
        qos: QosLevel,
    ) -> Result<(), TransportError> {
        let mut link = self.link.clone();
        let (acked, rejected) = {
            let state = link.borrow_and_update();
            (state.suback_count, state.suback_rejected)
        };

        self.subscribe(topic, qos)?;

        let wait = link.wait_for(|s| s.suback_count > acked || s.closed);
        let state = match timeout(self.operation_timeout, wait).await {
            Ok(Ok(state)) => state.clone(),
            Ok(Err(_)) => return Err(TransportError::Subscribe("event loop stopped".into())),
            Err(_) => {
                return Err(TransportError::Timeout {
                    operation: "subscribe",
                    after: self.operation_timeout,
                })
            }
        };

        if state.closed {
            Err(TransportError::Subscribe("connection closed".into()))
        } else if state.suback_rejected > rejected {
            lock(&self.subscriptions).retain(|(t, _)| t != topic);
            Err(TransportError::Subscribe(format!("broker rejected {}", topic)))
        } else {
            info!("Subscribed to {}", topic);
            Ok(())
        }
    }

    /// Waits up to `limit` for the event loop to flush a DISCONNECT.
    pub async fn wait_closed(mut link: watch::Receiver<LinkState>, limit: Duration) -> bool {
        matches!(timeout(limit, link.wait_for(|s| s.closed)).await, Ok(Ok(_)))
    }
}

impl Drop for RumqttTransport {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl MqttClient for RumqttTransport {
    type Error = TransportError;

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), Self::Error> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, retain, payload.to_vec())
            .map_err(|e| TransportError::Publish(e.to_string()))
    }

    fn subscribe(&mut self, topic: &str, qos: QosLevel) -> Result<(), Self::Error> {
        self.client
            .try_subscribe(topic, qos.into())
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;

        let mut active = lock(&self.subscriptions);
        active.retain(|(t, _)| t != topic);
        active.push((topic.to_string(), qos.into()));
        Ok(())
    }

    fn unsubscribe(&mut self, topic: &str) -> Result<(), Self::Error> {
        lock(&self.subscriptions).retain(|(t, _)| t != topic);
        self.client
            .try_unsubscribe(topic)
            .map_err(|e| TransportError::Unsubscribe(e.to_string()))
    }

    fn disconnect(&mut self) -> Result<(), Self::Error> {
        self.client
            .try_disconnect()
            .map_err(|e| TransportError::Disconnect(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        self.link.borrow().connected
    }
}

/// Builds `rumqttc` options from the config.
pub fn mqtt_options(config: &MqttConfig, client_id: &str) -> Result<MqttOptions, TransportError> {
    let mut options = MqttOptions::new(client_id, config.host.as_str(), config.port);
    options.set_keep_alive(Duration::from_secs(u64::from(config.keep_alive_secs)));
    options.set_pending_throttle(config.drain_interval());

    if config.tls {
        let ca = read_credential(config.ca_cert_path.as_str())?;
        let cert = read_credential(config.cert_path.as_str())?;
        let key = read_credential(config.key_path.as_str())?;
        options.set_transport(Transport::tls_with_config(TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth: Some((cert, key)),
        }));
    }
    Ok(options)
}

fn read_credential(path: &str) -> Result<Vec<u8>, TransportError> {
    std::fs::read(Path::new(path)).map_err(|e| TransportError::Credentials {
        path: path.to_string(),
        message: e.to_string(),
    })
}

/// Connects to the broker and returns the transport with its inbound
/// message channel.
pub async fn connect(
    config: &MqttConfig,
    client_id: &str,
) -> Result<(RumqttTransport, mpsc::Receiver<MqttMessage>), TransportError> {
    let options = mqtt_options(config, client_id)?;
    info!(
        "Connecting to {}:{} as {} (tls: {})",
        config.host, config.port, client_id, config.tls
    );

    let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
    let (link_tx, mut link) = watch::channel(LinkState::default());
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
    let subscriptions = Subscriptions::default();
    let task = tokio::spawn(drive_eventloop(
        eventloop,
        client.clone(),
        subscriptions.clone(),
        link_tx,
        inbound_tx,
    ));

    let connect_timeout = config.connect_timeout();
    let connected = timeout(connect_timeout, link.wait_for(|s| s.connected))
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false);

    if !connected {
        task.abort();
        let last_error = link.borrow().last_error.clone();
        return Err(match last_error {
            Some(message) => TransportError::Connect(message),
            None => TransportError::Timeout {
                operation: "connect",
                after: connect_timeout,
            },
        });
    }

    info!("Connected to {}:{}", config.host, config.port);
    Ok((
        RumqttTransport {
            client,
            link,
            subscriptions,
            task,
            operation_timeout: config.operation_timeout(),
        },
        inbound_rx,
    ))
}

async fn drive_eventloop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    subscriptions: Subscriptions,
    link: watch::Sender<LinkState>,
    inbound: mpsc::Sender<MqttMessage>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                link.send_modify(|s| {
                    s.connected = true;
                    s.last_error = None;
                });
                if !ack.session_present {
                    restore_subscriptions(&client, &subscriptions);
                }
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                let rejected = ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure));
                if rejected {
                    warn!("Broker rejected subscription (pkid {})", ack.pkid);
                }
                link.send_modify(|s| {
                    s.suback_count += 1;
                    if rejected {
                        s.suback_rejected += 1;
                    }
                });
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!("PUBLISH on {} ({} bytes)", publish.topic, publish.payload.len());
                let msg = MqttMessage::new(publish.topic, publish.payload.to_vec());
                if inbound.send(msg).await.is_err() {
                    debug!("Inbound receiver dropped");
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("Disconnected from broker");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("MQTT connection error: {}", e);
                link.send_modify(|s| {
                    s.connected = false;
                    s.last_error = Some(e.to_string());
                });
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }

    link.send_modify(|s| {
        s.connected = false;
        s.closed = true;
    });
}

fn restore_subscriptions(client: &AsyncClient, subscriptions: &Subscriptions) {
    for (topic, qos) in lock(subscriptions).iter() {
        info!("Restoring subscription to {}", topic);
        if let Err(e) = client.try_subscribe(topic.as_str(), *qos) {
            warn!("Cannot restore subscription to {}: {}", topic, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;

    const TOPIC: &str = "test/0001/DT/CMD";

    /// Just enough of an MQTT 3.1.1 broker to script one side of a session.
    mod broker {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::{TcpListener, TcpStream};

        const CONNECT: u8 = 1;
        const SUBSCRIBE: u8 = 8;

        pub async fn listen() -> (TcpListener, u16) {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();
            (listener, port)
        }

        /// Reads one packet, returning its type and body, or `None` at EOF.
        pub async fn read_packet(stream: &mut TcpStream) -> Option<(u8, Vec<u8>)> {
            let header = stream.read_u8().await.ok()?;
            let mut len = 0usize;
            let mut shift = 0;
            loop {
                let byte = stream.read_u8().await.ok()?;
                len |= usize::from(byte & 0x7f) << shift;
                if byte & 0x80 == 0 {
                    break;
                }
                shift += 7;
            }
            let mut body = vec![0; len];
            stream.read_exact(&mut body).await.ok()?;
            Some((header >> 4, body))
        }

        /// Accepts a client, reads its CONNECT and answers with a CONNACK.
        pub async fn accept_session(listener: &TcpListener, session_present: bool) -> TcpStream {
            let (mut stream, _) = listener.accept().await.unwrap();
            let (kind, _) = read_packet(&mut stream).await.unwrap();
            assert_eq!(kind, CONNECT);
            stream
                .write_all(&[0x20, 0x02, u8::from(session_present), 0x00])
                .await
                .unwrap();
            stream
        }

        /// Skips packets until a SUBSCRIBE, returning its packet id and first filter.
        pub async fn next_subscribe(stream: &mut TcpStream) -> Option<(u16, String)> {
            loop {
                let (kind, body) = read_packet(stream).await?;
                if kind == SUBSCRIBE {
                    let pkid = u16::from_be_bytes([body[0], body[1]]);
                    let len = usize::from(u16::from_be_bytes([body[2], body[3]]));
                    let topic = String::from_utf8(body[4..4 + len].to_vec()).unwrap();
                    return Some((pkid, topic));
                }
            }
        }

        pub async fn suback(stream: &mut TcpStream, pkid: u16, code: u8) {
            let [hi, lo] = pkid.to_be_bytes();
            stream.write_all(&[0x90, 0x03, hi, lo, code]).await.unwrap();
        }

        /// Sends a QoS 0 PUBLISH.
        pub async fn publish(stream: &mut TcpStream, topic: &str, payload: &[u8]) {
            let mut packet = vec![0x30, (2 + topic.len() + payload.len()) as u8];
            packet.extend_from_slice(&(topic.len() as u16).to_be_bytes());
            packet.extend_from_slice(topic.as_bytes());
            packet.extend_from_slice(payload);
            stream.write_all(&packet).await.unwrap();
        }
    }

    fn local(port: u16) -> MqttConfig {
        MqttConfig::default()
            .with_host("127.0.0.1")
            .with_port(port)
            .with_tls(false)
            .with_connect_timeout_secs(2)
            .with_operation_timeout_secs(1)
    }

    /// Accepts a session and acknowledges the first subscription with `code`.
    async fn serve_subscribe(listener: &TcpListener, code: u8) -> TcpStream {
        let mut stream = broker::accept_session(listener, false).await;
        let (pkid, topic) = broker::next_subscribe(&mut stream).await.unwrap();
        assert_eq!(topic, TOPIC);
        broker::suback(&mut stream, pkid, code).await;
        stream
    }

    #[test]
    fn qos_levels_map_to_rumqttc() {
        assert_eq!(QoS::from(QosLevel::AtMostOnce), QoS::AtMostOnce);
        assert_eq!(QoS::from(QosLevel::AtLeastOnce), QoS::AtLeastOnce);
        assert_eq!(QoS::from(QosLevel::ExactlyOnce), QoS::ExactlyOnce);
    }

    #[test]
    fn plain_options_skip_credentials() {
        let config = MqttConfig::default().with_tls(false).with_keep_alive_secs(15);
        let options = mqtt_options(&config, "0001").unwrap();
        assert_eq!(options.client_id(), "0001");
        assert_eq!(options.keep_alive(), Duration::from_secs(15));
        assert_eq!(options.broker_address(), ("localhost".to_string(), 8883));
    }

    #[test]
    fn missing_credentials_are_reported() {
        let config = MqttConfig::default().with_credentials(
            "/nonexistent/ca.crt",
            "/nonexistent/priv.key",
            "/nonexistent/cert.crt",
        );
        match mqtt_options(&config, "0001") {
            Err(TransportError::Credentials { path, .. }) => assert_eq!(path, "/nonexistent/ca.crt"),
            other => panic!("expected credentials error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn granted_subscription_is_acked() {
        let (listener, port) = broker::listen().await;
        let broker = tokio::spawn(async move {
            let stream = serve_subscribe(&listener, 0x01).await;
            std::future::pending::<()>().await;
            drop(stream);
        });

        let (mut transport, _inbound) = connect(&local(port), "0001").await.unwrap();
        assert!(transport.is_connected());
        transport
            .subscribe_acked(TOPIC, QosLevel::AtLeastOnce)
            .await
            .unwrap();
        broker.abort();
    }

    #[tokio::test]
    async fn rejected_subscription_is_an_error() {
        let (listener, port) = broker::listen().await;
        let broker = tokio::spawn(async move {
            let stream = serve_subscribe(&listener, 0x80).await;
            std::future::pending::<()>().await;
            drop(stream);
        });

        let (mut transport, _inbound) = connect(&local(port), "0001").await.unwrap();
        let err = transport
            .subscribe_acked(TOPIC, QosLevel::AtLeastOnce)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Subscribe(_)), "got {}", err);
        broker.abort();
    }

    #[tokio::test]
    async fn missing_suback_times_out() {
        let (listener, port) = broker::listen().await;
        let broker = tokio::spawn(async move {
            let mut stream = broker::accept_session(&listener, false).await;
            broker::next_subscribe(&mut stream).await.unwrap();
            std::future::pending::<()>().await;
            drop(stream);
        });

        let (mut transport, _inbound) = connect(&local(port), "0001").await.unwrap();
        let err = transport
            .subscribe_acked(TOPIC, QosLevel::AtLeastOnce)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TransportError::Timeout {
                operation: "subscribe",
                after: Duration::from_secs(1),
            }
        );
        broker.abort();
    }

    #[tokio::test]
    async fn publish_is_forwarded_to_inbound() {
        let (listener, port) = broker::listen().await;
        let broker = tokio::spawn(async move {
            let mut stream = serve_subscribe(&listener, 0x01).await;
            broker::publish(&mut stream, TOPIC, b"ROTATE;45").await;
            std::future::pending::<()>().await;
            drop(stream);
        });

        let (mut transport, mut inbound) = connect(&local(port), "0001").await.unwrap();
        transport
            .subscribe_acked(TOPIC, QosLevel::AtLeastOnce)
            .await
            .unwrap();

        let msg = timeout(Duration::from_secs(5), inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg, MqttMessage::new(TOPIC, "ROTATE;45"));
        broker.abort();
    }

    #[tokio::test]
    async fn resubscribes_when_broker_starts_fresh_session() {
        let (listener, port) = broker::listen().await;
        let (acked_tx, acked_rx) = oneshot::channel::<()>();
        let broker = tokio::spawn(async move {
            let first = serve_subscribe(&listener, 0x01).await;
            acked_rx.await.unwrap();
            drop(first);

            let mut second = broker::accept_session(&listener, false).await;
            let resent = timeout(Duration::from_secs(5), broker::next_subscribe(&mut second)).await;
            resent.ok().flatten().map(|(_, topic)| topic)
        });

        let (mut transport, _inbound) = connect(&local(port), "0001").await.unwrap();
        transport
            .subscribe_acked(TOPIC, QosLevel::AtLeastOnce)
            .await
            .unwrap();
        acked_tx.send(()).unwrap();

        assert_eq!(broker.await.unwrap().as_deref(), Some(TOPIC));
    }

    #[tokio::test]
    async fn stored_session_is_not_resubscribed() {
        let (listener, port) = broker::listen().await;
        let (acked_tx, acked_rx) = oneshot::channel::<()>();
        let broker = tokio::spawn(async move {
            let first = serve_subscribe(&listener, 0x01).await;
            acked_rx.await.unwrap();
            drop(first);

            let mut second = broker::accept_session(&listener, true).await;
            timeout(Duration::from_secs(2), broker::next_subscribe(&mut second))
                .await
                .ok()
                .flatten()
        });

        let (mut transport, _inbound) = connect(&local(port), "0001").await.unwrap();
        transport
            .subscribe_acked(TOPIC, QosLevel::AtLeastOnce)
            .await
            .unwrap();
        acked_tx.send(()).unwrap();

        assert_eq!(broker.await.unwrap(), None);
    }

    #[tokio::test]
    async fn unsubscribed_topics_are_not_restored() {
        let (listener, port) = broker::listen().await;
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let broker = tokio::spawn(async move {
            let first = serve_subscribe(&listener, 0x01).await;
            done_rx.await.unwrap();
            drop(first);

            let mut second = broker::accept_session(&listener, false).await;
            timeout(Duration::from_secs(2), broker::next_subscribe(&mut second))
                .await
                .ok()
                .flatten()
        });

        let (mut transport, _inbound) = connect(&local(port), "0001").await.unwrap();
        transport
            .subscribe_acked(TOPIC, QosLevel::AtLeastOnce)
            .await
            .unwrap();
        transport.unsubscribe(TOPIC).unwrap();
        done_tx.send(()).unwrap();

        assert_eq!(broker.await.unwrap(), None);
    }

    #[tokio::test]
    async fn connect_times_out_without_broker() {
        // port 9 (discard) is closed on test hosts; connection errors are
        // reported once the timeout elapses
        let config = MqttConfig::default()
            .with_host("127.0.0.1")
            .with_port(9)
            .with_tls(false)
            .with_connect_timeout_secs(1);
        match connect(&config, "0001").await {
            Err(TransportError::Connect(_)) | Err(TransportError::Timeout { .. }) => {}
            Err(other) => panic!("unexpected error {}", other),
            Ok(_) => panic!("connected without a broker"),
        }
    }
}
