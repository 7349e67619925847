//! rumqttc-backed [`BrokerTransport`] implementation
//!
//! Connect spawns one event-loop task per connection. The task routes
//! broker events, publishes connection state on a watch channel and stops
//! on the shutdown signal or the first connection error. There is no
//! reconnection.

use super::connection::{configure_mqtt_options, ConnectionState};
use super::message_handler::{EventRoute, MessageForwarder, MessageHandler};
use crate::transport::{BrokerTransport, Credentials, InboundMessage, QosLevel, TransportError};
use async_trait::async_trait;
use rumqttc::{AsyncClient, EventLoop, TlsConfiguration};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Default time to wait for the broker's ConnAck
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

const REQUEST_CHANNEL_CAPACITY: usize = 10;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// One live broker session
struct Session {
    client: AsyncClient,
    shutdown_tx: watch::Sender<bool>,
    event_loop_handle: JoinHandle<()>,
}

pub struct MqttTransport {
    host: String,
    port: u16,
    keep_alive: Duration,
    tls: Option<TlsConfiguration>,
    connect_timeout: Duration,
    session: Mutex<Option<Session>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    message_forwarder: Arc<MessageForwarder>,
}

impl MqttTransport {
    pub fn new(host: impl Into<String>, port: u16, tls: Option<TlsConfiguration>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected(
            "Not connected".to_string(),
        ));
        Self {
            host: host.into(),
            port,
            keep_alive: Duration::from_secs(60),
            tls,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            session: Mutex::new(None),
            state_tx: Arc::new(state_tx),
            message_forwarder: Arc::new(MessageForwarder::new()),
        }
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn broker_address(&self) -> (&str, u16) {
        (&self.host, self.port)
    }

    /// Wait for connection confirmation (ConnAck) with timeout
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let timeout_result = tokio::time::timeout(timeout, async {
            loop {
                if state_rx.changed().await.is_err() {
                    return Err(TransportError::ConnectionFailedStr(
                        "State channel closed".to_string(),
                    ));
                }
                match *state_rx.borrow() {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected(ref reason) => {
                        return Err(TransportError::ConnectionFailedStr(reason.clone()));
                    }
                    ConnectionState::Connecting => continue,
                }
            }
        })
        .await;

        match timeout_result {
            Ok(result) => result,
            Err(_) => Err(TransportError::ConnectionFailedStr(
                "ConnAck timeout - no connection confirmation received".to_string(),
            )),
        }
    }

    fn spawn_event_loop(
        mut event_loop: EventLoop,
        state_tx: Arc<watch::Sender<ConnectionState>>,
        mut shutdown_rx: watch::Receiver<bool>,
        message_forwarder: Arc<MessageForwarder>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            debug!("Shutdown signal received, stopping MQTT event loop");
                            break;
                        }
                    }

                    event_result = event_loop.poll() => {
                        match event_result {
                            Ok(event) => {
                                let route = MessageHandler::route_mqtt_event(&event);
                                if !Self::process_event_route(route, &state_tx, &message_forwarder).await {
                                    break;
                                }
                            }
                            Err(e) => {
                                // A closing client has already left Connected
                                let active = matches!(
                                    *state_tx.borrow(),
                                    ConnectionState::Connected | ConnectionState::Connecting
                                );
                                if active {
                                    error!(error = %e, "MQTT event loop error");
                                    state_tx.send_replace(ConnectionState::Disconnected(e.to_string()));
                                }
                                break;
                            }
                        }
                    }
                }
            }
            info!("MQTT event loop stopped");
        })
    }

    /// Returns true to keep polling
    async fn process_event_route(
        route: EventRoute,
        state_tx: &watch::Sender<ConnectionState>,
        message_forwarder: &MessageForwarder,
    ) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged => {
                state_tx.send_replace(ConnectionState::Connected);
                true
            }
            EventRoute::ConnectionRefused(reason) => {
                state_tx.send_replace(ConnectionState::Disconnected(format!(
                    "Connection refused: {reason}"
                )));
                false
            }
            EventRoute::MessageReceived { topic, payload } => {
                if let Err(e) = message_forwarder
                    .forward(InboundMessage { topic, payload })
                    .await
                {
                    debug!("Inbound message not forwarded: {}", e);
                }
                true
            }
            EventRoute::Disconnected => {
                state_tx.send_replace(ConnectionState::Disconnected(
                    "Disconnected by broker".to_string(),
                ));
                false
            }
            EventRoute::SubscriptionConfirmed { packet_id, granted } => {
                if granted.iter().all(|ok| *ok) {
                    debug!(packet_id, "Subscription confirmed");
                } else {
                    warn!(packet_id, ?granted, "Broker refused subscription");
                }
                true
            }
            EventRoute::InfrastructureEvent(event) => {
                tracing::trace!(target: "mqtt_transport", "MQTT event: {}", event);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    /// Stop the event loop of a session.
    ///
    /// With `drain` the task is left to flush pending requests and end on
    /// its own first; otherwise it is signalled immediately.
    async fn shutdown_session(session: Session, drain: bool) {
        if !drain {
            let _ = session.shutdown_tx.send(true);
        }

        let abort_handle = session.event_loop_handle.abort_handle();
        match tokio::time::timeout(SHUTDOWN_GRACE, session.event_loop_handle).await {
            Ok(Ok(())) => debug!("Event loop task shut down gracefully"),
            Ok(Err(e)) if !e.is_cancelled() => warn!("Event loop task ended with error: {}", e),
            Err(_) => {
                debug!("Event loop task still running after grace period, aborting");
                let _ = session.shutdown_tx.send(true);
                abort_handle.abort();
            }
            _ => {}
        }
    }

    fn check_connection_state(&self) -> Result<(), TransportError> {
        let state = self.state_tx.borrow().clone();
        if state.is_connected() {
            Ok(())
        } else {
            Err(TransportError::NotConnected { state })
        }
    }
}

#[async_trait]
impl BrokerTransport for MqttTransport {
    async fn connect(
        &self,
        client_id: &str,
        credentials: Option<&Credentials>,
    ) -> Result<(), TransportError> {
        let mut session = self.session.lock().await;
        if session.is_some() && self.is_connected() {
            return Ok(());
        }
        if let Some(stale) = session.take() {
            Self::shutdown_session(stale, false).await;
        }

        info!(
            host = %self.host,
            port = self.port,
            client_id = %client_id,
            tls = self.tls.is_some(),
            "Connecting to MQTT broker"
        );

        let mqtt_options = configure_mqtt_options(
            client_id,
            &self.host,
            self.port,
            self.keep_alive,
            credentials,
            self.tls.as_ref(),
        );
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        self.state_tx.send_replace(ConnectionState::Connecting);
        let state_rx = self.state_tx.subscribe();

        let event_loop_handle = Self::spawn_event_loop(
            event_loop,
            self.state_tx.clone(),
            shutdown_rx,
            self.message_forwarder.clone(),
        );
        let new_session = Session {
            client,
            shutdown_tx,
            event_loop_handle,
        };

        match Self::wait_for_connection_confirmation(state_rx, self.connect_timeout).await {
            Ok(()) => {
                info!(host = %self.host, port = self.port, "Connected to MQTT broker");
                *session = Some(new_session);
                Ok(())
            }
            Err(e) => {
                Self::shutdown_session(new_session, false).await;
                self.state_tx
                    .send_replace(ConnectionState::Disconnected(e.to_string()));
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let Some(session) = self.session.lock().await.take() else {
            return Ok(());
        };

        let was_connected = self.is_connected();
        self.state_tx.send_replace(ConnectionState::Disconnected(
            "Client disconnected".to_string(),
        ));

        let result = if was_connected {
            session
                .client
                .disconnect()
                .await
                .map_err(|e| TransportError::ConnectionFailed(Box::new(e)))
        } else {
            Ok(())
        };

        Self::shutdown_session(session, was_connected && result.is_ok()).await;

        info!("MQTT client disconnected");
        result
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QosLevel,
        retain: bool,
    ) -> Result<(), TransportError> {
        self.check_connection_state()?;

        let session = self.session.lock().await;
        let session = session.as_ref().ok_or_else(|| TransportError::NotConnected {
            state: self.connection_state(),
        })?;

        let bytes = payload.len();
        session
            .client
            .publish(topic, qos.into(), retain, payload)
            .await
            .map_err(|e| TransportError::PublishFailed(Box::new(e)))?;

        debug!(topic = %topic, bytes, qos = %qos, "Published MQTT message");
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: QosLevel) -> Result<(), TransportError> {
        self.check_connection_state()?;

        let session = self.session.lock().await;
        let session = session.as_ref().ok_or_else(|| TransportError::NotConnected {
            state: self.connection_state(),
        })?;

        info!(topic = %topic, qos = %qos, "Subscribing to topic");
        session.client.subscribe(topic, qos.into()).await.map_err(|e| {
            TransportError::SubscriptionFailed(format!("Failed to subscribe to {topic}: {e}").into())
        })?;

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state_tx.borrow().is_connected()
    }

    fn connection_state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    fn set_message_sender(&self, sender: mpsc::Sender<InboundMessage>) {
        self.message_forwarder.set_sender(sender);
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        // Async disconnect is not possible here; only stop the background task
        if let Some(session) = self.session.get_mut().take() {
            let _ = session.shutdown_tx.send(true);
            session.event_loop_handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_success() {
        // Arrange: Create channel and spawn task to signal connected
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = state_tx.send(ConnectionState::Connected);
        });

        // Act
        let result =
            MqttTransport::wait_for_connection_confirmation(state_rx, Duration::from_millis(500))
                .await;

        // Assert
        assert!(result.is_ok(), "Should successfully wait for connection");
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_timeout() {
        // Arrange: Keep the sender alive but never signal
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        // Act
        let result =
            MqttTransport::wait_for_connection_confirmation(state_rx, Duration::from_millis(10))
                .await;
        drop(state_tx);

        // Assert
        let err_msg = result.unwrap_err().to_string();
        assert!(
            err_msg.contains("ConnAck") || err_msg.contains("timeout"),
            "Error should mention timeout or ConnAck, got: {err_msg}"
        );
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_disconnected() {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = state_tx.send(ConnectionState::Disconnected("Test disconnect".to_string()));
        });

        let result =
            MqttTransport::wait_for_connection_confirmation(state_rx, Duration::from_millis(500))
                .await;

        assert!(result.unwrap_err().to_string().contains("Test disconnect"));
    }

    #[tokio::test]
    async fn test_process_event_route_updates_state() {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let forwarder = MessageForwarder::new();

        assert!(
            MqttTransport::process_event_route(
                EventRoute::ConnectionAcknowledged,
                &state_tx,
                &forwarder
            )
            .await
        );
        assert_eq!(*state_rx.borrow(), ConnectionState::Connected);

        assert!(
            !MqttTransport::process_event_route(EventRoute::Disconnected, &state_tx, &forwarder)
                .await
        );
        assert!(matches!(
            *state_rx.borrow(),
            ConnectionState::Disconnected(_)
        ));
    }

    #[tokio::test]
    async fn test_process_event_route_forwards_messages() {
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Connected);
        let forwarder = MessageForwarder::new();
        let (tx, mut rx) = mpsc::channel(4);
        forwarder.set_sender(tx);

        let keep_going = MqttTransport::process_event_route(
            EventRoute::MessageReceived {
                topic: "plant/line1".to_string(),
                payload: b"abc".to_vec(),
            },
            &state_tx,
            &forwarder,
        )
        .await;

        assert!(keep_going);
        let message = rx.recv().await.unwrap();
        assert_eq!(message.topic, "plant/line1");
        assert_eq!(message.payload, b"abc");
    }

    #[tokio::test]
    async fn test_initial_state_is_disconnected() {
        let transport = MqttTransport::new("localhost", 1883, None);
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.connection_state(),
            ConnectionState::Disconnected(_)
        ));
        assert_eq!(transport.broker_address(), ("localhost", 1883));
    }

    #[tokio::test]
    async fn test_operations_fail_without_connection() {
        let transport = MqttTransport::new("localhost", 1883, None);

        let publish = transport
            .publish("t", b"x".to_vec(), QosLevel::AtLeastOnce, false)
            .await;
        assert!(matches!(publish, Err(TransportError::NotConnected { .. })));

        let subscribe = transport.subscribe("t", QosLevel::AtLeastOnce).await;
        assert!(matches!(subscribe, Err(TransportError::NotConnected { .. })));
    }

    #[tokio::test]
    async fn test_disconnect_without_connection() {
        let transport = MqttTransport::new("localhost", 1883, None);
        assert!(transport.disconnect().await.is_ok());
        assert!(transport.disconnect().await.is_ok());
    }
}
