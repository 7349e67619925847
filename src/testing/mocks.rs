//! Mock implementations for testing
//!
//! Provides an in-memory broker transport, a recording notification sink,
//! a recording decryptor and a fixed upstream so agents can be exercised
//! without a broker.

use crate::agent::{Attribute, NotificationSink, UpstreamAttributes};
use crate::codec::Notification;
use crate::transport::{
    BrokerTransport, ConnectionState, Credentials, InboundMessage, QosLevel, SecretDecryptor,
    TransportError,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A message captured by [`MockTransport::publish`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QosLevel,
    pub retain: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ConnectBehavior {
    #[default]
    Succeed,
    Fail,
    /// `connect` returns Ok but the transport never reports connected
    Silent,
}

/// Mock transport for testing
#[derive(Debug, Default)]
pub struct MockTransport {
    behavior: ConnectBehavior,
    fail_publish_after: Option<usize>,
    connected: Mutex<bool>,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    last_client_id: Mutex<Option<String>>,
    last_credentials: Mutex<Option<Credentials>>,
    published: Mutex<Vec<PublishedMessage>>,
    subscriptions: Mutex<Vec<(String, QosLevel)>>,
    sender: Mutex<Option<mpsc::Sender<InboundMessage>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every connect attempt is refused
    pub fn failing() -> Self {
        Self {
            behavior: ConnectBehavior::Fail,
            ..Default::default()
        }
    }

    pub fn never_connects() -> Self {
        Self {
            behavior: ConnectBehavior::Silent,
            ..Default::default()
        }
    }

    /// Accept `count` publishes, then fail every later one
    pub fn failing_publish_after(count: usize) -> Self {
        Self {
            fail_publish_after: Some(count),
            ..Default::default()
        }
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn last_client_id(&self) -> Option<String> {
        lock(&self.last_client_id).clone()
    }

    pub fn last_credentials(&self) -> Option<Credentials> {
        lock(&self.last_credentials).clone()
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.published).clone()
    }

    pub fn subscriptions(&self) -> Vec<(String, QosLevel)> {
        lock(&self.subscriptions).clone()
    }

    /// Deliver `payload` as if the broker had sent it on the first
    /// subscribed topic. Dropped when no sender is registered.
    pub async fn inject(&self, payload: Vec<u8>) {
        let topic = lock(&self.subscriptions)
            .first()
            .map(|(topic, _)| topic.clone())
            .unwrap_or_default();
        let sender = lock(&self.sender).clone();
        if let Some(sender) = sender {
            let _ = sender.send(InboundMessage { topic, payload }).await;
        }
    }

    fn not_connected(&self) -> TransportError {
        TransportError::NotConnected {
            state: self.connection_state(),
        }
    }
}

#[async_trait]
impl BrokerTransport for MockTransport {
    async fn connect(
        &self,
        client_id: &str,
        credentials: Option<&Credentials>,
    ) -> Result<(), TransportError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        *lock(&self.last_client_id) = Some(client_id.to_string());
        *lock(&self.last_credentials) = credentials.cloned();

        match self.behavior {
            ConnectBehavior::Succeed => {
                *lock(&self.connected) = true;
                Ok(())
            }
            ConnectBehavior::Fail => Err(TransportError::ConnectionFailedStr(
                "Mock connection failure".to_string(),
            )),
            ConnectBehavior::Silent => Ok(()),
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        *lock(&self.connected) = false;
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QosLevel,
        retain: bool,
    ) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(self.not_connected());
        }

        let mut published = lock(&self.published);
        if self.fail_publish_after.is_some_and(|limit| published.len() >= limit) {
            return Err(TransportError::PublishFailed(
                "Mock publish failure".to_string().into(),
            ));
        }
        published.push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        });
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: QosLevel) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(self.not_connected());
        }
        lock(&self.subscriptions).push((topic.to_string(), qos));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        *lock(&self.connected)
    }

    fn connection_state(&self) -> ConnectionState {
        if self.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected("Mock disconnection".to_string())
        }
    }

    fn set_message_sender(&self, sender: mpsc::Sender<InboundMessage>) {
        *lock(&self.sender) = Some(sender);
    }
}

/// Sink that keeps every notification in memory
#[derive(Debug, Default)]
pub struct MockSink {
    notifications: Mutex<Vec<Notification>>,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        lock(&self.notifications).clone()
    }
}

impl NotificationSink for MockSink {
    fn notify(&self, notification: Notification) {
        lock(&self.notifications).push(notification);
    }
}

/// Decryptor that prefixes `decrypted:` and records its inputs
#[derive(Debug, Default)]
pub struct RecordingDecryptor {
    calls: Mutex<Vec<String>>,
}

impl RecordingDecryptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

impl SecretDecryptor for RecordingDecryptor {
    fn decrypt(&self, ciphertext: &str) -> String {
        lock(&self.calls).push(ciphertext.to_string());
        format!("decrypted:{ciphertext}")
    }
}

/// Upstream stage with a fixed attribute list
#[derive(Debug, Default)]
pub struct StaticUpstream {
    attributes: Vec<Attribute>,
    requested: Mutex<Vec<String>>,
}

impl StaticUpstream {
    pub fn new(attributes: Vec<Attribute>) -> Self {
        Self {
            attributes,
            requested: Mutex::new(Vec::new()),
        }
    }

    /// Endpoints the attributes were requested for, in call order
    pub fn requested_endpoints(&self) -> Vec<String> {
        lock(&self.requested).clone()
    }
}

impl UpstreamAttributes for StaticUpstream {
    fn output_attributes(&self, endpoint: &str) -> Vec<Attribute> {
        lock(&self.requested).push(endpoint.to_string());
        self.attributes.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_transport_lifecycle() {
        let transport = MockTransport::new();
        assert!(transport
            .publish("t", Vec::new(), QosLevel::AtMostOnce, false)
            .await
            .is_err());

        transport.connect("c", None).await.unwrap();
        assert!(transport.is_connected());
        transport
            .publish("t", b"x".to_vec(), QosLevel::AtMostOnce, false)
            .await
            .unwrap();
        transport.disconnect().await.unwrap();

        assert!(!transport.is_connected());
        assert_eq!(transport.published().len(), 1);
        assert_eq!(transport.connect_calls(), 1);
        assert_eq!(transport.disconnect_calls(), 1);
    }

    #[tokio::test]
    async fn test_inject_without_sender_is_dropped() {
        let transport = MockTransport::new();
        transport.inject(b"ignored".to_vec()).await;
    }

    #[tokio::test]
    async fn test_failing_publish_after() {
        let transport = MockTransport::failing_publish_after(1);
        transport.connect("c", None).await.unwrap();
        assert!(transport.publish("t", vec![1], QosLevel::AtMostOnce, false).await.is_ok());
        assert!(transport.publish("t", vec![2], QosLevel::AtMostOnce, false).await.is_err());
        assert_eq!(transport.published().len(), 1);
    }
}
