//! Broker transport layer
//!
//! [`BrokerTransport`] is the capability surface every agent talks to:
//! connect, disconnect, publish, subscribe and inbound-message delivery.
//! The production implementation is [`mqtt::MqttTransport`]; tests inject
//! [`crate::testing::mocks::MockTransport`].

use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod manager;
pub mod mqtt;

pub use manager::ConnectionManager;
pub use mqtt::{ConnectionParameters, ConnectionState, MqttTransport, TlsProtocol};

/// Transport-level failures
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("Connection failed: {0}")]
    ConnectionFailedStr(String),
}

/// MQTT delivery guarantee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QosLevel {
    AtMostOnce,
    AtLeastOnce,
    #[default]
    ExactlyOnce,
}

impl QosLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            QosLevel::AtMostOnce => "AtMostOnce",
            QosLevel::AtLeastOnce => "AtLeastOnce",
            QosLevel::ExactlyOnce => "ExactlyOnce",
        }
    }
}

impl fmt::Display for QosLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QosLevel {
    type Err = String;

    /// Accepts the level name or its numeric value
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "0" | "AtMostOnce" => Ok(QosLevel::AtMostOnce),
            "1" | "AtLeastOnce" => Ok(QosLevel::AtLeastOnce),
            "2" | "ExactlyOnce" => Ok(QosLevel::ExactlyOnce),
            other => Err(format!("Unknown QoS level: {other}")),
        }
    }
}

impl From<QosLevel> for rumqttc::QoS {
    fn from(level: QosLevel) -> Self {
        match level {
            QosLevel::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QosLevel::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QosLevel::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

/// Broker username and plaintext password
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Credentials are only sent when a username is set. The password is
    /// decrypted here at most once, and only in that case.
    pub fn resolve(
        username: &str,
        encrypted_password: &str,
        decryptor: &dyn SecretDecryptor,
    ) -> Option<Self> {
        if username.trim().is_empty() {
            return None;
        }
        let password = if encrypted_password.is_empty() {
            String::new()
        } else {
            decryptor.decrypt(encrypted_password)
        };
        Some(Self {
            username: username.to_string(),
            password,
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Message delivered by the broker on a subscribed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Host secret store: ciphertext in, plaintext out
pub trait SecretDecryptor: Send + Sync {
    fn decrypt(&self, ciphertext: &str) -> String;
}

impl<F> SecretDecryptor for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn decrypt(&self, ciphertext: &str) -> String {
        self(ciphertext)
    }
}

/// Decryptor for standalone use: `env:NAME` reads the environment variable
/// `NAME`, any other value is already plaintext
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecretDecryptor;

impl SecretDecryptor for EnvSecretDecryptor {
    fn decrypt(&self, ciphertext: &str) -> String {
        match ciphertext.strip_prefix("env:") {
            Some(name) => std::env::var(name).unwrap_or_default(),
            None => ciphertext.to_string(),
        }
    }
}

/// Capability interface over a broker connection
///
/// All methods take `&self` so teardown can run while the inbound
/// dispatcher is still delivering messages.
#[async_trait::async_trait]
pub trait BrokerTransport: Send + Sync {
    /// Open the connection and wait for the broker to acknowledge it
    async fn connect(
        &self,
        client_id: &str,
        credentials: Option<&Credentials>,
    ) -> Result<(), TransportError>;

    /// Close the connection; a no-op when not connected
    async fn disconnect(&self) -> Result<(), TransportError>;

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QosLevel,
        retain: bool,
    ) -> Result<(), TransportError>;

    async fn subscribe(&self, topic: &str, qos: QosLevel) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    fn connection_state(&self) -> ConnectionState;

    /// Where inbound messages are forwarded
    fn set_message_sender(&self, sender: mpsc::Sender<InboundMessage>);
}
