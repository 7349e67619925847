//! Connection lifecycle around one transport
//!
//! Secrets are resolved once, when the manager is built. `connect` only
//! connects when the transport is not connected, and `teardown` only
//! disconnects when it is, so both are safe to repeat.

use super::mqtt::{ConnectionParameters, MqttTransport};
use super::{BrokerTransport, Credentials, SecretDecryptor, TransportError};
use crate::config::ConfigError;
use std::sync::Arc;
use tracing::{debug, info};

pub struct ConnectionManager<T: BrokerTransport = MqttTransport> {
    transport: Arc<T>,
    client_id: String,
    credentials: Option<Credentials>,
}

impl ConnectionManager<MqttTransport> {
    /// Load TLS material, resolve credentials and bind an MQTT transport to
    /// `host:port`. Certificate problems are configuration errors.
    pub fn build(
        parameters: &ConnectionParameters,
        decryptor: &dyn SecretDecryptor,
    ) -> Result<Self, ConfigError> {
        let tls = parameters.load_tls(decryptor)?;
        let transport = MqttTransport::new(parameters.host.clone(), parameters.port, tls)
            .with_keep_alive(parameters.keep_alive);

        Ok(Self::with_transport(
            Arc::new(transport),
            parameters,
            decryptor,
        ))
    }
}

impl<T: BrokerTransport> ConnectionManager<T> {
    /// Wrap an existing transport; TLS settings in `parameters` are ignored
    pub fn with_transport(
        transport: Arc<T>,
        parameters: &ConnectionParameters,
        decryptor: &dyn SecretDecryptor,
    ) -> Self {
        Self {
            transport,
            client_id: parameters.client_id.clone(),
            credentials: Credentials::resolve(
                &parameters.username,
                &parameters.password,
                decryptor,
            ),
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub async fn connect(&self) -> Result<(), TransportError> {
        if self.transport.is_connected() {
            debug!(client_id = %self.client_id, "Already connected");
            return Ok(());
        }
        self.transport
            .connect(&self.client_id, self.credentials.as_ref())
            .await
    }

    pub async fn teardown(&self) -> Result<(), TransportError> {
        if !self.transport.is_connected() {
            return Ok(());
        }
        info!(client_id = %self.client_id, "Tearing down broker connection");
        self.transport.disconnect().await
    }
}
