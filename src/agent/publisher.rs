//! Outbound agent: host records to broker messages

use super::attributes::{Attribute, UpstreamAttributes};
use super::sink::NotificationSink;
use super::{qos_parameter, validation, INPUT_ENDPOINT};
use crate::codec::{
    records_from_values, AliasMapping, ComplexObjectComposer, Notification, OutboundCodec, Record,
};
use crate::config::{keys, AgentParameters, AgentVariant, ConfigError};
use crate::error::AgentResult;
use crate::mqtt_span;
use crate::transport::{
    BrokerTransport, ConnectionManager, ConnectionParameters, MqttTransport, QosLevel,
    SecretDecryptor,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn, Instrument};

/// Publisher settings resolved from the parameter map
#[derive(Debug, Clone)]
pub struct PublisherSettings {
    pub connection: ConnectionParameters,
    pub topic: String,
    pub qos: QosLevel,
    pub is_batch: bool,
    pub composer: Option<ComplexObjectComposer>,
}

impl PublisherSettings {
    pub fn from_parameters(
        variant: AgentVariant,
        parameters: &AgentParameters,
    ) -> Result<Self, ConfigError> {
        let topic = parameters.text(keys::TOPIC).to_string();

        match variant {
            AgentVariant::Basic => Ok(Self {
                connection: ConnectionParameters::basic(parameters.text(keys::BROKER).trim()),
                topic,
                qos: QosLevel::ExactlyOnce,
                is_batch: true,
                composer: None,
            }),
            AgentVariant::Advanced => {
                let composer = if parameters.flag(keys::USE_NESTED_OBJECT, false) {
                    Some(ComplexObjectComposer::new(
                        AliasMapping::from_grid(&parameters.grid(keys::OBJECT_PROPERTIES)?),
                        parameters.text(keys::OBJECT_NAME).trim(),
                        parameters.flag(keys::OUTPUT_AS_ARRAY, false),
                    ))
                } else {
                    None
                };

                Ok(Self {
                    connection: ConnectionParameters::from_parameters(parameters, true),
                    topic,
                    qos: qos_parameter(parameters),
                    is_batch: parameters.flag(keys::IS_BATCH, true),
                    composer,
                })
            }
        }
    }
}

/// Publishes every batch the host hands it, connecting lazily
pub struct PublisherAgent<T: BrokerTransport = MqttTransport> {
    agent_id: i64,
    variant: AgentVariant,
    topic: String,
    qos: QosLevel,
    codec: OutboundCodec,
    connection: ConnectionManager<T>,
    sink: Arc<dyn NotificationSink>,
}

impl PublisherAgent<MqttTransport> {
    /// Build a publisher over a real MQTT connection.
    ///
    /// TLS material is loaded here, so certificate problems surface as
    /// configuration errors before any connection attempt.
    pub fn create(
        agent_id: i64,
        variant: AgentVariant,
        parameters: &AgentParameters,
        decryptor: &dyn SecretDecryptor,
        sink: Arc<dyn NotificationSink>,
    ) -> AgentResult<Self> {
        let settings = PublisherSettings::from_parameters(variant, parameters)?;
        let connection = ConnectionManager::build(&settings.connection, decryptor)?;
        Ok(Self::assemble(agent_id, variant, settings, connection, sink))
    }
}

impl<T: BrokerTransport> PublisherAgent<T> {
    /// Build a publisher over an injected transport
    pub fn with_transport(
        agent_id: i64,
        variant: AgentVariant,
        parameters: &AgentParameters,
        decryptor: &dyn SecretDecryptor,
        sink: Arc<dyn NotificationSink>,
        transport: Arc<T>,
    ) -> AgentResult<Self> {
        let settings = PublisherSettings::from_parameters(variant, parameters)?;
        let connection =
            ConnectionManager::with_transport(transport, &settings.connection, decryptor);
        Ok(Self::assemble(agent_id, variant, settings, connection, sink))
    }

    fn assemble(
        agent_id: i64,
        variant: AgentVariant,
        settings: PublisherSettings,
        connection: ConnectionManager<T>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        info!(
            agent_id,
            ?variant,
            topic = %settings.topic,
            qos = %settings.qos,
            batch = settings.is_batch,
            nested = settings.composer.is_some(),
            "Publisher agent created"
        );
        Self {
            agent_id,
            variant,
            topic: settings.topic,
            qos: settings.qos,
            codec: OutboundCodec::new(settings.is_batch, settings.composer),
            connection,
            sink,
        }
    }

    pub fn agent_id(&self) -> i64 {
        self.agent_id
    }

    pub fn variant(&self) -> AgentVariant {
        self.variant
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn connection(&self) -> &ConnectionManager<T> {
        &self.connection
    }

    /// Publishers connect on first use
    pub async fn start(&self) -> AgentResult<()> {
        Ok(())
    }

    /// Encode and publish one host batch.
    ///
    /// Raises exactly one `Output` notification carrying the (possibly
    /// composed) records once every payload has been published. Connection
    /// failures propagate; if the transport still reports disconnected after
    /// connecting, nothing is published.
    pub async fn receive(&self, endpoint: &str, records: Vec<Record>) -> AgentResult<()> {
        let span = mqtt_span!(
            operation = "publish",
            agent_id = self.agent_id,
            endpoint = %endpoint,
            topic = %self.topic,
            records = records.len()
        );

        async {
            self.connection.connect().await?;
            if !self.connection.is_connected() {
                warn!("Broker connection not established - batch not published");
                return Ok(());
            }

            let batch = self.codec.encode(&records)?;
            let transport = self.connection.transport();
            for payload in batch.payloads.iter().cloned() {
                transport.publish(&self.topic, payload, self.qos, false).await?;
            }

            self.sink.notify(Notification::output(batch.forwarded_values()));
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// [`Self::receive`] for a raw JSON batch; every element must be an object
    pub async fn receive_values(&self, endpoint: &str, values: Vec<Value>) -> AgentResult<()> {
        let records = records_from_values(values)?;
        self.receive(endpoint, records).await
    }

    /// Disconnect if connected; safe to call more than once
    pub async fn destroy(&self) -> AgentResult<()> {
        self.connection.teardown().await?;
        info!(agent_id = self.agent_id, "Publisher agent destroyed");
        Ok(())
    }

    pub fn validate(variant: AgentVariant, parameters: &AgentParameters) -> Vec<String> {
        validation::validate_publisher(variant, parameters)
    }

    /// Fields the publisher accepts: whatever the upstream produces
    /// (nothing is advertised by the basic variant)
    pub fn input_attributes(
        variant: AgentVariant,
        upstream: &dyn UpstreamAttributes,
    ) -> Vec<Attribute> {
        match variant {
            AgentVariant::Basic => Vec::new(),
            AgentVariant::Advanced => upstream.output_attributes(INPUT_ENDPOINT),
        }
    }

    /// Fields forwarded downstream: the upstream's fields, minus those
    /// lifted into the nested object. The nested field is not advertised.
    pub fn output_attributes(
        variant: AgentVariant,
        parameters: &AgentParameters,
        upstream: &dyn UpstreamAttributes,
    ) -> Result<Vec<Attribute>, ConfigError> {
        let attributes = upstream.output_attributes(INPUT_ENDPOINT);
        if variant == AgentVariant::Basic || !parameters.flag(keys::USE_NESTED_OBJECT, false) {
            return Ok(attributes);
        }

        let aliases = AliasMapping::from_grid(&parameters.grid(keys::OBJECT_PROPERTIES)?);
        Ok(attributes
            .into_iter()
            .filter(|attribute| !aliases.lifts(&attribute.name))
            .collect())
    }
}
