//! Inbound agent: broker messages to host records
//!
//! `start` connects, subscribes and spawns a dispatcher task that drains the
//! transport's message channel. Each message is decoded on its own and
//! produces exactly one notification, so a bad payload never stops the
//! stream.

use super::attributes::Attribute;
use super::sink::NotificationSink;
use super::{qos_parameter, validation};
use crate::codec::{AttributeType, InboundCodec, PayloadDefinition, WireFormat};
use crate::config::{keys, AgentParameters, AgentVariant, ConfigError};
use crate::error::AgentResult;
use crate::lifecycle_span;
use crate::transport::{
    BrokerTransport, ConnectionManager, ConnectionParameters, InboundMessage, MqttTransport,
    QosLevel, SecretDecryptor,
};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, Instrument};

/// Capacity of the transport-to-dispatcher channel
const INBOUND_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct SubscriberSettings {
    pub connection: ConnectionParameters,
    pub topic: String,
    pub qos: QosLevel,
    /// Format name as configured; checked per message
    pub format: String,
    pub extract_fields: bool,
    pub definition: PayloadDefinition,
}

impl SubscriberSettings {
    pub fn from_parameters(
        variant: AgentVariant,
        parameters: &AgentParameters,
    ) -> Result<Self, ConfigError> {
        let (connection, qos) = match variant {
            AgentVariant::Basic => (
                ConnectionParameters::basic(parameters.text(keys::BROKER).trim()),
                QosLevel::ExactlyOnce,
            ),
            AgentVariant::Advanced => (
                ConnectionParameters::from_parameters(parameters, false),
                qos_parameter(parameters),
            ),
        };

        let format = parameters
            .non_blank(keys::FORMAT)
            .unwrap_or(WireFormat::Json.as_str())
            .to_string();
        let schema_format = format.parse().unwrap_or(WireFormat::Json);
        let definition =
            PayloadDefinition::from_grid(&parameters.grid(keys::PAYLOAD_DEFINITION)?, schema_format);

        Ok(Self {
            connection,
            topic: parameters.text(keys::TOPIC).to_string(),
            qos,
            format,
            extract_fields: parameters.flag(keys::SPECIFY_JPATH, false),
            definition,
        })
    }
}

pub struct SubscriberAgent<T: BrokerTransport = MqttTransport> {
    agent_id: i64,
    variant: AgentVariant,
    topic: String,
    qos: QosLevel,
    codec: Arc<InboundCodec>,
    connection: ConnectionManager<T>,
    sink: Arc<dyn NotificationSink>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriberAgent<MqttTransport> {
    pub fn create(
        agent_id: i64,
        variant: AgentVariant,
        parameters: &AgentParameters,
        decryptor: &dyn SecretDecryptor,
        sink: Arc<dyn NotificationSink>,
    ) -> AgentResult<Self> {
        let settings = SubscriberSettings::from_parameters(variant, parameters)?;
        let connection = ConnectionManager::build(&settings.connection, decryptor)?;
        Ok(Self::assemble(agent_id, variant, settings, connection, sink))
    }
}

impl<T: BrokerTransport + 'static> SubscriberAgent<T> {
    pub fn with_transport(
        agent_id: i64,
        variant: AgentVariant,
        parameters: &AgentParameters,
        decryptor: &dyn SecretDecryptor,
        sink: Arc<dyn NotificationSink>,
        transport: Arc<T>,
    ) -> AgentResult<Self> {
        let settings = SubscriberSettings::from_parameters(variant, parameters)?;
        let connection =
            ConnectionManager::with_transport(transport, &settings.connection, decryptor);
        Ok(Self::assemble(agent_id, variant, settings, connection, sink))
    }

    fn assemble(
        agent_id: i64,
        variant: AgentVariant,
        settings: SubscriberSettings,
        connection: ConnectionManager<T>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        info!(
            agent_id,
            ?variant,
            topic = %settings.topic,
            qos = %settings.qos,
            format = %settings.format,
            fields = settings.definition.len(),
            "Subscriber agent created"
        );
        Self {
            agent_id,
            variant,
            topic: settings.topic,
            qos: settings.qos,
            codec: Arc::new(InboundCodec::new(
                agent_id,
                settings.format,
                settings.extract_fields,
                settings.definition,
            )),
            connection,
            sink,
            dispatcher: Mutex::new(None),
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

    /// Connect, subscribe and begin dispatching inbound messages.
    /// Calling `start` on a running agent does nothing.
    pub async fn start(&self) -> AgentResult<()> {
        let mut dispatcher = self.dispatcher.lock().await;
        if dispatcher.is_some() {
            debug!(agent_id = self.agent_id, "Subscriber already started");
            return Ok(());
        }

        let span = lifecycle_span!(event = "start", agent_id = self.agent_id, topic = %self.topic);
        async {
            let (sender, receiver) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
            let transport = self.connection.transport();
            transport.set_message_sender(sender);

            self.connection.connect().await?;
            transport.subscribe(&self.topic, self.qos).await?;

            *dispatcher = Some(self.spawn_dispatcher(receiver));
            info!("Subscriber agent started");
            Ok(())
        }
        .instrument(span)
        .await
    }

    fn spawn_dispatcher(&self, mut receiver: mpsc::Receiver<InboundMessage>) -> JoinHandle<()> {
        let codec = Arc::clone(&self.codec);
        let sink = Arc::clone(&self.sink);
        let agent_id = self.agent_id;

        tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                debug!(agent_id, topic = %message.topic, bytes = message.payload.len(), "Dispatching inbound message");
                sink.notify(codec.handle(&message.payload));
            }
            debug!(agent_id, "Inbound channel closed - dispatcher exiting");
        })
    }

    /// Decode one payload and deliver the resulting notification
    pub fn handle_message(&self, payload: &[u8]) {
        self.sink.notify(self.codec.handle(payload));
    }

    /// Disconnect and stop dispatching; safe to call more than once
    pub async fn destroy(&self) -> AgentResult<()> {
        self.connection.teardown().await?;
        if let Some(handle) = self.dispatcher.lock().await.take() {
            handle.abort();
        }
        info!(agent_id = self.agent_id, "Subscriber agent destroyed");
        Ok(())
    }

    pub fn validate(variant: AgentVariant, parameters: &AgentParameters) -> Vec<String> {
        validation::validate_subscriber(variant, parameters)
    }

    /// One attribute per payload definition row. HEX fields, and fields of
    /// an unrecognised format, are strings.
    pub fn output_attributes(
        _variant: AgentVariant,
        parameters: &AgentParameters,
    ) -> Result<Vec<Attribute>, ConfigError> {
        let declared_types = matches!(
            parameters
                .non_blank(keys::FORMAT)
                .unwrap_or(WireFormat::Json.as_str())
                .parse(),
            Ok(WireFormat::Json)
        );
        let schema_format = if declared_types {
            WireFormat::Json
        } else {
            WireFormat::Hex
        };
        let definition = PayloadDefinition::from_grid(
            &parameters.grid(keys::PAYLOAD_DEFINITION)?,
            schema_format,
        );

        Ok(definition
            .fields()
            .iter()
            .map(|field| {
                let attribute_type = if declared_types {
                    field.declared_type
                } else {
                    AttributeType::String
                };
                Attribute::new(field.name.clone(), attribute_type)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::OutputChannel;
    use crate::testing::mocks::{MockSink, MockTransport, RecordingDecryptor};
    use serde_json::json;
    use std::time::Duration;

    const PAYLOAD: &str = r#"[{"Name":"temp","Path":"$.t","Type":"Double","ByteIndexes":"0-1"}]"#;

    fn parameters() -> AgentParameters {
        AgentParameters::new()
            .with(keys::BROKER, "localhost")
            .with(keys::TOPIC, "plant/in")
            .with(keys::PAYLOAD_DEFINITION, PAYLOAD)
    }

    fn subscriber(
        variant: AgentVariant,
        parameters: &AgentParameters,
    ) -> (SubscriberAgent<MockTransport>, Arc<MockTransport>, Arc<MockSink>) {
        let transport = Arc::new(MockTransport::new());
        let sink = Arc::new(MockSink::new());
        let agent = SubscriberAgent::with_transport(
            9,
            variant,
            parameters,
            &RecordingDecryptor::new(),
            sink.clone(),
            transport.clone(),
        )
        .unwrap();
        (agent, transport, sink)
    }

    async fn wait_for_notifications(sink: &MockSink, count: usize) {
        for _ in 0..100 {
            if sink.notifications().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[test]
    fn test_settings_defaults() {
        let settings = SubscriberSettings::from_parameters(AgentVariant::Advanced, &parameters()).unwrap();
        assert_eq!(settings.format, "JSON");
        assert_eq!(settings.qos, QosLevel::ExactlyOnce);
        assert!(!settings.extract_fields);
        assert_eq!(settings.definition.len(), 1);
    }

    #[test]
    fn test_basic_variant_ignores_qos() {
        let settings = SubscriberSettings::from_parameters(
            AgentVariant::Basic,
            &parameters().with(keys::QOS, "AtMostOnce").with(keys::BROKER_PORT, "8883"),
        )
        .unwrap();
        assert_eq!(settings.qos, QosLevel::ExactlyOnce);
        assert_eq!(settings.connection.port, 1883);
    }

    #[test]
    fn test_invalid_payload_grid_is_config_error() {
        let result = SubscriberSettings::from_parameters(
            AgentVariant::Advanced,
            &parameters().with(keys::PAYLOAD_DEFINITION, "not a grid"),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_start_subscribes_and_dispatches() {
        let (agent, transport, sink) =
            subscriber(AgentVariant::Advanced, &parameters().with(keys::QOS, "1"));

        agent.start().await.unwrap();
        assert_eq!(
            transport.subscriptions(),
            vec![("plant/in".to_string(), QosLevel::AtLeastOnce)]
        );

        transport.inject(br#"{"t": 21.5}"#.to_vec()).await;
        wait_for_notifications(&sink, 1).await;

        let notifications = sink.notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].channel, OutputChannel::Output);
        assert_eq!(notifications[0].records, vec![json!({"t": 21.5})]);
    }

    #[tokio::test]
    async fn test_bad_payload_does_not_stop_stream() {
        let (agent, transport, sink) = subscriber(AgentVariant::Advanced, &parameters());
        agent.start().await.unwrap();

        transport.inject(b"{broken".to_vec()).await;
        transport.inject(br#"[{"t": 1}]"#.to_vec()).await;
        wait_for_notifications(&sink, 2).await;

        let notifications = sink.notifications();
        assert_eq!(notifications.len(), 2);
        assert_eq!(notifications[0].channel, OutputChannel::Error);
        assert_eq!(notifications[0].records[0]["AgentId"], json!(9));
        assert_eq!(notifications[0].records[0]["Data"], json!("{broken"));
        assert_eq!(notifications[1].channel, OutputChannel::Output);
    }

    #[tokio::test]
    async fn test_start_failure_propagates() {
        let transport = Arc::new(MockTransport::failing());
        let agent = SubscriberAgent::with_transport(
            9,
            AgentVariant::Advanced,
            &parameters(),
            &RecordingDecryptor::new(),
            Arc::new(MockSink::new()),
            transport.clone(),
        )
        .unwrap();

        assert!(agent.start().await.is_err());
        assert!(transport.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_start_twice_subscribes_once() {
        let (agent, transport, _sink) = subscriber(AgentVariant::Advanced, &parameters());
        agent.start().await.unwrap();
        agent.start().await.unwrap();
        assert_eq!(transport.subscriptions().len(), 1);
        assert_eq!(transport.connect_calls(), 1);
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let (agent, transport, _sink) = subscriber(AgentVariant::Advanced, &parameters());

        agent.destroy().await.unwrap();
        agent.start().await.unwrap();
        agent.destroy().await.unwrap();
        agent.destroy().await.unwrap();

        assert_eq!(transport.disconnect_calls(), 1);
        assert!(!agent.connection().is_connected());
    }

    #[test]
    fn test_handle_message_hex() {
        let (agent, _transport, sink) =
            subscriber(AgentVariant::Advanced, &parameters().with(keys::FORMAT, "HEX"));

        agent.handle_message(&[0x0a, 0xff, 0x10]);
        assert_eq!(sink.notifications()[0].records, vec![json!({"temp": "0AFF"})]);

        agent.handle_message(&[0x0a]);
        let error = &sink.notifications()[1];
        assert_eq!(error.channel, OutputChannel::Error);
        assert_eq!(error.records[0]["Source"], json!("on_message"));
    }

    #[test]
    fn test_unknown_format_is_per_message_error() {
        let (agent, _transport, sink) =
            subscriber(AgentVariant::Advanced, &parameters().with(keys::FORMAT, "XML"));
        agent.handle_message(b"<t/>");
        agent.handle_message(b"<t/>");
        let notifications = sink.notifications();
        assert_eq!(notifications.len(), 2);
        assert!(notifications.iter().all(|n| n.channel == OutputChannel::Error));
    }

    #[test]
    fn test_output_attributes() {
        let json_attributes =
            SubscriberAgent::<MockTransport>::output_attributes(AgentVariant::Advanced, &parameters())
                .unwrap();
        assert_eq!(json_attributes, vec![Attribute::new("temp", AttributeType::Double)]);

        let hex_attributes = SubscriberAgent::<MockTransport>::output_attributes(
            AgentVariant::Advanced,
            &parameters().with(keys::FORMAT, "HEX"),
        )
        .unwrap();
        assert_eq!(hex_attributes, vec![Attribute::new("temp", AttributeType::String)]);

        let unknown_attributes = SubscriberAgent::<MockTransport>::output_attributes(
            AgentVariant::Advanced,
            &parameters().with(keys::FORMAT, "XML"),
        )
        .unwrap();
        assert_eq!(unknown_attributes, vec![Attribute::new("temp", AttributeType::String)]);

        let blank_attributes = SubscriberAgent::<MockTransport>::output_attributes(
            AgentVariant::Advanced,
            &parameters().with(keys::FORMAT, ""),
        )
        .unwrap();
        assert_eq!(blank_attributes, vec![Attribute::new("temp", AttributeType::Double)]);
    }
}
