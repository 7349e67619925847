//! MQTT Agents
//!
//! Two pipeline agents bridging an MQTT broker and a host's record stream:
//!
//! - [`SubscriberAgent`] subscribes to a topic and turns every message
//!   (JSON or raw bytes) into records, raising decode failures as error
//!   records instead of dropping them
//! - [`PublisherAgent`] takes record batches from the host and publishes
//!   them, either as one array message or one message per record, optionally
//!   regrouping selected fields into a nested object
//!
//! Both come in a basic variant (broker address only) and an advanced one
//! (port, TLS, credentials, QoS).
//!
//! # Quick Start
//!
//! ```rust
//! use mqtt_agents::codec::{InboundCodec, OutputChannel, PayloadDefinition, WireFormat};
//! use mqtt_agents::config::{keys, AgentParameters};
//! use serde_json::json;
//!
//! let parameters = AgentParameters::new().with(
//!     keys::PAYLOAD_DEFINITION,
//!     r#"[{"Name":"temp","Path":"$.sensor.temp","Type":"Double"}]"#,
//! );
//! let grid = parameters.grid(keys::PAYLOAD_DEFINITION).unwrap();
//! let codec = InboundCodec::new(
//!     1,
//!     "JSON",
//!     true,
//!     PayloadDefinition::from_grid(&grid, WireFormat::Json),
//! );
//!
//! let notification = codec.handle(br#"{"sensor":{"temp":21.5}}"#);
//! assert_eq!(notification.channel, OutputChannel::Output);
//! assert_eq!(notification.records, vec![json!({"temp": 21.5})]);
//! ```

pub mod agent;
pub mod codec;
pub mod config;
pub mod error;
pub mod observability;
pub mod testing;
pub mod transport;

pub use agent::{NotificationSink, PublisherAgent, SubscriberAgent, UpstreamAttributes};
pub use codec::{Notification, OutputChannel, Record};
pub use config::{AgentParameters, AgentVariant, ConfigError};
pub use error::{AgentError, AgentResult};
pub use transport::{BrokerTransport, MqttTransport, QosLevel, SecretDecryptor};
