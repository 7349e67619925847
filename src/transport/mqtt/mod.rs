//! MQTT 3.1.1 transport over rumqttc
//!
//! - [`connection`] - connection state, parameters and TLS material
//! - [`message_handler`] - pure event routing and inbound forwarding
//! - [`client`] - the I/O side: event loop task and [`MqttTransport`]
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_agents::transport::{BrokerTransport, MqttTransport, QosLevel};
//!
//! # tokio_test::block_on(async {
//! let transport = MqttTransport::new("localhost", 1883, None);
//! transport.connect("my-client", None).await?;
//! transport
//!     .publish("plant/line1", br#"{"t":20.5}"#.to_vec(), QosLevel::AtLeastOnce, false)
//!     .await?;
//! transport.disconnect().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::MqttTransport;
pub use connection::{ConnectionParameters, ConnectionState, TlsProtocol};
pub use message_handler::{EventRoute, MessageHandler};
