//! MQTT event routing and inbound message forwarding
//!
//! Routing is a pure function of the rumqttc event; forwarding is the only
//! impure part and just hands messages to the subscriber's channel.

use crate::transport::InboundMessage;
use rumqttc::{ConnectReturnCode, Event, Packet, SubscribeReasonCode};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Pure routing decisions for MQTT events
pub struct MessageHandler;

impl MessageHandler {
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => match connack.code {
                    ConnectReturnCode::Success => EventRoute::ConnectionAcknowledged,
                    code => EventRoute::ConnectionRefused(format!("{code:?}")),
                },
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                },
                Packet::Disconnect => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    granted: suback
                        .return_codes
                        .iter()
                        .map(|code| matches!(code, SubscribeReasonCode::Success(_)))
                        .collect(),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Broker accepted the connection
    ConnectionAcknowledged,
    /// Broker answered the CONNECT with a refusal code
    ConnectionRefused(String),
    MessageReceived {
        topic: String,
        payload: Vec<u8>,
    },
    Disconnected,
    /// One flag per requested filter: granted or refused
    SubscriptionConfirmed {
        packet_id: u16,
        granted: Vec<bool>,
    },
    /// PingResp, PubAck and the like
    InfrastructureEvent(String),
    OutgoingEvent,
}

/// Hands inbound messages to whoever installed a sender
#[derive(Debug, Default)]
pub struct MessageForwarder {
    sender: Mutex<Option<mpsc::Sender<InboundMessage>>>,
}

impl MessageForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_sender(&self, sender: mpsc::Sender<InboundMessage>) {
        match self.sender.lock() {
            Ok(mut guard) => *guard = Some(sender),
            Err(poisoned) => *poisoned.into_inner() = Some(sender),
        }
    }

    fn current_sender(&self) -> Option<mpsc::Sender<InboundMessage>> {
        match self.sender.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Forward one message; waits while the channel is full
    pub async fn forward(&self, message: InboundMessage) -> Result<(), String> {
        let Some(sender) = self.current_sender() else {
            warn!(
                topic = %message.topic,
                "Received MQTT message but no message sender configured - message dropped"
            );
            return Err("No message sender configured".to_string());
        };

        debug!(topic = %message.topic, bytes = message.payload.len(), "Forwarding inbound message");
        sender
            .send(message)
            .await
            .map_err(|e| format!("Failed to forward message: {e}"))
    }
}
