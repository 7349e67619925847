//! The two agents and what they share
//!
//! [`SubscriberAgent`] turns broker messages into host records;
//! [`PublisherAgent`] turns host records into broker messages. Both come in
//! a basic and an advanced [`AgentVariant`](crate::config::AgentVariant).

pub mod attributes;
pub mod publisher;
pub mod sink;
pub mod subscriber;
pub mod validation;

use crate::config::{keys, AgentParameters};
use crate::transport::QosLevel;

pub use attributes::{Attribute, NoUpstream, UpstreamAttributes};
pub use publisher::{PublisherAgent, PublisherSettings};
pub use sink::{ChannelSink, NotificationSink, StdoutSink};
pub use subscriber::{SubscriberAgent, SubscriberSettings};

/// The publisher's single input endpoint
pub const INPUT_ENDPOINT: &str = "Input";

/// `QOS` parameter, defaulting to exactly-once when blank or unknown
pub(crate) fn qos_parameter(parameters: &AgentParameters) -> QosLevel {
    parameters
        .non_blank(keys::QOS)
        .and_then(|qos| qos.parse().ok())
        .unwrap_or_default()
}
