//! Output-attribute negotiation with the upstream stage

use crate::codec::AttributeType;
use serde::{Deserialize, Serialize};

/// A named, typed field advertised between stages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    #[serde(rename = "type")]
    pub attribute_type: AttributeType,
}

impl Attribute {
    pub fn new(name: impl Into<String>, attribute_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attribute_type,
        }
    }
}

/// Answers "what fields do you produce on endpoint X" for the stage
/// feeding a publisher
pub trait UpstreamAttributes: Send + Sync {
    fn output_attributes(&self, endpoint: &str) -> Vec<Attribute>;
}

impl<F> UpstreamAttributes for F
where
    F: Fn(&str) -> Vec<Attribute> + Send + Sync,
{
    fn output_attributes(&self, endpoint: &str) -> Vec<Attribute> {
        self(endpoint)
    }
}

/// Upstream with nothing to advertise
#[derive(Debug, Clone, Copy, Default)]
pub struct NoUpstream;

impl UpstreamAttributes for NoUpstream {
    fn output_attributes(&self, _endpoint: &str) -> Vec<Attribute> {
        Vec::new()
    }
}
