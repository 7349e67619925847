//! Payload codecs between broker messages and host records
//!
//! The inbound direction turns a raw broker payload into records
//! ([`inbound::InboundCodec`]); the outbound direction turns host records into
//! wire payloads ([`outbound::OutboundCodec`]). Both are driven by the schema
//! types in [`payload_definition`] and [`composer`].

pub mod composer;
pub mod field_path;
pub mod index_range;
pub mod inbound;
pub mod outbound;
pub mod payload_definition;

use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub use composer::{AliasMapping, ComplexObjectComposer};
pub use field_path::FieldPath;
pub use inbound::{DecodeError, ErrorRecord, InboundCodec, Notification, OutputChannel};
pub use index_range::{parse_indexes, ByteRangeExpr};
pub use outbound::{EncodedBatch, OutboundCodec};
pub use payload_definition::{AttributeType, FieldLocator, FieldSpec, PayloadDefinition};

/// A structured record: field name to JSON value, in insertion order
pub type Record = serde_json::Map<String, Value>;

/// Declared encoding of broker payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Json,
    Hex,
}

impl WireFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            WireFormat::Json => "JSON",
            WireFormat::Hex => "HEX",
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WireFormat {
    type Err = DecodeError;

    /// Format names are matched exactly, as they are stored by the host
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "JSON" => Ok(WireFormat::Json),
            "HEX" => Ok(WireFormat::Hex),
            other => Err(DecodeError::UnknownFormat(other.to_string())),
        }
    }
}

/// Outbound encoding errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Serialization error")]
    Serialization(#[source] serde_json::Error),
    #[error("Input record {index} is not a JSON object")]
    NotAnObject { index: usize },
}

/// Split a host batch into records, rejecting non-object elements
pub fn records_from_values(values: Vec<Value>) -> Result<Vec<Record>, CodecError> {
    values
        .into_iter()
        .enumerate()
        .map(|(index, value)| match value {
            Value::Object(record) => Ok(record),
            _ => Err(CodecError::NotAnObject { index }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_format_parse() {
        assert_eq!("JSON".parse::<WireFormat>().unwrap(), WireFormat::Json);
        assert_eq!("HEX".parse::<WireFormat>().unwrap(), WireFormat::Hex);
        assert!(matches!(
            "json".parse::<WireFormat>(),
            Err(DecodeError::UnknownFormat(f)) if f == "json"
        ));
    }

    #[test]
    fn test_records_from_values() {
        let records = records_from_values(vec![json!({"a": 1}), json!({"b": 2})]).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["b"], json!(2));

        let err = records_from_values(vec![json!({"a": 1}), json!(5)]).unwrap_err();
        assert!(matches!(err, CodecError::NotAnObject { index: 1 }));
    }
}
