//! Inbound decoding: broker payload bytes to host records
//!
//! Every received message is decoded independently. A successful decode is
//! routed to the `Output` channel; any failure becomes a single
//! [`ErrorRecord`] on the `Error` channel. Nothing escapes the decode
//! boundary as an error.

use super::payload_definition::{FieldLocator, PayloadDefinition};
use super::{Record, WireFormat};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt::Write as _;
use thiserror::Error;
use tracing::{debug, warn};

/// `Data` value used when the payload text itself could not be recovered
pub const RAW_DATA_PLACEHOLDER: &str = "Error deserializing the data";

/// `Source` value stamped into error records produced by the decoder
pub const DECODE_SOURCE: &str = "on_message";

/// Reasons a single message fails to decode
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Unknown payload format specified: {0}")]
    UnknownFormat(String),
    #[error("Payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[source] std::str::Utf8Error),
    #[error("Malformed JSON payload: {0}")]
    MalformedJson(#[source] serde_json::Error),
    #[error("Byte index {index} is outside the {len}-byte payload")]
    ByteIndexOutOfRange { index: usize, len: usize },
}

impl DecodeError {
    /// Stable name placed in the error record's `Error` field
    pub fn kind(&self) -> &'static str {
        match self {
            DecodeError::UnknownFormat(_) => "UnknownFormat",
            DecodeError::InvalidUtf8(_) => "InvalidUtf8",
            DecodeError::MalformedJson(_) => "MalformedJson",
            DecodeError::ByteIndexOutOfRange { .. } => "ByteIndexOutOfRange",
        }
    }
}

/// A decode error together with whatever payload text was recovered
#[derive(Debug)]
pub struct DecodeFailure {
    pub error: DecodeError,
    pub raw_text: Option<String>,
}

impl DecodeFailure {
    fn new(error: DecodeError, raw_text: Option<String>) -> Self {
        Self { error, raw_text }
    }
}

/// Diagnostic record emitted on the `Error` channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    #[serde(rename = "AgentId")]
    pub agent_id: i64,
    #[serde(rename = "Timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "Source")]
    pub source: String,
    #[serde(rename = "Error")]
    pub error_kind: String,
    #[serde(rename = "DetailedError")]
    pub detail_message: String,
    #[serde(rename = "Data")]
    pub raw_data: String,
}

impl ErrorRecord {
    pub fn from_failure(agent_id: i64, source: &str, failure: DecodeFailure) -> Self {
        Self {
            agent_id,
            timestamp: Utc::now(),
            source: source.to_string(),
            error_kind: failure.error.kind().to_string(),
            detail_message: failure.error.to_string(),
            raw_data: failure
                .raw_text
                .unwrap_or_else(|| RAW_DATA_PLACEHOLDER.to_string()),
        }
    }

    pub fn to_value(&self) -> Value {
        json!({
            "AgentId": self.agent_id,
            "Timestamp": self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            "Source": self.source,
            "Error": self.error_kind,
            "DetailedError": self.detail_message,
            "Data": self.raw_data,
        })
    }
}

/// Logical output channel of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputChannel {
    Output,
    Error,
}

impl OutputChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputChannel::Output => "Output",
            OutputChannel::Error => "Error",
        }
    }
}

impl std::fmt::Display for OutputChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A batch of records raised to the host on one channel
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub channel: OutputChannel,
    pub records: Vec<Value>,
}

impl Notification {
    pub fn output(records: Vec<Value>) -> Self {
        Self {
            channel: OutputChannel::Output,
            records,
        }
    }

    pub fn error(record: &ErrorRecord) -> Self {
        Self {
            channel: OutputChannel::Error,
            records: vec![record.to_value()],
        }
    }
}

/// Decoder for one subscriber's configuration
#[derive(Debug, Clone)]
pub struct InboundCodec {
    agent_id: i64,
    format: String,
    extract_fields: bool,
    definition: PayloadDefinition,
}

impl InboundCodec {
    /// `format` is kept as configured; an unknown name fails each decode
    pub fn new(
        agent_id: i64,
        format: impl Into<String>,
        extract_fields: bool,
        definition: PayloadDefinition,
    ) -> Self {
        Self {
            agent_id,
            format: format.into(),
            extract_fields,
            definition,
        }
    }

    pub fn definition(&self) -> &PayloadDefinition {
        &self.definition
    }

    /// Decode one payload into a record batch
    pub fn decode(&self, payload: &[u8]) -> Result<Vec<Value>, DecodeFailure> {
        let format = self
            .format
            .parse::<WireFormat>()
            .map_err(|e| DecodeFailure::new(e, None))?;

        match format {
            WireFormat::Json => self.decode_json(payload),
            WireFormat::Hex => self
                .decode_hex(payload)
                .map(|record| vec![Value::Object(record)])
                .map_err(|e| DecodeFailure::new(e, None)),
        }
    }

    /// Decode and route: the result is always exactly one notification
    pub fn handle(&self, payload: &[u8]) -> Notification {
        let _span = crate::codec_span!(direction = "decode", format = %self.format).entered();
        match self.decode(payload) {
            Ok(records) => {
                debug!(
                    bytes = payload.len(),
                    records = records.len(),
                    "Decoded inbound payload"
                );
                Notification::output(records)
            }
            Err(failure) => {
                warn!(
                    bytes = payload.len(),
                    error = %failure.error,
                    "Failed to decode inbound payload"
                );
                Notification::error(&ErrorRecord::from_failure(
                    self.agent_id,
                    DECODE_SOURCE,
                    failure,
                ))
            }
        }
    }

    fn decode_json(&self, payload: &[u8]) -> Result<Vec<Value>, DecodeFailure> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| DecodeFailure::new(DecodeError::InvalidUtf8(e), None))?;

        let items: Vec<Value> = serde_json::from_str(&normalize_json_array(text)).map_err(|e| {
            DecodeFailure::new(DecodeError::MalformedJson(e), Some(text.to_string()))
        })?;

        if !self.extract_fields {
            return Ok(items);
        }

        Ok(items
            .iter()
            .filter(|item| item.is_object())
            .map(|item| Value::Object(self.extract_record(item)))
            .collect())
    }

    fn extract_record(&self, item: &Value) -> Record {
        let mut record = Record::new();
        for field in self.definition.fields() {
            let value = match &field.locator {
                FieldLocator::Path(path) => path.extract(item).cloned().unwrap_or(Value::Null),
                FieldLocator::ByteRange(_) => Value::Null,
            };
            record.insert(field.name.clone(), value);
        }
        record
    }

    fn decode_hex(&self, payload: &[u8]) -> Result<Record, DecodeError> {
        let last_index = payload.len().checked_sub(1);
        let mut record = Record::new();

        for field in self.definition.fields() {
            let mut hex = String::new();
            if let FieldLocator::ByteRange(range) = &field.locator {
                for index in range.indexes(last_index) {
                    let byte = payload.get(index).ok_or(DecodeError::ByteIndexOutOfRange {
                        index,
                        len: payload.len(),
                    })?;
                    // Writing to a String cannot fail
                    let _ = write!(hex, "{byte:02X}");
                }
            }
            record.insert(field.name.clone(), Value::String(hex));
        }

        Ok(record)
    }
}

/// Wrap a single object (or a half-bracketed array) into one JSON array
fn normalize_json_array(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.starts_with('[') && trimmed.ends_with(']') {
        trimmed.to_string()
    } else {
        format!(
            "[{}]",
            trimmed.trim_start_matches('[').trim_end_matches(']')
        )
    }
}
