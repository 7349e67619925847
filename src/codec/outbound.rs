//! Outbound encoding: host records to wire payloads
//!
//! `is_batch` only controls how many payloads go on the wire. The forwarded
//! records are always the full (possibly composed) batch.

use super::composer::ComplexObjectComposer;
use super::{CodecError, Record};
use serde_json::Value;
use tracing::debug;

/// Result of encoding one host invocation
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedBatch {
    /// Wire payloads in publish order
    pub payloads: Vec<Vec<u8>>,
    /// Records forwarded to the next stage, in input order
    pub forwarded: Vec<Record>,
}

impl EncodedBatch {
    pub fn forwarded_values(&self) -> Vec<Value> {
        self.forwarded.iter().cloned().map(Value::Object).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct OutboundCodec {
    is_batch: bool,
    composer: Option<ComplexObjectComposer>,
}

impl OutboundCodec {
    pub fn new(is_batch: bool, composer: Option<ComplexObjectComposer>) -> Self {
        Self { is_batch, composer }
    }

    pub fn is_batch(&self) -> bool {
        self.is_batch
    }

    pub fn composer(&self) -> Option<&ComplexObjectComposer> {
        self.composer.as_ref()
    }

    pub fn encode(&self, records: &[Record]) -> Result<EncodedBatch, CodecError> {
        let forwarded: Vec<Record> = match &self.composer {
            Some(composer) => records.iter().map(|r| composer.compose(r)).collect(),
            None => records.to_vec(),
        };

        let payloads = if self.is_batch {
            vec![serde_json::to_vec(&forwarded).map_err(CodecError::Serialization)?]
        } else {
            forwarded
                .iter()
                .map(|record| serde_json::to_vec(record).map_err(CodecError::Serialization))
                .collect::<Result<Vec<_>, _>>()?
        };

        debug!(
            records = forwarded.len(),
            payloads = payloads.len(),
            batch = self.is_batch,
            "Encoded outbound records"
        );

        Ok(EncodedBatch {
            payloads,
            forwarded,
        })
    }
}
