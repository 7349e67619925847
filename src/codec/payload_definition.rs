//! Payload definitions: the ordered field schema used by the codecs

use super::field_path::FieldPath;
use super::index_range::ByteRangeExpr;
use super::WireFormat;
use crate::config::{columns, Grid};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scalar type tags a field can declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeType {
    String,
    Int,
    Long,
    Double,
    Boolean,
    DateTime,
}

impl AttributeType {
    /// Parse a type name (case-insensitive)
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        [
            AttributeType::String,
            AttributeType::Int,
            AttributeType::Long,
            AttributeType::Double,
            AttributeType::Boolean,
            AttributeType::DateTime,
        ]
        .into_iter()
        .find(|t| t.as_str().eq_ignore_ascii_case(name))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeType::String => "String",
            AttributeType::Int => "Int",
            AttributeType::Long => "Long",
            AttributeType::Double => "Double",
            AttributeType::Boolean => "Boolean",
            AttributeType::DateTime => "DateTime",
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a field's value comes from in the payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldLocator {
    Path(FieldPath),
    ByteRange(ByteRangeExpr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub locator: FieldLocator,
    pub declared_type: AttributeType,
}

/// Ordered field descriptors. Names are not required to be unique.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadDefinition {
    fields: Vec<FieldSpec>,
}

impl PayloadDefinition {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    /// Build from the payload definition grid.
    ///
    /// JSON definitions read the `Path` and `Type` columns; HEX definitions
    /// read `ByteIndexes` and are always typed as strings. Unknown or blank
    /// type names fall back to `String` here and are reported by validation.
    pub fn from_grid(grid: &Grid, format: WireFormat) -> Self {
        let fields = grid
            .rows()
            .iter()
            .map(|row| {
                let name = row.text(columns::NAME);
                match format {
                    WireFormat::Json => FieldSpec {
                        name,
                        locator: FieldLocator::Path(FieldPath::parse(&row.text(columns::PATH))),
                        declared_type: AttributeType::parse(&row.text(columns::TYPE))
                            .unwrap_or(AttributeType::String),
                    },
                    WireFormat::Hex => FieldSpec {
                        name,
                        locator: FieldLocator::ByteRange(ByteRangeExpr::parse(
                            &row.text(columns::BYTE_INDEXES),
                        )),
                        declared_type: AttributeType::String,
                    },
                }
            })
            .collect();

        Self { fields }
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }
}
