//! Agent configuration
//!
//! The host hands every agent a flat string-keyed parameter map. A few
//! parameters are "grids": JSON arrays of row objects that supply the
//! payload definition and nested-object aliases. For standalone use the
//! same parameters can be loaded from a TOML file (see [`AgentFileConfig`]).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Parameter keys understood by the agents
pub mod keys {
    pub const BROKER: &str = "Broker";
    pub const BROKER_PORT: &str = "Broker_Port";
    pub const TOPIC: &str = "Topic";
    pub const CLIENT_ID: &str = "ClientId";
    pub const QOS: &str = "QOS";
    pub const IS_BATCH: &str = "IsBatch";

    pub const SECURE: &str = "Secure";
    pub const PROTOCOL: &str = "Protocol";
    pub const CA_CERT: &str = "CACert";
    pub const CLIENT_CERT: &str = "ClientCert";
    pub const CERT_PASSWORD: &str = "CertPassword";

    pub const ANONYMOUS: &str = "Anonymous";
    pub const USERNAME: &str = "Username";
    pub const PASSWORD: &str = "Password";

    pub const FORMAT: &str = "Format";
    pub const SPECIFY_JPATH: &str = "SpecifyJPath";
    pub const PAYLOAD_DEFINITION: &str = "PayloadDefinition";

    pub const USE_NESTED_OBJECT: &str = "UseNestedObject";
    pub const OBJECT_NAME: &str = "ObjectName";
    pub const OUTPUT_AS_ARRAY: &str = "OutputAsArray";
    pub const OBJECT_PROPERTIES: &str = "ObjectProperties";
}

/// Grid column names
pub mod columns {
    pub const NAME: &str = "Name";
    pub const PATH: &str = "Path";
    pub const TYPE: &str = "Type";
    pub const BYTE_INDEXES: &str = "ByteIndexes";
    pub const SOURCE: &str = "Source";
    pub const ALIAS: &str = "Alias";
}

pub const DEFAULT_BROKER_PORT: u16 = 1883;

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Parameter '{parameter}' is not a valid grid: {reason}")]
    InvalidGrid { parameter: String, reason: String },
    #[error("Required parameter '{0}' is not set")]
    MissingParameter(String),
    #[error("Parameter '{parameter}' has an invalid value '{value}'")]
    InvalidParameter { parameter: String, value: String },
    #[error("Failed to load {which} certificate: {reason}")]
    Certificate { which: String, reason: String },
    #[error("Invalid configuration: {}", .0.join(" "))]
    Validation(Vec<String>),
}

/// Parse a boolean the way the host stores it: `true`/`false`, any case
pub fn parse_bool(value: &str) -> Option<bool> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Flat parameter map handed to an agent at creation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentParameters(BTreeMap<String, String>);

impl AgentParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// The value for `key`, or "" when it is not set
    pub fn text(&self, key: &str) -> &str {
        self.get(key).unwrap_or_default()
    }

    /// The trimmed value for `key`, or `None` when missing or whitespace
    pub fn non_blank(&self, key: &str) -> Option<&str> {
        self.get(key).map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn is_blank(&self, key: &str) -> bool {
        self.non_blank(key).is_none()
    }

    /// Boolean parameter; unparseable or missing values fall back to `default`
    pub fn flag(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(parse_bool).unwrap_or(default)
    }

    /// Broker port; anything that is not a positive port number means 1883
    pub fn port(&self, key: &str) -> u16 {
        self.get(key)
            .and_then(|v| v.trim().parse::<u16>().ok())
            .filter(|port| *port > 0)
            .unwrap_or(DEFAULT_BROKER_PORT)
    }

    pub fn grid(&self, key: &str) -> Result<Grid, ConfigError> {
        Grid::parse(key, self.text(key))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Convert a TOML table into parameters.
    ///
    /// Strings are taken verbatim, other scalars are stringified and
    /// arrays/tables are JSON-encoded so grids can be written natively.
    pub fn from_toml_table(table: &toml::Table) -> Result<Self, ConfigError> {
        let mut parameters = Self::new();
        for (key, value) in table {
            let text = match value {
                toml::Value::String(s) => s.clone(),
                toml::Value::Integer(i) => i.to_string(),
                toml::Value::Float(f) => f.to_string(),
                toml::Value::Boolean(b) => b.to_string(),
                toml::Value::Datetime(d) => d.to_string(),
                structured => serde_json::to_string(structured).map_err(|e| {
                    ConfigError::InvalidParameter {
                        parameter: key.clone(),
                        value: e.to_string(),
                    }
                })?,
            };
            parameters.insert(key.clone(), text);
        }
        Ok(parameters)
    }
}

impl<K, V> FromIterator<(K, V)> for AgentParameters
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// A tabular parameter value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Grid {
    rows: Vec<GridRow>,
}

/// One row of a grid
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridRow(serde_json::Map<String, Value>);

impl Grid {
    /// Parse a grid value. A blank value is an empty grid.
    pub fn parse(parameter: &str, value: &str) -> Result<Self, ConfigError> {
        if value.trim().is_empty() {
            return Ok(Self::default());
        }

        let invalid = |reason: String| ConfigError::InvalidGrid {
            parameter: parameter.to_string(),
            reason,
        };

        let parsed: Value = serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?;
        let Value::Array(items) = parsed else {
            return Err(invalid("expected an array of rows".to_string()));
        };

        let rows = items
            .into_iter()
            .enumerate()
            .map(|(index, item)| match item {
                Value::Object(row) => Ok(GridRow(row)),
                _ => Err(invalid(format!("row {} is not an object", index + 1))),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[GridRow] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

impl GridRow {
    /// Cell text; missing and null cells are ""
    pub fn text(&self, column: &str) -> String {
        match self.0.get(column) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }
}

impl FromIterator<(String, Value)> for GridRow {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Which side of the broker an agent sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Publisher,
    Subscriber,
}

/// Basic agents only honour the broker address; advanced ones read the full parameter set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentVariant {
    Basic,
    #[default]
    Advanced,
}

/// A standalone agent definition loaded from TOML
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentFileConfig {
    pub agent: AgentSection,
    #[serde(default)]
    pub parameters: toml::Table,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSection {
    /// Identifier stamped into error records
    #[serde(default)]
    pub id: i64,
    pub role: AgentRole,
    #[serde(default)]
    pub variant: AgentVariant,
}

impl AgentFileConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn agent_parameters(&self) -> Result<AgentParameters, ConfigError> {
        AgentParameters::from_toml_table(&self.parameters)
    }
}
