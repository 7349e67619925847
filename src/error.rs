//! Crate-wide error type
//!
//! Decode failures are deliberately absent: the subscriber turns them into
//! error records instead of returning them.

use crate::codec::CodecError;
use crate::config::ConfigError;
use crate::transport::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

impl AgentError {
    /// Whether the error was caused by the agent's parameters rather than
    /// by the broker or the data
    pub fn is_configuration(&self) -> bool {
        matches!(self, AgentError::Configuration(_))
    }
}

pub type AgentResult<T> = Result<T, AgentError>;
