//! # Shared Error Types
//!
//! Errors that can be raised before a command ever reaches the store:
//! value encoding and configuration parsing.

use thiserror::Error;

/// Result alias for the shared crate.
pub type RkvResult<T> = Result<T, RkvError>;

/// Errors produced by the codec and the configuration loader.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RkvError {
    /// A value could not be turned into its wire form.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// A configuration entry was present but could not be parsed.
    #[error("invalid value for {key}: {reason}")]
    InvalidConfig { key: &'static str, reason: String },
}
