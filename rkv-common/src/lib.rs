// rkv-common - Shared value codec, configuration and error types for the
// resilient key-value client
//
// This crate has no knowledge of the driver; it only defines how application
// values map to the wire form and how the client is configured.

pub mod codec;
pub mod config;
pub mod error;

// Re-export for convenience
pub use codec::*;
pub use config::*;
pub use error::*;

/// Application value type moved through the codec.
pub use serde_json::Value;
