//! Data model error types.

use thiserror::Error;

/// Errors raised while parsing or decoding data model types.
#[derive(Debug, Error)]
pub enum Error {
    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization failed.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// An entity reference string was not of the form `Type#<32 hex digits>`.
    #[error("invalid entity reference: {0}")]
    InvalidEntityRef(String),
}
