//! Error types for binding generation

use thiserror::Error;

/// Generation faults. Any of these aborts the whole run; the plugin never
/// emits partial output.
#[derive(Error, Debug)]
pub enum Error {
    /// The proto input cannot be bound (missing package, foreign types,
    /// unsupported call shapes, duplicate names)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An unusable value for a recognized plugin parameter
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Malformed CodeGeneratorRequest bytes
    #[error("decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
