//! Error types for the protobus runtime

use thiserror::Error;

/// Main error type for protobus operations
#[derive(Error, Debug)]
pub enum Error {
    /// Transport unreachable or invalid at connect time
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A call or streaming wait did not complete before its deadline
    #[error("operation timed out after {duration_ms}ms: {operation}")]
    Timeout { operation: String, duration_ms: u64 },

    /// A pending wait was released by connection shutdown or caller cancellation
    #[error("operation cancelled: {operation}")]
    Cancelled { operation: String },

    /// Malformed envelope or payload
    #[error("decode error: {message}")]
    Decode {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The remote handler returned an error; the message text is carried
    /// verbatim from the wire ErrorMessage
    #[error("{message}")]
    Application { message: String },

    /// Invalid configuration supplied by the caller
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Service binding and routing errors
    #[error("dispatch error: {message}")]
    Dispatch { message: String },
}

impl Error {
    /// Create a connection error with source
    pub fn connection<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a connection error without source
    pub fn connection_msg(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms,
        }
    }

    /// Create a cancellation error
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create a decode error with source
    pub fn decode<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Decode {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a decode error without source
    pub fn decode_msg(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
            source: None,
        }
    }

    /// Create an application error carrying the handler's message verbatim
    pub fn app(message: impl Into<String>) -> Self {
        Self::Application {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a dispatch error
    pub fn dispatch(message: impl Into<String>) -> Self {
        Self::Dispatch {
            message: message.into(),
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Connection { .. } => "connection",
            Error::Timeout { .. } => "timeout",
            Error::Cancelled { .. } => "cancelled",
            Error::Decode { .. } => "decode",
            Error::Application { .. } => "application",
            Error::Configuration { .. } => "configuration",
            Error::Dispatch { .. } => "dispatch",
        }
    }
}

impl From<prost::DecodeError> for Error {
    fn from(err: prost::DecodeError) -> Self {
        Error::decode("protobuf decode failed", err)
    }
}

/// Result type for protobus operations
pub type Result<T> = std::result::Result<T, Error>;
