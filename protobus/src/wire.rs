//! Wire protocol: subject naming, envelope framing, error encoding
//!
//! Every reply and stream frame on the bus starts with a single status
//! octet, inspected before any payload decode is attempted:
//!
//! - `0` — success; the rest of the bytes are the prost-encoded output
//!   message (unary reply) or one data item (stream frame)
//! - `1` — failure; the rest of the bytes are a prost-encoded [`ErrorMessage`]
//! - `2` — stream terminal; no payload (never used by unary replies)
//!
//! Subjects are derived deterministically from `(namespace, method)` so
//! that independently generated client and server bindings agree without
//! any discovery step.

use prost::Message;

use crate::{Error, Result};

/// Status octet for a success envelope or stream data frame
pub const STATUS_OK: u8 = 0;
/// Status octet for a failure envelope or stream error terminal
pub const STATUS_ERROR: u8 = 1;
/// Status octet for a stream end-of-stream terminal
pub const STATUS_DONE: u8 = 2;

/// Error payload carried by a status-1 envelope
#[derive(Clone, PartialEq, ::prost::Message, serde::Serialize, serde::Deserialize)]
pub struct ErrorMessage {
    #[prost(string, tag = "1")]
    pub error_message: String,
    /// UTC timestamp in nanoseconds
    #[prost(int64, tag = "2")]
    pub timestamp: i64,
    /// Identifier of the bus that produced the error
    #[prost(string, tag = "3")]
    pub bus_id: String,
}

impl ErrorMessage {
    /// Build an ErrorMessage for `err`, stamped with the current time.
    pub fn now(err: &Error, bus_id: &str) -> Self {
        Self {
            error_message: err.to_string(),
            timestamp: unix_nanos(),
            bus_id: bus_id.to_string(),
        }
    }
}

/// Empty request/response payload
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Empty {}

/// Response payload of the per-service health check method
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HealthCheckInfo {
    #[prost(string, tag = "1")]
    pub data: String,
}

/// Current UTC time in nanoseconds since the epoch.
pub(crate) fn unix_nanos() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default()
}

/// Subject for a method: `<namespace>/<MethodName>`.
pub fn subject(namespace: &str, method: &str) -> String {
    format!("{namespace}/{method}")
}

/// Encode a status-0 envelope around a message.
pub fn encode_ok<M: Message>(msg: &M) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + msg.encoded_len());
    buf.push(STATUS_OK);
    buf.extend(msg.encode_to_vec());
    buf
}

/// Encode a status-1 envelope around an ErrorMessage.
pub fn encode_error(err: &ErrorMessage) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + err.encoded_len());
    buf.push(STATUS_ERROR);
    buf.extend(err.encode_to_vec());
    buf
}

/// Encode a stream end-of-stream terminal.
pub fn encode_done() -> Vec<u8> {
    vec![STATUS_DONE]
}

/// Decode a unary reply envelope.
///
/// Status 0 yields the decoded output message; status 1 yields
/// [`Error::Application`] carrying the ErrorMessage text verbatim.
pub fn decode_reply<O: Message + Default>(bytes: &[u8]) -> Result<O> {
    match split_status(bytes)? {
        (STATUS_OK, payload) => Ok(O::decode(payload)?),
        (STATUS_ERROR, payload) => {
            let err = ErrorMessage::decode(payload)?;
            Err(Error::app(err.error_message))
        }
        (status, _) => Err(Error::decode_msg(format!(
            "unexpected envelope status {status}"
        ))),
    }
}

/// One parsed stream frame.
#[derive(Debug)]
pub enum Frame {
    /// A data frame carrying one encoded item
    Data(Vec<u8>),
    /// An error terminal; the session is aborted
    Error(ErrorMessage),
    /// A normal end-of-stream terminal
    Done,
}

/// Decode a stream frame by its leading status octet.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame> {
    match split_status(bytes)? {
        (STATUS_OK, payload) => Ok(Frame::Data(payload.to_vec())),
        (STATUS_ERROR, payload) => Ok(Frame::Error(ErrorMessage::decode(payload)?)),
        (STATUS_DONE, _) => Ok(Frame::Done),
        (status, _) => Err(Error::decode_msg(format!(
            "unexpected frame status {status}"
        ))),
    }
}

fn split_status(bytes: &[u8]) -> Result<(u8, &[u8])> {
    match bytes.split_first() {
        Some((status, payload)) => Ok((*status, payload)),
        None => Err(Error::decode_msg("empty envelope")),
    }
}
