//! HTTP/JSON reply encoding for generated gateway routes
//!
//! The runtime stays free of any HTTP framework; generated routes call
//! [`encode_json_reply`] and turn the `(status, body)` pair into whatever
//! response type their router wants.

use serde::Serialize;

use crate::wire::ErrorMessage;
use crate::{Error, Result};

/// Encode a handler result as an HTTP status and JSON body.
///
/// Success is `200` with the JSON-encoded output. Failure is `500` with a
/// JSON [`ErrorMessage`] whose `error_message` field carries the error
/// text verbatim. JSON encoding faults of the output itself also take the
/// error shape, so the body is always valid JSON.
pub fn encode_json_reply<O: Serialize>(result: Result<O>, bus_id: &str) -> (u16, String) {
    match result {
        Ok(output) => match serde_json::to_string(&output) {
            Ok(body) => (200, body),
            Err(err) => error_reply(&Error::decode("json encoding failed", err), bus_id),
        },
        Err(err) => error_reply(&err, bus_id),
    }
}

fn error_reply(err: &Error, bus_id: &str) -> (u16, String) {
    let msg = ErrorMessage::now(err, bus_id);
    let body = serde_json::to_string(&msg).unwrap_or_else(|_| {
        // ErrorMessage is three plain fields; this arm exists for the
        // signature, not for a reachable failure.
        String::from("{\"error_message\":\"error encoding failed\"}")
    });
    (500, body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Out {
        total: i64,
    }

    #[test]
    fn success_is_200_with_the_output_json() {
        let (status, body) = encode_json_reply(Ok(Out { total: 45 }), "bus1");
        assert_eq!(status, 200);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["total"], 45);
    }

    #[test]
    fn failure_is_500_with_the_error_text_verbatim() {
        let (status, body) = encode_json_reply::<Out>(Err(Error::app("test-error-1")), "bus1");
        assert_eq!(status, 500);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["error_message"], "test-error-1");
        assert_eq!(json["bus_id"], "bus1");
        assert!(json["timestamp"].as_i64().unwrap() > 0);
    }
}
