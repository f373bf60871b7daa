//! JSON-RPC 2.0 framing for the MCP protocol.
//!
//! Incoming frames are classified into requests (carry an `id`), notifications
//! (no `id`) and responses (no `method`; the server never sends requests, so
//! these are acknowledged and dropped). Every request gets exactly one
//! response envelope, success or error.

use serde::Serialize;
use serde_json::{Value, json};

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
/// Session or path not found on the streaming transport.
pub const NOT_FOUND: i64 = -32004;
/// Conflicts and transport-level refusals.
pub const SERVER_ERROR: i64 = -32000;

pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

pub const SERVER_NAME: &str = "mcp-server-laravel-database";

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(INVALID_REQUEST, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {}", method))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message)
    }
}

/// A decoded frame awaiting dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Request {
        id: Value,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
    },
    Response,
}

impl Incoming {
    /// Classify a single JSON-RPC frame.
    ///
    /// A frame that is not an object, has the wrong `jsonrpc` version, or a
    /// non-string `method` is an invalid request. The returned id (if any) is
    /// what the error response should echo.
    pub fn parse(frame: &Value) -> Result<Self, (Value, RpcError)> {
        let Some(object) = frame.as_object() else {
            return Err((Value::Null, RpcError::invalid_request("Invalid Request")));
        };

        let id = object.get("id").cloned();

        if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err((
                id.unwrap_or(Value::Null),
                RpcError::invalid_request("Invalid Request: jsonrpc must be \"2.0\""),
            ));
        }

        let method = match object.get("method") {
            Some(Value::String(method)) => method.clone(),
            Some(_) => {
                return Err((
                    id.unwrap_or(Value::Null),
                    RpcError::invalid_request("Invalid Request: method must be a string"),
                ));
            }
            None if object.contains_key("result") || object.contains_key("error") => {
                return Ok(Incoming::Response);
            }
            None => {
                return Err((
                    id.unwrap_or(Value::Null),
                    RpcError::invalid_request("Invalid Request: missing method"),
                ));
            }
        };

        match id {
            Some(id) => Ok(Incoming::Request {
                id,
                method,
                params: object.get("params").cloned().unwrap_or(Value::Null),
            }),
            None => Ok(Incoming::Notification { method }),
        }
    }
}

/// Success envelope.
pub fn success(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "result": result,
    })
}

/// Error envelope.
pub fn failure(id: Value, error: RpcError) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "error": error,
    })
}

/// Whether a frame is a well-formed `initialize` request.
pub fn is_initialize_request(frame: &Value) -> bool {
    let Some(object) = frame.as_object() else {
        return false;
    };

    object.get("jsonrpc").and_then(Value::as_str) == Some(JSONRPC_VERSION)
        && object.get("method").and_then(Value::as_str) == Some("initialize")
        && object.get("id").is_some_and(|id| !id.is_null())
        && object
            .get("params")
            .and_then(|p| p.get("protocolVersion"))
            .is_some_and(Value::is_string)
}

/// Whether any frame in a body (single or batch) is an `initialize` request.
pub fn contains_initialize_request(body: &Value) -> bool {
    match body {
        Value::Array(frames) => frames.iter().any(is_initialize_request),
        frame => is_initialize_request(frame),
    }
}

/// Echo the client's version when supported, otherwise offer the latest.
pub fn negotiate_version(requested: Option<&str>) -> &'static str {
    requested
        .and_then(|v| SUPPORTED_PROTOCOL_VERSIONS.iter().find(|s| **s == v).copied())
        .unwrap_or(LATEST_PROTOCOL_VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    mod classification {
        use super::*;

        #[test]
        fn test_request_with_id() {
            let frame = json!({"jsonrpc": "2.0", "id": 7, "method": "ping"});
            assert_eq!(
                Incoming::parse(&frame).unwrap(),
                Incoming::Request {
                    id: json!(7),
                    method: "ping".to_string(),
                    params: Value::Null
                }
            );
        }

        #[test]
        fn test_notification_without_id() {
            let frame = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
            assert_eq!(
                Incoming::parse(&frame).unwrap(),
                Incoming::Notification {
                    method: "notifications/initialized".to_string()
                }
            );
        }

        #[test]
        fn test_client_response_is_recognised() {
            let frame = json!({"jsonrpc": "2.0", "id": 1, "result": {}});
            assert_eq!(Incoming::parse(&frame).unwrap(), Incoming::Response);
        }

        #[test]
        fn test_wrong_version_keeps_id() {
            let frame = json!({"jsonrpc": "1.0", "id": "a", "method": "ping"});
            let (id, error) = Incoming::parse(&frame).unwrap_err();
            assert_eq!(id, json!("a"));
            assert_eq!(error.code, INVALID_REQUEST);
        }

        #[test]
        fn test_non_object_frame() {
            let (id, error) = Incoming::parse(&json!(42)).unwrap_err();
            assert_eq!(id, Value::Null);
            assert_eq!(error.code, INVALID_REQUEST);
        }
    }

    mod initialize_detection {
        use super::*;

        fn init(version: Value) -> Value {
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "initialize",
                "params": {"protocolVersion": version, "capabilities": {}}
            })
        }

        #[test]
        fn test_valid_initialize() {
            assert!(is_initialize_request(&init(json!("2025-03-26"))));
        }

        #[test]
        fn test_initialize_requires_version_string() {
            assert!(!is_initialize_request(&init(json!(3))));
        }

        #[test]
        fn test_initialize_notification_is_not_initialize() {
            let frame = json!({
                "jsonrpc": "2.0",
                "method": "initialize",
                "params": {"protocolVersion": "2025-03-26"}
            });
            assert!(!is_initialize_request(&frame));
        }

        #[test]
        fn test_batch_containing_initialize() {
            let batch = json!([{"jsonrpc": "2.0", "method": "ping", "id": 2}, init(json!("2024-11-05"))]);
            assert!(contains_initialize_request(&batch));
            assert!(!contains_initialize_request(&json!([])));
        }
    }

    mod version_negotiation {
        use super::*;

        #[test]
        fn test_supported_version_is_echoed() {
            assert_eq!(negotiate_version(Some("2024-11-05")), "2024-11-05");
        }

        #[test]
        fn test_unknown_version_gets_latest() {
            assert_eq!(negotiate_version(Some("1999-01-01")), LATEST_PROTOCOL_VERSION);
            assert_eq!(negotiate_version(None), LATEST_PROTOCOL_VERSION);
        }
    }

    #[test]
    fn test_failure_envelope_shape() {
        let envelope = failure(Value::Null, RpcError::new(NOT_FOUND, "Session not found"));
        assert_eq!(
            envelope,
            json!({
                "jsonrpc": "2.0",
                "id": null,
                "error": {"code": -32004, "message": "Session not found"}
            })
        );
    }
}
