//! JSON-RPC 2.0 framing: outgoing requests and classification of whatever
//! the node sends back.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransportError;

/// Outgoing request. Ids are numeric and allocated per client.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    pub params: Vec<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// Error object carried by a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// One frame received from the node.
#[derive(Debug)]
pub enum Incoming {
    /// Answer to the request with this id. A missing `result` is `null`
    /// (unknown block, empty log range).
    Response {
        id: u64,
        outcome: Result<Value, TransportError>,
    },
    /// Server-initiated message such as `eth_subscription`.
    Notification { method: String, params: Value },
}

impl Incoming {
    pub fn parse(text: &str) -> Result<Self, TransportError> {
        let mut frame: Value = serde_json::from_str(text)?;

        if let Some(method) = frame.get("method").and_then(Value::as_str) {
            return Ok(Self::Notification {
                method: method.to_string(),
                params: frame.get_mut("params").map(Value::take).unwrap_or(Value::Null),
            });
        }

        let id = frame
            .get("id")
            .and_then(Value::as_u64)
            .ok_or_else(|| TransportError::Other(format!("frame without numeric id: {text}")))?;
        let outcome = match frame.get_mut("error").map(Value::take) {
            Some(err) if !err.is_null() => Err(TransportError::Rpc(serde_json::from_value(err)?)),
            _ => Ok(frame.get_mut("result").map(Value::take).unwrap_or(Value::Null)),
        };
        Ok(Self::Response { id, outcome })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serialization() {
        let req = JsonRpcRequest::new(7, "eth_blockNumber", vec![]);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["id"], 7);
        assert_eq!(json["params"], serde_json::json!([]));
    }

    #[test]
    fn error_response_is_rpc_error() {
        let frame = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"execution reverted"}}"#;
        match Incoming::parse(frame).unwrap() {
            Incoming::Response {
                id: 1,
                outcome: Err(TransportError::Rpc(e)),
            } => assert_eq!(e.code, -32000),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_result_is_null() {
        match Incoming::parse(r#"{"jsonrpc":"2.0","id":3}"#).unwrap() {
            Incoming::Response { id: 3, outcome: Ok(v) } => assert!(v.is_null()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn subscription_frame_is_notification() {
        let frame = r#"{"jsonrpc":"2.0","method":"eth_subscription","params":{"subscription":"0x1","result":{}}}"#;
        match Incoming::parse(frame).unwrap() {
            Incoming::Notification { method, params } => {
                assert_eq!(method, "eth_subscription");
                assert_eq!(params["subscription"], "0x1");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn null_id_is_rejected() {
        assert!(Incoming::parse(r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"parse"}}"#).is_err());
        assert!(Incoming::parse("{oops").is_err());
    }
}
