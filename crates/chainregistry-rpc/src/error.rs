//! Transport-level error types.

use thiserror::Error;

use chainregistry_core::RegistryError;

use crate::request::JsonRpcError;

/// Errors that can occur while talking to the ledger node.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed (connection refused, timeout, non-2xx).
    #[error("HTTP error: {0}")]
    Http(String),

    /// WebSocket connect/send/receive error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// JSON-RPC error object returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    #[error("request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The connection was closed while the request was in flight.
    #[error("connection closed")]
    Closed,

    #[error("deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns `true` if the error is transient and the call may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Timeout { .. })
    }

    /// Returns `true` if the underlying connection is unusable.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::WebSocket(_) | Self::Closed)
    }

    /// Convert into the registry taxonomy, naming the method that failed.
    pub fn into_registry(self, method: &str) -> RegistryError {
        if self.is_connection_error() {
            RegistryError::Connection(self.to_string())
        } else {
            RegistryError::RemoteCall {
                method: method.to_string(),
                reason: self.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(TransportError::Timeout { ms: 10 }.is_retryable());
        assert!(TransportError::Closed.is_connection_error());
        assert!(!TransportError::Closed.is_retryable());
        let rpc = TransportError::Rpc(JsonRpcError {
            code: -32000,
            message: "execution reverted".into(),
            data: None,
        });
        assert!(!rpc.is_retryable());
        assert!(!rpc.is_connection_error());
    }

    #[test]
    fn registry_mapping() {
        assert!(matches!(
            TransportError::WebSocket("reset".into()).into_registry("eth_call"),
            RegistryError::Connection(_)
        ));
        assert!(matches!(
            TransportError::Http("502".into()).into_registry("eth_call"),
            RegistryError::RemoteCall { ref method, .. } if method == "eth_call"
        ));
    }
}
