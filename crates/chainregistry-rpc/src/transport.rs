//! The transport seam between the supervisor and the node.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::types::{parse_quantity, LogFilter, RawLog};

/// Live log notifications. The channel ends when the connection drops.
pub type LogStream = mpsc::UnboundedReceiver<Result<RawLog, TransportError>>;

/// One established connection to a ledger node.
///
/// # Thread Safety
/// Implementations must be `Send + Sync`; the supervisor hands out
/// `Arc<dyn LedgerTransport>` clones to every caller.
#[async_trait]
pub trait LedgerTransport: Send + Sync + 'static {
    /// Send one JSON-RPC request and return its `result`.
    async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, TransportError>;

    /// Open an `eth_subscribe("logs")` stream.
    async fn subscribe_logs(&self, filter: &LogFilter) -> Result<LogStream, TransportError>;

    /// `false` once the underlying socket has closed.
    fn is_open(&self) -> bool;

    /// Endpoint identifier (URL) for logs.
    fn endpoint(&self) -> &str;

    /// Close the connection. Pending requests fail with `Closed`.
    async fn close(&self) {}

    /// Current head block number.
    async fn block_number(&self) -> Result<u64, TransportError> {
        let v = self.request("eth_blockNumber", vec![]).await?;
        let s = v
            .as_str()
            .ok_or_else(|| TransportError::Other(format!("eth_blockNumber returned {v}")))?;
        parse_quantity(s)
    }
}

/// Factory for fresh connections; the supervisor calls it on every (re)connect.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Arc<dyn LedgerTransport>, TransportError>;

    fn endpoint(&self) -> &str;
}
