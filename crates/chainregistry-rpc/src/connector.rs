//! The production [`Connector`]: WebSocket for subscriptions, optional HTTP
//! for request/response calls.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use chainregistry_core::NetworkConfig;

use crate::error::TransportError;
use crate::http::HttpRpcClient;
use crate::transport::{Connector, LedgerTransport, LogStream};
use crate::types::{LogFilter, RawLog};
use crate::ws::WsRpcClient;

/// Builds a [`NodeConnection`] per (re)connect.
pub struct NodeConnector {
    ws_url: String,
    http_url: Option<String>,
    http_timeout: Duration,
}

impl NodeConnector {
    pub fn new(ws_url: impl Into<String>, http_url: Option<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            http_url,
            http_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_network(network: &NetworkConfig) -> Self {
        Self::new(network.ws_url.clone(), network.http_url.clone())
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }
}

#[async_trait]
impl Connector for NodeConnector {
    async fn connect(&self) -> Result<Arc<dyn LedgerTransport>, TransportError> {
        let ws = WsRpcClient::connect(self.ws_url.clone()).await?;
        let http = self
            .http_url
            .as_ref()
            .map(|url| HttpRpcClient::new(url.clone(), self.http_timeout))
            .transpose()?;
        Ok(Arc::new(NodeConnection { ws, http }))
    }

    fn endpoint(&self) -> &str {
        &self.ws_url
    }
}

/// One live connection to the node.
pub struct NodeConnection {
    ws: WsRpcClient,
    http: Option<HttpRpcClient>,
}

#[async_trait]
impl LedgerTransport for NodeConnection {
    async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, TransportError> {
        match &self.http {
            Some(http) => http.request(method, params).await,
            None => self.ws.request(method, params).await,
        }
    }

    async fn subscribe_logs(&self, filter: &LogFilter) -> Result<LogStream, TransportError> {
        let mut notifications = self.ws.subscribe("logs", filter.subscribe_params()).await?;
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(payload) = notifications.recv().await {
                let log = match serde_json::from_value::<RawLog>(payload) {
                    Ok(log) => log,
                    Err(e) => {
                        tracing::warn!(error = %e, "malformed log notification, skipping");
                        continue;
                    }
                };
                if tx.send(Ok(log)).is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    fn is_open(&self) -> bool {
        self.ws.is_open()
    }

    fn endpoint(&self) -> &str {
        self.ws.url()
    }

    async fn close(&self) {
        self.ws.close();
    }
}
