//! Request/response calls over HTTP, used when the network configures an
//! HTTP endpoint next to the WebSocket one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;

use crate::error::TransportError;
use crate::request::{Incoming, JsonRpcRequest};

pub struct HttpRpcClient {
    url: String,
    http: reqwest::Client,
    timeout: Duration,
    next_id: AtomicU64,
}

impl HttpRpcClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            http,
            timeout,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST one request. No retries here; [`ChainReader`](crate::ChainReader)
    /// owns the retry policy.
    pub async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = JsonRpcRequest::new(id, method, params);

        let resp = self.http.post(&self.url).json(&body).send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout {
                    ms: self.timeout.as_millis() as u64,
                }
            } else {
                TransportError::Http(e.to_string())
            }
        })?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(status_error(status, &text));
        }

        match Incoming::parse(&text)? {
            Incoming::Response { id: got, outcome } if got == id => outcome,
            Incoming::Response { id: got, .. } => {
                Err(TransportError::Other(format!("{method}: response id {got}, expected {id}")))
            }
            Incoming::Notification { method: n, .. } => {
                Err(TransportError::Other(format!("{method}: unexpected notification {n}")))
            }
        }
    }
}

/// Rate limiting and server-side failures are worth retrying; other client
/// errors are not.
fn status_error(status: StatusCode, body: &str) -> TransportError {
    let msg = format!("HTTP {}: {}", status.as_u16(), body.chars().take(200).collect::<String>());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        TransportError::Http(msg)
    } else {
        TransportError::Other(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(status_error(StatusCode::BAD_GATEWAY, "").is_retryable());
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, "slow down").is_retryable());
        assert!(!status_error(StatusCode::UNAUTHORIZED, "bad key").is_retryable());
    }

    #[test]
    fn long_bodies_are_truncated() {
        let err = status_error(StatusCode::INTERNAL_SERVER_ERROR, &"x".repeat(1000));
        assert!(err.to_string().len() < 260);
    }
}
