//! WebSocket JSON-RPC client with subscription support.
//!
//! A background task owns the socket and multiplexes requests and
//! `eth_subscription` notifications over it. The client does not reconnect by
//! itself: when the socket closes, `is_open()` turns `false`, in-flight
//! requests fail with [`TransportError::Closed`], subscription receivers end,
//! and the [`ConnectionSupervisor`](crate::ConnectionSupervisor) builds a new
//! client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::TransportError;
use crate::request::{Incoming, JsonRpcRequest};
use crate::subscriptions::{Notifications, SubscriptionTable};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Where the answer to an in-flight request goes.
enum Reply {
    Call(oneshot::Sender<Result<Value, TransportError>>),
    Subscribe(oneshot::Sender<Result<Notifications, TransportError>>),
}

impl Reply {
    fn fail(self, err: TransportError) {
        match self {
            Self::Call(tx) => {
                let _ = tx.send(Err(err));
            }
            Self::Subscribe(tx) => {
                let _ = tx.send(Err(err));
            }
        }
    }
}

/// Command sent from callers to the background task.
enum WsCommand {
    Send { req: JsonRpcRequest, reply: Reply },
    Close,
}

/// WebSocket JSON-RPC client for one socket lifetime.
pub struct WsRpcClient {
    url: String,
    cmd_tx: mpsc::UnboundedSender<WsCommand>,
    open: Arc<AtomicBool>,
    next_id: AtomicU64,
}

impl WsRpcClient {
    /// Perform the WebSocket handshake and start the background task.
    pub async fn connect(url: impl Into<String>) -> Result<Self, TransportError> {
        let url = url.into();
        let (stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));

        tokio::spawn(ws_task(url.clone(), stream, cmd_rx, Arc::clone(&open)));
        tracing::info!(url = %url, "WebSocket connected");

        Ok(Self {
            url,
            cmd_tx,
            open,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }

    /// Send one request and return its `result`.
    pub async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, TransportError> {
        let (tx, rx) = oneshot::channel();
        self.send_command(method, params, Reply::Call(tx))?;
        rx.await.map_err(|_| TransportError::Closed)?
    }

    /// `eth_subscribe(kind, params)`; the receiver yields each notification's `result`.
    pub async fn subscribe(
        &self,
        kind: &str,
        params: Value,
    ) -> Result<Notifications, TransportError> {
        let (tx, rx) = oneshot::channel();
        self.send_command(
            "eth_subscribe",
            vec![Value::String(kind.to_string()), params],
            Reply::Subscribe(tx),
        )?;
        rx.await.map_err(|_| TransportError::Closed)?
    }

    /// Close the socket. Idempotent.
    pub fn close(&self) {
        let _ = self.cmd_tx.send(WsCommand::Close);
    }

    fn send_command(&self, method: &str, params: Vec<Value>, reply: Reply) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        let req = JsonRpcRequest::new(self.next_id.fetch_add(1, Ordering::Relaxed), method, params);
        self.cmd_tx
            .send(WsCommand::Send { req, reply })
            .map_err(|_| TransportError::Closed)
    }
}

impl Drop for WsRpcClient {
    fn drop(&mut self) {
        self.close();
    }
}

/// Background task that owns the socket until it closes.
async fn ws_task(
    url: String,
    stream: WsStream,
    mut cmd_rx: mpsc::UnboundedReceiver<WsCommand>,
    open: Arc<AtomicBool>,
) {
    let (mut sink, mut stream) = stream.split();
    let mut subscriptions = SubscriptionTable::new();
    let mut pending: HashMap<u64, Reply> = HashMap::new();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    None | Some(WsCommand::Close) => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                    Some(WsCommand::Send { req, reply }) => {
                        let text = match serde_json::to_string(&req) {
                            Ok(t) => t,
                            Err(e) => {
                                reply.fail(TransportError::Deserialization(e));
                                continue;
                            }
                        };
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            tracing::warn!(error = %e, url = %url, "WebSocket send failed");
                            reply.fail(TransportError::WebSocket(e.to_string()));
                            break;
                        }
                        pending.insert(req.id, reply);
                    }
                }
            }
            msg = stream.next() => {
                match msg {
                    None => break,
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, url = %url, "WebSocket receive error");
                        break;
                    }
                    Some(Ok(Message::Text(text))) => {
                        handle_message(&text, &mut pending, &mut subscriptions);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    open.store(false, Ordering::Relaxed);
    for (_, reply) in pending.drain() {
        reply.fail(TransportError::Closed);
    }
    subscriptions.close_all();
    tracing::warn!(url = %url, "WebSocket closed");
}

fn handle_message(text: &str, pending: &mut HashMap<u64, Reply>, subscriptions: &mut SubscriptionTable) {
    let (id, outcome) = match Incoming::parse(text) {
        Ok(Incoming::Response { id, outcome }) => (id, outcome),
        Ok(Incoming::Notification { method, params }) => {
            if method == "eth_subscription" {
                subscriptions.route(&params);
            } else {
                tracing::debug!(method = %method, "ignoring server notification");
            }
            return;
        }
        Err(e) => {
            tracing::warn!(error = %e, "unrecognised WebSocket frame, skipping");
            return;
        }
    };

    match pending.remove(&id) {
        Some(Reply::Call(tx)) => {
            let _ = tx.send(outcome);
        }
        Some(Reply::Subscribe(tx)) => {
            let _ = tx.send(outcome.and_then(|v| subscriptions.confirm(v)));
        }
        None => tracing::debug!(id, "response for unknown request"),
    }
}
