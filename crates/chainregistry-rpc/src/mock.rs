//! In-process fake ledger for tests.
//!
//! [`MockLedger`] holds state that survives reconnects (height, stored logs,
//! method handlers); each [`MockConnector::connect`] hands out a fresh
//! [`MockTransport`] over it that tests can drop at will.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::request::JsonRpcError;
use crate::transport::{Connector, LedgerTransport, LogStream};
use crate::types::{parse_quantity, quantity, LogFilter, RawLog};

/// Custom answer for one JSON-RPC method.
pub type Handler = Arc<dyn Fn(&[Value]) -> Result<Value, TransportError> + Send + Sync>;

type Subscriber = (u64, mpsc::UnboundedSender<Result<RawLog, TransportError>>);

// ─── MockLedger ───────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockLedger {
    height: AtomicU64,
    failing: AtomicBool,
    stalled: AtomicBool,
    handlers: Mutex<HashMap<String, Handler>>,
    logs: Mutex<Vec<RawLog>>,
    subscribers: Mutex<Vec<Subscriber>>,
    requests: Mutex<Vec<String>>,
}

impl MockLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::SeqCst);
    }

    pub fn height(&self) -> u64 {
        self.height.load(Ordering::SeqCst)
    }

    /// Every request fails with a retryable HTTP error while set.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every request hangs forever while set.
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    pub fn on<F>(&self, method: &str, handler: F)
    where
        F: Fn(&[Value]) -> Result<Value, TransportError> + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .unwrap()
            .insert(method.to_string(), Arc::new(handler));
    }

    /// Record a log in history (visible to `eth_getLogs`) without notifying.
    pub fn store_log(&self, log: RawLog) {
        self.logs.lock().unwrap().push(log);
    }

    /// Notify live subscribers without recording history.
    pub fn emit(&self, log: RawLog) {
        self.subscribers
            .lock()
            .unwrap()
            .retain(|(_, tx)| tx.send(Ok(log.clone())).is_ok());
    }

    /// Record and notify, as a node does when a block lands.
    pub fn publish(&self, log: RawLog) {
        let n = log.block_number_u64().unwrap_or(0);
        if n > self.height() {
            self.set_height(n);
        }
        self.store_log(log.clone());
        self.emit(log);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    pub fn request_count(&self, method: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.as_str() == method)
            .count()
    }

    fn drop_subscribers(&self, conn: u64) {
        self.subscribers.lock().unwrap().retain(|(id, _)| *id != conn);
    }

    fn logs_in_range(&self, params: &[Value]) -> Result<Value, TransportError> {
        let filter = params.first().cloned().unwrap_or(Value::Null);
        let bound = |key: &str| -> Result<u64, TransportError> {
            match filter.get(key).and_then(Value::as_str) {
                Some(q) => parse_quantity(q),
                None => Ok(0),
            }
        };
        let (from, to) = (bound("fromBlock")?, bound("toBlock")?);
        let logs: Vec<RawLog> = self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|l| {
                l.block_number_u64()
                    .map(|n| n >= from && n <= to)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        Ok(serde_json::to_value(logs)?)
    }

    async fn answer(&self, method: &str, params: Vec<Value>) -> Result<Value, TransportError> {
        self.requests.lock().unwrap().push(method.to_string());
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Http("mock node unavailable".into()));
        }
        let handler = self.handlers.lock().unwrap().get(method).cloned();
        if let Some(handler) = handler {
            return handler(&params);
        }
        match method {
            "eth_blockNumber" => Ok(Value::String(quantity(self.height()))),
            "eth_getLogs" => self.logs_in_range(&params),
            _ => Err(TransportError::Rpc(JsonRpcError {
                code: -32601,
                message: format!("method not found: {method}"),
                data: None,
            })),
        }
    }
}

// ─── MockTransport ────────────────────────────────────────────────────────────

pub struct MockTransport {
    id: u64,
    ledger: Arc<MockLedger>,
    open: AtomicBool,
}

impl MockTransport {
    pub fn new(id: u64, ledger: Arc<MockLedger>) -> Self {
        Self {
            id,
            ledger,
            open: AtomicBool::new(true),
        }
    }

    /// Simulate the node dropping the socket.
    pub fn drop_connection(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.ledger.drop_subscribers(self.id);
    }
}

#[async_trait]
impl LedgerTransport for MockTransport {
    async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.ledger.answer(method, params).await
    }

    async fn subscribe_logs(&self, _filter: &LogFilter) -> Result<LogStream, TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.ledger.subscribers.lock().unwrap().push((self.id, tx));
        Ok(rx)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn endpoint(&self) -> &str {
        "mock://ledger"
    }

    async fn close(&self) {
        self.drop_connection();
    }
}

// ─── MockConnector ────────────────────────────────────────────────────────────

pub struct MockConnector {
    ledger: Arc<MockLedger>,
    connects: AtomicU32,
    refuse: AtomicU32,
    delay_ms: AtomicU64,
    current: Mutex<Option<Arc<MockTransport>>>,
}

impl MockConnector {
    pub fn new(ledger: Arc<MockLedger>) -> Self {
        Self {
            ledger,
            connects: AtomicU32::new(0),
            refuse: AtomicU32::new(0),
            delay_ms: AtomicU64::new(0),
            current: Mutex::new(None),
        }
    }

    pub fn ledger(&self) -> &Arc<MockLedger> {
        &self.ledger
    }

    /// Refuse the next `n` connect attempts.
    pub fn refuse_next(&self, n: u32) {
        self.refuse.store(n, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn current(&self) -> Option<Arc<MockTransport>> {
        self.current.lock().unwrap().clone()
    }

    /// Drop the most recent connection, if any.
    pub fn drop_current(&self) {
        if let Some(t) = self.current() {
            t.drop_connection();
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Arc<dyn LedgerTransport>, TransportError> {
        let id = u64::from(self.connects.fetch_add(1, Ordering::SeqCst)) + 1;
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let refused = self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::WebSocket("mock connect refused".into()));
        }
        let transport = Arc::new(MockTransport::new(id, Arc::clone(&self.ledger)));
        *self.current.lock().unwrap() = Some(Arc::clone(&transport));
        Ok(transport)
    }

    fn endpoint(&self) -> &str {
        "mock://ledger"
    }
}

/// Build a log as the node would serialise it.
pub fn raw_log(address: &str, topics: Vec<String>, data: &[u8], block: u64, index: u64) -> RawLog {
    RawLog {
        address: address.to_string(),
        topics,
        data: format!("0x{}", hex::encode(data)),
        block_number: quantity(block),
        tx_hash: None,
        log_index: quantity(index),
        removed: false,
    }
}
