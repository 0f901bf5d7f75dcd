//! Stateless request/response calls through the supervised connection.

use std::sync::Arc;
use std::time::Duration;

use alloy_dyn_abi::DynSolValue;
use serde_json::{json, Value};

use chainregistry_core::config::SyncSettings;
use chainregistry_core::{MemberAddress, RegistryError};

use crate::abi::ViewFunction;
use crate::retry::RetryPolicy;
use crate::supervisor::ConnectionSupervisor;
use crate::transport::LogStream;
use crate::types::{parse_quantity, BlockSummary, BlockTag, LogFilter, RawLog};

#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Applied to retryable transport failures (HTTP errors, timeouts).
    pub call_retry: RetryPolicy,
    /// Applied while the node answers `null` for a block.
    pub block_retry: RetryPolicy,
    /// Widest `eth_getLogs` window per request.
    pub max_log_range: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self::from(&SyncSettings::default())
    }
}

impl From<&SyncSettings> for ReaderConfig {
    fn from(s: &SyncSettings) -> Self {
        Self {
            call_retry: RetryPolicy::exponential(s.call_retries, Duration::from_millis(100)),
            block_retry: RetryPolicy::linear(
                s.block_retry_attempts,
                Duration::from_millis(s.block_retry_delay_ms),
            ),
            max_log_range: s.max_log_range,
        }
    }
}

/// Reads ledger state through whatever transport the supervisor holds.
///
/// Every call is a fresh round-trip; nothing is cached. Calls fail with
/// [`RegistryError::NotConnected`] while the supervisor is disconnected, and
/// a connection-level failure asks the supervisor to reconnect.
pub struct ChainReader {
    supervisor: Arc<ConnectionSupervisor>,
    config: ReaderConfig,
}

impl ChainReader {
    pub fn new(supervisor: Arc<ConnectionSupervisor>, config: ReaderConfig) -> Self {
        Self { supervisor, config }
    }

    pub fn supervisor(&self) -> &Arc<ConnectionSupervisor> {
        &self.supervisor
    }

    async fn raw_request(&self, method: &str, params: Vec<Value>) -> Result<Value, RegistryError> {
        let mut attempt = 0;
        loop {
            let transport = self.supervisor.transport()?;
            match transport.request(method, params.clone()).await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_connection_error() => {
                    self.supervisor
                        .request_reconnect_for(&transport, &e.to_string())
                        .await;
                    return Err(e.into_registry(method));
                }
                Err(e) if e.is_retryable() => {
                    attempt += 1;
                    let Some(delay) = self.config.call_retry.next_delay(attempt) else {
                        return Err(e.into_registry(method));
                    };
                    tracing::debug!(method, attempt, error = %e, "retrying RPC call");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into_registry(method)),
            }
        }
    }

    fn call_object(contract: &MemberAddress, function: &ViewFunction, args: &[DynSolValue]) -> Value {
        json!({
            "to": contract.as_str(),
            "data": format!("0x{}", hex::encode(function.encode_call(args))),
        })
    }

    /// `eth_call` a view function at `latest` and decode its outputs.
    pub async fn call(
        &self,
        contract: &MemberAddress,
        function: &ViewFunction,
        args: &[DynSolValue],
    ) -> Result<Vec<DynSolValue>, RegistryError> {
        let params = vec![Self::call_object(contract, function, args), json!("latest")];
        let result = self.raw_request("eth_call", params).await?;
        let bytes = hex_result(&result, "eth_call")?;
        if bytes.is_empty() {
            return Err(RegistryError::RemoteCall {
                method: format!("eth_call {}", function.signature),
                reason: format!("empty return data from {contract}"),
            });
        }
        function.decode_output(&bytes)
    }

    /// Zero-argument view call returning its single output.
    pub async fn read_field(
        &self,
        contract: &MemberAddress,
        function: &ViewFunction,
    ) -> Result<DynSolValue, RegistryError> {
        self.call(contract, function, &[])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RegistryError::Abi(format!("{} returned no values", function.signature)))
    }

    /// Gas estimate for a call.
    pub async fn estimate_call(
        &self,
        contract: &MemberAddress,
        function: &ViewFunction,
        args: &[DynSolValue],
    ) -> Result<u64, RegistryError> {
        let params = vec![Self::call_object(contract, function, args)];
        let result = self.raw_request("eth_estimateGas", params).await?;
        quantity_result(&result, "eth_estimateGas")
    }

    pub async fn block_number(&self) -> Result<u64, RegistryError> {
        let result = self.raw_request("eth_blockNumber", vec![]).await?;
        let height = quantity_result(&result, "eth_blockNumber")?;
        self.supervisor.observe_height(height);
        Ok(height)
    }

    /// Fetch a block header, retrying while the node answers `null`.
    pub async fn get_block(&self, tag: BlockTag) -> Result<BlockSummary, RegistryError> {
        let mut attempt = 0;
        loop {
            let result = self
                .raw_request("eth_getBlockByNumber", vec![tag.to_param(), json!(false)])
                .await?;
            if let Some(block) = BlockSummary::from_json(&result) {
                return Ok(block);
            }
            attempt += 1;
            let Some(delay) = self.config.block_retry.next_delay(attempt) else {
                tracing::warn!(block = %tag, attempts = attempt, "block unavailable");
                return Err(RegistryError::BlockUnavailable {
                    block: tag.to_string(),
                    attempts: attempt,
                });
            };
            tracing::debug!(block = %tag, attempt, "empty block response, retrying");
            tokio::time::sleep(delay).await;
        }
    }

    /// `eth_getLogs` over `[from, to]`, split into `max_log_range` windows.
    pub async fn get_logs(&self, filter: &LogFilter, from: u64, to: u64) -> Result<Vec<RawLog>, RegistryError> {
        let step = self.config.max_log_range.max(1);
        let mut logs = Vec::new();
        let mut start = from;
        while start <= to {
            let end = start.saturating_add(step - 1).min(to);
            let result = self
                .raw_request("eth_getLogs", vec![filter.range_params(start, end)])
                .await?;
            let batch: Vec<RawLog> =
                serde_json::from_value(result).map_err(|e| RegistryError::RemoteCall {
                    method: "eth_getLogs".into(),
                    reason: e.to_string(),
                })?;
            tracing::debug!(from = start, to = end, count = batch.len(), "fetched logs");
            logs.extend(batch);
            if end == u64::MAX {
                break;
            }
            start = end + 1;
        }
        Ok(logs)
    }

    /// Open a live log subscription on the current transport.
    pub async fn subscribe_logs(&self, filter: &LogFilter) -> Result<LogStream, RegistryError> {
        let transport = self.supervisor.transport()?;
        match transport.subscribe_logs(filter).await {
            Ok(stream) => Ok(stream),
            Err(e) => {
                if e.is_connection_error() {
                    self.supervisor
                        .request_reconnect_for(&transport, &e.to_string())
                        .await;
                }
                Err(e.into_registry("eth_subscribe"))
            }
        }
    }
}

fn hex_result(v: &Value, method: &str) -> Result<Vec<u8>, RegistryError> {
    let bad = |reason: String| RegistryError::RemoteCall {
        method: method.to_string(),
        reason,
    };
    let s = v.as_str().ok_or_else(|| bad(format!("expected hex string, got {v}")))?;
    hex::decode(s.strip_prefix("0x").unwrap_or(s)).map_err(|e| bad(e.to_string()))
}

fn quantity_result(v: &Value, method: &str) -> Result<u64, RegistryError> {
    v.as_str()
        .ok_or_else(|| format!("expected quantity, got {v}"))
        .and_then(|s| parse_quantity(s).map_err(|e| e.to_string()))
        .map_err(|reason| RegistryError::RemoteCall {
            method: method.to_string(),
            reason,
        })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::abi::{as_address, selector};
    use crate::error::TransportError;
    use crate::mock::{raw_log, MockConnector, MockLedger};
    use crate::supervisor::SupervisorConfig;

    const OWNER: ViewFunction = ViewFunction::new("owner()", "(address)");

    fn fast() -> ReaderConfig {
        ReaderConfig {
            call_retry: RetryPolicy::exponential(3, Duration::from_millis(1)),
            block_retry: RetryPolicy::linear(4, Duration::from_millis(1)),
            max_log_range: 10,
        }
    }

    async fn reader(ledger: Arc<MockLedger>) -> ChainReader {
        let connector = Arc::new(MockConnector::new(ledger));
        let sup = Arc::new(ConnectionSupervisor::new(connector, SupervisorConfig::default()));
        sup.ensure_connected().await.unwrap();
        ChainReader::new(sup, fast())
    }

    fn contract() -> MemberAddress {
        MemberAddress::parse(&"cc".repeat(20)).unwrap()
    }

    #[tokio::test]
    async fn call_encodes_and_decodes() {
        let ledger = MockLedger::new();
        ledger.on("eth_call", |params| {
            let data = params[0]["data"].as_str().unwrap_or_default();
            assert_eq!(data, format!("0x{}", hex::encode(selector("owner()"))));
            Ok(json!(format!("0x{}{}", "0".repeat(24), "ab".repeat(20))))
        });
        let reader = reader(ledger).await;
        let owner = reader.read_field(&contract(), &OWNER).await.unwrap();
        assert_eq!(as_address(&owner).unwrap().as_str(), format!("0x{}", "ab".repeat(20)));
    }

    #[tokio::test]
    async fn empty_return_data_is_remote_call_error() {
        let ledger = MockLedger::new();
        ledger.on("eth_call", |_| Ok(json!("0x")));
        let reader = reader(ledger).await;
        let err = reader.read_field(&contract(), &OWNER).await.unwrap_err();
        assert!(matches!(err, RegistryError::RemoteCall { .. }));
    }

    #[tokio::test]
    async fn not_connected_fails_fast() {
        let connector = Arc::new(MockConnector::new(MockLedger::new()));
        let sup = Arc::new(ConnectionSupervisor::new(connector, SupervisorConfig::default()));
        let reader = ChainReader::new(sup, fast());
        let err = reader.block_number().await.unwrap_err();
        assert!(matches!(err, RegistryError::NotConnected));
    }

    #[tokio::test]
    async fn retryable_failures_are_bounded() {
        let ledger = MockLedger::new();
        let reader = reader(ledger.clone()).await;
        ledger.set_failing(true);
        let err = reader.block_number().await.unwrap_err();
        assert!(matches!(err, RegistryError::RemoteCall { .. }));
        // Handshake + first try + 3 retries.
        assert_eq!(ledger.request_count("eth_blockNumber"), 5);
    }

    #[tokio::test]
    async fn connection_failure_requests_reconnect() {
        let ledger = MockLedger::new();
        ledger.on("eth_call", |_| Err(TransportError::Closed));
        let reader = reader(ledger).await;
        let err = reader.read_field(&contract(), &OWNER).await.unwrap_err();
        assert!(err.is_connection_error());
        assert!(!reader.supervisor().is_connected());
    }

    #[tokio::test]
    async fn get_block_retries_null_then_succeeds() {
        let ledger = MockLedger::new();
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        ledger.on("eth_getBlockByNumber", move |_| {
            if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                return Ok(Value::Null);
            }
            Ok(json!({"number": "0x10", "hash": "0xaa", "parentHash": "0xbb", "timestamp": "0x5"}))
        });
        let reader = reader(ledger).await;
        let block = reader.get_block(BlockTag::Number(16)).await.unwrap();
        assert_eq!(block.number, 16);
        assert_eq!(block.timestamp, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn get_block_gives_up() {
        let ledger = MockLedger::new();
        ledger.on("eth_getBlockByNumber", |_| Ok(Value::Null));
        let reader = reader(ledger.clone()).await;
        let err = reader.get_block(BlockTag::Latest).await.unwrap_err();
        assert!(matches!(err, RegistryError::BlockUnavailable { attempts: 5, .. }));
        assert_eq!(ledger.request_count("eth_getBlockByNumber"), 5);
    }

    #[tokio::test]
    async fn get_logs_splits_ranges() {
        let ledger = MockLedger::new();
        for block in [3, 12, 25] {
            ledger.store_log(raw_log("0x00", vec![], &[], block, 0));
        }
        let reader = reader(ledger.clone()).await;
        let logs = reader.get_logs(&LogFilter::default(), 0, 25).await.unwrap();
        assert_eq!(logs.len(), 3);
        assert_eq!(ledger.request_count("eth_getLogs"), 3);

        assert!(reader.get_logs(&LogFilter::default(), 9, 8).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn block_number_updates_observed_height() {
        let ledger = MockLedger::new();
        ledger.set_height(4);
        let reader = reader(ledger.clone()).await;
        ledger.set_height(9);
        assert_eq!(reader.block_number().await.unwrap(), 9);
        assert_eq!(reader.supervisor().current_height().unwrap(), 9);
    }
}
