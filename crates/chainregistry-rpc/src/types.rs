//! Block, log and filter types exchanged with the node.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use chainregistry_core::MemberAddress;

use crate::error::TransportError;

/// Parse a hex quantity (`0x1a`) into a `u64`.
pub fn parse_quantity(s: &str) -> Result<u64, TransportError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16)
        .map_err(|e| TransportError::Other(format!("bad quantity '{s}': {e}")))
}

/// Encode a `u64` as a hex quantity.
pub fn quantity(n: u64) -> String {
    format!("0x{n:x}")
}

/// Which block to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    Number(u64),
}

impl BlockTag {
    pub fn to_param(self) -> Value {
        match self {
            Self::Latest => Value::String("latest".into()),
            Self::Number(n) => Value::String(quantity(n)),
        }
    }
}

impl std::fmt::Display for BlockTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Latest => write!(f, "latest"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

/// The fields of a block the replica cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    pub number: u64,
    pub hash: String,
    pub parent_hash: String,
    pub timestamp: i64,
}

impl BlockSummary {
    /// Convert an `eth_getBlockByNumber` result. `None` for `null` or a
    /// block missing its header fields (pending / partially indexed).
    pub fn from_json(v: &Value) -> Option<Self> {
        Some(Self {
            number: parse_quantity(v.get("number")?.as_str()?).ok()?,
            hash: v.get("hash")?.as_str()?.to_string(),
            parent_hash: v.get("parentHash")?.as_str()?.to_string(),
            timestamp: parse_quantity(v.get("timestamp")?.as_str()?).ok()? as i64,
        })
    }
}

/// A raw EVM log as returned by `eth_getLogs` or an `eth_subscription`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "transactionHash", default)]
    pub tx_hash: Option<String>,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(default)]
    pub removed: bool,
}

impl RawLog {
    pub fn block_number_u64(&self) -> Result<u64, TransportError> {
        parse_quantity(&self.block_number)
    }

    pub fn log_index_u64(&self) -> Result<u64, TransportError> {
        parse_quantity(&self.log_index)
    }

    /// Log data bytes (hex-decoded).
    pub fn data_bytes(&self) -> Result<Vec<u8>, TransportError> {
        let digits = self.data.strip_prefix("0x").unwrap_or(&self.data);
        hex::decode(digits).map_err(|e| TransportError::Other(format!("bad log data: {e}")))
    }
}

/// Address + topic0 filter for log queries and subscriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    /// Emitting contracts (empty = any).
    pub addresses: Vec<MemberAddress>,
    /// Accepted topic0 values (empty = any).
    pub topic0: Vec<String>,
}

impl LogFilter {
    pub fn address(address: MemberAddress) -> Self {
        Self {
            addresses: vec![address],
            topic0: vec![],
        }
    }

    pub fn with_topics(mut self, topics: impl IntoIterator<Item = String>) -> Self {
        self.topic0.extend(topics);
        self
    }

    /// Filter object for `eth_subscribe("logs", …)`.
    pub fn subscribe_params(&self) -> Value {
        let mut obj = serde_json::Map::new();
        if !self.addresses.is_empty() {
            obj.insert(
                "address".into(),
                json!(self.addresses.iter().map(|a| a.as_str()).collect::<Vec<_>>()),
            );
        }
        if !self.topic0.is_empty() {
            obj.insert("topics".into(), json!([self.topic0]));
        }
        Value::Object(obj)
    }

    /// Filter object for `eth_getLogs` over `[from, to]`.
    pub fn range_params(&self, from: u64, to: u64) -> Value {
        let mut v = self.subscribe_params();
        if let Value::Object(obj) = &mut v {
            obj.insert("fromBlock".into(), json!(quantity(from)));
            obj.insert("toBlock".into(), json!(quantity(to)));
        }
        v
    }
}
