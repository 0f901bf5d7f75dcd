//! Registry configuration, loaded from TOML.
//!
//! ```toml
//! [logging]
//! level = "info"
//!
//! [supervisor]
//! watchdog_interval_ms = 1000
//!
//! [networks.mainnet]
//! ws_url = "wss://node.example.org/ws"
//! http_url = "https://node.example.org"
//! entrypoint = "0x…"
//! deployment_block = 1200000
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::types::MemberAddress;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub logging: LogConfig,
    pub supervisor: SupervisorSettings,
    pub sync: SyncSettings,
    /// network name → endpoints and contract addresses
    pub networks: BTreeMap<String, NetworkConfig>,
}

impl RegistryConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, RegistryError> {
        let config: Self =
            toml::from_str(s).map_err(|e| RegistryError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| RegistryError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Look up a network by name.
    pub fn network(&self, name: &str) -> Result<&NetworkConfig, RegistryError> {
        self.networks
            .get(name)
            .ok_or_else(|| RegistryError::UnknownNetwork(name.to_string()))
    }

    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.sync.concurrency == 0 {
            return Err(RegistryError::Config("sync.concurrency must be > 0".into()));
        }
        if self.sync.max_log_range == 0 {
            return Err(RegistryError::Config("sync.max_log_range must be > 0".into()));
        }
        for (name, network) in &self.networks {
            network
                .validate()
                .map_err(|e| RegistryError::Config(format!("networks.{name}: {e}")))?;
        }
        Ok(())
    }
}

/// Log level and format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// "trace" | "debug" | "info" | "warn" | "error"; `RUST_LOG` overrides it.
    pub level: String,
    /// Emit JSON structured logs instead of human-readable text.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

/// Connection supervisor timing, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    pub watchdog_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub heartbeat_timeout_ms: u64,
    /// Consecutive failures after which `ensure_connected` gives up.
    pub max_connect_attempts: u32,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            watchdog_interval_ms: 1_000,
            heartbeat_interval_ms: 5_000,
            connect_timeout_ms: 10_000,
            heartbeat_timeout_ms: 5_000,
            max_connect_attempts: 5,
        }
    }
}

/// Synchronization and event-applier tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Members synchronized in parallel during a bootstrap pass.
    pub concurrency: usize,
    /// Retries of a null `eth_getBlockByNumber` result.
    pub block_retry_attempts: u32,
    /// Linear backoff step between block retries.
    pub block_retry_delay_ms: u64,
    /// Retries of a transient RPC failure.
    pub call_retries: u32,
    /// Widest block range per `eth_getLogs` request.
    pub max_log_range: u64,
    pub resubscribe_delay_ms: u64,
    pub document_timeout_ms: u64,
    pub max_document_bytes: usize,
    /// How long in-flight syncs may run after shutdown is requested.
    pub shutdown_grace_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            concurrency: 8,
            block_retry_attempts: 30,
            block_retry_delay_ms: 200,
            call_retries: 3,
            max_log_range: 2_000,
            resubscribe_delay_ms: 1_000,
            document_timeout_ms: 10_000,
            max_document_bytes: 1024 * 1024,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl SyncSettings {
    pub fn document_timeout(&self) -> Duration {
        Duration::from_millis(self.document_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Algorithm that produced the on-chain document commitment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Keccak256,
    Sha256,
}

/// JSON pointers tried, in order, for each profile field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilePaths {
    pub entity_type: Vec<String>,
    pub category: Vec<String>,
    pub display_name: Vec<String>,
    pub country: Vec<String>,
}

impl Default for ProfilePaths {
    fn default() -> Self {
        fn paths(p: &[&str]) -> Vec<String> {
            p.iter().map(|s| s.to_string()).collect()
        }
        Self {
            entity_type: paths(&["/entityType", "/type", "/organization/type"]),
            category: paths(&["/directory", "/category", "/organization/category"]),
            display_name: paths(&["/name", "/displayName", "/organization/name"]),
            country: paths(&["/country", "/address/country", "/organization/country"]),
        }
    }
}

/// Endpoints and contract addresses for one network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// WebSocket endpoint (`ws://` or `wss://`) used for subscriptions.
    pub ws_url: String,
    /// Optional HTTP endpoint for request/response calls.
    #[serde(default)]
    pub http_url: Option<String>,
    /// Root registry contract.
    pub entrypoint: String,
    /// Contract answering `depositOf(address)`.
    #[serde(default)]
    pub deposit_contract: Option<String>,
    /// Lowest block at which the entrypoint can have emitted events.
    #[serde(default)]
    pub deployment_block: u64,
    #[serde(default)]
    pub hash_algorithm: HashAlgorithm,
    #[serde(default)]
    pub profile_paths: ProfilePaths,
}

impl NetworkConfig {
    pub fn entrypoint_address(&self) -> Result<MemberAddress, RegistryError> {
        MemberAddress::parse(&self.entrypoint)
    }

    pub fn deposit_address(&self) -> Result<Option<MemberAddress>, RegistryError> {
        self.deposit_contract
            .as_deref()
            .map(MemberAddress::parse)
            .transpose()
    }

    fn validate(&self) -> Result<(), RegistryError> {
        if !(self.ws_url.starts_with("ws://") || self.ws_url.starts_with("wss://")) {
            return Err(RegistryError::Config(format!(
                "ws_url must be ws:// or wss://, got '{}'",
                self.ws_url
            )));
        }
        if let Some(http) = &self.http_url {
            if !(http.starts_with("http://") || http.starts_with("https://")) {
                return Err(RegistryError::Config(format!(
                    "http_url must be http:// or https://, got '{http}'"
                )));
            }
        }
        let entrypoint = self.entrypoint_address()?;
        if entrypoint.is_zero() {
            return Err(RegistryError::Config("entrypoint is the zero address".into()));
        }
        self.deposit_address()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[logging]
level = "debug"

[sync]
concurrency = 4

[networks.local]
ws_url = "ws://127.0.0.1:8546"
http_url = "http://127.0.0.1:8545"
entrypoint = "0x5FbDB2315678afecb367f032d93F642f64180aa3"
deployment_block = 12
hash_algorithm = "sha256"
"#;

    #[test]
    fn parses_sample_with_defaults() {
        let cfg = RegistryConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.sync.concurrency, 4);
        assert_eq!(cfg.sync.block_retry_attempts, 30);
        assert_eq!(cfg.supervisor.watchdog_interval_ms, 1_000);

        let local = cfg.network("local").unwrap();
        assert_eq!(local.deployment_block, 12);
        assert_eq!(local.hash_algorithm, HashAlgorithm::Sha256);
        assert_eq!(local.profile_paths, ProfilePaths::default());
        assert_eq!(
            local.entrypoint_address().unwrap().as_str(),
            "0x5fbdb2315678afecb367f032d93f642f64180aa3"
        );
    }

    #[test]
    fn unknown_network_fails_fast() {
        let cfg = RegistryConfig::from_toml_str(SAMPLE).unwrap();
        let err = cfg.network("mainnet").unwrap_err();
        assert!(matches!(err, RegistryError::UnknownNetwork(ref n) if n == "mainnet"));
        assert!(err.is_fatal());
    }

    #[test]
    fn rejects_bad_entrypoint() {
        let bad = SAMPLE.replace("0x5FbDB2315678afecb367f032d93F642f64180aa3", "0x1234");
        assert!(matches!(
            RegistryConfig::from_toml_str(&bad),
            Err(RegistryError::Config(_))
        ));
    }

    #[test]
    fn rejects_http_ws_url() {
        let bad = SAMPLE.replace("ws://127.0.0.1:8546", "http://127.0.0.1:8546");
        assert!(RegistryConfig::from_toml_str(&bad).is_err());
    }

    #[test]
    fn empty_document_is_valid() {
        let cfg = RegistryConfig::from_toml_str("").unwrap();
        assert!(cfg.networks.is_empty());
        assert_eq!(cfg.sync.concurrency, 8);
    }
}
