//! Error taxonomy for the registry replica.
//!
//! Integrity mismatches and malformed documents are not errors here: they are
//! recorded on the entity as a [`DocumentStatus`](crate::types::DocumentStatus).

use thiserror::Error;

/// Errors surfaced by the supervisor, reader, synchronizer and stores.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Transport-level failure; the supervisor reconnects, never fatal.
    #[error("connection error: {0}")]
    Connection(String),

    /// A call was attempted while the supervisor holds no live connection.
    #[error("not connected to the ledger node")]
    NotConnected,

    /// One RPC returned a bad response after bounded retries.
    #[error("remote call '{method}' failed: {reason}")]
    RemoteCall { method: String, reason: String },

    /// The node kept returning an empty block.
    #[error("block {block} unavailable after {attempts} attempts")]
    BlockUnavailable { block: String, attempts: u32 },

    /// Calldata could not be encoded or return data could not be decoded.
    #[error("ABI error: {0}")]
    Abi(String),

    /// The off-chain document could not be retrieved.
    #[error("document error: {0}")]
    Document(String),

    /// Following parent references led back to an already visited entity.
    #[error("parent cycle detected at {address}")]
    ParentCycle { address: String },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("storage error: {0}")]
    Storage(String),

    /// The requested network is not configured. Fails fast at startup.
    #[error("unknown network: {0}")]
    UnknownNetwork(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl RegistryError {
    /// Returns `true` if the error means the connection itself is gone.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::NotConnected)
    }

    /// Returns `true` if the failure concerns one member only (bad remote
    /// data, a rejected parent link) and a batch may move on without it.
    pub fn is_member_scoped(&self) -> bool {
        matches!(
            self,
            Self::RemoteCall { .. }
                | Self::Abi(_)
                | Self::Document(_)
                | Self::ParentCycle { .. }
                | Self::InvalidAddress(_)
        )
    }

    /// Returns `true` if the error is fatal at startup (configuration problems).
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::UnknownNetwork(_) | Self::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_errors_are_classified() {
        assert!(RegistryError::NotConnected.is_connection_error());
        assert!(RegistryError::Connection("reset".into()).is_connection_error());
        assert!(!RegistryError::Storage("disk".into()).is_connection_error());
    }

    #[test]
    fn storage_errors_are_not_member_scoped() {
        assert!(RegistryError::ParentCycle { address: "0x1".into() }.is_member_scoped());
        assert!(RegistryError::Abi("short".into()).is_member_scoped());
        assert!(!RegistryError::Storage("disk full".into()).is_member_scoped());
        assert!(!RegistryError::NotConnected.is_member_scoped());
    }

    #[test]
    fn only_config_errors_are_fatal() {
        assert!(RegistryError::UnknownNetwork("nope".into()).is_fatal());
        assert!(!RegistryError::RemoteCall {
            method: "eth_call".into(),
            reason: "reverted".into(),
        }
        .is_fatal());
    }
}
