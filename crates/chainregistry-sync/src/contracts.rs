//! The registry contracts as seen by the walker and the synchronizer.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use chainregistry_core::{MemberAddress, RegistryError};
use chainregistry_rpc::abi::{
    address_value, as_address, as_array, as_bytes32_hex, as_string, as_u64, as_uint_string,
    uint_value,
};
use chainregistry_rpc::{ChainReader, ViewFunction};

// Entrypoint
pub const SEGMENT_COUNT: ViewFunction = ViewFunction::new("segmentCount()", "(uint256)");
pub const SEGMENTS: ViewFunction = ViewFunction::new("segments(uint256)", "(address)");
// Directory
pub const GET_MEMBERS: ViewFunction = ViewFunction::new("getMembers()", "(address[])");
// Member
pub const OWNER: ViewFunction = ViewFunction::new("owner()", "(address)");
pub const PARENT: ViewFunction = ViewFunction::new("parent()", "(address)");
pub const DOCUMENT_URI: ViewFunction = ViewFunction::new("documentUri()", "(string)");
pub const DOCUMENT_HASH: ViewFunction = ViewFunction::new("documentHash()", "(bytes32)");
pub const CREATED_AT: ViewFunction = ViewFunction::new("createdAt()", "(uint256)");
pub const GET_KEYS: ViewFunction = ViewFunction::new("getKeys()", "(bytes32[])");
// Deposit
pub const DEPOSIT_OF: ViewFunction = ViewFunction::new("depositOf(address)", "(uint256)");

const ZERO_HASH: &str = "0x0000000000000000000000000000000000000000000000000000000000000000";

/// On-chain fields of one member contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnChainMember {
    pub owner: MemberAddress,
    pub parent: Option<MemberAddress>,
    pub document_uri: String,
    /// `None` when the commitment is the zero hash.
    pub document_hash: Option<String>,
    pub created_at_block: u64,
    /// Associated keys, sentinel entry already dropped.
    pub keys: BTreeSet<String>,
}

/// Read access to the registry contracts.
#[async_trait]
pub trait RegistryContracts: Send + Sync {
    async fn segment_count(&self) -> Result<u64, RegistryError>;

    /// Directory address of segment `index` (zero = empty segment).
    async fn segment_directory(&self, index: u64) -> Result<MemberAddress, RegistryError>;

    async fn directory_members(&self, directory: &MemberAddress) -> Result<Vec<MemberAddress>, RegistryError>;

    async fn member_state(&self, member: &MemberAddress) -> Result<OnChainMember, RegistryError>;

    /// Stake held for `member`, `None` when no deposit contract is configured.
    async fn deposit_of(&self, member: &MemberAddress) -> Result<Option<String>, RegistryError>;
}

/// [`RegistryContracts`] backed by live `eth_call`s.
pub struct LedgerContracts {
    reader: Arc<ChainReader>,
    entrypoint: MemberAddress,
    deposit: Option<MemberAddress>,
}

impl LedgerContracts {
    pub fn new(reader: Arc<ChainReader>, entrypoint: MemberAddress, deposit: Option<MemberAddress>) -> Self {
        Self {
            reader,
            entrypoint,
            deposit,
        }
    }

    pub fn entrypoint(&self) -> &MemberAddress {
        &self.entrypoint
    }
}

#[async_trait]
impl RegistryContracts for LedgerContracts {
    async fn segment_count(&self) -> Result<u64, RegistryError> {
        as_u64(&self.reader.read_field(&self.entrypoint, &SEGMENT_COUNT).await?)
    }

    async fn segment_directory(&self, index: u64) -> Result<MemberAddress, RegistryError> {
        let out = self
            .reader
            .call(&self.entrypoint, &SEGMENTS, &[uint_value(index)])
            .await?;
        out.first()
            .ok_or_else(|| RegistryError::Abi("segments() returned nothing".into()))
            .and_then(as_address)
    }

    async fn directory_members(&self, directory: &MemberAddress) -> Result<Vec<MemberAddress>, RegistryError> {
        let list = self.reader.read_field(directory, &GET_MEMBERS).await?;
        as_array(&list)?.iter().map(as_address).collect()
    }

    async fn member_state(&self, member: &MemberAddress) -> Result<OnChainMember, RegistryError> {
        let r = &self.reader;
        let (owner, parent, uri, hash, created, keys) = tokio::try_join!(
            r.read_field(member, &OWNER),
            r.read_field(member, &PARENT),
            r.read_field(member, &DOCUMENT_URI),
            r.read_field(member, &DOCUMENT_HASH),
            r.read_field(member, &CREATED_AT),
            r.read_field(member, &GET_KEYS),
        )?;

        let parent = as_address(&parent)?;
        let hash = as_bytes32_hex(&hash)?;
        Ok(OnChainMember {
            owner: as_address(&owner)?,
            parent: (!parent.is_zero()).then_some(parent),
            document_uri: as_string(&uri)?,
            document_hash: (hash != ZERO_HASH).then_some(hash),
            created_at_block: as_u64(&created)?,
            keys: as_array(&keys)?
                .iter()
                .skip(1)
                .map(as_bytes32_hex)
                .collect::<Result<_, _>>()?,
        })
    }

    async fn deposit_of(&self, member: &MemberAddress) -> Result<Option<String>, RegistryError> {
        let Some(deposit) = &self.deposit else {
            return Ok(None);
        };
        let out = self
            .reader
            .call(deposit, &DEPOSIT_OF, &[address_value(member)?])
            .await?;
        out.first()
            .ok_or_else(|| RegistryError::Abi("depositOf() returned nothing".into()))
            .and_then(as_uint_string)
            .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{json, Value};

    use super::*;
    use chainregistry_rpc::abi::selector;
    use chainregistry_rpc::mock::{MockConnector, MockLedger};
    use chainregistry_rpc::{ConnectionSupervisor, ReaderConfig, RetryPolicy, SupervisorConfig};

    fn word(n: u64) -> String {
        format!("{n:064x}")
    }

    fn address_word(a: &MemberAddress) -> String {
        format!("{:0>64}", a.as_str().trim_start_matches("0x"))
    }

    fn addr(n: u64) -> MemberAddress {
        MemberAddress::parse(&format!("{n:040x}")).unwrap()
    }

    /// Answers member-contract view calls by selector.
    fn member_ledger() -> Arc<MockLedger> {
        let ledger = MockLedger::new();
        ledger.on("eth_call", |params| {
            let data = params[0]["data"].as_str().unwrap_or_default();
            let sel = |sig: &str| format!("0x{}", hex::encode(selector(sig)));
            let body = if data == sel("owner()") {
                address_word(&addr(0xee))
            } else if data == sel("parent()") {
                word(0)
            } else if data == sel("documentUri()") {
                let uri = hex::encode("ipfs://doc");
                format!("{}{}{:0<64}", word(0x20), word(10), uri)
            } else if data == sel("documentHash()") {
                "ab".repeat(32)
            } else if data == sel("createdAt()") {
                word(42)
            } else if data == sel("getKeys()") {
                format!("{}{}{}{}", word(0x20), word(2), "00".repeat(32), "cd".repeat(32))
            } else {
                return Ok(Value::String("0x".into()));
            };
            Ok(json!(format!("0x{body}")))
        });
        ledger
    }

    async fn contracts(ledger: Arc<MockLedger>, deposit: Option<MemberAddress>) -> LedgerContracts {
        let connector = Arc::new(MockConnector::new(ledger));
        let sup = Arc::new(ConnectionSupervisor::new(connector, SupervisorConfig::default()));
        sup.ensure_connected().await.unwrap();
        let config = ReaderConfig {
            call_retry: RetryPolicy::exponential(1, Duration::from_millis(1)),
            ..ReaderConfig::default()
        };
        let reader = Arc::new(ChainReader::new(sup, config));
        LedgerContracts::new(reader, addr(1), deposit)
    }

    #[tokio::test]
    async fn member_state_decodes_all_fields() {
        let c = contracts(member_ledger(), None).await;
        let state = c.member_state(&addr(0xa1)).await.unwrap();
        assert_eq!(state.owner, addr(0xee));
        assert_eq!(state.parent, None);
        assert_eq!(state.document_uri, "ipfs://doc");
        assert_eq!(state.document_hash, Some(format!("0x{}", "ab".repeat(32))));
        assert_eq!(state.created_at_block, 42);
        assert_eq!(state.keys, BTreeSet::from([format!("0x{}", "cd".repeat(32))]));
    }

    #[tokio::test]
    async fn deposit_without_contract_is_none() {
        let c = contracts(member_ledger(), None).await;
        assert_eq!(c.deposit_of(&addr(0xa1)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn deposit_call_failure_is_error() {
        let c = contracts(member_ledger(), Some(addr(0xd0))).await;
        assert!(c.deposit_of(&addr(0xa1)).await.is_err());
    }
}
