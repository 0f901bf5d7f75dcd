//! Shared types for the registry replica.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RegistryError;

// ─── MemberAddress ────────────────────────────────────────────────────────────

/// A ledger address in canonical form: `0x` followed by 40 lowercase hex digits.
///
/// Canonicalising on construction makes addresses usable as map keys no matter
/// how the node or the user capitalised them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MemberAddress(String);

impl MemberAddress {
    const ZERO: &'static str = "0x0000000000000000000000000000000000000000";

    /// Parse and canonicalise an address (`0x` prefix optional, any case).
    pub fn parse(s: &str) -> Result<Self, RegistryError> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if digits.len() != 40 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(RegistryError::InvalidAddress(s.to_string()));
        }
        Ok(Self(format!("0x{}", digits.to_ascii_lowercase())))
    }

    /// The zero address, used on-chain as the "empty" sentinel.
    pub fn zero() -> Self {
        Self(Self::ZERO.to_string())
    }

    pub fn is_zero(&self) -> bool {
        self.0 == Self::ZERO
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MemberAddress {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MemberAddress {
    type Error = RegistryError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<MemberAddress> for String {
    fn from(a: MemberAddress) -> Self {
        a.0
    }
}

// ─── Connection state ─────────────────────────────────────────────────────────

/// Liveness of the supervised ledger connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Connected, but the last heartbeat did not answer in time.
    Degraded,
}

impl ConnectionState {
    /// Returns `true` if a transport is held (possibly degraded).
    pub fn has_transport(&self) -> bool {
        matches!(self, Self::Connected | Self::Degraded)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Degraded => write!(f, "degraded"),
        }
    }
}

/// A point-in-time snapshot of the supervisor's connection bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub last_error: Option<String>,
    /// Failed connect attempts since the last success.
    pub consecutive_failures: u32,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// Last observed head block number.
    pub height: Option<u64>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            last_error: None,
            consecutive_failures: 0,
            last_heartbeat_at: None,
            height: None,
        }
    }
}

// ─── Documents ────────────────────────────────────────────────────────────────

/// Outcome of the last attempt to resolve an entity's off-chain document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Content hash matches the on-chain commitment and the content parsed.
    Verified,
    /// Content was fetched but hashes to something else.
    Mismatch { computed: String },
    /// Hash matched but the content is not valid structured data.
    Malformed { reason: String },
    /// The fetch failed (network, non-2xx, oversize body).
    Unavailable { reason: String },
    /// No URI or no commitment on-chain; nothing to check.
    Missing,
}

impl DocumentStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Verified => "verified",
            Self::Mismatch { .. } => "mismatch",
            Self::Malformed { .. } => "malformed",
            Self::Unavailable { .. } => "unavailable",
            Self::Missing => "missing",
        }
    }
}

/// Classification fields derived from a verified document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityProfile {
    pub entity_type: String,
    pub category: String,
    pub display_name: String,
    pub country: String,
}

impl EntityProfile {
    pub const UNKNOWN: &'static str = "unknown";
}

impl Default for EntityProfile {
    fn default() -> Self {
        Self {
            entity_type: Self::UNKNOWN.into(),
            category: Self::UNKNOWN.into(),
            display_name: Self::UNKNOWN.into(),
            country: Self::UNKNOWN.into(),
        }
    }
}

// ─── EntityRecord ─────────────────────────────────────────────────────────────

/// The canonical replica row for one registered entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub address: MemberAddress,
    pub owner: MemberAddress,
    pub parent: Option<MemberAddress>,
    /// Segment indices this member is listed under.
    pub segments: BTreeSet<u64>,
    pub document_uri: String,
    /// On-chain content commitment (`0x…` hex), `None` when unset.
    pub document_hash: Option<String>,
    pub integrity_verified: bool,
    pub document_status: DocumentStatus,
    /// Parsed document, present only when verified.
    pub document: Option<Value>,
    pub profile: EntityProfile,
    pub keys: BTreeSet<String>,
    pub created_at_block: u64,
    /// Stake held in the deposit contract (decimal string), best-effort.
    pub deposit: Option<String>,
    pub last_checked_at: DateTime<Utc>,
}

impl EntityRecord {
    /// Compare everything except `last_checked_at`.
    pub fn same_state(&self, other: &EntityRecord) -> bool {
        let mut a = self.clone();
        a.last_checked_at = other.last_checked_at;
        a == *other
    }

    /// Returns `true` if an on-chain commitment exists to verify against.
    pub fn has_commitment(&self) -> bool {
        self.document_hash.is_some()
    }

    /// Drop the verification result (the URI or hash changed).
    pub fn clear_verification(&mut self) {
        self.integrity_verified = false;
        self.document_status = DocumentStatus::Missing;
        self.document = None;
        self.profile = EntityProfile::default();
    }
}

// ─── ChangeEvent ──────────────────────────────────────────────────────────────

/// What changed, with the new value(s).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeKind {
    MemberCreated { segment: u64 },
    OwnerChanged { owner: MemberAddress },
    DocumentUriChanged { uri: String },
    DocumentHashChanged { hash: Option<String> },
    KeyAdded { key: String },
    KeyRemoved { key: String },
}

impl ChangeKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MemberCreated { .. } => "MemberCreated",
            Self::OwnerChanged { .. } => "OwnerChanged",
            Self::DocumentUriChanged { .. } => "DocumentUriChanged",
            Self::DocumentHashChanged { .. } => "DocumentHashChanged",
            Self::KeyAdded { .. } => "KeyAdded",
            Self::KeyRemoved { .. } => "KeyRemoved",
        }
    }
}

/// A registry change observed on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub member: MemberAddress,
    /// Block the event was emitted in (the cursor sequence number).
    pub block_number: u64,
    pub log_index: u64,
    pub kind: ChangeKind,
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> EntityRecord {
        EntityRecord {
            address: MemberAddress::parse("0x00000000000000000000000000000000000000a1").unwrap(),
            owner: MemberAddress::zero(),
            parent: None,
            segments: BTreeSet::from([1]),
            document_uri: "https://example.org/a.json".into(),
            document_hash: Some("0xabc".into()),
            integrity_verified: true,
            document_status: DocumentStatus::Verified,
            document: Some(serde_json::json!({"name": "A"})),
            profile: EntityProfile::default(),
            keys: BTreeSet::new(),
            created_at_block: 10,
            deposit: None,
            last_checked_at: Utc::now(),
        }
    }

    #[test]
    fn address_is_canonicalised() {
        let a = MemberAddress::parse("0xABCDEFabcdef0000000000000000000000000001").unwrap();
        assert_eq!(a.as_str(), "0xabcdefabcdef0000000000000000000000000001");
        let b: MemberAddress = "abcdefabcdef0000000000000000000000000001".parse().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn address_rejects_bad_input() {
        assert!(MemberAddress::parse("0x1234").is_err());
        assert!(MemberAddress::parse("0xzz00000000000000000000000000000000000000").is_err());
    }

    #[test]
    fn zero_address_sentinel() {
        assert!(MemberAddress::zero().is_zero());
        assert!(!MemberAddress::parse("0x0000000000000000000000000000000000000001")
            .unwrap()
            .is_zero());
    }

    #[test]
    fn address_serde_roundtrip_validates() {
        let json = serde_json::to_string(&MemberAddress::zero()).unwrap();
        assert_eq!(json, format!("\"{}\"", MemberAddress::zero()));
        assert!(serde_json::from_str::<MemberAddress>("\"0x12\"").is_err());
    }

    #[test]
    fn same_state_ignores_check_time() {
        let a = record();
        let mut b = a.clone();
        b.last_checked_at = a.last_checked_at + chrono::Duration::seconds(30);
        assert!(a.same_state(&b));
        b.owner = a.address.clone();
        assert!(!a.same_state(&b));
    }

    #[test]
    fn clear_verification_resets_document_fields() {
        let mut r = record();
        r.profile.display_name = "A".into();
        r.clear_verification();
        assert!(!r.integrity_verified);
        assert!(r.document.is_none());
        assert_eq!(r.profile, EntityProfile::default());
    }
}
