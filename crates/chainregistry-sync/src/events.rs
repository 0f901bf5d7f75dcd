//! Registry log decoding.

use std::collections::HashMap;

use chainregistry_core::{ChangeEvent, ChangeKind, RegistryError};
use chainregistry_rpc::abi::{
    as_address, as_bytes32_hex, as_string, decode_params, event_topic, topic_address, topic_u64,
};
use chainregistry_rpc::RawLog;

pub const MEMBER_CREATED: &str = "MemberCreated(address,uint256)";
pub const OWNER_CHANGED: &str = "OwnerChanged(address,address)";
pub const DOCUMENT_URI_CHANGED: &str = "DocumentUriChanged(address,string)";
pub const DOCUMENT_HASH_CHANGED: &str = "DocumentHashChanged(address,bytes32)";
pub const KEY_ADDED: &str = "KeyAdded(address,bytes32)";
pub const KEY_REMOVED: &str = "KeyRemoved(address,bytes32)";

const SIGNATURES: [&str; 6] = [
    MEMBER_CREATED,
    OWNER_CHANGED,
    DOCUMENT_URI_CHANGED,
    DOCUMENT_HASH_CHANGED,
    KEY_ADDED,
    KEY_REMOVED,
];

const ZERO_HASH: &str = "0x0000000000000000000000000000000000000000000000000000000000000000";

/// Maps `topic0` to the registry event it identifies.
pub struct EventDecoder {
    by_topic: HashMap<String, &'static str>,
}

impl Default for EventDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDecoder {
    pub fn new() -> Self {
        Self {
            by_topic: SIGNATURES.iter().map(|s| (event_topic(s), *s)).collect(),
        }
    }

    /// All registry `topic0` values, for log filters.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.by_topic.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Decode one log. `Ok(None)` for logs that are not registry events.
    pub fn decode(&self, log: &RawLog) -> Result<Option<ChangeEvent>, RegistryError> {
        let Some(signature) = log
            .topics
            .first()
            .and_then(|t| self.by_topic.get(&t.to_ascii_lowercase()))
        else {
            return Ok(None);
        };
        let member_topic = log
            .topics
            .get(1)
            .ok_or_else(|| RegistryError::Abi(format!("{signature}: missing member topic")))?;
        let member = topic_address(member_topic)?;
        let data = log
            .data_bytes()
            .map_err(|e| RegistryError::Abi(e.to_string()))?;
        let block_number = log
            .block_number_u64()
            .map_err(|e| RegistryError::Abi(e.to_string()))?;
        let log_index = log
            .log_index_u64()
            .map_err(|e| RegistryError::Abi(e.to_string()))?;

        let single = |ty: &str| -> Result<_, RegistryError> {
            decode_params(ty, &data)?
                .into_iter()
                .next()
                .ok_or_else(|| RegistryError::Abi(format!("{signature}: empty payload")))
        };

        let kind = match *signature {
            MEMBER_CREATED => {
                let segment = log
                    .topics
                    .get(2)
                    .ok_or_else(|| RegistryError::Abi(format!("{signature}: missing segment topic")))?;
                ChangeKind::MemberCreated {
                    segment: topic_u64(segment)?,
                }
            }
            OWNER_CHANGED => ChangeKind::OwnerChanged {
                owner: as_address(&single("(address)")?)?,
            },
            DOCUMENT_URI_CHANGED => ChangeKind::DocumentUriChanged {
                uri: as_string(&single("(string)")?)?,
            },
            DOCUMENT_HASH_CHANGED => {
                let hash = as_bytes32_hex(&single("(bytes32)")?)?;
                ChangeKind::DocumentHashChanged {
                    hash: (hash != ZERO_HASH).then_some(hash),
                }
            }
            KEY_ADDED => ChangeKind::KeyAdded {
                key: as_bytes32_hex(&single("(bytes32)")?)?,
            },
            KEY_REMOVED => ChangeKind::KeyRemoved {
                key: as_bytes32_hex(&single("(bytes32)")?)?,
            },
            other => return Err(RegistryError::Abi(format!("no decoder for {other}"))),
        };

        Ok(Some(ChangeEvent {
            member,
            block_number,
            log_index,
            kind,
        }))
    }
}
