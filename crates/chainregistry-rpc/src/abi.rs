//! Minimal ABI plumbing for registry view calls and event topics.

use std::str::FromStr;

use alloy_dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::{Address, U256};
use tiny_keccak::{Hasher, Keccak};

use chainregistry_core::{MemberAddress, RegistryError};

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    let mut out = [0u8; 32];
    hasher.update(data);
    hasher.finalize(&mut out);
    out
}

/// 4-byte function selector for a canonical signature such as `owner()`.
pub fn selector(signature: &str) -> [u8; 4] {
    let h = keccak256(signature.as_bytes());
    [h[0], h[1], h[2], h[3]]
}

/// `topic0` for a canonical event signature, `0x`-prefixed lowercase hex.
pub fn event_topic(signature: &str) -> String {
    format!("0x{}", hex::encode(keccak256(signature.as_bytes())))
}

// ─── ViewFunction ─────────────────────────────────────────────────────────────

/// A read-only contract function: canonical signature plus output tuple type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewFunction {
    pub signature: &'static str,
    /// Output tuple, e.g. `"(address)"` or `"(bytes32[])"`.
    pub outputs: &'static str,
}

impl ViewFunction {
    pub const fn new(signature: &'static str, outputs: &'static str) -> Self {
        Self { signature, outputs }
    }

    pub fn name(&self) -> &'static str {
        self.signature.split('(').next().unwrap_or(self.signature)
    }

    /// Calldata: selector followed by the ABI-encoded arguments.
    pub fn encode_call(&self, args: &[DynSolValue]) -> Vec<u8> {
        let mut data = selector(self.signature).to_vec();
        if !args.is_empty() {
            data.extend(DynSolValue::Tuple(args.to_vec()).abi_encode_params());
        }
        data
    }

    /// Decode return data into the output values, in declaration order.
    pub fn decode_output(&self, data: &[u8]) -> Result<Vec<DynSolValue>, RegistryError> {
        decode_params(self.outputs, data)
            .map_err(|e| RegistryError::Abi(format!("{}: {e}", self.signature)))
    }
}

/// Decode `data` against a tuple type string such as `"(address,uint256)"`.
pub fn decode_params(types: &str, data: &[u8]) -> Result<Vec<DynSolValue>, RegistryError> {
    let ty = DynSolType::from_str(types).map_err(|e| RegistryError::Abi(format!("bad type {types}: {e}")))?;
    match ty.abi_decode_params(data) {
        Ok(DynSolValue::Tuple(values)) => Ok(values),
        Ok(single) => Ok(vec![single]),
        Err(e) => Err(RegistryError::Abi(e.to_string())),
    }
}

// ─── Value helpers ────────────────────────────────────────────────────────────

pub fn address_value(addr: &MemberAddress) -> Result<DynSolValue, RegistryError> {
    Address::from_str(addr.as_str())
        .map(DynSolValue::Address)
        .map_err(|e| RegistryError::InvalidAddress(format!("{addr}: {e}")))
}

pub fn uint_value(n: u64) -> DynSolValue {
    DynSolValue::Uint(U256::from(n), 256)
}

fn unexpected(expected: &str, got: &DynSolValue) -> RegistryError {
    RegistryError::Abi(format!("expected {expected}, got {got:?}"))
}

pub fn as_address(value: &DynSolValue) -> Result<MemberAddress, RegistryError> {
    match value {
        DynSolValue::Address(a) => MemberAddress::parse(&hex::encode(a.as_slice())),
        other => Err(unexpected("address", other)),
    }
}

pub fn as_u64(value: &DynSolValue) -> Result<u64, RegistryError> {
    match value {
        DynSolValue::Uint(u, _) => {
            if *u > U256::from(u64::MAX) {
                return Err(RegistryError::Abi(format!("integer {u} overflows u64")));
            }
            Ok(u.as_limbs()[0])
        }
        other => Err(unexpected("uint", other)),
    }
}

/// Decimal rendering of an unsigned integer of any width.
pub fn as_uint_string(value: &DynSolValue) -> Result<String, RegistryError> {
    match value {
        DynSolValue::Uint(u, _) => Ok(u.to_string()),
        other => Err(unexpected("uint", other)),
    }
}

pub fn as_string(value: &DynSolValue) -> Result<String, RegistryError> {
    match value {
        DynSolValue::String(s) => Ok(s.clone()),
        other => Err(unexpected("string", other)),
    }
}

/// `bytes32` as `0x`-prefixed lowercase hex.
pub fn as_bytes32_hex(value: &DynSolValue) -> Result<String, RegistryError> {
    match value {
        DynSolValue::FixedBytes(b, 32) => Ok(format!("0x{}", hex::encode(b.as_slice()))),
        other => Err(unexpected("bytes32", other)),
    }
}

pub fn as_array(value: &DynSolValue) -> Result<&[DynSolValue], RegistryError> {
    match value {
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) => Ok(items),
        other => Err(unexpected("array", other)),
    }
}

/// An address stored in an indexed topic (right-aligned in 32 bytes).
pub fn topic_address(topic: &str) -> Result<MemberAddress, RegistryError> {
    let digits = topic.trim_start_matches("0x");
    if digits.len() != 64 {
        return Err(RegistryError::Abi(format!("topic is not 32 bytes: {topic}")));
    }
    MemberAddress::parse(&digits[24..])
}

pub fn topic_u64(topic: &str) -> Result<u64, RegistryError> {
    let digits = topic.trim_start_matches("0x").trim_start_matches('0');
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16).map_err(|e| RegistryError::Abi(format!("topic {topic}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_selectors() {
        // ERC-20 transfer(address,uint256)
        assert_eq!(hex::encode(selector("transfer(address,uint256)")), "a9059cbb");
        assert_eq!(
            event_topic("Transfer(address,address,uint256)"),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn encode_call_without_args_is_selector_only() {
        let f = ViewFunction::new("owner()", "(address)");
        assert_eq!(f.encode_call(&[]), selector("owner()").to_vec());
        assert_eq!(f.name(), "owner");
    }

    #[test]
    fn encode_call_pads_arguments() {
        let f = ViewFunction::new("segments(uint256)", "(address)");
        let data = f.encode_call(&[uint_value(3)]);
        assert_eq!(data.len(), 4 + 32);
        assert_eq!(data[35], 3);
    }

    #[test]
    fn decode_address_output() {
        let f = ViewFunction::new("owner()", "(address)");
        let mut word = [0u8; 32];
        word[31] = 0xa1;
        let values = f.decode_output(&word).unwrap();
        assert_eq!(
            as_address(&values[0]).unwrap().as_str(),
            "0x00000000000000000000000000000000000000a1"
        );
    }

    #[test]
    fn decode_rejects_short_data() {
        let f = ViewFunction::new("createdAt()", "(uint256)");
        assert!(f.decode_output(&[0u8; 4]).is_err());
    }

    #[test]
    fn u64_overflow_is_error() {
        let big = DynSolValue::Uint(U256::from(u64::MAX) + U256::from(1u8), 256);
        assert!(as_u64(&big).is_err());
        assert_eq!(as_uint_string(&big).unwrap(), "18446744073709551616");
        assert_eq!(as_u64(&uint_value(42)).unwrap(), 42);
    }

    #[test]
    fn topic_helpers() {
        let topic = format!("0x{}{}", "0".repeat(24), "ab".repeat(20));
        assert_eq!(topic_address(&topic).unwrap().as_str(), format!("0x{}", "ab".repeat(20)));
        assert_eq!(topic_u64(&format!("0x{:064x}", 7)).unwrap(), 7);
        assert_eq!(topic_u64(&format!("0x{}", "0".repeat(64))).unwrap(), 0);
        assert!(topic_address("0x1234").is_err());
    }
}
