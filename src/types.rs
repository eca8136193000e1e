//! Shared value types: digests, amounts, assets and per-chain event cursors

use crate::error::{SettlementError, SettlementResult};

use ethers::types::U256;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Fixed-width 32-byte digest, rendered as 0x-prefixed hex
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    pub const LEN: usize = 32;

    /// Build a digest from a slice, `None` if the width is wrong
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::LEN {
            return None;
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(bytes);
        Some(Self(out))
    }

    /// Parse a hex digest supplied by a caller
    pub fn from_hex(input: &str) -> SettlementResult<Self> {
        let bytes = decode_hex(input)
            .ok_or_else(|| SettlementError::Validation(format!("invalid hex: {}", input)))?;
        Self::from_slice(&bytes).ok_or_else(|| {
            SettlementError::Validation(format!(
                "expected a {}-byte digest, got {} bytes",
                Self::LEN,
                bytes.len()
            ))
        })
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Digest::from_hex(&s).map_err(de::Error::custom)
    }
}

/// Decode hex with an optional 0x prefix
pub fn decode_hex(input: &str) -> Option<Vec<u8>> {
    let trimmed = input.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    hex::decode(digits).ok()
}

/// Non-negative integer token amount of arbitrary precision (up to 256 bits)
///
/// Always carried as a decimal string at the edges, never as a float.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(U256);

impl Amount {
    pub fn zero() -> Self {
        Self(U256::zero())
    }

    pub fn from_u128(value: u128) -> Self {
        Self(U256::from(value))
    }

    /// Parse a base-10 integer string
    pub fn parse(input: &str) -> SettlementResult<Self> {
        let digits = input.trim();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SettlementError::Validation(format!(
                "amount must be a non-negative integer, got {:?}",
                input
            )));
        }
        U256::from_dec_str(digits)
            .map(Self)
            .map_err(|_| SettlementError::Validation(format!("amount out of range: {}", input)))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn as_u256(&self) -> U256 {
        self.0
    }
}

impl From<U256> for Amount {
    fn from(value: U256) -> Self {
        Self(value)
    }
}

impl FromStr for Amount {
    type Err = SettlementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Amount({})", self.0)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Amount::parse(&s).map_err(de::Error::custom)
    }
}

/// Asset leg of a swap: what is locked, where, and at which precision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub token_address: String,
    pub amount: Amount,
    pub decimals: u8,
}

/// Position of an event on a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub chain_id: u64,
    pub block_number: u64,
}

/// Highest block applied to an entity, per chain
///
/// Events are applied in confirmation order: anything older than what an
/// entity already saw from the same chain is stale.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCursor {
    applied: BTreeMap<u64, u64>,
}

impl EventCursor {
    /// Reject events from blocks older than the last applied one
    pub fn admit(&self, at: &BlockRef) -> SettlementResult<()> {
        match self.applied.get(&at.chain_id) {
            Some(&applied) if at.block_number < applied => Err(SettlementError::StaleEvent {
                chain_id: at.chain_id,
                block_number: at.block_number,
                applied,
            }),
            _ => Ok(()),
        }
    }

    pub fn record(&mut self, at: &BlockRef) {
        let entry = self.applied.entry(at.chain_id).or_insert(at.block_number);
        if at.block_number > *entry {
            *entry = at.block_number;
        }
    }

    pub fn last_applied(&self, chain_id: u64) -> Option<u64> {
        self.applied.get(&chain_id).copied()
    }
}

/// Offset/limit window over a listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "Page::default_limit")]
    pub limit: usize,
}

impl Page {
    pub const MAX_LIMIT: usize = 500;

    fn default_limit() -> usize {
        50
    }

    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.offset)
            .take(self.limit.min(Self::MAX_LIMIT))
            .collect()
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: Self::default_limit(),
        }
    }
}

/// Reject blank identifiers and addresses before anything is read
pub fn require_non_empty(field: &str, value: &str) -> SettlementResult<()> {
    if value.trim().is_empty() {
        return Err(SettlementError::Validation(format!("{} must not be empty", field)));
    }
    Ok(())
}
