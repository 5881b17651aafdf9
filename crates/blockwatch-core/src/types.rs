//! Shared types for the watch loop.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::error::WatchError;

// ─── BlockHeader ──────────────────────────────────────────────────────────────

/// A new-head notification. Consumed once, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block number.
    pub number: u64,
    /// Block hash (`0x…`). Empty when the source does not provide one.
    pub hash: String,
}

impl BlockHeader {
    pub fn new(number: u64, hash: impl Into<String>) -> Self {
        Self {
            number,
            hash: hash.into(),
        }
    }

    /// Build a header from a `newHeads` notification payload.
    pub fn from_json(v: &Value) -> Option<Self> {
        Some(Self {
            number: parse_quantity(v["number"].as_str()?)?,
            hash: v["hash"].as_str().unwrap_or_default().to_string(),
        })
    }
}

// ─── TargetAddress ────────────────────────────────────────────────────────────

/// The single address whose logs are being watched.
///
/// Always stored lower-case with the `0x` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetAddress(String);

impl TargetAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for TargetAddress {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let body = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| WatchError::Config(format!("address '{s}' must start with 0x")))?;
        if body.len() != 40 {
            return Err(WatchError::Config(format!(
                "address '{s}' must have 40 hex digits, got {}",
                body.len()
            )));
        }
        hex::decode(body)
            .map_err(|e| WatchError::Config(format!("address '{s}' is not hex: {e}")))?;
        Ok(Self(format!("0x{}", body.to_ascii_lowercase())))
    }
}

impl TryFrom<String> for TargetAddress {
    type Error = WatchError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TargetAddress> for String {
    fn from(a: TargetAddress) -> Self {
        a.0
    }
}

impl fmt::Display for TargetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ─── LogFilter ────────────────────────────────────────────────────────────────

/// An `eth_getLogs` filter for one address over an inclusive block range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilter {
    pub address: TargetAddress,
    #[serde(serialize_with = "serialize_quantity")]
    pub from_block: u64,
    #[serde(serialize_with = "serialize_quantity")]
    pub to_block: u64,
}

impl LogFilter {
    /// Filter covering exactly one block.
    pub fn single_block(address: TargetAddress, number: u64) -> Self {
        Self {
            address,
            from_block: number,
            to_block: number,
        }
    }
}

fn serialize_quantity<S: Serializer>(n: &u64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&to_quantity(*n))
}

// ─── RawLog ───────────────────────────────────────────────────────────────────

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "blockHash", default)]
    pub block_hash: String,
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
    #[serde(rename = "logIndex", default)]
    pub log_index: String,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl RawLog {
    pub fn log_index_u32(&self) -> u32 {
        parse_quantity(&self.log_index).unwrap_or(0) as u32
    }
}

// ─── LogMatch ─────────────────────────────────────────────────────────────────

/// A transaction that emitted a log from the target address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMatch {
    pub tx_hash: String,
    pub block_number: u64,
    pub log_index: u32,
}

impl LogMatch {
    /// Build a match from a raw log returned for the query on block
    /// `block_number`. The reported height is always the queried one.
    pub fn from_raw(log: &RawLog, block_number: u64) -> Self {
        Self {
            tx_hash: log.tx_hash.clone(),
            block_number,
            log_index: log.log_index_u32(),
        }
    }
}

impl fmt::Display for LogMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "New TX: {} | Block: {}", self.tx_hash, self.block_number)
    }
}

// ─── Hex quantities ───────────────────────────────────────────────────────────

/// Parse a JSON-RPC quantity (`0x`-prefixed hex) to u64.
pub fn parse_quantity(s: &str) -> Option<u64> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

/// Encode a u64 as a minimal JSON-RPC quantity.
pub fn to_quantity(n: u64) -> String {
    format!("{n:#x}")
}

// ─── Tests ────────────────────────────────────────────────────────────────────
