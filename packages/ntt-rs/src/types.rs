//! Common types for cross-chain transfers
//!
//! Chain identifiers, universal (32-byte) addresses, message ids and
//! transaction handles shared by the manager, lifecycle and executor modules.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{NttError, Result};

// ============================================================================
// Chain ID (2 bytes)
// ============================================================================

/// Numeric chain id from the network's chain-id registry.
///
/// Chain ids are 2 bytes and are encoded big-endian on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub u16);

impl ChainId {
    pub const SOLANA: ChainId = ChainId(1);
    pub const ETHEREUM: ChainId = ChainId(2);
    pub const BSC: ChainId = ChainId(4);
    pub const POLYGON: ChainId = ChainId(5);
    pub const AVALANCHE: ChainId = ChainId(6);
    pub const FANTOM: ChainId = ChainId(10);
    pub const CELO: ChainId = ChainId(14);
    pub const MOONBEAM: ChainId = ChainId(16);
    pub const SUI: ChainId = ChainId(21);
    pub const ARBITRUM: ChainId = ChainId(23);
    pub const OPTIMISM: ChainId = ChainId(24);
    pub const BASE: ChainId = ChainId(30);
    pub const SCROLL: ChainId = ChainId(34);
    pub const BERACHAIN: ChainId = ChainId(39);
    pub const UNICHAIN: ChainId = ChainId(44);
    pub const WORLDCHAIN: ChainId = ChainId(45);
    pub const HYPER_EVM: ChainId = ChainId(47);
    pub const SONIC: ChainId = ChainId(52);
    pub const SEPOLIA: ChainId = ChainId(10002);
    pub const BASE_SEPOLIA: ChainId = ChainId(10004);

    pub const fn new(id: u16) -> Self {
        ChainId(id)
    }

    pub fn to_u16(&self) -> u16 {
        self.0
    }

    pub fn to_be_bytes(&self) -> [u8; 2] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 2]) -> Self {
        ChainId(u16::from_be_bytes(bytes))
    }

    /// The execution platform of a known chain, if any.
    pub fn platform(&self) -> Option<Platform> {
        match *self {
            ChainId::SOLANA => Some(Platform::Solana),
            ChainId::SUI => Some(Platform::Sui),
            ChainId::ETHEREUM
            | ChainId::BSC
            | ChainId::POLYGON
            | ChainId::AVALANCHE
            | ChainId::FANTOM
            | ChainId::CELO
            | ChainId::MOONBEAM
            | ChainId::ARBITRUM
            | ChainId::OPTIMISM
            | ChainId::BASE
            | ChainId::SCROLL
            | ChainId::BERACHAIN
            | ChainId::UNICHAIN
            | ChainId::WORLDCHAIN
            | ChainId::HYPER_EVM
            | ChainId::SONIC
            | ChainId::SEPOLIA
            | ChainId::BASE_SEPOLIA => Some(Platform::Evm),
            _ => None,
        }
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for ChainId {
    fn from(id: u16) -> Self {
        ChainId(id)
    }
}

/// Execution platform family of a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    Evm,
    Solana,
    Sui,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Evm => "evm",
            Platform::Solana => "solana",
            Platform::Sui => "sui",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Deployment network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Network {
    Mainnet,
    Testnet,
    Devnet,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "Mainnet",
            Network::Testnet => "Testnet",
            Network::Devnet => "Devnet",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Network {
    type Err = NttError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            "devnet" => Ok(Network::Devnet),
            other => Err(NttError::Config(format!("unknown network: {}", other))),
        }
    }
}

// ============================================================================
// 32-byte values
// ============================================================================

fn parse_bytes32(hex_str: &str, what: &str) -> Result<[u8; 32]> {
    let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    let bytes = hex::decode(hex_str)
        .map_err(|e| NttError::InvalidPayload(format!("{} is not valid hex: {}", what, e)))?;
    if bytes.len() != 32 {
        return Err(NttError::InvalidPayload(format!(
            "{} must be 32 bytes, got {}",
            what,
            bytes.len()
        )));
    }
    let mut result = [0u8; 32];
    result.copy_from_slice(&bytes);
    Ok(result)
}

/// Chain-agnostic 32-byte address.
///
/// Shorter native addresses (e.g. 20-byte EVM addresses) are left-padded with
/// zeros.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct UniversalAddress(pub [u8; 32]);

impl UniversalAddress {
    pub const ZERO: UniversalAddress = UniversalAddress([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        UniversalAddress(bytes)
    }

    /// Left-pad a native address of at most 32 bytes.
    pub fn from_native(native: &[u8]) -> Result<Self> {
        if native.len() > 32 {
            return Err(NttError::InvalidPayload(format!(
                "native address longer than 32 bytes: {}",
                native.len()
            )));
        }
        let mut result = [0u8; 32];
        result[32 - native.len()..].copy_from_slice(native);
        Ok(UniversalAddress(result))
    }

    /// Parse from hex (with or without 0x prefix). Accepts 20-byte EVM
    /// addresses as well as full 32-byte values.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let stripped = hex_str.strip_prefix("0x").unwrap_or(hex_str);
        if stripped.len() == 40 {
            let bytes = hex::decode(stripped)
                .map_err(|e| NttError::InvalidPayload(format!("invalid address hex: {}", e)))?;
            return Self::from_native(&bytes);
        }
        parse_bytes32(hex_str, "address").map(UniversalAddress)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for UniversalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; 32]> for UniversalAddress {
    fn from(bytes: [u8; 32]) -> Self {
        UniversalAddress(bytes)
    }
}

impl Serialize for UniversalAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for UniversalAddress {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        UniversalAddress::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Per-source-chain message sequence id (32 bytes, big-endian).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub [u8; 32]);

impl MessageId {
    /// Build an id from a sequence number; the sequence occupies the last
    /// 8 bytes.
    pub fn from_sequence(sequence: u64) -> Self {
        let mut id = [0u8; 32];
        id[24..].copy_from_slice(&sequence.to_be_bytes());
        MessageId(id)
    }

    pub fn from_hex(hex_str: &str) -> Result<Self> {
        parse_bytes32(hex_str, "message id").map(MessageId)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A submitted transaction on some chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxId {
    pub chain: ChainId,
    pub txid: String,
}

impl TxId {
    pub fn new(chain: ChainId, txid: impl Into<String>) -> Self {
        Self {
            chain,
            txid: txid.into(),
        }
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.txid, self.chain)
    }
}
