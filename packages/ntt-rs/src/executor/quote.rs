//! Executor quotes
//!
//! Building a quote for an automatically relayed transfer:
//!
//! 1. Resolve the referrer and compute the referrer fee (the fee is trimmed to
//!    the destination's precision before it is subtracted).
//! 2. Check that the executor serves the source chain and that the
//!    destination accepts native token transfer requests (`ERN1`).
//! 3. Size the gas and gas drop-off instructions and check them against the
//!    destination's advertised limits.
//! 4. Fetch a signed quote and read its expiry and payee from the `EQ01`
//!    header.
//!
//! A quote must pass [`ExecutorQuote::validate_for_submission`] right before
//! it is used.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::chain::{DestinationChain, QuoteProvider};
use crate::config::{ProtocolParams, ReferrerFeeConfig};
use crate::error::{NttError, Result};
use crate::lifecycle::TransferRequest;
use crate::relay_instructions::{self, RelayInstruction};
use crate::trimmed_amount::{TrimmedAmount, TRIMMED_DECIMALS};
use crate::types::{ChainId, Platform, UniversalAddress};
use crate::wire::Reader;

/// Fee denominator: fees are in tenths of a basis point.
pub const DBPS_DENOMINATOR: u128 = 100_000;

/// Gas limits used when a destination backend has no better estimate
pub const DEFAULT_EVM_GAS_LIMIT: u128 = 500_000;
pub const DEFAULT_ARBITRUM_GAS_LIMIT: u128 = 800_000;
pub const DEFAULT_SOLANA_GAS_LIMIT: u128 = 250_000;

const DEFAULT_EVM_REFERRER: &str = "0x9b2A3B92b1D86938D3Ed37B0519952C227bA6D09";
// 9q2q3EtP1VNdyaxzju1CGfh3EDj7heGABgxAJNyQDXgT
const DEFAULT_SOLANA_REFERRER: [u8; 32] = [
    0x83, 0x2b, 0x71, 0x03, 0x5a, 0xd8, 0xe6, 0x5f, 0x7c, 0xca, 0x33, 0x68, 0xf6, 0xd0, 0xbe, 0x36,
    0x32, 0x5f, 0x8e, 0x66, 0xa0, 0x6e, 0xcc, 0x54, 0x8c, 0x5e, 0xd5, 0xbe, 0x56, 0xd9, 0xa5, 0x38,
];

// ============================================================================
// Capabilities
// ============================================================================

/// Request kinds an executor deployment can relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestPrefix {
    /// Modular messaging
    #[serde(rename = "ERM1")]
    Erm1,
    /// VAA v1
    #[serde(rename = "ERV1")]
    Erv1,
    /// Native token transfer v1
    #[serde(rename = "ERN1")]
    Ern1,
    /// CCTP v1
    #[serde(rename = "ERC1")]
    Erc1,
    /// CCTP v2
    #[serde(rename = "ERC2")]
    Erc2,
    #[serde(other)]
    Unknown,
}

/// Per-chain limits advertised by the executor. Amounts arrive as decimal
/// strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub request_prefixes: Vec<RequestPrefix>,
    #[serde(with = "u128_string")]
    pub gas_drop_off_limit: u128,
    #[serde(with = "u128_string")]
    pub max_gas_limit: u128,
    /// Maximum msg value, inclusive of the gas drop-off
    #[serde(with = "u128_string")]
    pub max_msg_value: u128,
}

impl Capabilities {
    pub fn supports(&self, prefix: RequestPrefix) -> bool {
        self.request_prefixes.contains(&prefix)
    }
}

/// Re-key a raw capabilities response (chain ids as JSON object keys).
pub fn parse_capabilities(
    raw: HashMap<String, Capabilities>,
) -> Result<HashMap<ChainId, Capabilities>> {
    raw.into_iter()
        .map(|(key, caps)| {
            key.parse::<u16>()
                .map(|id| (ChainId(id), caps))
                .map_err(|_| NttError::InvalidPayload(format!("invalid chain id key: {}", key)))
        })
        .collect()
}

mod u128_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.trim().parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Referrer fee
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferrerFee {
    /// Untrimmed fee in source decimals
    pub referrer_fee: u64,
    /// What the recipient is sent, in source decimals
    pub remaining_amount: u64,
    pub referrer_fee_dbps: u16,
}

/// Split `amount` (in `source_decimals`) into a referrer fee and the
/// remainder.
///
/// `fee = amount * fee_dbps / 100_000`. The fee is trimmed to the
/// destination's precision (capped at `max_trimmed_decimals`, the same cap
/// the manager applies to the message amount) and that trimmed fee is what
/// gets subtracted, so the remainder carries the dust of the fee.
pub fn calculate_referrer_fee(
    amount: u64,
    source_decimals: u8,
    fee_dbps: u32,
    destination_decimals: u8,
    max_trimmed_decimals: u8,
) -> Result<ReferrerFee> {
    let referrer_fee_dbps = u16::try_from(fee_dbps)
        .map_err(|_| NttError::InvalidFee(format!("{} dBps exceeds u16", fee_dbps)))?;

    let mut referrer_fee = 0u64;
    let mut remaining_amount = amount;
    if referrer_fee_dbps > 0 {
        let fee = (amount as u128)
            .checked_mul(referrer_fee_dbps as u128)
            .ok_or(NttError::ArithmeticOverflow("referrer fee"))?
            / DBPS_DENOMINATOR;
        // fee < amount because fee_dbps < 100_000
        referrer_fee = fee as u64;
        let trimmed_fee = TrimmedAmount::trim_with_cap(
            referrer_fee,
            source_decimals,
            destination_decimals,
            max_trimmed_decimals,
        )?
        .untrim(source_decimals)?;
        remaining_amount = amount
            .checked_sub(trimmed_fee)
            .ok_or(NttError::ArithmeticOverflow("amount after referrer fee"))?;
    }
    if remaining_amount == 0 {
        return Err(NttError::InvalidFee("amount after fee is zero".to_string()));
    }
    Ok(ReferrerFee {
        referrer_fee,
        remaining_amount,
        referrer_fee_dbps,
    })
}

/// The referrer paid when none is configured.
pub fn default_referrer(chain: ChainId) -> Result<UniversalAddress> {
    match chain.platform() {
        Some(Platform::Evm) => UniversalAddress::from_hex(DEFAULT_EVM_REFERRER),
        Some(Platform::Solana) => Ok(UniversalAddress(DEFAULT_SOLANA_REFERRER)),
        _ => Err(NttError::UnsupportedRoute {
            chain,
            reason: "no default referrer".to_string(),
        }),
    }
}

/// Fallback redeem gas limit for a destination chain.
pub fn default_gas_limit(chain: ChainId) -> Option<u128> {
    match chain.platform()? {
        Platform::Evm if chain == ChainId::ARBITRUM => Some(DEFAULT_ARBITRUM_GAS_LIMIT),
        Platform::Evm => Some(DEFAULT_EVM_GAS_LIMIT),
        Platform::Solana => Some(DEFAULT_SOLANA_GAS_LIMIT),
        Platform::Sui => None,
    }
}

// ============================================================================
// Signed quote
// ============================================================================

pub const SIGNED_QUOTE_PREFIX: [u8; 4] = *b"EQ01";
pub const SIGNED_QUOTE_LEN: usize = 4 + 20 + 32 + 2 + 2 + 8 + 8 * 4 + 65;

/// Header of an `EQ01` signed quote.
///
/// ```text
/// prefix            "EQ01"
/// quoter            [20]
/// payee             [32]
/// source chain      u16
/// destination chain u16
/// expiry            u64 (unix seconds)
/// base fee          u64
/// dst gas price     u64
/// src price         u64
/// dst price         u64
/// signature         [65]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedQuote {
    pub quoter: [u8; 20],
    pub payee: UniversalAddress,
    pub source_chain: ChainId,
    pub destination_chain: ChainId,
    pub expiry: DateTime<Utc>,
    pub base_fee: u64,
    pub destination_gas_price: u64,
    pub source_price: u64,
    pub destination_price: u64,
    pub signature: [u8; 65],
}

impl SignedQuote {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let prefix: [u8; 4] = reader.array()?;
        if prefix != SIGNED_QUOTE_PREFIX {
            return Err(NttError::InvalidQuote(format!(
                "unexpected prefix 0x{}",
                hex::encode(prefix)
            )));
        }
        let quoter = reader.array()?;
        let payee = UniversalAddress(reader.array()?);
        let source_chain = ChainId(reader.u16()?);
        let destination_chain = ChainId(reader.u16()?);
        let expiry_secs = reader.u64()?;
        let expiry = i64::try_from(expiry_secs)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .ok_or_else(|| NttError::InvalidQuote(format!("expiry {} out of range", expiry_secs)))?;
        let quote = Self {
            quoter,
            payee,
            source_chain,
            destination_chain,
            expiry,
            base_fee: reader.u64()?,
            destination_gas_price: reader.u64()?,
            source_price: reader.u64()?,
            destination_price: reader.u64()?,
            signature: reader.array()?,
        };
        reader.finish()?;
        Ok(quote)
    }

    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str.strip_prefix("0x").unwrap_or(hex_str))
            .map_err(|e| NttError::InvalidQuote(format!("signed quote is not hex: {}", e)))?;
        Self::parse(&bytes)
    }
}

// ============================================================================
// Quote request / result
// ============================================================================

/// Response of the quote endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteResponse {
    /// Hex-encoded signed quote
    pub signed_quote: String,
    #[serde(default)]
    pub estimated_cost: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum QuoteWarning {
    /// The received amount exceeds the destination's inbound capacity; the
    /// transfer will be queued for up to `delay_duration_secs`.
    #[serde(rename = "DestinationCapacityWarning", rename_all = "camelCase")]
    DestinationCapacity { delay_duration_secs: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorQuote {
    #[serde(with = "crate::message::hex_bytes")]
    pub signed_quote: Vec<u8>,
    pub relay_instructions: Vec<RelayInstruction>,
    /// Relay cost in the source chain's native currency
    pub estimated_cost: u128,
    pub payee: UniversalAddress,
    pub referrer: UniversalAddress,
    pub referrer_fee: u64,
    /// Amount after the referrer fee, in source decimals
    pub remaining_amount: u64,
    pub referrer_fee_dbps: u16,
    pub expires: DateTime<Utc>,
    pub gas_drop_off: u128,
    /// `remaining_amount` in destination decimals
    pub received_amount: u64,
    #[serde(default)]
    pub warnings: Vec<QuoteWarning>,
}

impl ExecutorQuote {
    pub fn encoded_relay_instructions(&self) -> Vec<u8> {
        relay_instructions::encode(&self.relay_instructions)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires
    }

    /// Local checks before the quote is handed to the source chain: the
    /// quote must not have expired, and every gas drop-off must go to the
    /// transfer's recipient.
    pub fn validate_for_submission(
        &self,
        recipient: &UniversalAddress,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.is_expired(now) {
            warn!(expires = %self.expires, "Rejecting expired quote");
            return Err(NttError::QuoteExpired {
                expired_at: self.expires,
            });
        }
        for instruction in &self.relay_instructions {
            if let RelayInstruction::GasDropOff {
                recipient: drop_off_recipient,
                ..
            } = instruction
            {
                if drop_off_recipient != recipient {
                    warn!(
                        expected = %recipient,
                        got = %drop_off_recipient,
                        "Gas drop-off recipient mismatch"
                    );
                    return Err(NttError::RecipientMismatch);
                }
            }
        }
        Ok(())
    }
}

/// Route options chosen by the sender
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct QuoteOptions {
    /// Fraction (0.0..=1.0) of the destination's gas drop-off limit to
    /// deliver as native gas
    pub native_gas: f64,
}

/// Static quoting settings for a deployment.
#[derive(Debug, Clone)]
pub struct QuoteSettings {
    pub fee_dbps: u32,
    /// Decimal cap shared with the managers
    pub max_trimmed_decimals: u8,
    /// Overrides the per-platform default referrer
    pub referrer: Option<UniversalAddress>,
    /// Referrer fee overrides keyed by source (chain, token)
    pub referrer_fee_overrides: HashMap<(ChainId, UniversalAddress), u32>,
    /// Gas limit overrides keyed by destination (chain, token)
    pub gas_limit_overrides: HashMap<(ChainId, UniversalAddress), u128>,
}

impl Default for QuoteSettings {
    fn default() -> Self {
        Self {
            fee_dbps: 0,
            max_trimmed_decimals: TRIMMED_DECIMALS,
            referrer: None,
            referrer_fee_overrides: HashMap::new(),
            gas_limit_overrides: HashMap::new(),
        }
    }
}

impl QuoteSettings {
    pub fn from_config(referrer_fee: &ReferrerFeeConfig, protocol: &ProtocolParams) -> Self {
        Self {
            fee_dbps: referrer_fee.fee_dbps,
            max_trimmed_decimals: protocol.max_trimmed_decimals,
            referrer: referrer_fee.referrer,
            ..Self::default()
        }
    }

    pub fn fee_dbps_for(&self, chain: ChainId, token: &UniversalAddress) -> u32 {
        self.referrer_fee_overrides
            .get(&(chain, *token))
            .copied()
            .unwrap_or(self.fee_dbps)
    }

    pub fn referrer_for(&self, chain: ChainId) -> Result<UniversalAddress> {
        match self.referrer {
            Some(referrer) => Ok(referrer),
            None => default_referrer(chain),
        }
    }
}

/// Gas drop-off for a `native_gas` fraction, rounded to whole percents of
/// `gas_drop_off_limit`.
pub fn gas_drop_off(native_gas: f64, gas_drop_off_limit: u128) -> Result<u128> {
    if !(0.0..=1.0).contains(&native_gas) {
        return Err(NttError::InvalidQuote(format!(
            "native gas fraction {} outside 0..=1",
            native_gas
        )));
    }
    if native_gas == 0.0 || gas_drop_off_limit == 0 {
        return Ok(0);
    }
    let percent = (native_gas * 100.0).round() as u128;
    Ok(percent
        .checked_mul(gas_drop_off_limit)
        .ok_or(NttError::ArithmeticOverflow("gas drop-off"))?
        / 100)
}

/// Build the instructions for a transfer and check them against the
/// destination's capabilities.
pub fn build_relay_instructions(
    capabilities: &Capabilities,
    estimate_gas_limit: u128,
    msg_value: u128,
    drop_off: u128,
    recipient: UniversalAddress,
) -> Result<Vec<RelayInstruction>> {
    let mut instructions = vec![RelayInstruction::Gas {
        gas_limit: estimate_gas_limit,
        msg_value,
    }];
    if drop_off > 0 {
        instructions.push(RelayInstruction::GasDropOff { drop_off, recipient });
    }

    let totals = relay_instructions::totals(&instructions)?;
    if totals.gas_limit > capabilities.max_gas_limit {
        return Err(NttError::RelayRequestTooLarge(format!(
            "gas limit {} exceeds {}",
            totals.gas_limit, capabilities.max_gas_limit
        )));
    }
    let value = totals
        .msg_value
        .checked_add(totals.drop_off)
        .ok_or(NttError::ArithmeticOverflow("msg value"))?;
    if value > capabilities.max_msg_value {
        return Err(NttError::RelayRequestTooLarge(format!(
            "msg value {} exceeds {}",
            value, capabilities.max_msg_value
        )));
    }
    Ok(instructions)
}

/// Produces [`ExecutorQuote`]s from an executor and a destination backend.
pub struct ExecutorQuoter<'a> {
    provider: &'a dyn QuoteProvider,
    settings: &'a QuoteSettings,
}

impl<'a> ExecutorQuoter<'a> {
    pub fn new(provider: &'a dyn QuoteProvider, settings: &'a QuoteSettings) -> Self {
        Self { provider, settings }
    }

    pub async fn quote(
        &self,
        request: &TransferRequest,
        options: QuoteOptions,
        destination: &dyn DestinationChain,
        now: DateTime<Utc>,
    ) -> Result<ExecutorQuote> {
        let referrer = self.settings.referrer_for(request.from)?;
        let fee_dbps = self.settings.fee_dbps_for(request.from, &request.source_token);
        let fee = calculate_referrer_fee(
            request.amount,
            request.source_decimals,
            fee_dbps,
            request.destination_decimals,
            self.settings.max_trimmed_decimals,
        )?;

        let capabilities = self.provider.capabilities().await?;
        if !capabilities.contains_key(&request.from) {
            return Err(NttError::UnsupportedRoute {
                chain: request.from,
                reason: "executor does not serve source chain".to_string(),
            });
        }
        let dst_caps = capabilities
            .get(&request.to)
            .filter(|caps| caps.supports(RequestPrefix::Ern1))
            .ok_or_else(|| NttError::UnsupportedRoute {
                chain: request.to,
                reason: "destination does not accept ERN1 requests".to_string(),
            })?;

        let drop_off = gas_drop_off(options.native_gas, dst_caps.gas_drop_off_limit)?;
        let recipient = (!request.recipient.is_zero()).then_some(request.recipient);
        let mut estimate = destination.estimate_msg_value_and_gas_limit(recipient).await?;
        if let Some(gas_limit) = self
            .settings
            .gas_limit_overrides
            .get(&(request.to, request.destination_token))
        {
            estimate.gas_limit = *gas_limit;
        }
        let instructions = build_relay_instructions(
            dst_caps,
            estimate.gas_limit,
            estimate.msg_value,
            drop_off,
            request.recipient,
        )?;

        let response = self
            .provider
            .signed_quote(request.from, request.to, &instructions)
            .await?;
        let estimated_cost: u128 = response
            .estimated_cost
            .as_deref()
            .ok_or_else(|| NttError::InvalidQuote("no estimated cost".to_string()))?
            .parse()
            .map_err(|e| NttError::InvalidQuote(format!("estimated cost: {}", e)))?;
        let signed_quote = hex::decode(
            response
                .signed_quote
                .strip_prefix("0x")
                .unwrap_or(&response.signed_quote),
        )
        .map_err(|e| NttError::InvalidQuote(format!("signed quote is not hex: {}", e)))?;
        let header = SignedQuote::parse(&signed_quote)?;
        if header.source_chain != request.from || header.destination_chain != request.to {
            return Err(NttError::InvalidQuote(format!(
                "quote is for {} -> {}, requested {} -> {}",
                header.source_chain, header.destination_chain, request.from, request.to
            )));
        }
        if header.expiry <= now {
            return Err(NttError::QuoteExpired {
                expired_at: header.expiry,
            });
        }
        info!(
            source = %request.from,
            destination = %request.to,
            quote_len = signed_quote.len(),
            expires = %header.expiry,
            estimated_cost = %estimated_cost,
            "Received signed quote"
        );

        let received_amount = TrimmedAmount::trim_with_cap(
            fee.remaining_amount,
            request.source_decimals,
            request.destination_decimals,
            self.settings.max_trimmed_decimals,
        )?
        .untrim(request.destination_decimals)?;
        let mut warnings = Vec::new();
        let duration = destination.rate_limit_duration().await?;
        if duration > 0 {
            let capacity = destination.current_inbound_capacity(request.from).await?;
            if received_amount > capacity {
                debug!(received_amount, capacity, "Transfer will be queued at destination");
                warnings.push(QuoteWarning::DestinationCapacity {
                    delay_duration_secs: duration,
                });
            }
        }

        Ok(ExecutorQuote {
            signed_quote,
            relay_instructions: instructions,
            estimated_cost,
            payee: header.payee,
            referrer,
            referrer_fee: fee.referrer_fee,
            remaining_amount: fee.remaining_amount,
            referrer_fee_dbps: fee.referrer_fee_dbps,
            expires: header.expiry,
            gas_drop_off: drop_off,
            received_amount,
            warnings,
        })
    }
}
