//! Relay instruction codec
//!
//! Relay instructions tell the executor how much gas and how much native
//! currency to spend on the destination chain. The encoding is a flat
//! concatenation of instructions with no length or count prefix:
//!
//! ```text
//! GasInstruction         0x01 | gas_limit u128 | msg_value u128
//! GasDropOffInstruction  0x02 | drop_off  u128 | recipient [32]
//! ```
//!
//! All integers are big-endian. Decoding consumes the whole buffer; an
//! unknown tag rejects the entire input.

use serde::{Deserialize, Serialize};

use crate::error::{NttError, Result};
use crate::types::UniversalAddress;
use crate::wire::Reader;

pub const GAS_INSTRUCTION_TYPE: u8 = 1;
pub const GAS_DROP_OFF_INSTRUCTION_TYPE: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RelayInstruction {
    #[serde(rename = "GasInstruction", rename_all = "camelCase")]
    Gas { gas_limit: u128, msg_value: u128 },
    #[serde(rename = "GasDropOffInstruction", rename_all = "camelCase")]
    GasDropOff {
        drop_off: u128,
        recipient: UniversalAddress,
    },
}

impl RelayInstruction {
    pub fn type_tag(&self) -> u8 {
        match self {
            RelayInstruction::Gas { .. } => GAS_INSTRUCTION_TYPE,
            RelayInstruction::GasDropOff { .. } => GAS_DROP_OFF_INSTRUCTION_TYPE,
        }
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            RelayInstruction::Gas { .. } => 1 + 16 + 16,
            RelayInstruction::GasDropOff { .. } => 1 + 16 + 32,
        }
    }
}

pub fn encode(instructions: &[RelayInstruction]) -> Vec<u8> {
    let len = instructions.iter().map(RelayInstruction::encoded_len).sum();
    let mut out = Vec::with_capacity(len);
    for instruction in instructions {
        out.push(instruction.type_tag());
        match instruction {
            RelayInstruction::Gas {
                gas_limit,
                msg_value,
            } => {
                out.extend_from_slice(&gas_limit.to_be_bytes());
                out.extend_from_slice(&msg_value.to_be_bytes());
            }
            RelayInstruction::GasDropOff {
                drop_off,
                recipient,
            } => {
                out.extend_from_slice(&drop_off.to_be_bytes());
                out.extend_from_slice(recipient.as_bytes());
            }
        }
    }
    out
}

pub fn decode(bytes: &[u8]) -> Result<Vec<RelayInstruction>> {
    let mut reader = Reader::new(bytes);
    let mut instructions = Vec::new();
    while !reader.is_empty() {
        let instruction = match reader.u8()? {
            GAS_INSTRUCTION_TYPE => RelayInstruction::Gas {
                gas_limit: reader.u128()?,
                msg_value: reader.u128()?,
            },
            GAS_DROP_OFF_INSTRUCTION_TYPE => RelayInstruction::GasDropOff {
                drop_off: reader.u128()?,
                recipient: UniversalAddress(reader.array()?),
            },
            other => return Err(NttError::UnsupportedInstructionType(other)),
        };
        instructions.push(instruction);
    }
    Ok(instructions)
}

/// 0x-prefixed hex, as sent to the quote endpoint.
pub fn encode_hex(instructions: &[RelayInstruction]) -> String {
    format!("0x{}", hex::encode(encode(instructions)))
}

pub fn decode_hex(hex_str: &str) -> Result<Vec<RelayInstruction>> {
    let stripped = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    let bytes = hex::decode(stripped)
        .map_err(|e| NttError::InvalidPayload(format!("relay instructions are not hex: {}", e)))?;
    decode(&bytes)
}

/// Sum of gas limits and message values over all gas instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelayTotals {
    pub gas_limit: u128,
    pub msg_value: u128,
    pub drop_off: u128,
}

pub fn totals(instructions: &[RelayInstruction]) -> Result<RelayTotals> {
    let mut totals = RelayTotals::default();
    for instruction in instructions {
        match instruction {
            RelayInstruction::Gas {
                gas_limit,
                msg_value,
            } => {
                totals.gas_limit = totals
                    .gas_limit
                    .checked_add(*gas_limit)
                    .ok_or(NttError::ArithmeticOverflow("total gas limit"))?;
                totals.msg_value = totals
                    .msg_value
                    .checked_add(*msg_value)
                    .ok_or(NttError::ArithmeticOverflow("total msg value"))?;
            }
            RelayInstruction::GasDropOff { drop_off, .. } => {
                totals.drop_off = totals
                    .drop_off
                    .checked_add(*drop_off)
                    .ok_or(NttError::ArithmeticOverflow("total drop-off"))?;
            }
        }
    }
    Ok(totals)
}
