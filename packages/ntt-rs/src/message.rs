//! The canonical cross-chain transfer message
//!
//! ## Wire format
//!
//! ```text
//! id                 [32]
//! sender             [32]
//! payload length     u16
//! payload:
//!   prefix           [4]  0x99 'N' 'T' 'T'
//!   decimals         u8
//!   amount           u64
//!   source token     [32]
//!   recipient        [32]
//!   recipient chain  u16
//!   (optional) additional payload length u16 + bytes
//! ```
//!
//! The source chain and source manager are not part of the encoding: they are
//! known from the transceiver envelope the message arrives in, and are passed
//! to [`NttManagerMessage::decode`] explicitly.

use serde::{Deserialize, Serialize};

use crate::error::{NttError, Result};
use crate::trimmed_amount::TrimmedAmount;
use crate::types::{ChainId, MessageId, UniversalAddress};
use crate::wire::{keccak256, Reader};

/// Prefix of the native token transfer payload.
pub const NATIVE_TOKEN_TRANSFER_PREFIX: [u8; 4] = [0x99, 0x4E, 0x54, 0x54];

const TRANSFER_PAYLOAD_LEN: usize = 4 + 1 + 8 + 32 + 32 + 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NttManagerMessage {
    pub id: MessageId,
    pub source_chain: ChainId,
    pub source_manager: UniversalAddress,
    /// Account that initiated the transfer on the source chain
    pub sender: UniversalAddress,
    pub source_token: UniversalAddress,
    pub recipient_chain: ChainId,
    pub recipient_address: UniversalAddress,
    pub trimmed_amount: TrimmedAmount,
    #[serde(default, with = "hex_bytes")]
    pub additional_payload: Vec<u8>,
}

impl NttManagerMessage {
    fn payload_len(&self) -> Result<u16> {
        let mut len = TRANSFER_PAYLOAD_LEN;
        if !self.additional_payload.is_empty() {
            len += 2 + self.additional_payload.len();
        }
        u16::try_from(len).map_err(|_| {
            NttError::InvalidPayload(format!("payload of {} bytes exceeds u16 length", len))
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload_len = self.payload_len()?;
        let mut out = Vec::with_capacity(32 + 32 + 2 + payload_len as usize);

        out.extend_from_slice(self.id.as_bytes());
        out.extend_from_slice(self.sender.as_bytes());
        out.extend_from_slice(&payload_len.to_be_bytes());

        out.extend_from_slice(&NATIVE_TOKEN_TRANSFER_PREFIX);
        out.push(self.trimmed_amount.decimals);
        out.extend_from_slice(&self.trimmed_amount.amount.to_be_bytes());
        out.extend_from_slice(self.source_token.as_bytes());
        out.extend_from_slice(self.recipient_address.as_bytes());
        out.extend_from_slice(&self.recipient_chain.to_be_bytes());

        if !self.additional_payload.is_empty() {
            // payload_len() already bounded this
            let len = self.additional_payload.len() as u16;
            out.extend_from_slice(&len.to_be_bytes());
            out.extend_from_slice(&self.additional_payload);
        }
        Ok(out)
    }

    pub fn decode(
        source_chain: ChainId,
        source_manager: UniversalAddress,
        bytes: &[u8],
    ) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let id = MessageId(reader.array()?);
        let sender = UniversalAddress(reader.array()?);
        let payload_len = reader.u16()? as usize;
        let payload = reader.take(payload_len)?;
        reader.finish()?;

        let mut payload = Reader::new(payload);
        let prefix: [u8; 4] = payload.array()?;
        if prefix != NATIVE_TOKEN_TRANSFER_PREFIX {
            return Err(NttError::InvalidPayload(format!(
                "invalid transfer prefix 0x{}",
                hex::encode(prefix)
            )));
        }
        let decimals = payload.u8()?;
        let amount = payload.u64()?;
        let source_token = UniversalAddress(payload.array()?);
        let recipient_address = UniversalAddress(payload.array()?);
        let recipient_chain = ChainId(payload.u16()?);

        let additional_payload = if payload.is_empty() {
            Vec::new()
        } else {
            let len = payload.u16()? as usize;
            payload.take(len)?.to_vec()
        };
        payload.finish()?;

        Ok(Self {
            id,
            source_chain,
            source_manager,
            sender,
            source_token,
            recipient_chain,
            recipient_address,
            trimmed_amount: TrimmedAmount::new(amount, decimals),
            additional_payload,
        })
    }

    /// keccak256(source chain || encoded message)
    ///
    /// Unique across chains, since message ids are only unique per source chain.
    pub fn digest(&self) -> Result<[u8; 32]> {
        let encoded = self.encode()?;
        let mut data = Vec::with_capacity(2 + encoded.len());
        data.extend_from_slice(&self.source_chain.to_be_bytes());
        data.extend_from_slice(&encoded);
        Ok(keccak256(&data))
    }
}

pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(serde::de::Error::custom)
    }
}
