//! Fixed-size transceiver bitmap
//!
//! Transceivers are identified by their registration index (0..128). The same
//! bitmap type records which transceivers voted for an inbound message, which
//! transceivers released an outbound item, and which transceivers are
//! currently enabled.

use serde::{Deserialize, Serialize};

use crate::error::{NttError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct Bitmap {
    map: u128,
}

impl Bitmap {
    pub const BITS: u8 = 128;

    pub fn new() -> Self {
        Bitmap { map: 0 }
    }

    pub fn from_value(value: u128) -> Self {
        Bitmap { map: value }
    }

    pub fn value(&self) -> u128 {
        self.map
    }

    pub fn set(&mut self, index: u8, value: bool) -> Result<()> {
        if index >= Self::BITS {
            return Err(NttError::TransceiverNotRegistered { index });
        }
        let bit = 1u128 << index;
        if value {
            self.map |= bit;
        } else {
            self.map &= !bit;
        }
        Ok(())
    }

    pub fn get(&self, index: u8) -> Result<bool> {
        if index >= Self::BITS {
            return Err(NttError::TransceiverNotRegistered { index });
        }
        Ok(self.map & (1u128 << index) != 0)
    }

    /// Votes that still count: only bits that are also set in `enabled`.
    pub fn count_enabled_votes(&self, enabled: Bitmap) -> u8 {
        // at most 128 bits, always fits
        (self.map & enabled.map).count_ones() as u8
    }

    pub fn len(&self) -> usize {
        self.map.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.map == 0
    }
}
