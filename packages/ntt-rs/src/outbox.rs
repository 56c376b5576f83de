//! Outbound message bookkeeping
//!
//! Each submitted transfer becomes an [`OutboxItem`]. Every enabled
//! transceiver releases it once, setting its bit; a queued item cannot be
//! released before its release timestamp.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::bitmap::Bitmap;
use crate::error::{NttError, Result};
use crate::message::NttManagerMessage;
use crate::trimmed_amount::TrimmedAmount;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxItem {
    pub id: u64,
    pub message: NttManagerMessage,
    /// Amount in the outbound limit's decimals
    pub amount: TrimmedAmount,
    /// Dust kept on the source chain, in native decimals
    pub dust: u64,
    pub release_timestamp: u64,
    /// Whether the transfer was deferred by the outbound rate limit
    pub queued: bool,
    pub released: Bitmap,
}

impl OutboxItem {
    /// Mark the item as released by `transceiver_index`.
    ///
    /// Returns true the first time a given transceiver releases the item and
    /// false on repeats.
    pub fn try_release(&mut self, transceiver_index: u8, now: u64) -> Result<bool> {
        if self.release_timestamp > now {
            return Err(NttError::ReleaseNotReady {
                release_after: self.release_timestamp,
            });
        }
        if self.released.get(transceiver_index)? {
            return Ok(false);
        }
        self.released.set(transceiver_index, true)?;
        Ok(true)
    }

    pub fn is_released_by(&self, transceiver_index: u8) -> bool {
        self.released.get(transceiver_index).unwrap_or(false)
    }

    pub fn is_untouched(&self) -> bool {
        self.released.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Outbox {
    next_id: u64,
    items: BTreeMap<u64, OutboxItem>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn insert(
        &mut self,
        message: NttManagerMessage,
        amount: TrimmedAmount,
        dust: u64,
        release_timestamp: u64,
        queued: bool,
    ) -> &OutboxItem {
        let id = self.next_id;
        self.next_id += 1;
        self.items.entry(id).or_insert(OutboxItem {
            id,
            message,
            amount,
            dust,
            release_timestamp,
            queued,
            released: Bitmap::new(),
        })
    }

    pub fn get(&self, id: u64) -> Option<&OutboxItem> {
        self.items.get(&id)
    }

    pub fn require_mut(&mut self, id: u64) -> Result<&mut OutboxItem> {
        self.items
            .get_mut(&id)
            .ok_or(NttError::UnknownOutboxItem { id })
    }

    /// Remove a queued item that no transceiver has released yet.
    pub fn cancel_queued(&mut self, id: u64) -> Result<OutboxItem> {
        let item = self.items.get(&id).ok_or(NttError::UnknownOutboxItem { id })?;
        if !item.queued {
            return Err(NttError::CannotCancel {
                id,
                reason: "transfer was not queued",
            });
        }
        if !item.is_untouched() {
            return Err(NttError::CannotCancel {
                id,
                reason: "transfer was already released",
            });
        }
        self.items
            .remove(&id)
            .ok_or(NttError::UnknownOutboxItem { id })
    }

    pub fn queued(&self) -> impl Iterator<Item = &OutboxItem> {
        self.items.values().filter(|item| item.queued && item.is_untouched())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
