//! Inbound message bookkeeping
//!
//! One [`InboxItem`] per `(source chain, message id)`. Votes accumulate per
//! transceiver; the release status only ever moves forward:
//!
//! ```text
//! NotApproved -> ReleaseAfter(t) -> Released
//! NotApproved -> Released
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::bitmap::Bitmap;
use crate::error::{NttError, Result};
use crate::message::NttManagerMessage;
use crate::trimmed_amount::TrimmedAmount;
use crate::types::{ChainId, MessageId, UniversalAddress};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReleaseStatus {
    NotApproved,
    ReleaseAfter(u64),
    Released,
}

/// Value handed to the recipient when an inbound transfer is released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundRelease {
    pub source_chain: ChainId,
    pub message_id: MessageId,
    pub recipient: UniversalAddress,
    /// Amount in the local token's native decimals
    pub amount: u64,
}

/// Result of a release attempt. A repeated release is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released(InboundRelease),
    AlreadyReleased,
}

impl ReleaseOutcome {
    pub fn is_released(&self) -> bool {
        matches!(self, ReleaseOutcome::Released(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxItem {
    pub message: NttManagerMessage,
    /// Message amount expressed in the inbound limit's decimals
    pub amount: TrimmedAmount,
    pub votes: Bitmap,
    pub release_status: ReleaseStatus,
}

impl InboxItem {
    pub fn new(message: NttManagerMessage, amount: TrimmedAmount) -> Self {
        Self {
            message,
            amount,
            votes: Bitmap::new(),
            release_status: ReleaseStatus::NotApproved,
        }
    }

    /// Record a vote. Returns false when the transceiver had already voted.
    pub fn vote(&mut self, transceiver_index: u8) -> Result<bool> {
        if self.votes.get(transceiver_index)? {
            return Ok(false);
        }
        self.votes.set(transceiver_index, true)?;
        Ok(true)
    }

    pub fn vote_count(&self, enabled: Bitmap) -> u8 {
        self.votes.count_enabled_votes(enabled)
    }

    pub fn is_approved(&self, enabled: Bitmap, threshold: u8) -> bool {
        threshold > 0 && self.vote_count(enabled) >= threshold
    }

    pub fn is_released(&self) -> bool {
        self.release_status == ReleaseStatus::Released
    }

    /// Move to `ReleaseAfter`. Only valid from `NotApproved`.
    pub fn schedule(&mut self, release_after: u64) -> bool {
        if self.release_status != ReleaseStatus::NotApproved {
            return false;
        }
        self.release_status = ReleaseStatus::ReleaseAfter(release_after);
        true
    }

    /// Move to `Released`.
    ///
    /// Returns `Ok(false)` if the item was already released, and
    /// `ReleaseNotReady` if the release time has not been reached.
    pub fn try_release(&mut self, now: u64) -> Result<bool> {
        match self.release_status {
            ReleaseStatus::NotApproved => Ok(false),
            ReleaseStatus::Released => Ok(false),
            ReleaseStatus::ReleaseAfter(release_after) if release_after > now => {
                Err(NttError::ReleaseNotReady { release_after })
            }
            ReleaseStatus::ReleaseAfter(_) => {
                self.release_status = ReleaseStatus::Released;
                Ok(true)
            }
        }
    }

    /// Release an approved item that never had to wait.
    pub fn release_now(&mut self) -> bool {
        if self.release_status != ReleaseStatus::NotApproved {
            return false;
        }
        self.release_status = ReleaseStatus::Released;
        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct Inbox {
    items: HashMap<(ChainId, MessageId), InboxItem>,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, chain: ChainId, id: &MessageId) -> Option<&InboxItem> {
        self.items.get(&(chain, *id))
    }

    pub fn get_mut(&mut self, chain: ChainId, id: &MessageId) -> Option<&mut InboxItem> {
        self.items.get_mut(&(chain, *id))
    }

    pub fn require_mut(&mut self, chain: ChainId, id: &MessageId) -> Result<&mut InboxItem> {
        self.items
            .get_mut(&(chain, *id))
            .ok_or(NttError::UnknownMessage {
                message_id: *id,
                chain,
            })
    }

    /// Look up the item for `message`, creating it on first sight.
    ///
    /// A different message under an existing key is rejected: the key must
    /// identify exactly one message.
    pub fn get_or_insert(
        &mut self,
        message: &NttManagerMessage,
        amount: TrimmedAmount,
    ) -> Result<&mut InboxItem> {
        let key = (message.source_chain, message.id);
        let item = self
            .items
            .entry(key)
            .or_insert_with(|| InboxItem::new(message.clone(), amount));
        if item.message != *message {
            return Err(NttError::InvalidPayload(format!(
                "conflicting message for id {} from chain {}",
                message.id, message.source_chain
            )));
        }
        Ok(item)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
