//! Client-side transfer lifecycle
//!
//! A [`TransferReceipt`] follows one transfer through:
//!
//! ```text
//! SourceInitiated -> SourceFinalized -> Attested -> DestinationInitiated
//!                                          |              |          \
//!                                          v              v           v
//!                                        Failed   DestinationQueued -> DestinationFinalized
//! ```
//!
//! States are never skipped and never revisited. `Failed` only records that
//! the automatic relay gave up: [`TransferTracker::complete`] can still
//! redeem manually from there.
//!
//! [`TransferTracker::advance`] makes at most one transition per call and
//! returns `None` when nothing changed; [`TransferTracker::track`] drives it
//! as a stream of snapshots.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chain::{DestinationChain, RelayStatusSource, SourceChain};
use crate::config::{Config, PollConfig};
use crate::error::{ErrorClass, NttError, Result};
use crate::executor::quote::ExecutorQuote;
use crate::executor::status::RelayStatus;
use crate::message::NttManagerMessage;
use crate::retry::{poll_until, with_retry, PollSchedule, RetryConfig};
use crate::types::{ChainId, MessageId, TxId, UniversalAddress};

// ============================================================================
// States
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferState {
    SourceInitiated,
    SourceFinalized,
    Attested,
    /// Accepted by the destination ("redeemed"); value not necessarily
    /// released yet
    DestinationInitiated,
    DestinationQueued,
    DestinationFinalized,
    Failed,
}

impl TransferState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::SourceInitiated => "SourceInitiated",
            TransferState::SourceFinalized => "SourceFinalized",
            TransferState::Attested => "Attested",
            TransferState::DestinationInitiated => "DestinationInitiated",
            TransferState::DestinationQueued => "DestinationQueued",
            TransferState::DestinationFinalized => "DestinationFinalized",
            TransferState::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::DestinationFinalized | TransferState::Failed
        )
    }

    /// Allowed single-step transitions.
    pub fn can_advance_to(&self, next: TransferState) -> bool {
        use TransferState::*;
        matches!(
            (self, next),
            (SourceInitiated, SourceFinalized)
                | (SourceInitiated, Failed)
                | (SourceFinalized, Attested)
                | (SourceFinalized, Failed)
                | (Attested, DestinationInitiated)
                | (Attested, Failed)
                // manual redemption after the relay gave up
                | (Failed, DestinationInitiated)
                | (DestinationInitiated, DestinationQueued)
                | (DestinationInitiated, DestinationFinalized)
                | (DestinationQueued, DestinationFinalized)
        )
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Receipt
// ============================================================================

/// Attestation of one manager message, as fetched from the source side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    pub emitter_chain: ChainId,
    pub emitter: UniversalAddress,
    pub sequence: u64,
    pub message: NttManagerMessage,
}

impl Attestation {
    pub fn message_id(&self) -> MessageId {
        self.message.id
    }
}

/// What the sender asked for. Amounts are in source decimals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from: ChainId,
    pub to: ChainId,
    pub sender: UniversalAddress,
    pub recipient: UniversalAddress,
    pub source_token: UniversalAddress,
    pub destination_token: UniversalAddress,
    pub amount: u64,
    pub source_decimals: u8,
    pub destination_decimals: u8,
    /// Queue on the source chain instead of failing when the outbound
    /// limit is exhausted
    pub should_queue: bool,
}

/// Why a transfer ended up `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferFailure {
    pub class: ErrorClass,
    pub reason: String,
    pub relay_status: Option<RelayStatus>,
    pub last_state: TransferState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub from: ChainId,
    pub to: ChainId,
    pub state: TransferState,
    pub origin_txs: Vec<TxId>,
    pub attestation: Option<Attestation>,
    pub destination_txs: Vec<TxId>,
    pub queue_release_time: Option<DateTime<Utc>>,
    pub failure: Option<TransferFailure>,
}

impl TransferReceipt {
    pub fn new(from: ChainId, to: ChainId, origin_txs: Vec<TxId>) -> Self {
        Self {
            from,
            to,
            state: TransferState::SourceInitiated,
            origin_txs,
            attestation: None,
            destination_txs: Vec::new(),
            queue_release_time: None,
            failure: None,
        }
    }

    /// Rebuild a receipt from an attestation, e.g. after a restart.
    pub fn attested(attestation: Attestation, origin_txs: Vec<TxId>) -> Self {
        Self {
            from: attestation.message.source_chain,
            to: attestation.message.recipient_chain,
            state: TransferState::Attested,
            origin_txs,
            attestation: Some(attestation),
            destination_txs: Vec::new(),
            queue_release_time: None,
            failure: None,
        }
    }

    /// The transaction that emitted the message.
    pub fn source_tx(&self) -> Option<&TxId> {
        self.origin_txs.last()
    }

    pub fn message_id(&self) -> Option<MessageId> {
        self.attestation.as_ref().map(Attestation::message_id)
    }

    fn require_attestation(&self) -> Result<&Attestation> {
        self.attestation.as_ref().ok_or(NttError::MissingAttestation)
    }

    /// Copy of this receipt in `next`, if the transition is allowed.
    pub fn advance_to(&self, next: TransferState) -> Result<Self> {
        if !self.state.can_advance_to(next) {
            return Err(NttError::InvalidState {
                operation: "advance",
                state: self.state,
            });
        }
        let mut receipt = self.clone();
        receipt.state = next;
        Ok(receipt)
    }

    pub fn fail(
        &self,
        class: ErrorClass,
        reason: impl Into<String>,
        relay_status: Option<RelayStatus>,
    ) -> Result<Self> {
        let mut receipt = self.advance_to(TransferState::Failed)?;
        receipt.failure = Some(TransferFailure {
            class,
            reason: reason.into(),
            relay_status,
            last_state: self.state,
        });
        Ok(receipt)
    }
}

// ============================================================================
// Tracker
// ============================================================================

/// Poll the relay status of `tx` in the background so the executor picks up
/// the request.
///
/// The task ends after the first status or when the schedule runs out;
/// errors are only logged. Dropping the handle detaches the task.
pub fn spawn_status_poll(
    relay: Arc<dyn RelayStatusSource>,
    tx: TxId,
    schedule: PollSchedule,
) -> JoinHandle<Option<RelayStatus>> {
    tokio::spawn(async move {
        let result = poll_until(&schedule, |_| {
            let relay = relay.clone();
            let tx = tx.clone();
            async move { relay.relay_status(&tx).await }
        })
        .await;
        match result {
            Ok(status) => {
                debug!(tx = %tx, status = %status, "Executor indexed transfer");
                Some(status)
            }
            Err(e) => {
                debug!(tx = %tx, error = %e, "Relay status not available");
                None
            }
        }
    })
}

/// Drives transfers through their lifecycle using the chain backends.
#[derive(Clone)]
pub struct TransferTracker {
    source: Arc<dyn SourceChain>,
    destination: Arc<dyn DestinationChain>,
    relay: Arc<dyn RelayStatusSource>,
    poll: PollConfig,
    retry: RetryConfig,
}

impl TransferTracker {
    pub fn new(
        source: Arc<dyn SourceChain>,
        destination: Arc<dyn DestinationChain>,
        relay: Arc<dyn RelayStatusSource>,
        poll: PollConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            source,
            destination,
            relay,
            poll,
            retry,
        }
    }

    pub fn from_config(
        source: Arc<dyn SourceChain>,
        destination: Arc<dyn DestinationChain>,
        relay: Arc<dyn RelayStatusSource>,
        config: &Config,
    ) -> Self {
        Self::new(
            source,
            destination,
            relay,
            config.poll.clone(),
            config.retry.clone(),
        )
    }

    fn transition(&self, receipt: &TransferReceipt, next: TransferState) -> Result<TransferReceipt> {
        let advanced = receipt.advance_to(next)?;
        info!(
            from = %receipt.state,
            to = %next,
            message_id = ?receipt.message_id(),
            "Transfer state changed"
        );
        Ok(advanced)
    }

    /// Submit the transfer on the source chain.
    ///
    /// The quote is checked locally first. The returned handle belongs to the
    /// background relay status poll and may be dropped.
    pub async fn initiate(
        &self,
        request: &TransferRequest,
        quote: &ExecutorQuote,
        now: DateTime<Utc>,
    ) -> Result<(TransferReceipt, JoinHandle<Option<RelayStatus>>)> {
        if request.recipient.is_zero() {
            return Err(NttError::InvalidPayload("transfer recipient is required".to_string()));
        }
        quote.validate_for_submission(&request.recipient, now)?;

        let txs = self.source.submit_transfer(request, quote).await?;
        let tx = txs
            .last()
            .cloned()
            .ok_or_else(|| NttError::Chain("transfer produced no transactions".to_string()))?;
        info!(
            from = %request.from,
            to = %request.to,
            tx = %tx,
            amount = request.amount,
            "Transfer submitted"
        );

        let handle = spawn_status_poll(self.relay.clone(), tx, self.poll.status_schedule());
        Ok((TransferReceipt::new(request.from, request.to, txs), handle))
    }

    /// Rebuild an `Attested` receipt from a source transaction.
    pub async fn resume(&self, tx: TxId) -> Result<TransferReceipt> {
        let attestation = with_retry(&self.retry, |_| self.source.fetch_attestation(&tx))
            .await?
            .ok_or(NttError::MissingAttestation)?;
        info!(tx = %tx, message_id = %attestation.message_id(), "Resumed transfer");
        Ok(TransferReceipt::attested(attestation, vec![tx]))
    }

    /// Make at most one transition. `None` means nothing changed yet.
    pub async fn advance(&self, receipt: &TransferReceipt) -> Result<Option<TransferReceipt>> {
        match receipt.state {
            TransferState::SourceInitiated => {
                let tx = receipt
                    .source_tx()
                    .ok_or_else(|| NttError::Chain("receipt has no source transaction".to_string()))?;
                if with_retry(&self.retry, |_| self.source.is_finalized(tx)).await? {
                    return self.transition(receipt, TransferState::SourceFinalized).map(Some);
                }
                Ok(None)
            }
            TransferState::SourceFinalized => {
                let tx = receipt
                    .source_tx()
                    .ok_or_else(|| NttError::Chain("receipt has no source transaction".to_string()))?;
                match with_retry(&self.retry, |_| self.source.fetch_attestation(tx)).await? {
                    Some(attestation) => {
                        let mut next = self.transition(receipt, TransferState::Attested)?;
                        next.attestation = Some(attestation);
                        Ok(Some(next))
                    }
                    None => Ok(None),
                }
            }
            TransferState::Attested => {
                let attestation = receipt.require_attestation()?;
                if with_retry(&self.retry, |_| self.destination.is_approved(attestation)).await? {
                    return self
                        .transition(receipt, TransferState::DestinationInitiated)
                        .map(Some);
                }
                let Some(tx) = receipt.source_tx() else {
                    return Ok(None);
                };
                match with_retry(&self.retry, |_| self.relay.relay_status(tx)).await? {
                    Some(status) if status.is_failure() => {
                        warn!(
                            tx = %tx,
                            message_id = %attestation.message_id(),
                            status = %status,
                            "Relay failed, manual redemption required"
                        );
                        let error = NttError::RelayFailed { status };
                        let failed = receipt.fail(error.class(), error.to_string(), Some(status))?;
                        Ok(Some(failed))
                    }
                    Some(status) => {
                        debug!(tx = %tx, status = %status, "Relay in progress");
                        Ok(None)
                    }
                    None => {
                        debug!(tx = %tx, "Relay not indexed yet");
                        Ok(None)
                    }
                }
            }
            TransferState::DestinationInitiated => {
                let attestation = receipt.require_attestation()?;
                let queued = with_retry(&self.retry, |_| {
                    self.destination.get_inbound_queued_transfer(attestation)
                })
                .await?;
                if let Some(queued) = queued {
                    let release_time = i64::try_from(queued.rate_limit_expiry_timestamp)
                        .ok()
                        .and_then(|secs| DateTime::from_timestamp(secs, 0))
                        .ok_or(NttError::ArithmeticOverflow("queue release time"))?;
                    let mut next = self.transition(receipt, TransferState::DestinationQueued)?;
                    next.queue_release_time = Some(release_time);
                    return Ok(Some(next));
                }
                if with_retry(&self.retry, |_| self.destination.is_executed(attestation)).await? {
                    return self
                        .transition(receipt, TransferState::DestinationFinalized)
                        .map(Some);
                }
                Ok(None)
            }
            TransferState::DestinationQueued => {
                let attestation = receipt.require_attestation()?;
                if with_retry(&self.retry, |_| self.destination.is_executed(attestation)).await? {
                    return self
                        .transition(receipt, TransferState::DestinationFinalized)
                        .map(Some);
                }
                Ok(None)
            }
            TransferState::DestinationFinalized | TransferState::Failed => {
                Err(NttError::InvalidState {
                    operation: "track",
                    state: receipt.state,
                })
            }
        }
    }

    /// Snapshots of `receipt` as it advances.
    ///
    /// The stream ends after a terminal state, after `DestinationQueued`
    /// (the transfer then waits for [`finalize`](Self::finalize)), or on the
    /// first error. Each run of polls without progress is bounded by
    /// `track_max_polls`; running out yields `Timeout`. Passing a terminal
    /// receipt yields a single `InvalidState` error.
    pub fn track(
        &self,
        receipt: TransferReceipt,
    ) -> impl Stream<Item = Result<TransferReceipt>> + '_ {
        struct Cursor {
            receipt: TransferReceipt,
            done: bool,
        }

        let schedule = self.poll.track_schedule();
        stream::unfold(
            Cursor {
                receipt,
                done: false,
            },
            move |mut cursor| async move {
                if cursor.done {
                    return None;
                }
                let mut idle_polls = 0u32;
                loop {
                    match self.advance(&cursor.receipt).await {
                        Ok(Some(next)) => {
                            cursor.done = next.state.is_terminal()
                                || next.state == TransferState::DestinationQueued;
                            cursor.receipt = next.clone();
                            return Some((Ok(next), cursor));
                        }
                        Ok(None) => {
                            idle_polls += 1;
                            if idle_polls >= schedule.max_attempts {
                                warn!(
                                    state = %cursor.receipt.state,
                                    polls = idle_polls,
                                    "Gave up tracking transfer"
                                );
                                cursor.done = true;
                                return Some((
                                    Err(NttError::Timeout {
                                        attempts: idle_polls,
                                    }),
                                    cursor,
                                ));
                            }
                            tokio::time::sleep(schedule.interval).await;
                        }
                        Err(e) => {
                            cursor.done = true;
                            return Some((Err(e), cursor));
                        }
                    }
                }
            },
        )
    }

    /// Redeem on the destination manually.
    ///
    /// Valid from `Attested` and `Failed`. Receipts that are already past
    /// redemption are returned unchanged.
    pub async fn complete(&self, receipt: &TransferReceipt) -> Result<TransferReceipt> {
        match receipt.state {
            TransferState::Attested | TransferState::Failed => {}
            TransferState::DestinationInitiated
            | TransferState::DestinationQueued
            | TransferState::DestinationFinalized => return Ok(receipt.clone()),
            state => {
                return Err(NttError::InvalidState {
                    operation: "complete",
                    state,
                })
            }
        }
        let attestation = receipt.require_attestation()?;
        let txs = self.destination.redeem(attestation).await?;
        let mut next = self.transition(receipt, TransferState::DestinationInitiated)?;
        next.destination_txs.extend(txs);
        next.failure = None;
        Ok(next)
    }

    /// Release a transfer queued by the destination's inbound limit.
    ///
    /// Anyone may call this once `now` has reached the queue release time;
    /// calling earlier fails with `ReleaseNotReady` and changes nothing.
    pub async fn finalize(
        &self,
        receipt: &TransferReceipt,
        now: DateTime<Utc>,
    ) -> Result<TransferReceipt> {
        if receipt.state != TransferState::DestinationQueued {
            return Err(NttError::InvalidState {
                operation: "finalize",
                state: receipt.state,
            });
        }
        if let Some(release_time) = receipt.queue_release_time {
            if now < release_time {
                return Err(NttError::ReleaseNotReady {
                    release_after: release_time.timestamp().max(0) as u64,
                });
            }
        }
        let attestation = receipt.require_attestation()?;
        let txs = self
            .destination
            .complete_inbound_queued_transfer(attestation)
            .await?;
        let mut next = self.transition(receipt, TransferState::DestinationFinalized)?;
        next.destination_txs.extend(txs);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trimmed_amount::TrimmedAmount;

    const ALL_STATES: [TransferState; 7] = [
        TransferState::SourceInitiated,
        TransferState::SourceFinalized,
        TransferState::Attested,
        TransferState::DestinationInitiated,
        TransferState::DestinationQueued,
        TransferState::DestinationFinalized,
        TransferState::Failed,
    ];

    fn attestation() -> Attestation {
        Attestation {
            emitter_chain: ChainId::ETHEREUM,
            emitter: UniversalAddress([0xee; 32]),
            sequence: 3,
            message: NttManagerMessage {
                id: MessageId::from_sequence(3),
                source_chain: ChainId::ETHEREUM,
                source_manager: UniversalAddress([1; 32]),
                sender: UniversalAddress([2; 32]),
                source_token: UniversalAddress([3; 32]),
                recipient_chain: ChainId::SOLANA,
                recipient_address: UniversalAddress([4; 32]),
                trimmed_amount: TrimmedAmount::new(100, 8),
                additional_payload: Vec::new(),
            },
        }
    }

    #[test]
    fn test_terminal_states_have_no_automatic_exit() {
        for next in ALL_STATES {
            assert!(!TransferState::DestinationFinalized.can_advance_to(next));
        }
        // Failed only leaves through manual redemption
        let exits: Vec<_> = ALL_STATES
            .into_iter()
            .filter(|next| TransferState::Failed.can_advance_to(*next))
            .collect();
        assert_eq!(exits, vec![TransferState::DestinationInitiated]);
    }

    #[test]
    fn test_no_state_is_skipped_or_revisited() {
        use TransferState::*;
        assert!(!SourceInitiated.can_advance_to(Attested));
        assert!(!SourceFinalized.can_advance_to(DestinationInitiated));
        assert!(!Attested.can_advance_to(DestinationFinalized));
        assert!(!DestinationQueued.can_advance_to(DestinationInitiated));
        assert!(!DestinationInitiated.can_advance_to(Attested));
        for state in ALL_STATES {
            assert!(!state.can_advance_to(state));
        }
    }

    #[test]
    fn test_advance_to_rejects_invalid_transition() {
        let receipt = TransferReceipt::new(ChainId::ETHEREUM, ChainId::SOLANA, Vec::new());
        let err = receipt
            .advance_to(TransferState::DestinationFinalized)
            .unwrap_err();
        assert!(matches!(
            err,
            NttError::InvalidState {
                operation: "advance",
                state: TransferState::SourceInitiated
            }
        ));
        assert_eq!(receipt.state, TransferState::SourceInitiated);
    }

    #[test]
    fn test_fail_records_context() {
        let receipt = TransferReceipt::attested(
            attestation(),
            vec![TxId::new(ChainId::ETHEREUM, "0xabc")],
        );
        assert_eq!(receipt.from, ChainId::ETHEREUM);
        assert_eq!(receipt.to, ChainId::SOLANA);

        let failed = receipt
            .fail(ErrorClass::Relay, "relay status underpaid", Some(RelayStatus::Underpaid))
            .unwrap();
        assert_eq!(failed.state, TransferState::Failed);
        let failure = failed.failure.as_ref().unwrap();
        assert_eq!(failure.last_state, TransferState::Attested);
        assert_eq!(failure.relay_status, Some(RelayStatus::Underpaid));
        assert_eq!(failed.message_id(), Some(MessageId::from_sequence(3)));
        assert!(failed.fail(ErrorClass::Relay, "again", None).is_err());
    }

    #[test]
    fn test_receipt_serde() {
        let receipt = TransferReceipt::attested(
            attestation(),
            vec![TxId::new(ChainId::ETHEREUM, "0xabc")],
        );
        let json = serde_json::to_string(&receipt).unwrap();
        assert!(json.contains("\"Attested\""));
        let back: TransferReceipt = serde_json::from_str(&json).unwrap();
        assert_eq!(back, receipt);
    }
}
