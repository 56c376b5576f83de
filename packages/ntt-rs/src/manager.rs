//! The per-chain token manager
//!
//! [`NttManager`] is the state a manager contract keeps on one chain: peers,
//! transceivers and the approval threshold, the outbound and per-peer inbound
//! rate limits, and the inbox/outbox tables. It is a plain value: every
//! mutating operation takes `&mut self` plus the current time, so the host
//! (a chain's execution model, or a test) serialises access to it.
//!
//! Rate limits are kept in trimmed units at
//! `min(max_trimmed_decimals, token_decimals)` decimals.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ProtocolParams;
use crate::error::{NttError, Result};
use crate::inbox::{InboundRelease, Inbox, InboxItem, ReleaseOutcome, ReleaseStatus};
use crate::message::NttManagerMessage;
use crate::outbox::{Outbox, OutboxItem};
use crate::peer::{Peer, PeerRegistry, TransceiverRegistry};
use crate::rate_limit::{DebitOutcome, OnExceeded, RateLimitState, RateLimiter};
use crate::trimmed_amount::TrimmedAmount;
use crate::types::{ChainId, MessageId, UniversalAddress};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerConfig {
    pub chain: ChainId,
    pub address: UniversalAddress,
    pub token: UniversalAddress,
    pub token_decimals: u8,
}

/// An outbound transfer request. `amount` is in native token decimals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferArgs {
    pub amount: u64,
    pub recipient_chain: ChainId,
    pub recipient: UniversalAddress,
    pub sender: UniversalAddress,
    /// Queue instead of failing when the outbound limit is exhausted
    pub should_queue: bool,
    pub additional_payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub outbox_id: u64,
    pub message: NttManagerMessage,
    /// Native-decimal dust that stays on this chain
    pub dust: u64,
    /// Set when the outbound limit deferred the transfer
    pub queued_until: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestOutcome {
    /// False when this transceiver had already voted
    pub vote_recorded: bool,
    pub votes: u8,
    pub approved: bool,
    pub status: ReleaseStatus,
    /// Present only on the call that released value
    pub released: Option<InboundRelease>,
}

#[derive(Debug, Clone)]
pub struct NttManager {
    config: ManagerConfig,
    params: ProtocolParams,
    limiter: RateLimiter,
    peers: PeerRegistry,
    transceivers: TransceiverRegistry,
    threshold: u8,
    outbound_limit: RateLimitState,
    inbox: Inbox,
    outbox: Outbox,
    next_sequence: u64,
}

impl NttManager {
    pub fn new(
        config: ManagerConfig,
        params: ProtocolParams,
        outbound_limit: u64,
        now: u64,
    ) -> Result<Self> {
        if config.token_decimals == 0 {
            return Err(NttError::Config("token decimals must be non-zero".to_string()));
        }
        if config.address.is_zero() || config.token.is_zero() {
            return Err(NttError::Config(
                "manager and token addresses must be non-zero".to_string(),
            ));
        }
        Ok(Self {
            limiter: RateLimiter::new(params.rate_limit_duration_secs),
            config,
            params,
            peers: PeerRegistry::new(),
            transceivers: TransceiverRegistry::new(),
            threshold: 0,
            outbound_limit: RateLimitState::new(outbound_limit, now),
            inbox: Inbox::new(),
            outbox: Outbox::new(),
            next_sequence: 0,
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn chain(&self) -> ChainId {
        self.config.chain
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Decimals that rate limits are expressed in.
    pub fn limit_decimals(&self) -> u8 {
        self.params
            .max_trimmed_decimals
            .min(self.config.token_decimals)
    }

    // ========================================================================
    // Peers and transceivers
    // ========================================================================

    pub fn register_peer(
        &mut self,
        chain: ChainId,
        manager_address: UniversalAddress,
        token_decimals: u8,
        inbound_limit: u64,
        now: u64,
    ) -> Result<&Peer> {
        if chain == self.config.chain {
            return Err(NttError::Config(format!(
                "cannot register chain {} as its own peer",
                chain
            )));
        }
        self.peers.register_peer(
            &self.limiter,
            chain,
            manager_address,
            token_decimals,
            inbound_limit,
            now,
        )
    }

    pub fn update_peer(
        &mut self,
        chain: ChainId,
        manager_address: UniversalAddress,
        token_decimals: u8,
    ) -> Result<&Peer> {
        self.peers.update_peer(chain, manager_address, token_decimals)
    }

    pub fn peer(&self, chain: ChainId) -> Option<&Peer> {
        self.peers.get(chain)
    }

    pub fn transceivers(&self) -> &TransceiverRegistry {
        &self.transceivers
    }

    /// Register a transceiver. The first registration raises a zero threshold
    /// to 1.
    pub fn register_transceiver(&mut self, address: UniversalAddress) -> Result<u8> {
        let index = self.transceivers.register(address)?;
        if self.threshold == 0 {
            self.threshold = 1;
        }
        Ok(index)
    }

    /// Deregister a transceiver, lowering the threshold if it would become
    /// unreachable.
    pub fn deregister_transceiver(&mut self, index: u8) -> Result<()> {
        self.transceivers.deregister(index)?;
        let enabled = self.transceivers.enabled_count();
        if self.threshold > enabled {
            warn!(
                old_threshold = self.threshold,
                new_threshold = enabled,
                "Threshold lowered after transceiver deregistration"
            );
            self.threshold = enabled;
        }
        Ok(())
    }

    pub fn set_transceiver_peer(
        &mut self,
        index: u8,
        chain: ChainId,
        address: UniversalAddress,
    ) -> Result<()> {
        self.transceivers.set_peer(index, chain, address)
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: u8) -> Result<()> {
        let enabled = self.transceivers.enabled_count();
        if threshold == 0 || threshold > enabled {
            return Err(NttError::InvalidThreshold { threshold, enabled });
        }
        info!(old = self.threshold, new = threshold, "Threshold changed");
        self.threshold = threshold;
        Ok(())
    }

    // ========================================================================
    // Rate limits
    // ========================================================================

    pub fn outbound_limit(&self) -> &RateLimitState {
        &self.outbound_limit
    }

    pub fn outbound_capacity(&self, now: u64) -> u64 {
        self.limiter.current_capacity(&self.outbound_limit, now)
    }

    pub fn inbound_capacity(&self, chain: ChainId, now: u64) -> Result<u64> {
        let peer = self.peers.require(chain)?;
        Ok(self.limiter.current_capacity(&peer.inbound_limit, now))
    }

    pub fn set_outbound_limit(&mut self, limit: u64, now: u64) {
        self.outbound_limit = self.limiter.set_limit(&self.outbound_limit, now, limit);
    }

    pub fn set_inbound_limit(&mut self, chain: ChainId, limit: u64, now: u64) -> Result<()> {
        let limiter = self.limiter;
        let peer = self.peers.require_mut(chain)?;
        peer.inbound_limit = limiter.set_limit(&peer.inbound_limit, now, limit);
        Ok(())
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    pub fn transfer(&mut self, args: TransferArgs, now: u64) -> Result<TransferOutcome> {
        if args.recipient_chain == self.config.chain {
            return Err(NttError::Config(format!(
                "recipient chain {} is the local chain",
                args.recipient_chain
            )));
        }
        if args.recipient.is_zero() {
            return Err(NttError::InvalidPayload("recipient must be non-zero".to_string()));
        }
        if self.transceivers.enabled_count() == 0 {
            return Err(NttError::Config("no transceivers enabled".to_string()));
        }

        let peer = self.peers.require(args.recipient_chain)?;
        let (trimmed, dust) = TrimmedAmount::remove_dust(
            args.amount,
            self.config.token_decimals,
            peer.token_decimals,
            self.params.max_trimmed_decimals,
        )?;
        if trimmed.is_zero() {
            return Err(NttError::InvalidPayload(format!(
                "amount {} is zero after trimming",
                args.amount
            )));
        }
        let limit_amount = trimmed.change_decimals(self.limit_decimals())?;

        let mode = if args.should_queue {
            OnExceeded::Queue
        } else {
            OnExceeded::Reject
        };
        let (release_timestamp, queued_until) =
            match self
                .limiter
                .debit(&self.outbound_limit, now, limit_amount.amount, mode)?
            {
                DebitOutcome::Consumed(next) => {
                    self.outbound_limit = next;
                    self.backflow_inbound(args.recipient_chain, limit_amount.amount, now)?;
                    (now, None)
                }
                DebitOutcome::Queued { release_at, .. } => (release_at, Some(release_at)),
            };

        let message = NttManagerMessage {
            id: MessageId::from_sequence(self.next_sequence),
            source_chain: self.config.chain,
            source_manager: self.config.address,
            sender: args.sender,
            source_token: self.config.token,
            recipient_chain: args.recipient_chain,
            recipient_address: args.recipient,
            trimmed_amount: trimmed,
            additional_payload: args.additional_payload,
        };
        self.next_sequence += 1;

        let item = self.outbox.insert(
            message.clone(),
            limit_amount,
            dust,
            release_timestamp,
            queued_until.is_some(),
        );
        info!(
            message_id = %message.id,
            outbox_id = item.id,
            recipient_chain = %message.recipient_chain,
            amount = trimmed.amount,
            decimals = trimmed.decimals,
            dust,
            queued_until,
            "Outbound transfer created"
        );

        Ok(TransferOutcome {
            outbox_id: item.id,
            message,
            dust,
            queued_until,
        })
    }

    /// Mark an outbox item as released by one transceiver.
    ///
    /// Returns false if that transceiver had already released it. The first
    /// release of a queued item consumes outbound capacity.
    pub fn release_outbound(&mut self, id: u64, transceiver_index: u8, now: u64) -> Result<bool> {
        self.transceivers.require_enabled(transceiver_index)?;
        let item = self.outbox.require_mut(id)?;
        let first_release = item.is_untouched();
        if !item.try_release(transceiver_index, now)? {
            return Ok(false);
        }
        let (queued, amount, recipient_chain) =
            (item.queued, item.amount.amount, item.message.recipient_chain);
        debug!(outbox_id = id, transceiver = transceiver_index, "Outbox item released");

        if queued && first_release {
            self.outbound_limit = self
                .limiter
                .consume_saturating(&self.outbound_limit, now, amount);
            self.backflow_inbound(recipient_chain, amount, now)?;
        }
        Ok(true)
    }

    pub fn cancel_outbound_queued(&mut self, id: u64) -> Result<OutboxItem> {
        let item = self.outbox.cancel_queued(id)?;
        info!(outbox_id = id, message_id = %item.message.id, "Queued outbound transfer cancelled");
        Ok(item)
    }

    pub fn outbox_item(&self, id: u64) -> Option<&OutboxItem> {
        self.outbox.get(id)
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    /// Record `transceiver_index`'s attestation of `message`, received from
    /// the transceiver at `emitter` on the source chain.
    ///
    /// Once the threshold is reached the inbound limit decides between
    /// immediate release and a deferred `ReleaseAfter`. Repeated and
    /// out-of-order attestations are safe: value is released at most once.
    pub fn attest(
        &mut self,
        transceiver_index: u8,
        emitter: UniversalAddress,
        message: &NttManagerMessage,
        now: u64,
    ) -> Result<AttestOutcome> {
        let source_chain = message.source_chain;
        let transceiver = self.transceivers.require_enabled(transceiver_index)?;
        let transceiver_peer =
            transceiver
                .peer(source_chain)
                .ok_or(NttError::TransceiverPeerNotRegistered {
                    index: transceiver_index,
                    chain: source_chain,
                })?;
        if transceiver_peer.address != emitter {
            return Err(NttError::PeerMismatch {
                chain: source_chain,
                reason: format!(
                    "transceiver {} expects emitter {}, got {}",
                    transceiver_index, transceiver_peer.address, emitter
                ),
            });
        }
        let peer = self.peers.require(source_chain)?;
        if peer.manager_address != message.source_manager {
            return Err(NttError::PeerMismatch {
                chain: source_chain,
                reason: format!(
                    "expected manager {}, got {}",
                    peer.manager_address, message.source_manager
                ),
            });
        }
        if message.recipient_chain != self.config.chain {
            return Err(NttError::InvalidRecipientChain {
                expected: self.config.chain,
                got: message.recipient_chain,
            });
        }
        if message.trimmed_amount.decimals > self.config.token_decimals {
            return Err(NttError::InvalidPayload(format!(
                "message decimals {} exceed local token decimals {}",
                message.trimmed_amount.decimals, self.config.token_decimals
            )));
        }
        let amount = message.trimmed_amount.change_decimals(self.limit_decimals())?;

        let enabled = self.transceivers.enabled_bitmap();
        let threshold = self.threshold;
        let item = self.inbox.get_or_insert(message, amount)?;
        let vote_recorded = item.vote(transceiver_index)?;
        let votes = item.vote_count(enabled);
        let approved = item.is_approved(enabled, threshold);
        debug!(
            message_id = %message.id,
            chain = %source_chain,
            transceiver = transceiver_index,
            votes,
            threshold,
            vote_recorded,
            "Attestation recorded"
        );

        let mut released = None;
        if approved && item.release_status == ReleaseStatus::NotApproved {
            let peer = self.peers.require_mut(source_chain)?;
            match self
                .limiter
                .debit(&peer.inbound_limit, now, amount.amount, OnExceeded::Queue)?
            {
                DebitOutcome::Consumed(next) => {
                    peer.inbound_limit = next;
                    item.release_now();
                    released = Some(Self::inbound_release(item, self.config.token_decimals)?);
                    info!(message_id = %message.id, chain = %source_chain, "Inbound transfer released");
                }
                DebitOutcome::Queued { release_at, .. } => {
                    item.schedule(release_at);
                    info!(message_id = %message.id, chain = %source_chain, release_at, "Inbound transfer queued");
                }
            }
        }
        let status = item.release_status;

        if released.is_some() {
            self.backflow_outbound(amount.amount, now);
        }

        Ok(AttestOutcome {
            vote_recorded,
            votes,
            approved,
            status,
            released,
        })
    }

    pub fn is_approved(&self, chain: ChainId, message_id: &MessageId) -> bool {
        self.inbox
            .get(chain, message_id)
            .map(|item| item.is_approved(self.transceivers.enabled_bitmap(), self.threshold))
            .unwrap_or(false)
    }

    pub fn inbox_item(&self, chain: ChainId, message_id: &MessageId) -> Option<&InboxItem> {
        self.inbox.get(chain, message_id)
    }

    /// Release a queued inbound transfer once its release time has passed.
    ///
    /// Capacity is re-read at this point and consumed (saturating at zero);
    /// the wait already covered the deficit. Releasing an already released
    /// message returns `AlreadyReleased` and moves no value.
    pub fn release(
        &mut self,
        chain: ChainId,
        message_id: &MessageId,
        now: u64,
    ) -> Result<ReleaseOutcome> {
        let enabled = self.transceivers.enabled_bitmap();
        let threshold = self.threshold;
        let item = self.inbox.require_mut(chain, message_id)?;

        match item.release_status {
            ReleaseStatus::Released => {
                debug!(message_id = %message_id, chain = %chain, "Already released");
                return Ok(ReleaseOutcome::AlreadyReleased);
            }
            ReleaseStatus::NotApproved => {
                return Err(NttError::UnapprovedMessage {
                    message_id: *message_id,
                    chain,
                    votes: item.vote_count(enabled),
                    threshold,
                });
            }
            ReleaseStatus::ReleaseAfter(_) => {}
        }

        if !item.try_release(now)? {
            return Ok(ReleaseOutcome::AlreadyReleased);
        }
        let amount = item.amount.amount;
        let release = Self::inbound_release(item, self.config.token_decimals)?;

        let peer = self.peers.require_mut(chain)?;
        peer.inbound_limit = self
            .limiter
            .consume_saturating(&peer.inbound_limit, now, amount);
        self.backflow_outbound(amount, now);

        info!(message_id = %message_id, chain = %chain, amount = release.amount, "Queued inbound transfer released");
        Ok(ReleaseOutcome::Released(release))
    }

    fn inbound_release(item: &InboxItem, token_decimals: u8) -> Result<InboundRelease> {
        Ok(InboundRelease {
            source_chain: item.message.source_chain,
            message_id: item.message.id,
            recipient: item.message.recipient_address,
            amount: item.message.trimmed_amount.untrim(token_decimals)?,
        })
    }

    // ========================================================================
    // Backflow
    // ========================================================================

    #[cfg(feature = "credit")]
    fn backflow_inbound(&mut self, chain: ChainId, amount: u64, now: u64) -> Result<()> {
        let limiter = self.limiter;
        let peer = self.peers.require_mut(chain)?;
        peer.inbound_limit = limiter.credit(&peer.inbound_limit, now, amount);
        Ok(())
    }

    #[cfg(not(feature = "credit"))]
    fn backflow_inbound(&mut self, chain: ChainId, _amount: u64, _now: u64) -> Result<()> {
        self.peers.require(chain).map(|_| ())
    }

    #[cfg(feature = "credit")]
    fn backflow_outbound(&mut self, amount: u64, now: u64) {
        self.outbound_limit = self.limiter.credit(&self.outbound_limit, now, amount);
    }

    #[cfg(not(feature = "credit"))]
    fn backflow_outbound(&mut self, _amount: u64, _now: u64) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::RATE_LIMIT_DURATION_SECS;

    const T0: u64 = 1_700_000_000;
    const DAY: u64 = RATE_LIMIT_DURATION_SECS;

    const REMOTE_MANAGER: UniversalAddress = UniversalAddress([0xee; 32]);
    const REMOTE_TRANSCEIVER_A: UniversalAddress = UniversalAddress([0xa1; 32]);
    const REMOTE_TRANSCEIVER_B: UniversalAddress = UniversalAddress([0xb1; 32]);

    fn manager(outbound_limit: u64, inbound_limit: u64) -> NttManager {
        let mut manager = NttManager::new(
            ManagerConfig {
                chain: ChainId::SOLANA,
                address: UniversalAddress([0x55; 32]),
                token: UniversalAddress([0x66; 32]),
                token_decimals: 9,
            },
            ProtocolParams::default(),
            outbound_limit,
            T0,
        )
        .unwrap();
        manager
            .register_peer(ChainId::ETHEREUM, REMOTE_MANAGER, 18, inbound_limit, T0)
            .unwrap();
        let a = manager
            .register_transceiver(UniversalAddress([0x0a; 32]))
            .unwrap();
        let b = manager
            .register_transceiver(UniversalAddress([0x0b; 32]))
            .unwrap();
        manager
            .set_transceiver_peer(a, ChainId::ETHEREUM, REMOTE_TRANSCEIVER_A)
            .unwrap();
        manager
            .set_transceiver_peer(b, ChainId::ETHEREUM, REMOTE_TRANSCEIVER_B)
            .unwrap();
        manager.set_threshold(2).unwrap();
        manager
    }

    fn inbound_message(seq: u64, amount: u64) -> NttManagerMessage {
        NttManagerMessage {
            id: MessageId::from_sequence(seq),
            source_chain: ChainId::ETHEREUM,
            source_manager: REMOTE_MANAGER,
            sender: UniversalAddress([0x01; 32]),
            source_token: UniversalAddress([0x02; 32]),
            recipient_chain: ChainId::SOLANA,
            recipient_address: UniversalAddress([0x03; 32]),
            trimmed_amount: TrimmedAmount::new(amount, 8),
            additional_payload: Vec::new(),
        }
    }

    #[test]
    fn test_threshold_approval() {
        let mut manager = manager(1_000_000, 1_000_000);
        let msg = inbound_message(1, 100);

        let outcome = manager.attest(0, REMOTE_TRANSCEIVER_A, &msg, T0).unwrap();
        assert!(outcome.vote_recorded);
        assert!(!outcome.approved);

        let outcome = manager.attest(0, REMOTE_TRANSCEIVER_A, &msg, T0).unwrap();
        assert!(!outcome.vote_recorded);
        assert!(!manager.is_approved(ChainId::ETHEREUM, &msg.id));

        let outcome = manager.attest(1, REMOTE_TRANSCEIVER_B, &msg, T0).unwrap();
        assert!(outcome.approved);
        assert!(manager.is_approved(ChainId::ETHEREUM, &msg.id));
        assert_eq!(outcome.status, ReleaseStatus::Released);

        let released = outcome.released.unwrap();
        // 100 at 8 decimals is 1000 at 9 decimals
        assert_eq!(released.amount, 1000);
        assert_eq!(released.recipient, msg.recipient_address);
    }

    #[test]
    fn test_attestation_order_does_not_matter() {
        let mut first = manager(1_000_000, 1_000_000);
        let mut second = manager(1_000_000, 1_000_000);
        let msg = inbound_message(1, 100);

        first.attest(0, REMOTE_TRANSCEIVER_A, &msg, T0).unwrap();
        let a = first.attest(1, REMOTE_TRANSCEIVER_B, &msg, T0).unwrap();
        second.attest(1, REMOTE_TRANSCEIVER_B, &msg, T0).unwrap();
        let b = second.attest(0, REMOTE_TRANSCEIVER_A, &msg, T0).unwrap();
        assert_eq!(a.status, b.status);
        assert_eq!(a.released, b.released);
    }

    #[test]
    fn test_duplicate_delivery_releases_once() {
        let mut manager = manager(1_000_000, 1_000_000);
        let msg = inbound_message(1, 100);
        manager.attest(0, REMOTE_TRANSCEIVER_A, &msg, T0).unwrap();
        let first = manager.attest(1, REMOTE_TRANSCEIVER_B, &msg, T0).unwrap();
        assert!(first.released.is_some());

        let again = manager.attest(1, REMOTE_TRANSCEIVER_B, &msg, T0).unwrap();
        assert!(again.released.is_none());
        let again = manager.attest(0, REMOTE_TRANSCEIVER_A, &msg, T0).unwrap();
        assert!(again.released.is_none());

        assert_eq!(
            manager.release(ChainId::ETHEREUM, &msg.id, T0).unwrap(),
            ReleaseOutcome::AlreadyReleased
        );
    }

    #[test]
    fn test_inbound_queue_and_idempotent_release() {
        // inbound limit is in 8-decimal units (min(8, 9))
        let mut manager = manager(1_000_000, 1000);
        let msg = inbound_message(1, 1500);
        let small = inbound_message(2, 800);

        // drain most of the capacity first
        manager.attest(0, REMOTE_TRANSCEIVER_A, &small, T0).unwrap();
        manager.attest(1, REMOTE_TRANSCEIVER_B, &small, T0).unwrap();
        assert_eq!(manager.inbound_capacity(ChainId::ETHEREUM, T0).unwrap(), 200);

        // larger than the limit itself: waits for the deficit of 1300
        manager.attest(0, REMOTE_TRANSCEIVER_A, &msg, T0).unwrap();
        let outcome = manager.attest(1, REMOTE_TRANSCEIVER_B, &msg, T0).unwrap();
        let release_at = T0 + (1300 * DAY).div_ceil(1000);
        assert_eq!(outcome.status, ReleaseStatus::ReleaseAfter(release_at));
        assert!(outcome.released.is_none());

        assert!(matches!(
            manager.release(ChainId::ETHEREUM, &msg.id, T0 + DAY),
            Err(NttError::ReleaseNotReady { .. })
        ));

        let first = manager.release(ChainId::ETHEREUM, &msg.id, release_at).unwrap();
        match first {
            ReleaseOutcome::Released(release) => assert_eq!(release.amount, 15_000),
            other => panic!("expected release, got {:?}", other),
        }
        assert_eq!(
            manager.release(ChainId::ETHEREUM, &msg.id, release_at).unwrap(),
            ReleaseOutcome::AlreadyReleased
        );
        // consumption saturates at zero
        assert_eq!(manager.inbound_capacity(ChainId::ETHEREUM, release_at).unwrap(), 0);
    }

    #[test]
    fn test_inbound_queue_uses_deficit_time() {
        let mut manager = manager(1_000_000, 1000);
        let drain = inbound_message(1, 800);
        manager.attest(0, REMOTE_TRANSCEIVER_A, &drain, T0).unwrap();
        manager.attest(1, REMOTE_TRANSCEIVER_B, &drain, T0).unwrap();

        let msg = inbound_message(2, 700);
        manager.attest(0, REMOTE_TRANSCEIVER_A, &msg, T0).unwrap();
        let outcome = manager.attest(1, REMOTE_TRANSCEIVER_B, &msg, T0).unwrap();
        // capacity 200, deficit 500 => half a day
        assert_eq!(outcome.status, ReleaseStatus::ReleaseAfter(T0 + DAY / 2));
    }

    #[test]
    fn test_release_unapproved() {
        let mut manager = manager(1_000_000, 1_000_000);
        let msg = inbound_message(1, 100);
        manager.attest(0, REMOTE_TRANSCEIVER_A, &msg, T0).unwrap();
        assert!(matches!(
            manager.release(ChainId::ETHEREUM, &msg.id, T0),
            Err(NttError::UnapprovedMessage { votes: 1, threshold: 2, .. })
        ));
        assert!(matches!(
            manager.release(ChainId::ETHEREUM, &MessageId::from_sequence(99), T0),
            Err(NttError::UnknownMessage { .. })
        ));
    }

    #[test]
    fn test_attest_validation() {
        let mut manager = manager(1_000_000, 1_000_000);
        let msg = inbound_message(1, 100);

        assert!(matches!(
            manager.attest(5, REMOTE_TRANSCEIVER_A, &msg, T0),
            Err(NttError::TransceiverNotRegistered { index: 5 })
        ));
        assert!(matches!(
            manager.attest(0, REMOTE_TRANSCEIVER_B, &msg, T0),
            Err(NttError::PeerMismatch { .. })
        ));

        let mut wrong_manager = msg.clone();
        wrong_manager.source_manager = UniversalAddress([0x99; 32]);
        assert!(matches!(
            manager.attest(0, REMOTE_TRANSCEIVER_A, &wrong_manager, T0),
            Err(NttError::PeerMismatch { .. })
        ));

        let mut wrong_chain = msg.clone();
        wrong_chain.recipient_chain = ChainId::BASE;
        assert!(matches!(
            manager.attest(0, REMOTE_TRANSCEIVER_A, &wrong_chain, T0),
            Err(NttError::InvalidRecipientChain { .. })
        ));

        let mut unknown_source = msg.clone();
        unknown_source.source_chain = ChainId::BASE;
        assert!(matches!(
            manager.attest(0, REMOTE_TRANSCEIVER_A, &unknown_source, T0),
            Err(NttError::TransceiverPeerNotRegistered { .. })
        ));
    }

    #[test]
    fn test_deregistered_votes_stop_counting() {
        let mut manager = manager(1_000_000, 1_000_000);
        manager.set_threshold(1).unwrap();
        let c = manager
            .register_transceiver(UniversalAddress([0x0c; 32]))
            .unwrap();
        manager.set_threshold(3).unwrap();

        manager.deregister_transceiver(c).unwrap();
        assert_eq!(manager.threshold(), 2);
        assert!(matches!(
            manager.set_threshold(3),
            Err(NttError::InvalidThreshold { threshold: 3, enabled: 2 })
        ));
        assert!(manager.set_threshold(0).is_err());
    }

    fn outbound(amount: u64, should_queue: bool) -> TransferArgs {
        TransferArgs {
            amount,
            recipient_chain: ChainId::ETHEREUM,
            recipient: UniversalAddress([0x77; 32]),
            sender: UniversalAddress([0x78; 32]),
            should_queue,
            additional_payload: Vec::new(),
        }
    }

    #[test]
    fn test_transfer_trims_and_debits() {
        let mut manager = manager(100_000_000, 1_000_000);
        // 9 local decimals -> 8 on the wire, one digit of dust
        let outcome = manager.transfer(outbound(123_456_789, false), T0).unwrap();
        assert_eq!(outcome.message.trimmed_amount, TrimmedAmount::new(12_345_678, 8));
        assert_eq!(outcome.dust, 9);
        assert_eq!(outcome.queued_until, None);
        assert_eq!(outcome.message.id, MessageId::from_sequence(0));
        assert_eq!(manager.outbound_capacity(T0), 100_000_000 - 12_345_678);

        let next = manager.transfer(outbound(10, false), T0).unwrap();
        assert_eq!(next.message.id, MessageId::from_sequence(1));
    }

    #[test]
    fn test_transfer_reject_and_queue() {
        let mut manager = manager(1000, 1_000_000);
        assert!(matches!(
            manager.transfer(outbound(15_000, false), T0),
            Err(NttError::RateLimitExceeded { requested: 1500, capacity: 1000 })
        ));
        assert_eq!(manager.outbound_capacity(T0), 1000);

        // 700 fits, then 700 more must wait for 400 of refill
        manager.transfer(outbound(7_000, false), T0).unwrap();
        let queued = manager.transfer(outbound(7_000, true), T0).unwrap();
        let release_at = T0 + (400 * DAY).div_ceil(1000);
        assert_eq!(queued.queued_until, Some(release_at));

        assert!(matches!(
            manager.release_outbound(queued.outbox_id, 0, T0),
            Err(NttError::ReleaseNotReady { .. })
        ));
        assert!(manager.release_outbound(queued.outbox_id, 0, release_at).unwrap());
        assert!(!manager.release_outbound(queued.outbox_id, 0, release_at).unwrap());
        assert!(manager.release_outbound(queued.outbox_id, 1, release_at).unwrap());
        assert_eq!(manager.outbound_capacity(release_at), 0);
    }

    #[test]
    fn test_cancel_outbound_queued() {
        let mut manager = manager(1000, 1_000_000);
        // larger than the limit, queued for its deficit of 500
        let oversized = manager.transfer(outbound(15_000, true), T0).unwrap();
        assert_eq!(oversized.queued_until, Some(T0 + DAY / 2));
        manager.cancel_outbound_queued(oversized.outbox_id).unwrap();
        assert_eq!(manager.outbound_capacity(T0), 1000);

        manager.transfer(outbound(9_000, false), T0).unwrap();
        let queued = manager.transfer(outbound(5_000, true), T0).unwrap();
        let cancelled = manager.cancel_outbound_queued(queued.outbox_id).unwrap();
        assert_eq!(cancelled.message.id, queued.message.id);
        assert!(manager.outbox_item(queued.outbox_id).is_none());
    }

    #[cfg(feature = "credit")]
    #[test]
    fn test_backflow() {
        let mut manager = manager(1_000_000, 1000);
        let msg = inbound_message(1, 600);
        manager.attest(0, REMOTE_TRANSCEIVER_A, &msg, T0).unwrap();
        manager.attest(1, REMOTE_TRANSCEIVER_B, &msg, T0).unwrap();
        assert_eq!(manager.inbound_capacity(ChainId::ETHEREUM, T0).unwrap(), 400);

        // sending back to the same chain frees inbound capacity
        manager.transfer(outbound(2_000, false), T0).unwrap();
        assert_eq!(manager.inbound_capacity(ChainId::ETHEREUM, T0).unwrap(), 600);
    }

    #[test]
    fn test_transfer_validation() {
        let mut manager = manager(1_000_000, 1_000_000);
        let mut args = outbound(1_000, false);
        args.recipient_chain = ChainId::SOLANA;
        assert!(manager.transfer(args, T0).is_err());

        let mut args = outbound(1_000, false);
        args.recipient_chain = ChainId::BASE;
        assert!(matches!(
            manager.transfer(args, T0),
            Err(NttError::PeerNotRegistered { .. })
        ));

        // below the trimmed precision
        assert!(manager.transfer(outbound(5, false), T0).is_err());
    }
}
