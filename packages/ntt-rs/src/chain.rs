//! Collaborator interfaces implemented once per chain backend
//!
//! The lifecycle and quote code never look at chain identity: they only talk
//! to these traits. Transaction construction, signing and RPC access all live
//! behind them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{NttError, Result};
use crate::executor::quote::{Capabilities, ExecutorQuote, QuoteResponse};
use crate::executor::status::RelayStatus;
use crate::lifecycle::{Attestation, TransferRequest};
use crate::manager::{AttestOutcome, NttManager};
use crate::peer::TransceiverPeer;
use crate::relay_instructions::RelayInstruction;
use crate::types::{ChainId, TxId, UniversalAddress};

/// Source side of a transfer.
#[async_trait]
pub trait SourceChain: Send + Sync {
    /// Broadcast the transfer; returns the submitted transactions in order.
    async fn submit_transfer(
        &self,
        request: &TransferRequest,
        quote: &ExecutorQuote,
    ) -> Result<Vec<TxId>>;

    /// Whether the chain considers `tx` irreversible.
    async fn is_finalized(&self, tx: &TxId) -> Result<bool>;

    /// The attestation for the message emitted by `tx`, once available.
    async fn fetch_attestation(&self, tx: &TxId) -> Result<Option<Attestation>>;
}

/// A transfer queued by the destination's inbound rate limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundQueuedTransfer {
    pub recipient: UniversalAddress,
    /// Amount in the destination token's native decimals
    pub amount: u64,
    /// Unix seconds after which the transfer can be completed
    pub rate_limit_expiry_timestamp: u64,
}

/// Gas the executor must spend to redeem on the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasEstimate {
    pub gas_limit: u128,
    pub msg_value: u128,
}

/// Destination side of a transfer.
#[async_trait]
pub trait DestinationChain: Send + Sync {
    async fn is_approved(&self, attestation: &Attestation) -> Result<bool>;

    async fn is_executed(&self, attestation: &Attestation) -> Result<bool>;

    async fn get_inbound_queued_transfer(
        &self,
        attestation: &Attestation,
    ) -> Result<Option<InboundQueuedTransfer>>;

    /// Deliver the attestation (manual redemption).
    async fn redeem(&self, attestation: &Attestation) -> Result<Vec<TxId>>;

    async fn complete_inbound_queued_transfer(
        &self,
        attestation: &Attestation,
    ) -> Result<Vec<TxId>>;

    async fn estimate_msg_value_and_gas_limit(
        &self,
        recipient: Option<UniversalAddress>,
    ) -> Result<GasEstimate>;

    /// Inbound capacity from `source`, in the destination token's native
    /// decimals.
    async fn current_inbound_capacity(&self, source: ChainId) -> Result<u64>;

    /// Rate limit refill duration in seconds; zero disables rate limiting.
    async fn rate_limit_duration(&self) -> Result<u64>;
}

/// One attestation lane of a manager.
#[async_trait]
pub trait Transceiver: Send + Sync {
    fn get_address(&self) -> UniversalAddress;

    async fn get_peer(&self, chain: ChainId) -> Result<Option<TransceiverPeer>>;

    async fn set_peer(&self, peer: TransceiverPeer) -> Result<()>;

    /// Hand a message emitted by `emitter` on its source chain to the local
    /// manager.
    async fn attest(
        &self,
        emitter: UniversalAddress,
        attestation: &Attestation,
    ) -> Result<AttestOutcome>;
}

/// Relay progress as seen by the executor.
#[async_trait]
pub trait RelayStatusSource: Send + Sync {
    /// `None` until the executor has indexed the transaction.
    async fn relay_status(&self, tx: &TxId) -> Result<Option<RelayStatus>>;
}

/// Capabilities and signed quotes from the executor.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    async fn capabilities(&self) -> Result<HashMap<ChainId, Capabilities>>;

    async fn signed_quote(
        &self,
        source: ChainId,
        destination: ChainId,
        instructions: &[RelayInstruction],
    ) -> Result<QuoteResponse>;
}

// ============================================================================
// In-process transceiver
// ============================================================================

/// Unix time source used by in-process backends.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(|| chrono::Utc::now().timestamp().max(0) as u64)
}

/// A transceiver that delivers attestations straight into a manager held in
/// memory. Useful for local networks and tests.
#[derive(Clone)]
pub struct LocalTransceiver {
    index: u8,
    address: UniversalAddress,
    manager: Arc<RwLock<NttManager>>,
    clock: Clock,
}

impl LocalTransceiver {
    /// Register a new transceiver at `address` on `manager`.
    pub async fn register(
        manager: Arc<RwLock<NttManager>>,
        address: UniversalAddress,
        clock: Clock,
    ) -> Result<Self> {
        let index = manager.write().await.register_transceiver(address)?;
        Ok(Self {
            index,
            address,
            manager,
            clock,
        })
    }

    pub fn index(&self) -> u8 {
        self.index
    }
}

#[async_trait]
impl Transceiver for LocalTransceiver {
    fn get_address(&self) -> UniversalAddress {
        self.address
    }

    async fn get_peer(&self, chain: ChainId) -> Result<Option<TransceiverPeer>> {
        let manager = self.manager.read().await;
        Ok(manager.transceivers().get_peer(self.index, chain).copied())
    }

    async fn set_peer(&self, peer: TransceiverPeer) -> Result<()> {
        self.manager
            .write()
            .await
            .set_transceiver_peer(self.index, peer.chain, peer.address)
    }

    async fn attest(
        &self,
        emitter: UniversalAddress,
        attestation: &Attestation,
    ) -> Result<AttestOutcome> {
        if attestation.emitter_chain != attestation.message.source_chain {
            return Err(NttError::InvalidPayload(format!(
                "attestation from chain {} carries a message from chain {}",
                attestation.emitter_chain, attestation.message.source_chain
            )));
        }
        let now = (self.clock)();
        debug!(
            transceiver = self.index,
            message_id = %attestation.message.id,
            chain = %attestation.emitter_chain,
            "Delivering attestation"
        );
        self.manager
            .write()
            .await
            .attest(self.index, emitter, &attestation.message, now)
    }
}
