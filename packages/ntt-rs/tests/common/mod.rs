//! In-memory chain backends for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use ntt_rs::chain::{
    DestinationChain, GasEstimate, InboundQueuedTransfer, QuoteProvider, RelayStatusSource,
    SourceChain,
};
use ntt_rs::config::PollConfig;
use ntt_rs::executor::quote::{Capabilities, QuoteResponse, RequestPrefix};
use ntt_rs::executor::{ExecutorQuote, RelayStatus};
use ntt_rs::retry::RetryConfig;
use ntt_rs::{
    Attestation, ChainId, MessageId, NttError, NttManagerMessage, RelayInstruction, Result,
    TransferRequest, TrimmedAmount, TxId, UniversalAddress,
};

pub const T0: i64 = 1_700_000_000;

pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).expect("valid timestamp")
}

pub fn recipient() -> UniversalAddress {
    UniversalAddress([4; 32])
}

pub fn source_tx() -> TxId {
    TxId::new(ChainId::ETHEREUM, "0xfeed")
}

pub fn attestation() -> Attestation {
    Attestation {
        emitter_chain: ChainId::ETHEREUM,
        emitter: UniversalAddress([0xee; 32]),
        sequence: 9,
        message: NttManagerMessage {
            id: MessageId::from_sequence(9),
            source_chain: ChainId::ETHEREUM,
            source_manager: UniversalAddress([1; 32]),
            sender: UniversalAddress([2; 32]),
            source_token: UniversalAddress([3; 32]),
            recipient_chain: ChainId::SOLANA,
            recipient_address: recipient(),
            trimmed_amount: TrimmedAmount::new(1_000_000, 6),
            additional_payload: Vec::new(),
        },
    }
}

pub fn request() -> TransferRequest {
    TransferRequest {
        from: ChainId::ETHEREUM,
        to: ChainId::SOLANA,
        sender: UniversalAddress([2; 32]),
        recipient: recipient(),
        source_token: UniversalAddress([3; 32]),
        destination_token: UniversalAddress([5; 32]),
        amount: 1_000_000,
        source_decimals: 6,
        destination_decimals: 6,
        should_queue: false,
    }
}

pub fn quote(expires: DateTime<Utc>, drop_off_recipient: Option<UniversalAddress>) -> ExecutorQuote {
    let mut relay_instructions = vec![RelayInstruction::Gas {
        gas_limit: 250_000,
        msg_value: 0,
    }];
    if let Some(recipient) = drop_off_recipient {
        relay_instructions.push(RelayInstruction::GasDropOff {
            drop_off: 1_000,
            recipient,
        });
    }
    ExecutorQuote {
        signed_quote: vec![0xaa; 8],
        relay_instructions,
        estimated_cost: 12_345,
        payee: UniversalAddress([0x52; 32]),
        referrer: UniversalAddress([0x61; 32]),
        referrer_fee: 0,
        remaining_amount: 1_000_000,
        referrer_fee_dbps: 0,
        expires,
        gas_drop_off: 0,
        received_amount: 1_000_000,
        warnings: Vec::new(),
    }
}

pub fn fast_poll(track_max_polls: u32) -> PollConfig {
    PollConfig {
        status_poll_attempts: 20,
        status_poll_interval: Duration::from_secs(2),
        track_max_polls,
        track_poll_interval: Duration::from_secs(1),
    }
}

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(100),
        backoff_multiplier: 2.0,
        jitter: 0.0,
    }
}

/// A well-formed `EQ01` signed quote.
pub fn signed_quote_bytes(source: ChainId, destination: ChainId, expiry: u64) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"EQ01");
    out.extend_from_slice(&[0x51; 20]);
    out.extend_from_slice(&[0x52; 32]);
    out.extend_from_slice(&source.to_be_bytes());
    out.extend_from_slice(&destination.to_be_bytes());
    out.extend_from_slice(&expiry.to_be_bytes());
    for price in [1u64, 2, 3, 4] {
        out.extend_from_slice(&price.to_be_bytes());
    }
    out.extend_from_slice(&[0x53; 65]);
    out
}

// ============================================================================
// Source
// ============================================================================

#[derive(Default)]
pub struct MockSource {
    pub finalized: AtomicBool,
    pub attestation: Mutex<Option<Attestation>>,
    pub submitted: Mutex<Vec<TransferRequest>>,
    /// Transient failures to return from `is_finalized` before answering
    pub flaky_calls: AtomicU32,
}

impl MockSource {
    pub fn ready() -> Self {
        let source = Self::default();
        source.finalized.store(true, Ordering::SeqCst);
        *source.attestation.lock().unwrap() = Some(attestation());
        source
    }
}

#[async_trait]
impl SourceChain for MockSource {
    async fn submit_transfer(
        &self,
        request: &TransferRequest,
        _quote: &ExecutorQuote,
    ) -> Result<Vec<TxId>> {
        self.submitted.lock().unwrap().push(request.clone());
        Ok(vec![TxId::new(request.from, "0xapprove"), source_tx()])
    }

    async fn is_finalized(&self, _tx: &TxId) -> Result<bool> {
        let remaining = self.flaky_calls.load(Ordering::SeqCst);
        if remaining > 0 {
            self.flaky_calls.store(remaining - 1, Ordering::SeqCst);
            return Err(NttError::Chain("connection reset by peer".to_string()));
        }
        Ok(self.finalized.load(Ordering::SeqCst))
    }

    async fn fetch_attestation(&self, _tx: &TxId) -> Result<Option<Attestation>> {
        Ok(self.attestation.lock().unwrap().clone())
    }
}

// ============================================================================
// Destination
// ============================================================================

pub struct MockDestination {
    pub approved: AtomicBool,
    pub executed: AtomicBool,
    pub queued: Mutex<Option<InboundQueuedTransfer>>,
    pub redeem_calls: AtomicU32,
    pub complete_calls: AtomicU32,
    pub capacity: Mutex<u64>,
    pub duration: Mutex<u64>,
    pub estimate: GasEstimate,
    pub estimate_recipient: Mutex<Option<UniversalAddress>>,
}

impl Default for MockDestination {
    fn default() -> Self {
        Self {
            approved: AtomicBool::new(false),
            executed: AtomicBool::new(false),
            queued: Mutex::new(None),
            redeem_calls: AtomicU32::new(0),
            complete_calls: AtomicU32::new(0),
            capacity: Mutex::new(u64::MAX),
            duration: Mutex::new(86_400),
            estimate: GasEstimate {
                gas_limit: 250_000,
                msg_value: 2_000,
            },
            estimate_recipient: Mutex::new(None),
        }
    }
}

#[async_trait]
impl DestinationChain for MockDestination {
    async fn is_approved(&self, _attestation: &Attestation) -> Result<bool> {
        Ok(self.approved.load(Ordering::SeqCst))
    }

    async fn is_executed(&self, _attestation: &Attestation) -> Result<bool> {
        Ok(self.executed.load(Ordering::SeqCst))
    }

    async fn get_inbound_queued_transfer(
        &self,
        _attestation: &Attestation,
    ) -> Result<Option<InboundQueuedTransfer>> {
        Ok(self.queued.lock().unwrap().clone())
    }

    async fn redeem(&self, _attestation: &Attestation) -> Result<Vec<TxId>> {
        self.redeem_calls.fetch_add(1, Ordering::SeqCst);
        self.approved.store(true, Ordering::SeqCst);
        Ok(vec![TxId::new(ChainId::SOLANA, "redeem-sig")])
    }

    async fn complete_inbound_queued_transfer(&self, _attestation: &Attestation) -> Result<Vec<TxId>> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        *self.queued.lock().unwrap() = None;
        self.executed.store(true, Ordering::SeqCst);
        Ok(vec![TxId::new(ChainId::SOLANA, "complete-sig")])
    }

    async fn estimate_msg_value_and_gas_limit(
        &self,
        recipient: Option<UniversalAddress>,
    ) -> Result<GasEstimate> {
        *self.estimate_recipient.lock().unwrap() = recipient;
        Ok(self.estimate)
    }

    async fn current_inbound_capacity(&self, _source: ChainId) -> Result<u64> {
        Ok(*self.capacity.lock().unwrap())
    }

    async fn rate_limit_duration(&self) -> Result<u64> {
        Ok(*self.duration.lock().unwrap())
    }
}

// ============================================================================
// Executor
// ============================================================================

#[derive(Default)]
pub struct MockRelay {
    pub status: Mutex<Option<RelayStatus>>,
    /// Number of calls answered with "not indexed" before `status` is used
    pub unindexed_calls: AtomicU32,
    pub calls: AtomicU32,
}

impl MockRelay {
    pub fn with_status(status: RelayStatus) -> Self {
        let relay = Self::default();
        *relay.status.lock().unwrap() = Some(status);
        relay
    }
}

#[async_trait]
impl RelayStatusSource for MockRelay {
    async fn relay_status(&self, _tx: &TxId) -> Result<Option<RelayStatus>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.unindexed_calls.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(*self.status.lock().unwrap())
    }
}

pub struct MockQuoteProvider {
    pub capabilities: HashMap<ChainId, Capabilities>,
    pub estimated_cost: Option<String>,
    pub expiry: u64,
    pub requested: Mutex<Vec<RelayInstruction>>,
}

impl MockQuoteProvider {
    pub fn new() -> Self {
        let caps = |prefixes: Vec<RequestPrefix>| Capabilities {
            request_prefixes: prefixes,
            gas_drop_off_limit: 1_000_000,
            max_gas_limit: 1_400_000,
            max_msg_value: 5_000_000,
        };
        let mut capabilities = HashMap::new();
        capabilities.insert(ChainId::ETHEREUM, caps(vec![RequestPrefix::Ern1, RequestPrefix::Erv1]));
        capabilities.insert(ChainId::SOLANA, caps(vec![RequestPrefix::Ern1]));
        capabilities.insert(ChainId::SUI, caps(vec![RequestPrefix::Erv1]));
        Self {
            capabilities,
            estimated_cost: Some("12345".to_string()),
            expiry: (T0 + 600) as u64,
            requested: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl QuoteProvider for MockQuoteProvider {
    async fn capabilities(&self) -> Result<HashMap<ChainId, Capabilities>> {
        Ok(self.capabilities.clone())
    }

    async fn signed_quote(
        &self,
        source: ChainId,
        destination: ChainId,
        instructions: &[RelayInstruction],
    ) -> Result<QuoteResponse> {
        *self.requested.lock().unwrap() = instructions.to_vec();
        Ok(QuoteResponse {
            signed_quote: format!(
                "0x{}",
                hex::encode(signed_quote_bytes(source, destination, self.expiry))
            ),
            estimated_cost: self.estimated_cost.clone(),
        })
    }
}
