//! NTT-RS: Native Token Transfer Core
//!
//! Moves a token between "manager" deployments on different chains, subject
//! to per-direction rate limits, a multi-transceiver attestation threshold,
//! and an optional paid relay ("executor") path.
//!
//! - **Rate Limiting** - linearly refilling capacity for outbound and per-chain inbound flow
//! - **Messages** - canonical transfer message, trimmed amounts, wire encoding
//! - **Manager** - peers, transceivers, threshold approval, inbox/outbox, idempotent release
//! - **Lifecycle** - client-side state machine from submission to finalization
//! - **Executor** - relay instruction codec, referrer fees, signed quotes, relay status
//!
//! Chain access (RPC, signing, transaction building) is supplied by callers
//! through the traits in [`chain`].
//!
//! ## Feature Flags
//!
//! - `credit` - automatic capacity backflow between inbound and outbound limits (default)

// Core protocol
pub mod bitmap;
pub mod inbox;
pub mod manager;
pub mod message;
pub mod outbox;
pub mod peer;
pub mod rate_limit;
pub mod relay_instructions;
pub mod trimmed_amount;
pub mod types;
pub mod wire;

// Client side
pub mod chain;
pub mod executor;
pub mod lifecycle;

// Ambient
pub mod config;
pub mod error;
pub mod retry;

pub use error::{ErrorClass, NttError, Result};
pub use inbox::{InboundRelease, ReleaseOutcome, ReleaseStatus};
pub use lifecycle::{Attestation, TransferReceipt, TransferRequest, TransferState, TransferTracker};
pub use manager::{AttestOutcome, ManagerConfig, NttManager, TransferArgs, TransferOutcome};
pub use message::NttManagerMessage;
pub use rate_limit::{DebitOutcome, OnExceeded, RateLimitState, RateLimiter};
pub use relay_instructions::RelayInstruction;
pub use trimmed_amount::TrimmedAmount;
pub use types::{ChainId, MessageId, Network, Platform, TxId, UniversalAddress};
