//! Error types for native token transfers
//!
//! Every fallible operation in this crate returns [`NttError`]. Variants are
//! grouped by how a caller is expected to react to them; [`NttError::class`]
//! exposes that grouping so callers never have to match on message strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::executor::status::RelayStatus;
use crate::lifecycle::TransferState;
use crate::trimmed_amount::ScalingError;
use crate::types::{ChainId, MessageId};

pub type Result<T> = std::result::Result<T, NttError>;

#[derive(Error, Debug)]
pub enum NttError {
    // ========================================================================
    // Configuration Errors (fatal, never retried)
    // ========================================================================
    #[error("Peer mismatch for chain {chain}: {reason}")]
    PeerMismatch { chain: ChainId, reason: String },

    #[error("No peer registered for chain {chain}")]
    PeerNotRegistered { chain: ChainId },

    #[error("Transceiver {index} is not registered")]
    TransceiverNotRegistered { index: u8 },

    #[error("Transceiver {index} has no peer registered for chain {chain}")]
    TransceiverPeerNotRegistered { index: u8, chain: ChainId },

    #[error("Cannot register more than {max} transceivers")]
    TooManyTransceivers { max: u8 },

    #[error("Invalid threshold {threshold}: {enabled} transceivers enabled")]
    InvalidThreshold { threshold: u8, enabled: u8 },

    #[error("Invalid recipient chain: expected {expected}, got {got}")]
    InvalidRecipientChain { expected: ChainId, got: ChainId },

    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // Rate Limit / Approval (normal outcomes, recoverable by waiting)
    // ========================================================================
    #[error("Rate limit exceeded: requested {requested}, capacity {capacity}")]
    RateLimitExceeded { requested: u64, capacity: u64 },

    #[error("Message {message_id} from chain {chain} is not approved ({votes}/{threshold} votes)")]
    UnapprovedMessage {
        message_id: MessageId,
        chain: ChainId,
        votes: u8,
        threshold: u8,
    },

    #[error("Release not ready until {release_after}")]
    ReleaseNotReady { release_after: u64 },

    #[error("Unknown inbound message {message_id} from chain {chain}")]
    UnknownMessage { message_id: MessageId, chain: ChainId },

    #[error("Unknown outbox item {id}")]
    UnknownOutboxItem { id: u64 },

    #[error("Outbox item {id} cannot be cancelled: {reason}")]
    CannotCancel { id: u64, reason: &'static str },

    // ========================================================================
    // Decode Errors (fatal, the whole input is rejected)
    // ========================================================================
    #[error("Unsupported relay instruction type: {0}")]
    UnsupportedInstructionType(u8),

    #[error("Truncated input: needed {needed} bytes at offset {offset}, {remaining} remaining")]
    Truncated {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    // ========================================================================
    // Quote Errors (fatal for the current attempt, caller must re-quote)
    // ========================================================================
    #[error("Quote expired at {expired_at}")]
    QuoteExpired { expired_at: DateTime<Utc> },

    #[error("Gas drop-off recipient does not match the transfer recipient")]
    RecipientMismatch,

    #[error("Unsupported route to chain {chain}: {reason}")]
    UnsupportedRoute { chain: ChainId, reason: String },

    #[error("Relay request exceeds executor limits: {0}")]
    RelayRequestTooLarge(String),

    #[error("Invalid fee: {0}")]
    InvalidFee(String),

    #[error("Invalid signed quote: {0}")]
    InvalidQuote(String),

    // ========================================================================
    // Relay Errors (terminal for automatic relay, manual redeem still possible)
    // ========================================================================
    #[error("Relay failed with status: {status}")]
    RelayFailed { status: RelayStatus },

    // ========================================================================
    // Arithmetic Errors (fatal, never truncated)
    // ========================================================================
    #[error("Arithmetic overflow in {0}")]
    ArithmeticOverflow(&'static str),

    #[error(transparent)]
    Scaling(#[from] ScalingError),

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    #[error("Cannot {operation} a transfer in state {state}")]
    InvalidState {
        operation: &'static str,
        state: TransferState,
    },

    #[error("No attestation found for transfer")]
    MissingAttestation,

    // ========================================================================
    // Network Errors (retried locally up to a bound)
    // ========================================================================
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Executor API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Gave up after {attempts} attempts")]
    Timeout { attempts: u32 },

    #[error("Chain client error: {0}")]
    Chain(String),
}

/// How a caller should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Misconfigured peers, transceivers or thresholds
    Configuration,
    /// Not enough capacity right now; queue or wait
    RateLimited,
    /// Not enough attestations yet; poll
    Unapproved,
    /// Malformed binary input
    Decode,
    /// Quote unusable for this attempt; re-quote
    Quote,
    /// Automatic relay gave up; fall back to manual redemption
    Relay,
    /// Overflow or precision loss
    Arithmetic,
    /// Network hiccup; retry with backoff
    Transient,
    /// Anything else that must not be retried
    Permanent,
}

impl NttError {
    pub fn class(&self) -> ErrorClass {
        match self {
            NttError::PeerMismatch { .. }
            | NttError::PeerNotRegistered { .. }
            | NttError::TransceiverNotRegistered { .. }
            | NttError::TransceiverPeerNotRegistered { .. }
            | NttError::TooManyTransceivers { .. }
            | NttError::InvalidThreshold { .. }
            | NttError::InvalidRecipientChain { .. }
            | NttError::Config(_) => ErrorClass::Configuration,

            NttError::RateLimitExceeded { .. } | NttError::ReleaseNotReady { .. } => {
                ErrorClass::RateLimited
            }
            NttError::UnapprovedMessage { .. } => ErrorClass::Unapproved,

            NttError::UnsupportedInstructionType(_)
            | NttError::Truncated { .. }
            | NttError::InvalidPayload(_) => ErrorClass::Decode,

            NttError::QuoteExpired { .. }
            | NttError::RecipientMismatch
            | NttError::UnsupportedRoute { .. }
            | NttError::RelayRequestTooLarge(_)
            | NttError::InvalidFee(_)
            | NttError::InvalidQuote(_) => ErrorClass::Quote,

            NttError::RelayFailed { .. } => ErrorClass::Relay,

            NttError::ArithmeticOverflow(_) | NttError::Scaling(_) => ErrorClass::Arithmetic,

            NttError::Http(e) => {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    ErrorClass::Transient
                } else {
                    match e.status() {
                        Some(status) if status.as_u16() == 429 || status.is_server_error() => {
                            ErrorClass::Transient
                        }
                        _ => ErrorClass::Permanent,
                    }
                }
            }
            NttError::Api { status, .. } => {
                if *status == 429 || *status >= 500 {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Permanent
                }
            }
            NttError::Chain(msg) => {
                if crate::retry::is_transient_message(msg) {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Permanent
                }
            }

            NttError::UnknownMessage { .. }
            | NttError::UnknownOutboxItem { .. }
            | NttError::CannotCancel { .. }
            | NttError::InvalidState { .. }
            | NttError::MissingAttestation
            | NttError::Timeout { .. } => ErrorClass::Permanent,
        }
    }

    /// Whether a local retry with backoff may succeed.
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors_are_fatal() {
        let err = NttError::PeerMismatch {
            chain: ChainId::new(2),
            reason: "address differs".to_string(),
        };
        assert_eq!(err.class(), ErrorClass::Configuration);
        assert!(!err.is_transient());
    }

    #[test]
    fn test_api_status_classification() {
        let rate_limited = NttError::Api {
            status: 429,
            body: "too many requests".to_string(),
        };
        assert!(rate_limited.is_transient());

        let bad_request = NttError::Api {
            status: 400,
            body: "bad request".to_string(),
        };
        assert_eq!(bad_request.class(), ErrorClass::Permanent);
    }

    #[test]
    fn test_chain_error_classification() {
        assert!(NttError::Chain("connection reset by peer".to_string()).is_transient());
        assert!(!NttError::Chain("execution reverted".to_string()).is_transient());
    }

    #[test]
    fn test_rate_limit_is_not_fatal() {
        let err = NttError::RateLimitExceeded {
            requested: 10,
            capacity: 5,
        };
        assert_eq!(err.class(), ErrorClass::RateLimited);
    }

    #[test]
    fn test_relay_failure_is_terminal() {
        let err = NttError::RelayFailed {
            status: RelayStatus::Underpaid,
        };
        assert_eq!(err.class(), ErrorClass::Relay);
        assert!(!err.is_transient());
    }

    #[test]
    fn test_decode_error_display() {
        let err = NttError::UnsupportedInstructionType(3);
        assert_eq!(err.to_string(), "Unsupported relay instruction type: 3");
        assert_eq!(err.class(), ErrorClass::Decode);
    }
}
