//! Relay status reported by the executor for a source transaction

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::ChainId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayStatus {
    Pending,
    Failed,
    Unsupported,
    Submitted,
    Underpaid,
    Aborted,
    /// A status string this client does not know about
    #[serde(other)]
    Unknown,
}

impl RelayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayStatus::Pending => "pending",
            RelayStatus::Failed => "failed",
            RelayStatus::Unsupported => "unsupported",
            RelayStatus::Submitted => "submitted",
            RelayStatus::Underpaid => "underpaid",
            RelayStatus::Aborted => "aborted",
            RelayStatus::Unknown => "unknown",
        }
    }

    /// The executor gave up on the request; manual redemption is still
    /// possible.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            RelayStatus::Failed
                | RelayStatus::Unsupported
                | RelayStatus::Underpaid
                | RelayStatus::Aborted
        )
    }
}

impl fmt::Display for RelayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The request the executor indexed from the source transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestForExecution {
    pub quoter_address: String,
    pub amt_paid: String,
    pub dst_chain: ChainId,
    pub dst_addr: String,
    pub refund_addr: String,
    pub signed_quote_bytes: String,
    pub request_bytes: String,
    pub relay_instructions_bytes: String,
    pub timestamp: DateTime<Utc>,
}

/// A transaction the executor submitted on the destination chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxInfo {
    pub tx_hash: String,
    pub chain_id: ChainId,
    pub block_number: String,
    #[serde(default)]
    pub block_time: Option<DateTime<Utc>>,
    pub cost: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub id: String,
    pub tx_hash: String,
    pub chain_id: ChainId,
    pub status: RelayStatus,
    #[serde(default)]
    pub estimated_cost: Option<String>,
    #[serde(default)]
    pub request_for_execution: Option<RequestForExecution>,
    #[serde(default)]
    pub txs: Vec<TxInfo>,
    #[serde(default, rename = "indexed_at")]
    pub indexed_at: Option<DateTime<Utc>>,
    /// Parsed quote as returned by the API; kept opaque
    #[serde(default)]
    pub signed_quote: Option<serde_json::Value>,
}

/// The status of the first request found for a transaction, if any.
pub fn latest_status(responses: &[StatusResponse]) -> Option<RelayStatus> {
    responses.first().map(|r| r.status)
}
