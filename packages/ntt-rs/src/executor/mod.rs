//! Automatic relay through the executor service
//!
//! - [`client`]: HTTP access to capabilities, quotes and relay status
//! - [`quote`]: referrer fees, capability checks and signed quote handling
//! - [`status`]: relay status responses

pub mod client;
pub mod quote;
pub mod status;

pub use client::{default_api_url, ExecutorClient};
pub use quote::{
    calculate_referrer_fee, Capabilities, ExecutorQuote, ExecutorQuoter, QuoteOptions,
    QuoteSettings, QuoteWarning, ReferrerFee, RequestPrefix, SignedQuote,
};
pub use status::{RelayStatus, StatusResponse};
