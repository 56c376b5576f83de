//! HTTP client for the executor API
//!
//! Endpoints (JSON over HTTPS):
//! - `GET  {base}/v0/capabilities`
//! - `POST {base}/v0/quote`      `{srcChain, dstChain, relayInstructions}`
//! - `POST {base}/v0/status/tx`  `{txHash, chainId}`
//!
//! Every request goes through [`with_retry`]; 429 and 5xx responses are
//! retried, other non-2xx responses surface as [`NttError::Api`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::chain::{QuoteProvider, RelayStatusSource};
use crate::config::Config;
use crate::error::{NttError, Result};
use crate::executor::quote::{parse_capabilities, Capabilities, QuoteResponse};
use crate::executor::status::{latest_status, RelayStatus, StatusResponse};
use crate::relay_instructions::{self, RelayInstruction};
use crate::retry::{with_retry, RetryConfig};
use crate::types::{ChainId, Network, TxId};

pub const MAINNET_API_URL: &str = "https://executor.labsapis.com";
pub const TESTNET_API_URL: &str = "https://executor-testnet.labsapis.com";

/// Public executor deployment for `network`. Devnet has none.
pub fn default_api_url(network: Network) -> Option<&'static str> {
    match network {
        Network::Mainnet => Some(MAINNET_API_URL),
        Network::Testnet => Some(TESTNET_API_URL),
        Network::Devnet => None,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QuoteRequestBody {
    src_chain: ChainId,
    dst_chain: ChainId,
    relay_instructions: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusRequestBody<'a> {
    tx_hash: &'a str,
    chain_id: ChainId,
}

/// Executor API client
#[derive(Debug, Clone)]
pub struct ExecutorClient {
    /// Base URL without trailing slash
    base_url: String,
    client: Client,
    retry: RetryConfig,
}

impl ExecutorClient {
    pub fn new(base_url: &str, timeout: Duration, retry: RetryConfig) -> Result<Self> {
        url::Url::parse(base_url)
            .map_err(|e| NttError::Config(format!("invalid executor URL {}: {}", base_url, e)))?;
        let client = Client::builder().timeout(timeout).build()?;

        info!(base_url = base_url, "Executor client initialized");

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            retry,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.executor.api_url,
            config.executor.request_timeout,
            config.retry.clone(),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Capabilities of every chain the executor serves.
    pub async fn capabilities(&self) -> Result<HashMap<ChainId, Capabilities>> {
        let url = format!("{}/v0/capabilities", self.base_url);
        let raw: HashMap<String, Capabilities> = self.get_json(&url).await?;
        parse_capabilities(raw)
    }

    /// Request a signed quote for relaying `instructions` from `source` to
    /// `destination`.
    pub async fn quote(
        &self,
        source: ChainId,
        destination: ChainId,
        instructions: &[RelayInstruction],
    ) -> Result<QuoteResponse> {
        let url = format!("{}/v0/quote", self.base_url);
        let body = QuoteRequestBody {
            src_chain: source,
            dst_chain: destination,
            relay_instructions: relay_instructions::encode_hex(instructions),
        };
        let response: QuoteResponse = self.post_json(&url, &body).await?;
        debug!(
            source = %source,
            destination = %destination,
            quote_len = response.signed_quote.len(),
            "Fetched signed quote"
        );
        Ok(response)
    }

    /// All relay requests the executor indexed for a source transaction.
    pub async fn status(&self, tx_hash: &str, chain: ChainId) -> Result<Vec<StatusResponse>> {
        let url = format!("{}/v0/status/tx", self.base_url);
        let body = StatusRequestBody {
            tx_hash,
            chain_id: chain,
        };
        self.post_json(&url, &body).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        with_retry(&self.retry, |attempt| async move {
            debug!(url = url, attempt, "GET");
            let response = self.client.get(url).send().await?;
            Self::read_json(response).await
        })
        .await
    }

    async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T> {
        with_retry(&self.retry, |attempt| async move {
            debug!(url = url, attempt, "POST");
            let response = self.client.post(url).json(body).send().await?;
            Self::read_json(response).await
        })
        .await
    }

    async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NttError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl RelayStatusSource for ExecutorClient {
    async fn relay_status(&self, tx: &TxId) -> Result<Option<RelayStatus>> {
        let responses = self.status(&tx.txid, tx.chain).await?;
        Ok(latest_status(&responses))
    }
}

#[async_trait]
impl QuoteProvider for ExecutorClient {
    async fn capabilities(&self) -> Result<HashMap<ChainId, Capabilities>> {
        ExecutorClient::capabilities(self).await
    }

    async fn signed_quote(
        &self,
        source: ChainId,
        destination: ChainId,
        instructions: &[RelayInstruction],
    ) -> Result<QuoteResponse> {
        self.quote(source, destination, instructions).await
    }
}
