//! Report the executor relay status of one source transaction.
//!
//! Reads `TX_HASH` and `SOURCE_CHAIN` (numeric chain id) from the
//! environment, plus the usual executor settings (see `Config`).

use eyre::{eyre, Result, WrapErr};

use ntt_rs::config::Config;
use ntt_rs::executor::ExecutorClient;
use ntt_rs::retry::poll_until;
use ntt_rs::types::ChainId;

fn main() -> Result<()> {
    // Install color-eyre for better error reporting
    color_eyre::install()?;

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> Result<()> {
    init_logging();

    let config = Config::load()?;
    tracing::info!(
        network = %config.executor.network,
        api_url = %config.executor.api_url,
        "Configuration loaded"
    );

    let tx_hash = std::env::var("TX_HASH").wrap_err("TX_HASH is required")?;
    let chain: u16 = std::env::var("SOURCE_CHAIN")
        .wrap_err("SOURCE_CHAIN is required")?
        .trim()
        .parse()
        .map_err(|e| eyre!("SOURCE_CHAIN must be a numeric chain id: {}", e))?;
    let chain = ChainId::new(chain);

    let client = ExecutorClient::from_config(&config)?;
    let schedule = config.poll.status_schedule();
    let responses = poll_until(&schedule, |attempt| {
        let client = &client;
        let tx_hash = tx_hash.as_str();
        async move {
            let responses = client.status(tx_hash, chain).await?;
            tracing::debug!(attempt, found = responses.len(), "Polled relay status");
            Ok((!responses.is_empty()).then_some(responses))
        }
    })
    .await
    .wrap_err_with(|| format!("No relay status for {} on chain {}", tx_hash, chain))?;

    for response in &responses {
        println!("{}", serde_json::to_string_pretty(response)?);
        if response.status.is_failure() {
            tracing::warn!(id = %response.id, status = %response.status, "Relay failed");
        }
    }
    Ok(())
}

/// Initialize tracing/logging with structured output
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ntt_rs=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}
