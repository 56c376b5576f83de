use eyre::{eyre, Result, WrapErr};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::executor::client::default_api_url;
use crate::rate_limit::RATE_LIMIT_DURATION_SECS;
use crate::retry::{PollSchedule, RetryConfig};
use crate::trimmed_amount::TRIMMED_DECIMALS;
use crate::types::{Network, UniversalAddress};

/// Main configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub executor: ExecutorConfig,
    pub protocol: ProtocolParams,
    pub poll: PollConfig,
    pub retry: RetryConfig,
    pub referrer_fee: ReferrerFeeConfig,
}

/// Executor API configuration
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub network: Network,
    pub api_url: String,
    pub request_timeout: Duration,
}

/// Protocol constants shared by every chain backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolParams {
    /// Time for a rate limit to refill from empty to full
    pub rate_limit_duration_secs: u64,
    /// Decimal cap for amounts embedded in messages
    pub max_trimmed_decimals: u8,
}

impl Default for ProtocolParams {
    fn default() -> Self {
        Self {
            rate_limit_duration_secs: RATE_LIMIT_DURATION_SECS,
            max_trimmed_decimals: TRIMMED_DECIMALS,
        }
    }
}

/// Polling configuration
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Relay status requests made after submission
    pub status_poll_attempts: u32,
    pub status_poll_interval: Duration,
    /// Upper bound on lifecycle polls while tracking a transfer
    pub track_max_polls: u32,
    pub track_poll_interval: Duration,
}

impl PollConfig {
    pub fn status_schedule(&self) -> PollSchedule {
        PollSchedule::new(self.status_poll_attempts, self.status_poll_interval)
    }

    pub fn track_schedule(&self) -> PollSchedule {
        PollSchedule::new(self.track_max_polls, self.track_poll_interval)
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            status_poll_attempts: default_status_poll_attempts(),
            status_poll_interval: Duration::from_millis(default_status_poll_interval_ms()),
            track_max_polls: default_track_max_polls(),
            track_poll_interval: Duration::from_millis(default_track_poll_interval_ms()),
        }
    }
}

/// Referrer fee configuration
#[derive(Debug, Clone, Default)]
pub struct ReferrerFeeConfig {
    /// Fee in tenths of a basis point
    pub fee_dbps: u32,
    /// Overrides the per-platform default referrer
    pub referrer: Option<UniversalAddress>,
}

/// Default functions
fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_status_poll_attempts() -> u32 {
    20
}

fn default_status_poll_interval_ms() -> u64 {
    2_000
}

fn default_track_max_polls() -> u32 {
    720
}

fn default_track_poll_interval_ms() -> u64 {
    5_000
}

fn parse_env<T: FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| eyre!("{} is invalid ({}): {}", name, raw, e)),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Self> {
        let network = match env::var("EXECUTOR_NETWORK") {
            Ok(raw) => raw
                .parse::<Network>()
                .wrap_err("EXECUTOR_NETWORK must be Mainnet, Testnet or Devnet")?,
            Err(_) => Network::Mainnet,
        };
        let api_url = match env::var("EXECUTOR_API_URL") {
            Ok(url) => url,
            Err(_) => default_api_url(network)
                .ok_or_else(|| {
                    eyre!(
                        "EXECUTOR_API_URL environment variable is required for {}",
                        network
                    )
                })?
                .to_string(),
        };
        let executor = ExecutorConfig {
            network,
            api_url,
            request_timeout: Duration::from_millis(parse_env(
                "EXECUTOR_REQUEST_TIMEOUT_MS",
                default_request_timeout_ms(),
            )?),
        };

        let protocol = ProtocolParams {
            rate_limit_duration_secs: parse_env(
                "RATE_LIMIT_DURATION_SECS",
                RATE_LIMIT_DURATION_SECS,
            )?,
            max_trimmed_decimals: parse_env("MAX_TRIMMED_DECIMALS", TRIMMED_DECIMALS)?,
        };

        let poll = PollConfig {
            status_poll_attempts: parse_env(
                "STATUS_POLL_ATTEMPTS",
                default_status_poll_attempts(),
            )?,
            status_poll_interval: Duration::from_millis(parse_env(
                "STATUS_POLL_INTERVAL_MS",
                default_status_poll_interval_ms(),
            )?),
            track_max_polls: parse_env("TRACK_MAX_POLLS", default_track_max_polls())?,
            track_poll_interval: Duration::from_millis(parse_env(
                "TRACK_POLL_INTERVAL_MS",
                default_track_poll_interval_ms(),
            )?),
        };

        let retry_defaults = RetryConfig::default();
        let retry = RetryConfig {
            max_retries: parse_env("RETRY_MAX_ATTEMPTS", retry_defaults.max_retries)?,
            initial_backoff: Duration::from_millis(parse_env(
                "RETRY_INITIAL_BACKOFF_MS",
                retry_defaults.initial_backoff.as_millis() as u64,
            )?),
            max_backoff: Duration::from_millis(parse_env(
                "RETRY_MAX_BACKOFF_MS",
                retry_defaults.max_backoff.as_millis() as u64,
            )?),
            backoff_multiplier: retry_defaults.backoff_multiplier,
            jitter: parse_env("RETRY_JITTER", retry_defaults.jitter)?,
        };

        let referrer = match env::var("REFERRER_ADDRESS") {
            Ok(raw) if !raw.trim().is_empty() => Some(
                UniversalAddress::from_hex(raw.trim())
                    .wrap_err("REFERRER_ADDRESS must be a 20 or 32 byte hex address")?,
            ),
            _ => None,
        };
        let referrer_fee = ReferrerFeeConfig {
            fee_dbps: parse_env("REFERRER_FEE_DBPS", 0)?,
            referrer,
        };

        let config = Config {
            executor,
            protocol,
            poll,
            retry,
            referrer_fee,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.executor.api_url)
            .wrap_err_with(|| format!("executor.api_url is not a URL: {}", self.executor.api_url))?;

        if self.executor.request_timeout.is_zero() {
            return Err(eyre!("executor.request_timeout must be positive"));
        }

        if self.protocol.rate_limit_duration_secs == 0 {
            return Err(eyre!("protocol.rate_limit_duration_secs must be positive"));
        }

        if !(1..=18).contains(&self.protocol.max_trimmed_decimals) {
            return Err(eyre!(
                "protocol.max_trimmed_decimals must be between 1 and 18, got {}",
                self.protocol.max_trimmed_decimals
            ));
        }

        if self.poll.status_poll_attempts == 0 || self.poll.track_max_polls == 0 {
            return Err(eyre!("poll attempt counts must be positive"));
        }

        if self.retry.max_backoff < self.retry.initial_backoff {
            return Err(eyre!("retry.max_backoff cannot be below retry.initial_backoff"));
        }

        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(eyre!("retry.jitter must be between 0 and 1"));
        }

        if self.referrer_fee.fee_dbps > u16::MAX as u32 {
            return Err(eyre!(
                "referrer_fee.fee_dbps cannot exceed {}",
                u16::MAX
            ));
        }

        Ok(())
    }
}
