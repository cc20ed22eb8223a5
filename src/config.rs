//! Environment-driven configuration for the sync service.
//!
//! All settings are read through a lookup function so the same parsing rules apply to the
//! process environment and to explicit key/value maps (tests, embedding applications).
//! Required settings fail fast; optional settings fall back to defaults with a warning.

use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Passphrase of the Stellar public network.
pub const PUBLIC_NETWORK_PASSPHRASE: &str = "Public Global Stellar Network ; September 2015";
/// Passphrase of the Stellar test network.
pub const TESTNET_NETWORK_PASSPHRASE: &str = "Test SDF Network ; September 2015";
/// Passphrase of the Stellar future network.
pub const FUTURENET_NETWORK_PASSPHRASE: &str = "Test SDF Future Network ; October 2022";

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5000;
const MIN_POLL_INTERVAL_MS: u64 = 1000;
const MAX_POLL_INTERVAL_MS: u64 = 300_000;
const HIGH_POLL_INTERVAL_MS: u64 = 60_000;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
pub const DEFAULT_EVENT_PAGE_LIMIT: u32 = 100;
pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_DATABASE_PATH: &str = "stellar-rent-sync.db";

/// Configuration errors. All of them are fatal: a service is never built from a bad config.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("Missing required environment variables for sync service")]
	MissingEnv {
		/// Names of the variables that were absent or empty.
		missing: Vec<&'static str>,
	},

	#[error(
		"Invalid network passphrase: {0}. Must be a valid Stellar network passphrase."
	)]
	InvalidPassphrase(String),

	#[error("Network passphrase mismatch: configured {configured:?}, RPC reports {reported:?}")]
	NetworkMismatch { configured: String, reported: String },
}

/// Settings for the blockchain sync service.
#[derive(Debug, Clone)]
pub struct SyncConfig {
	pub rpc_url: String,
	pub contract_id: String,
	pub network_passphrase: String,
	pub poll_interval: Duration,
	/// Attempts per RPC call before the cycle is failed.
	pub max_retries: u32,
	/// Initial delay between RPC attempts.
	pub retry_delay: Duration,
	pub event_page_limit: u32,
	/// Ledger to start from when no watermark has been committed yet.
	pub start_ledger: Option<u32>,
	pub database_path: PathBuf,
	pub rpc_timeout: Duration,
}

impl SyncConfig {
	/// Build a config with defaults for everything but the required settings.
	pub fn new(
		rpc_url: impl Into<String>,
		contract_id: impl Into<String>,
		network_passphrase: impl Into<String>,
	) -> Result<Self, ConfigError> {
		let network_passphrase = network_passphrase.into();
		if !is_valid_network_passphrase(&network_passphrase) {
			return Err(ConfigError::InvalidPassphrase(network_passphrase));
		}

		Ok(Self {
			rpc_url: rpc_url.into(),
			contract_id: contract_id.into(),
			network_passphrase,
			poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
			max_retries: DEFAULT_MAX_RETRIES,
			retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
			event_page_limit: DEFAULT_EVENT_PAGE_LIMIT,
			start_ledger: None,
			database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
			rpc_timeout: Duration::from_secs(DEFAULT_RPC_TIMEOUT_SECS),
		})
	}

	/// Read the configuration from the process environment.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	/// Read the configuration through an arbitrary key lookup.
	pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

		let rpc_url = get("SOROBAN_RPC_URL");
		let contract_id = get("SOROBAN_CONTRACT_ID");
		let network_passphrase = get("SOROBAN_NETWORK_PASSPHRASE");

		let (rpc_url, contract_id, network_passphrase) =
			match (rpc_url, contract_id, network_passphrase) {
				(Some(url), Some(contract), Some(passphrase)) => (url, contract, passphrase),
				(url, contract, passphrase) => {
					let mut missing = Vec::new();
					if url.is_none() {
						missing.push("SOROBAN_RPC_URL");
					}
					if contract.is_none() {
						missing.push("SOROBAN_CONTRACT_ID");
					}
					if passphrase.is_none() {
						missing.push("SOROBAN_NETWORK_PASSPHRASE");
					}
					return Err(ConfigError::MissingEnv { missing });
				}
			};

		let mut config = Self::new(rpc_url, contract_id, network_passphrase)?;
		config.poll_interval = parse_poll_interval(get("SYNC_POLL_INTERVAL").as_deref());
		config.max_retries = parse_or_default(
			"SYNC_MAX_RETRIES",
			get("SYNC_MAX_RETRIES").as_deref(),
			DEFAULT_MAX_RETRIES,
		)
		.max(1);
		config.retry_delay = Duration::from_millis(parse_or_default(
			"SYNC_RETRY_DELAY",
			get("SYNC_RETRY_DELAY").as_deref(),
			DEFAULT_RETRY_DELAY_MS,
		));
		config.event_page_limit = parse_or_default(
			"SYNC_EVENT_PAGE_LIMIT",
			get("SYNC_EVENT_PAGE_LIMIT").as_deref(),
			DEFAULT_EVENT_PAGE_LIMIT,
		)
		.clamp(1, 10_000);
		config.start_ledger = get("SYNC_START_LEDGER").and_then(|raw| match raw.trim().parse() {
			Ok(ledger) => Some(ledger),
			Err(_) => {
				warn!("Invalid SYNC_START_LEDGER value: {}. Ignoring it", raw);
				None
			}
		});
		if let Some(path) = get("SYNC_DATABASE_PATH") {
			config.database_path = PathBuf::from(path);
		}
		config.rpc_timeout = Duration::from_secs(parse_or_default(
			"SYNC_RPC_TIMEOUT",
			get("SYNC_RPC_TIMEOUT").as_deref(),
			DEFAULT_RPC_TIMEOUT_SECS,
		));

		info!(
			network = network_name(&config.network_passphrase),
			rpc_url = %config.rpc_url,
			contract_id = %config.contract_id,
			poll_interval_ms = config.poll_interval.as_millis() as u64,
			"Sync service configured"
		);

		Ok(config)
	}

	/// Human readable name of the configured network.
	pub fn network_name(&self) -> String {
		network_name(&self.network_passphrase)
	}
}

/// Parse `SYNC_POLL_INTERVAL`. Missing, non-numeric and out-of-range values fall back to the
/// default of 5000 ms.
pub fn parse_poll_interval(raw: Option<&str>) -> Duration {
	let default = Duration::from_millis(DEFAULT_POLL_INTERVAL_MS);

	let Some(raw) = raw else {
		info!(
			"No SYNC_POLL_INTERVAL set, using default: {}ms",
			DEFAULT_POLL_INTERVAL_MS
		);
		return default;
	};

	let parsed = match raw.trim().parse::<u64>() {
		Ok(ms) if (MIN_POLL_INTERVAL_MS..=MAX_POLL_INTERVAL_MS).contains(&ms) => ms,
		_ => {
			warn!(
				"Invalid SYNC_POLL_INTERVAL value: {}. Must be between {}ms and {}ms. Using default: {}ms",
				raw, MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS, DEFAULT_POLL_INTERVAL_MS
			);
			return default;
		}
	};

	if parsed > HIGH_POLL_INTERVAL_MS {
		warn!(
			"SYNC_POLL_INTERVAL very high: {}ms. This may cause delays in event processing",
			parsed
		);
	}

	Duration::from_millis(parsed)
}

fn parse_or_default<T>(key: &str, raw: Option<&str>, default: T) -> T
where
	T: std::str::FromStr + std::fmt::Display + Copy,
{
	match raw {
		None => default,
		Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
			warn!("Invalid {} value: {}. Using default: {}", key, raw, default);
			default
		}),
	}
}

/// Known Stellar passphrases are accepted as is. Custom networks must look like
/// `"<name> ; <date>"`.
pub fn is_valid_network_passphrase(passphrase: &str) -> bool {
	matches!(
		passphrase,
		PUBLIC_NETWORK_PASSPHRASE | TESTNET_NETWORK_PASSPHRASE | FUTURENET_NETWORK_PASSPHRASE
	) || (passphrase.contains(';') && passphrase.len() > 20)
}

pub fn network_name(passphrase: &str) -> String {
	match passphrase {
		PUBLIC_NETWORK_PASSPHRASE => "Mainnet".to_string(),
		TESTNET_NETWORK_PASSPHRASE => "Testnet".to_string(),
		FUTURENET_NETWORK_PASSPHRASE => "Futurenet".to_string(),
		custom => match custom.split_once(';') {
			Some((name, _)) => name.trim().to_string(),
			None => "Custom Network".to_string(),
		},
	}
}
