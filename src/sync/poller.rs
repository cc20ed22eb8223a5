//!
//! One poll cycle against the ledger source.
//!
//! A cycle reads the latest ledger, fetches the contract events emitted since the watermark,
//! hands them to the [`EventProcessor`] in ledger order and finally commits the new watermark.
//! Any failure aborts the cycle before the watermark is committed, so the next cycle fetches the
//! same range again.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use backoff::{ExponentialBackoff, future::retry};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::SyncError;
use super::events::SyncEvent;
use super::processor::{EventProcessor, ProcessOutcome};
use super::service::SyncState;
use crate::config::SyncConfig;
use crate::rpc::{ContractEvent, LedgerSource, RpcError};
use crate::store::{NewSyncLog, SyncStore};

/// Bounded exponential backoff for RPC calls
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
	/// Total attempts per call, including the first one.
	pub max_attempts: u32,
	/// Delay before the second attempt. Later delays grow exponentially.
	pub initial_delay: Duration,
}

impl RetryPolicy {
	pub fn from_config(config: &SyncConfig) -> Self {
		Self {
			max_attempts: config.max_retries.max(1),
			initial_delay: config.retry_delay,
		}
	}

	fn backoff(&self) -> ExponentialBackoff {
		ExponentialBackoff {
			initial_interval: self.initial_delay,
			current_interval: self.initial_delay,
			max_interval: self.initial_delay.saturating_mul(8),
			max_elapsed_time: None,
			..Default::default()
		}
	}

	/// Run `op` until it succeeds, fails with a non-transient error, or runs out of attempts.
	pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, RpcError>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<T, RpcError>>,
	{
		let max_attempts = self.max_attempts;
		let mut attempt = 0u32;

		retry(self.backoff(), || {
			attempt += 1;
			let current = attempt;
			let fut = op();
			async move {
				match fut.await {
					Ok(value) => Ok(value),
					Err(e) if e.is_transient() && current < max_attempts => {
						warn!(
							"{} failed (attempt {}/{}): {}. Retrying",
							what, current, max_attempts, e
						);
						Err(backoff::Error::transient(e))
					}
					Err(e) => Err(backoff::Error::permanent(e)),
				}
			}
		})
		.await
	}
}

/// Summary of one successful poll cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
	/// First ledger searched. Greater than `latest_ledger` when there was nothing new.
	pub from_ledger: u32,
	pub latest_ledger: u32,
	pub events_fetched: usize,
	pub applied: u64,
	pub duplicates: u64,
	pub rejected: u64,
}

pub struct Poller {
	source: Arc<dyn LedgerSource>,
	store: Arc<dyn SyncStore>,
	processor: EventProcessor,
	retry: RetryPolicy,
	start_ledger: Option<u32>,
}

impl Poller {
	pub fn new(
		source: Arc<dyn LedgerSource>,
		store: Arc<dyn SyncStore>,
		processor: EventProcessor,
		retry: RetryPolicy,
		start_ledger: Option<u32>,
	) -> Self {
		Self {
			source,
			store,
			processor,
			retry,
			start_ledger,
		}
	}

	/// Run one cycle. A failed cycle bumps `failed_events` and is recorded in the sync log;
	/// the watermark stays where it was.
	pub async fn poll(&self, state: &mut SyncState) -> Result<CycleReport, SyncError> {
		match self.run_cycle(state).await {
			Ok(report) => Ok(report),
			Err(e) => {
				state.failed_events += 1;
				error!("[POLL] Error polling for events: {}", e);

				let log = NewSyncLog::error(
					"poll_blockchain",
					"Failed to poll blockchain for events",
					json!({
						"error": e.to_string(),
						"last_processed_block": state.last_processed_block,
						"current_block_height": state.current_block_height,
					}),
				);
				if let Err(log_err) = self.store.insert_log(&log).await {
					warn!("Failed to record poll failure in sync log: {}", log_err);
				}

				Err(e)
			}
		}
	}

	async fn run_cycle(&self, state: &mut SyncState) -> Result<CycleReport, SyncError> {
		let latest = self
			.retry
			.run("getLatestLedger", || self.source.latest_ledger())
			.await?;
		state.current_block_height = latest;

		let mut from = self.next_ledger(state, latest);
		let mut report = CycleReport {
			from_ledger: from,
			latest_ledger: latest,
			..Default::default()
		};

		if from <= latest {
			let events = match self.fetch_events(from, latest).await {
				Ok(events) => events,
				Err(e) => {
					from = self.retained_start(from, latest, e).await?;
					report.from_ledger = from;
					self.fetch_events(from, latest).await?
				}
			};
			report.events_fetched = events.len();
			debug!("Fetched {} events for ledgers {}-{}", events.len(), from, latest);

			for event in events {
				let event = SyncEvent::from_contract_event(event);
				match self.processor.process_event(&event).await? {
					ProcessOutcome::Applied => {
						report.applied += 1;
						state.total_events_processed += 1;
					}
					ProcessOutcome::Duplicate => report.duplicates += 1,
					ProcessOutcome::Rejected => report.rejected += 1,
				}
			}
		}

		let now = Utc::now();
		let mut committed = state.to_record();
		committed.last_processed_block = state.last_processed_block.max(latest);
		committed.last_sync_time = Some(now);
		self.store.save_sync_state(&committed).await?;

		state.last_processed_block = committed.last_processed_block;
		state.last_sync_time = Some(now);

		if report.events_fetched > 0 {
			info!(
				"Synced ledgers {}-{}: {} applied, {} duplicate, {} rejected",
				from, latest, report.applied, report.duplicates, report.rejected
			);
		} else {
			debug!("No new events up to ledger {}", latest);
		}

		Ok(report)
	}

	/// First ledger of the next cycle. A fresh watermark starts at `SYNC_START_LEDGER`, or at the
	/// tip when none is configured.
	fn next_ledger(&self, state: &SyncState, latest: u32) -> u32 {
		if state.last_processed_block == 0 {
			self.start_ledger.unwrap_or(latest).max(1)
		} else {
			state.last_processed_block.saturating_add(1)
		}
	}

	async fn fetch_events(&self, from: u32, latest: u32) -> Result<Vec<ContractEvent>, RpcError> {
		self.retry
			.run("getEvents", || self.source.contract_events(from, latest))
			.await
	}

	/// Decide where to resume after `getEvents` rejected `from`. When `from` has fallen out of
	/// the source's retention window the cycle resumes at the oldest retained ledger; otherwise
	/// the original error is returned.
	async fn retained_start(&self, from: u32, latest: u32, err: RpcError) -> Result<u32, RpcError> {
		if err.is_transient() {
			return Err(err);
		}

		let oldest = match self.source.oldest_ledger().await {
			Ok(Some(oldest)) if oldest > from && oldest <= latest => oldest,
			Ok(_) => return Err(err),
			Err(health_err) => {
				warn!("Could not read the retained ledger range: {}", health_err);
				return Err(err);
			}
		};

		warn!(
			"Ledgers {}-{} are no longer retained by the RPC endpoint, resuming at {}",
			from,
			oldest - 1,
			oldest
		);
		let log = NewSyncLog::error(
			"poll_blockchain",
			"Skipped ledgers outside the RPC retention window",
			json!({
				"from_ledger": from,
				"oldest_ledger": oldest,
				"error": err.to_string(),
			}),
		);
		if let Err(log_err) = self.store.insert_log(&log).await {
			warn!("Failed to record skipped ledgers in sync log: {}", log_err);
		}

		Ok(oldest)
	}
}
