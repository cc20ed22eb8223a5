//! Operator-facing reads and maintenance over the event ledger and the sync log.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use super::SyncError;
use super::events::SyncEvent;
use super::processor::ProcessOutcome;
use super::service::{SyncService, SyncStatus};
use crate::store::{EventQuery, LogQuery, NewSyncLog, SyncEventRecord, SyncLogRecord, SyncStore};

/// Number of recent events `sync_stats` looks at.
pub const STATS_WINDOW: u32 = 100;
pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 100;
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
	/// Events among the most recent ones.
	pub total_events: usize,
	/// Events that failed and were not processed since, across the whole ledger.
	pub failed_events: u64,
	pub last_event: Option<SyncEventRecord>,
	pub status: SyncStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryReport {
	pub retried: usize,
	pub succeeded: usize,
	pub total_failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearReport {
	pub cutoff: DateTime<Utc>,
	pub events_deleted: u64,
	pub logs_deleted: u64,
}

fn page_size(limit: u32) -> u32 {
	match limit {
		0 => DEFAULT_PAGE_SIZE,
		n => n.min(MAX_PAGE_SIZE),
	}
}

impl SyncService {
	/// Summary of the most recent events plus the current status.
	pub async fn sync_stats(&self) -> Result<SyncStats, SyncError> {
		let recent = self
			.store
			.list_events(&EventQuery {
				limit: STATS_WINDOW,
				..Default::default()
			})
			.await?;

		let failed_events = self.store.count_failed_events().await?;

		Ok(SyncStats {
			total_events: recent.len(),
			failed_events,
			last_event: recent.into_iter().next(),
			status: self.status(),
		})
	}

	/// Page through the event ledger, newest first. A zero limit means the default page size.
	pub async fn list_events(&self, query: EventQuery) -> Result<Vec<SyncEventRecord>, SyncError> {
		let query = EventQuery {
			limit: page_size(query.limit),
			..query
		};
		Ok(self.store.list_events(&query).await?)
	}

	/// Page through the sync log, newest first. A zero limit means the default page size.
	pub async fn list_logs(&self, query: LogQuery) -> Result<Vec<SyncLogRecord>, SyncError> {
		let query = LogQuery {
			limit: page_size(query.limit),
			..query
		};
		Ok(self.store.list_logs(&query).await?)
	}

	/// Process every failed event again from its stored payload.
	///
	/// Events that fail again keep their (new) error and are counted as not succeeded.
	pub async fn retry_failed_events(&self) -> Result<RetryReport, SyncError> {
		let failed = self.store.failed_events().await?;
		let mut report = RetryReport {
			total_failed: failed.len(),
			..Default::default()
		};

		for record in &failed {
			report.retried += 1;
			self.store.reset_event(&record.event_id).await?;

			let event = SyncEvent::from_record(record);
			match self.processor.process_event(&event).await {
				Ok(ProcessOutcome::Applied | ProcessOutcome::Duplicate) => report.succeeded += 1,
				Ok(ProcessOutcome::Rejected) => {
					warn!("Event {} rejected again on retry", record.event_id)
				}
				Err(e) => warn!("Failed to retry event {}: {}", record.event_id, e),
			}
		}

		self.store
			.insert_log(&NewSyncLog::success(
				"retry_failed_events",
				"Retried failed sync events",
				json!({
					"retried": report.retried,
					"succeeded": report.succeeded,
					"total_failed": report.total_failed,
				}),
			))
			.await?;

		info!(
			"Retried {} failed events, {} succeeded",
			report.retried, report.succeeded
		);
		Ok(report)
	}

	/// Delete event ledger and sync log rows older than `days` days.
	pub async fn clear_old_data(&self, days: u32) -> Result<ClearReport, SyncError> {
		let cutoff = Utc::now() - Duration::days(i64::from(days));

		let events_deleted = self.store.delete_events_before(cutoff).await?;
		let logs_deleted = self.store.delete_logs_before(cutoff).await?;

		self.store
			.insert_log(&NewSyncLog::success(
				"clear_old_data",
				format!("Cleared sync data older than {} days", days),
				json!({
					"cutoff": cutoff.to_rfc3339(),
					"events_deleted": events_deleted,
					"logs_deleted": logs_deleted,
				}),
			))
			.await?;

		info!(
			"Cleared {} events and {} logs older than {} days",
			events_deleted, logs_deleted, days
		);
		Ok(ClearReport {
			cutoff,
			events_deleted,
			logs_deleted,
		})
	}
}
