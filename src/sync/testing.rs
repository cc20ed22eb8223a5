//! Test doubles for the sync module.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use chrono::{DateTime, Utc};

use super::events::{BlockchainEventData, EventType, SyncEvent};
use super::status::BookingStatus;
use crate::rpc::{ContractEvent, LedgerSource, RpcError};
use crate::store::*;

pub fn sync_event(id: &str, event_type: EventType, data: BlockchainEventData) -> SyncEvent {
	SyncEvent {
		id: id.to_string(),
		event_type,
		ledger: 1000,
		timestamp: DateTime::from_timestamp(1_740_830_400, 0).unwrap(),
		booking_id: data.escrow_id.clone(),
		property_id: data.property_id.clone(),
		user_id: data.user_id.clone(),
		data,
		tx_hash: None,
		contract_id: Some("CABC".to_string()),
	}
}

pub fn contract_event(id: &str, ledger: u32, topic: &str, value: serde_json::Value) -> ContractEvent {
	ContractEvent {
		id: id.to_string(),
		ledger,
		ledger_closed_at: DateTime::from_timestamp(1_740_830_400, 0).unwrap(),
		contract_id: Some("CABC".to_string()),
		tx_hash: None,
		topic: vec![serde_json::Value::String(topic.to_string())],
		value,
	}
}

/// A ledger source that replays scripted responses.
#[derive(Default)]
pub struct ScriptedSource {
	latest: AtomicU32,
	events: Mutex<Vec<ContractEvent>>,
	/// Number of upcoming `latest_ledger` calls that fail with a transient error.
	failures: AtomicU32,
	/// When set, `contract_events` fails with a non-transient error.
	fail_events: Mutex<bool>,
	/// Oldest retained ledger. Zero means the source keeps every ledger.
	oldest: AtomicU32,
	passphrase: Mutex<Option<String>>,
	pub latest_calls: AtomicU32,
	pub event_calls: Mutex<Vec<(u32, u32)>>,
}

impl ScriptedSource {
	pub fn new(latest: u32) -> Arc<Self> {
		let source = Self::default();
		source.latest.store(latest, Ordering::SeqCst);
		Arc::new(source)
	}

	pub fn set_latest(&self, latest: u32) {
		self.latest.store(latest, Ordering::SeqCst);
	}

	pub fn push_event(&self, event: ContractEvent) {
		self.events.lock().unwrap().push(event);
	}

	pub fn fail_next(&self, count: u32) {
		self.failures.store(count, Ordering::SeqCst);
	}

	pub fn fail_events(&self, fail: bool) {
		*self.fail_events.lock().unwrap() = fail;
	}

	/// Reject event requests that start before `oldest`, the way a pruning RPC node does.
	pub fn set_oldest(&self, oldest: u32) {
		self.oldest.store(oldest, Ordering::SeqCst);
	}

	pub fn report_passphrase(&self, passphrase: &str) {
		*self.passphrase.lock().unwrap() = Some(passphrase.to_string());
	}
}

#[async_trait::async_trait]
impl LedgerSource for ScriptedSource {
	async fn latest_ledger(&self) -> Result<u32, RpcError> {
		self.latest_calls.fetch_add(1, Ordering::SeqCst);
		let remaining = self.failures.load(Ordering::SeqCst);
		if remaining > 0 {
			self.failures.store(remaining - 1, Ordering::SeqCst);
			return Err(RpcError::StatusError(503));
		}
		Ok(self.latest.load(Ordering::SeqCst))
	}

	async fn contract_events(&self, start: u32, end: u32) -> Result<Vec<ContractEvent>, RpcError> {
		self.event_calls.lock().unwrap().push((start, end));
		let oldest = self.oldest.load(Ordering::SeqCst);
		if *self.fail_events.lock().unwrap() || start < oldest {
			return Err(RpcError::JsonRpcError {
				code: -32600,
				message: "startLedger must be within the ledger range".to_string(),
			});
		}
		Ok(self
			.events
			.lock()
			.unwrap()
			.iter()
			.filter(|e| e.ledger >= start && e.ledger <= end)
			.cloned()
			.collect())
	}

	async fn network_passphrase(&self) -> Result<Option<String>, RpcError> {
		Ok(self.passphrase.lock().unwrap().clone())
	}

	async fn oldest_ledger(&self) -> Result<Option<u32>, RpcError> {
		let oldest = self.oldest.load(Ordering::SeqCst);
		Ok((oldest > 0).then_some(oldest))
	}
}

/// A source whose passphrase lookup blocks until `release` is notified.
pub struct GatedNetworkSource {
	inner: Arc<ScriptedSource>,
	/// Notified when a passphrase lookup starts.
	pub entered: tokio::sync::Notify,
	pub release: tokio::sync::Notify,
}

impl GatedNetworkSource {
	pub fn new(inner: Arc<ScriptedSource>) -> Arc<Self> {
		Arc::new(Self {
			inner,
			entered: tokio::sync::Notify::new(),
			release: tokio::sync::Notify::new(),
		})
	}
}

#[async_trait::async_trait]
impl LedgerSource for GatedNetworkSource {
	async fn latest_ledger(&self) -> Result<u32, RpcError> {
		self.inner.latest_ledger().await
	}

	async fn contract_events(&self, start: u32, end: u32) -> Result<Vec<ContractEvent>, RpcError> {
		self.inner.contract_events(start, end).await
	}

	async fn network_passphrase(&self) -> Result<Option<String>, RpcError> {
		self.entered.notify_one();
		self.release.notified().await;
		self.inner.network_passphrase().await
	}
}

/// A store whose booking writes fail until `set_failing(false)`. Everything else goes to
/// `inner`.
pub struct FailingBookingStore {
	inner: Arc<SqliteSyncStore>,
	failing: AtomicBool,
}

impl FailingBookingStore {
	pub fn new(inner: Arc<SqliteSyncStore>) -> Self {
		Self {
			inner,
			failing: AtomicBool::new(true),
		}
	}

	pub fn set_failing(&self, failing: bool) {
		self.failing.store(failing, Ordering::SeqCst);
	}
}

#[async_trait::async_trait]
impl SyncStore for FailingBookingStore {
	async fn load_sync_state(&self) -> Result<Option<SyncStateRecord>, StoreError> {
		self.inner.load_sync_state().await
	}

	async fn save_sync_state(&self, state: &SyncStateRecord) -> Result<(), StoreError> {
		self.inner.save_sync_state(state).await
	}

	async fn record_event(&self, event: &NewSyncEvent) -> Result<RecordOutcome, StoreError> {
		self.inner.record_event(event).await
	}

	async fn mark_event_processed(&self, event_id: &str) -> Result<(), StoreError> {
		self.inner.mark_event_processed(event_id).await
	}

	async fn mark_event_failed(&self, event_id: &str, error: &str) -> Result<(), StoreError> {
		self.inner.mark_event_failed(event_id, error).await
	}

	async fn reset_event(&self, event_id: &str) -> Result<(), StoreError> {
		self.inner.reset_event(event_id).await
	}

	async fn upsert_booking(&self, booking: &BookingUpsert) -> Result<(), StoreError> {
		if self.failing.load(Ordering::SeqCst) {
			return Err(StoreError::Integrity("booking insert rejected".to_string()));
		}
		self.inner.upsert_booking(booking).await
	}

	async fn update_booking_status(
		&self,
		escrow_address: &str,
		status: BookingStatus,
	) -> Result<u64, StoreError> {
		if self.failing.load(Ordering::SeqCst) {
			return Err(StoreError::Integrity("booking update rejected".to_string()));
		}
		self.inner.update_booking_status(escrow_address, status).await
	}

	async fn find_booking(
		&self,
		escrow_address: &str,
	) -> Result<Option<BookingRecord>, StoreError> {
		self.inner.find_booking(escrow_address).await
	}

	async fn insert_log(&self, log: &NewSyncLog) -> Result<(), StoreError> {
		self.inner.insert_log(log).await
	}

	async fn list_events(&self, query: &EventQuery) -> Result<Vec<SyncEventRecord>, StoreError> {
		self.inner.list_events(query).await
	}

	async fn failed_events(&self) -> Result<Vec<SyncEventRecord>, StoreError> {
		self.inner.failed_events().await
	}

	async fn count_failed_events(&self) -> Result<u64, StoreError> {
		self.inner.count_failed_events().await
	}

	async fn list_logs(&self, query: &LogQuery) -> Result<Vec<SyncLogRecord>, StoreError> {
		self.inner.list_logs(query).await
	}

	async fn delete_events_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
		self.inner.delete_events_before(cutoff).await
	}

	async fn delete_logs_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
		self.inner.delete_logs_before(cutoff).await
	}
}
