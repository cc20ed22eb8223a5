use std::sync::Arc;

use serde_json::json;
use tracing::{debug, error, info, warn};

use super::SyncError;
use super::events::{EventType, SyncEvent};
use super::status::{BookingStatus, map_blockchain_status};
use crate::store::{BookingUpsert, NewSyncLog, RecordOutcome, SyncStore};

/// What happened to an event handed to the processor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
	/// The event was applied to the booking projection (or logged, for audit-only types).
	Applied,
	/// The event was processed before and was skipped.
	Duplicate,
	/// The payload was unusable. The event is marked failed in the event ledger.
	Rejected,
}

enum Handled {
	Applied,
	Rejected(String),
}

/// Applies contract events to the booking projection.
///
/// Every event is written to the event ledger before it is handled, so an event that was
/// processed once is never applied again.
#[derive(Clone)]
pub struct EventProcessor {
	store: Arc<dyn SyncStore>,
}

impl EventProcessor {
	pub fn new(store: Arc<dyn SyncStore>) -> Self {
		Self { store }
	}

	/// Record and apply one event.
	///
	/// Persistence errors are returned to the caller after the event row is marked failed.
	/// They never touch the service counters.
	pub async fn process_event(&self, event: &SyncEvent) -> Result<ProcessOutcome, SyncError> {
		if event.id.is_empty() {
			return Err(SyncError::InvalidEvent {
				event_id: event.id.clone(),
				reason: "event has no id".to_string(),
			});
		}

		match self.store.record_event(&event.to_new_record()).await? {
			RecordOutcome::AlreadyProcessed => {
				debug!("Event {} already processed, skipping", event.id);
				return Ok(ProcessOutcome::Duplicate);
			}
			RecordOutcome::Pending => {
				debug!("Event {} was seen before, processing again", event.id);
			}
			RecordOutcome::Inserted => {}
		}

		match self.handle(event).await {
			Ok(Handled::Applied) => {
				self.store.mark_event_processed(&event.id).await?;
				debug!(
					"Processed {} event {} (ledger {})",
					event.event_type.as_str(),
					event.id,
					event.ledger
				);
				Ok(ProcessOutcome::Applied)
			}
			Ok(Handled::Rejected(reason)) => {
				warn!("Rejected {} event {}: {}", event.event_type.as_str(), event.id, reason);
				self.store.mark_event_failed(&event.id, &reason).await?;
				Ok(ProcessOutcome::Rejected)
			}
			Err(e) => {
				error!("[PROCESS_EVENT] Error processing event {}: {}", event.id, e);
				if let Err(mark_err) = self.store.mark_event_failed(&event.id, &e.to_string()).await {
					warn!("Failed to mark event {} as failed: {}", event.id, mark_err);
				}
				Err(e)
			}
		}
	}

	async fn handle(&self, event: &SyncEvent) -> Result<Handled, SyncError> {
		match event.event_type {
			EventType::BookingCreated => self.handle_booking_created(event).await,
			EventType::BookingUpdated => self.handle_booking_updated(event).await,
			EventType::BookingCancelled => {
				self.set_booking_status(event, BookingStatus::Cancelled).await
			}
			EventType::PaymentConfirmed => {
				self.set_booking_status(event, BookingStatus::Confirmed).await
			}
			EventType::PropertyCreated => {
				self.log_property_event(event, "handle_property_created", "Property creation")
					.await
			}
			EventType::PropertyUpdated => {
				self.log_property_event(event, "handle_property_updated", "Property update")
					.await
			}
			EventType::EscrowCreated => {
				let handled = self.set_booking_status(event, BookingStatus::Pending).await?;
				if matches!(handled, Handled::Applied) {
					self.store
						.insert_log(&NewSyncLog::success(
							"handle_escrow_created",
							"Escrow creation event processed from blockchain",
							json!({
								"escrow_id": event.data.escrow_id,
								"property_id": event.data.property_id,
								"user_id": event.data.user_id,
								"total_price": event.data.total_price,
							}),
						))
						.await?;
				}
				Ok(handled)
			}
			EventType::EscrowReleased => {
				let handled = self.set_booking_status(event, BookingStatus::Completed).await?;
				if matches!(handled, Handled::Applied) {
					self.store
						.insert_log(&NewSyncLog::success(
							"handle_escrow_released",
							"Escrow release event processed from blockchain",
							json!({
								"escrow_id": event.data.escrow_id,
								"property_id": event.data.property_id,
								"user_id": event.data.user_id,
							}),
						))
						.await?;
				}
				Ok(handled)
			}
			EventType::Unknown => {
				warn!("Unknown event type for event {}", event.id);
				Ok(Handled::Applied)
			}
		}
	}

	async fn handle_booking_created(&self, event: &SyncEvent) -> Result<Handled, SyncError> {
		let data = &event.data;
		let Some(escrow_id) = data.escrow_id.clone() else {
			return Ok(Handled::Rejected("booking_created without escrow_id".to_string()));
		};

		let booking = BookingUpsert {
			escrow_address: escrow_id,
			property_id: data.property_id.clone().unwrap_or_default(),
			user_id: data.user_id.clone().unwrap_or_default(),
			start_date: data.start_datetime(),
			end_date: data.end_datetime(),
			guests: data.guests.filter(|g| *g > 0).unwrap_or(1),
			total_price: data.total_price.unwrap_or(0),
			deposit: data.deposit.unwrap_or(0),
			status: map_blockchain_status(data.status.as_deref().unwrap_or("")),
		};

		self.store.upsert_booking(&booking).await?;
		info!(
			"Booking {} synced from blockchain with status {}",
			booking.escrow_address, booking.status
		);
		Ok(Handled::Applied)
	}

	async fn handle_booking_updated(&self, event: &SyncEvent) -> Result<Handled, SyncError> {
		let (Some(escrow_id), Some(status)) = (&event.data.escrow_id, &event.data.status) else {
			debug!(
				"booking_updated event {} carries no escrow_id or status, nothing to update",
				event.id
			);
			return Ok(Handled::Applied);
		};

		let status = map_blockchain_status(status);
		let changed = self.store.update_booking_status(escrow_id, status).await?;
		if changed == 0 {
			debug!("No booking with escrow {} to update", escrow_id);
		}
		Ok(Handled::Applied)
	}

	async fn set_booking_status(
		&self,
		event: &SyncEvent,
		status: BookingStatus,
	) -> Result<Handled, SyncError> {
		let Some(escrow_id) = &event.data.escrow_id else {
			return Ok(Handled::Rejected(format!(
				"{} without escrow_id",
				event.event_type.as_str()
			)));
		};

		let changed = self.store.update_booking_status(escrow_id, status).await?;
		if changed == 0 {
			debug!("No booking with escrow {} to mark {}", escrow_id, status);
		}
		Ok(Handled::Applied)
	}

	async fn log_property_event(
		&self,
		event: &SyncEvent,
		operation: &str,
		what: &str,
	) -> Result<Handled, SyncError> {
		self.store
			.insert_log(&NewSyncLog::success(
				operation,
				format!("{} event processed from blockchain", what),
				json!({
					"property_id": event.data.property_id,
					"user_id": event.data.user_id,
					"event_id": event.id,
				}),
			))
			.await?;

		info!(
			"{} confirmed on blockchain: {}",
			what,
			event.data.property_id.as_deref().unwrap_or("unknown property")
		);
		Ok(Handled::Applied)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::{EventQuery, LogQuery, SqliteSyncStore};
	use crate::sync::BlockchainEventData;
	use crate::sync::testing::{FailingBookingStore, sync_event};

	fn setup() -> (Arc<SqliteSyncStore>, EventProcessor) {
		let store = Arc::new(SqliteSyncStore::open_in_memory().unwrap());
		let processor = EventProcessor::new(store.clone());
		(store, processor)
	}

	fn created(id: &str, status: &str) -> SyncEvent {
		sync_event(
			id,
			EventType::BookingCreated,
			BlockchainEventData {
				escrow_id: Some("escrow-1".to_string()),
				property_id: Some("prop-1".to_string()),
				user_id: Some("user-1".to_string()),
				start_date: Some(1_700_000_000),
				end_date: Some(1_700_086_400),
				total_price: Some(1000),
				status: Some(status.to_string()),
				..Default::default()
			},
		)
	}

	#[tokio::test]
	async fn test_booking_created_inserts_booking() {
		let (store, processor) = setup();

		let outcome = processor.process_event(&created("evt-1", "Pending")).await.unwrap();
		assert_eq!(outcome, ProcessOutcome::Applied);

		let booking = store.find_booking("escrow-1").await.unwrap().unwrap();
		assert_eq!(booking.status, BookingStatus::Pending);
		assert_eq!(booking.guests, 1);
		assert_eq!(booking.deposit, 0);
		assert_eq!(booking.total_price, 1000);

		let events = store.list_events(&EventQuery { limit: 10, ..Default::default() }).await.unwrap();
		assert_eq!(events.len(), 1);
		assert!(events[0].processed);
		assert_eq!(events[0].booking_id.as_deref(), Some("escrow-1"));
	}

	#[tokio::test]
	async fn test_redelivered_event_is_duplicate() {
		let (store, processor) = setup();
		let event = created("evt-1", "Pending");

		processor.process_event(&event).await.unwrap();
		let outcome = processor.process_event(&event).await.unwrap();

		assert_eq!(outcome, ProcessOutcome::Duplicate);
		assert_eq!(store.count_bookings().await.unwrap(), 1);
	}

	#[tokio::test]
	async fn test_second_booking_created_updates_status() {
		let (store, processor) = setup();
		processor.process_event(&created("evt-1", "Pending")).await.unwrap();
		processor.process_event(&created("evt-2", "Confirmed")).await.unwrap();

		assert_eq!(store.count_bookings().await.unwrap(), 1);
		let booking = store.find_booking("escrow-1").await.unwrap().unwrap();
		assert_eq!(booking.status, BookingStatus::Confirmed);
	}

	#[tokio::test]
	async fn test_status_events() {
		let (store, processor) = setup();
		processor.process_event(&created("evt-1", "Pending")).await.unwrap();

		let escrow = || BlockchainEventData {
			escrow_id: Some("escrow-1".to_string()),
			..Default::default()
		};

		let cases = [
			(EventType::PaymentConfirmed, BookingStatus::Confirmed),
			(EventType::EscrowReleased, BookingStatus::Completed),
			(EventType::EscrowCreated, BookingStatus::Pending),
			(EventType::BookingCancelled, BookingStatus::Cancelled),
		];
		for (i, (event_type, expected)) in cases.into_iter().enumerate() {
			let event = sync_event(&format!("status-{i}"), event_type, escrow());
			assert_eq!(
				processor.process_event(&event).await.unwrap(),
				ProcessOutcome::Applied
			);
			let booking = store.find_booking("escrow-1").await.unwrap().unwrap();
			assert_eq!(booking.status, expected, "after {}", event_type.as_str());
		}

		let updated = sync_event(
			"status-updated",
			EventType::BookingUpdated,
			BlockchainEventData {
				status: Some("Completed".to_string()),
				..escrow()
			},
		);
		processor.process_event(&updated).await.unwrap();
		let booking = store.find_booking("escrow-1").await.unwrap().unwrap();
		assert_eq!(booking.status, BookingStatus::Completed);

		let logs = store.list_logs(&LogQuery { limit: 10, ..Default::default() }).await.unwrap();
		let operations: Vec<_> = logs.iter().map(|l| l.operation.as_str()).collect();
		assert_eq!(operations, vec!["handle_escrow_created", "handle_escrow_released"]);
	}

	#[tokio::test]
	async fn test_property_events_are_audited() {
		let (store, processor) = setup();
		let event = sync_event(
			"prop-evt",
			EventType::PropertyCreated,
			BlockchainEventData {
				property_id: Some("prop-9".to_string()),
				..Default::default()
			},
		);
		processor.process_event(&event).await.unwrap();

		let logs = store.list_logs(&LogQuery { limit: 10, ..Default::default() }).await.unwrap();
		assert_eq!(logs.len(), 1);
		assert_eq!(logs[0].operation, "handle_property_created");
		assert_eq!(logs[0].details.as_ref().unwrap()["property_id"], "prop-9");
		assert_eq!(store.count_bookings().await.unwrap(), 0);
	}

	#[tokio::test]
	async fn test_missing_escrow_is_rejected() {
		let (store, processor) = setup();
		let event = sync_event("evt-bad", EventType::BookingCreated, BlockchainEventData::default());

		let outcome = processor.process_event(&event).await.unwrap();
		assert_eq!(outcome, ProcessOutcome::Rejected);

		let failed = store.failed_events().await.unwrap();
		assert_eq!(failed.len(), 1);
		assert_eq!(
			failed[0].error.as_deref(),
			Some("booking_created without escrow_id")
		);
	}

	#[tokio::test]
	async fn test_unknown_event_is_recorded_only() {
		let (store, processor) = setup();
		let event = sync_event("evt-x", EventType::Unknown, BlockchainEventData::default());
		assert_eq!(
			processor.process_event(&event).await.unwrap(),
			ProcessOutcome::Applied
		);
		assert_eq!(store.count_bookings().await.unwrap(), 0);
	}

	#[tokio::test]
	async fn test_insert_failure_propagates() {
		let inner = Arc::new(SqliteSyncStore::open_in_memory().unwrap());
		let store = Arc::new(FailingBookingStore::new(inner.clone()));
		let processor = EventProcessor::new(store);

		let err = processor
			.process_event(&created("evt-1", "Pending"))
			.await
			.unwrap_err();
		assert!(err.to_string().contains("booking insert rejected"));

		let failed = inner.failed_events().await.unwrap();
		assert_eq!(failed.len(), 1);
		assert!(failed[0].error.as_deref().unwrap().contains("booking insert rejected"));
	}

	#[tokio::test]
	async fn test_event_without_id_is_invalid() {
		let (_store, processor) = setup();
		let event = sync_event("", EventType::Unknown, BlockchainEventData::default());
		assert!(matches!(
			processor.process_event(&event).await,
			Err(SyncError::InvalidEvent { .. })
		));
	}
}
