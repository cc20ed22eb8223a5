//! Blockchain sync module
//!
//! This module keeps the booking database in step with the booking contract. The
//! [`SyncService`] owns a background worker that polls a [`LedgerSource`] on a fixed interval,
//! hands every new contract event to the [`EventProcessor`], and commits the ledger watermark to
//! the [`SyncStore`] once a cycle has been fully processed.
//!
//! [`LedgerSource`]: crate::rpc::LedgerSource
//! [`SyncStore`]: crate::store::SyncStore

/// Contract event model
pub mod events;
/// Statistics, listings, retries and cleanup over the event ledger
pub mod maintenance;
/// One poll cycle with bounded retry
pub mod poller;
/// Per-type event handlers
pub mod processor;
/// Service lifecycle and the polling worker
pub mod service;
/// Booking status vocabulary
pub mod status;

#[cfg(test)]
pub(crate) mod testing;

pub use events::{BlockchainEventData, EventType, SyncEvent};
pub use maintenance::{ClearReport, RetryReport, SyncStats};
pub use poller::{CycleReport, Poller, RetryPolicy};
pub use processor::{EventProcessor, ProcessOutcome};
pub use service::{SyncService, SyncStatus};
pub use status::{BookingStatus, map_blockchain_status};

use crate::config::ConfigError;
use crate::rpc::RpcError;
use crate::store::StoreError;

/// Errors raised by the sync service
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
	#[error(transparent)]
	Config(#[from] ConfigError),

	#[error(transparent)]
	Rpc(#[from] RpcError),

	#[error(transparent)]
	Store(#[from] StoreError),

	#[error("Sync service is not running")]
	NotRunning,

	#[error("Invalid event {event_id}: {reason}")]
	InvalidEvent { event_id: String, reason: String },

	#[error("Sync worker stopped unexpectedly")]
	WorkerGone,
}
