//! Persistence for the sync service.
//!
//! The [`SyncStore`] trait is the seam between the sync logic and the database. It covers
//! four tables:
//!
//! - `sync_state`: the single-row ledger watermark and counters
//! - `sync_events`: the event ledger, one row per received contract event
//! - `bookings`: the booking projection keyed by escrow address
//! - `sync_logs`: an operational log of sync operations
//!
//! [`SqliteSyncStore`] is the production implementation.

pub mod error;
pub mod schema;
pub mod sqlite;

pub use error::StoreError;
pub use sqlite::SqliteSyncStore;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::sync::BookingStatus;

/// Persisted watermark and counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStateRecord {
    pub last_processed_block: u32,
    pub total_events_processed: u64,
    pub failed_events: u64,
    pub last_sync_time: Option<DateTime<Utc>>,
}

/// An event about to be written to the event ledger.
#[derive(Debug, Clone)]
pub struct NewSyncEvent {
    pub event_id: String,
    pub event_type: String,
    pub ledger: Option<u32>,
    pub event_timestamp: Option<DateTime<Utc>>,
    pub booking_id: Option<String>,
    pub property_id: Option<String>,
    pub user_id: Option<String>,
    pub tx_hash: Option<String>,
    pub contract_id: Option<String>,
    pub event_data: serde_json::Value,
}

/// Outcome of writing an event to the event ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// First time this event was seen.
    Inserted,
    /// Seen before but never processed successfully.
    Pending,
    /// Seen before and already processed.
    AlreadyProcessed,
}

/// A row of the event ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncEventRecord {
    pub id: i64,
    pub event_id: String,
    pub event_type: String,
    pub ledger: Option<u32>,
    pub event_timestamp: Option<DateTime<Utc>>,
    pub booking_id: Option<String>,
    pub property_id: Option<String>,
    pub user_id: Option<String>,
    pub tx_hash: Option<String>,
    pub contract_id: Option<String>,
    pub event_data: serde_json::Value,
    pub processed: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Booking fields written by a `booking_created` event.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingUpsert {
    pub escrow_address: String,
    pub property_id: String,
    pub user_id: String,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub guests: u32,
    pub total_price: i64,
    pub deposit: i64,
    pub status: BookingStatus,
}

/// A row of the booking projection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookingRecord {
    pub id: i64,
    pub escrow_address: String,
    pub property_id: String,
    pub user_id: String,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub guests: u32,
    pub total_price: i64,
    pub deposit: i64,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Success,
    Error,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Success => "success",
            LogStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(LogStatus::Success),
            "error" => Some(LogStatus::Error),
            _ => None,
        }
    }
}

/// An entry for the operational log.
#[derive(Debug, Clone)]
pub struct NewSyncLog {
    pub operation: String,
    pub status: LogStatus,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl NewSyncLog {
    pub fn success(operation: &str, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            operation: operation.to_string(),
            status: LogStatus::Success,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn error(operation: &str, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            operation: operation.to_string(),
            status: LogStatus::Error,
            message: message.into(),
            details: Some(details),
        }
    }
}

/// A row of the operational log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncLogRecord {
    pub id: i64,
    pub operation: String,
    pub status: LogStatus,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Filter and paging for event ledger listings. Results are newest first.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub event_type: Option<String>,
    pub processed: Option<bool>,
    pub limit: u32,
    pub offset: u32,
}

/// Filter and paging for operational log listings. Results are newest first.
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    pub status: Option<LogStatus>,
    pub operation: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

/// Repository for everything the sync service persists
#[async_trait::async_trait]
pub trait SyncStore: Send + Sync {
    async fn load_sync_state(&self) -> Result<Option<SyncStateRecord>, StoreError>;

    /// Insert or replace the single watermark row.
    async fn save_sync_state(&self, state: &SyncStateRecord) -> Result<(), StoreError>;

    /// Write an event to the event ledger unless it is already there.
    async fn record_event(&self, event: &NewSyncEvent) -> Result<RecordOutcome, StoreError>;

    async fn mark_event_processed(&self, event_id: &str) -> Result<(), StoreError>;

    async fn mark_event_failed(&self, event_id: &str, error: &str) -> Result<(), StoreError>;

    /// Clear the error of a failed event so it counts as pending again.
    async fn reset_event(&self, event_id: &str) -> Result<(), StoreError>;

    /// Insert a booking, or update the status of the booking with the same escrow address.
    async fn upsert_booking(&self, booking: &BookingUpsert) -> Result<(), StoreError>;

    /// Update the status of the booking with the given escrow address.
    ///
    /// Returns the number of bookings changed.
    async fn update_booking_status(
        &self,
        escrow_address: &str,
        status: BookingStatus,
    ) -> Result<u64, StoreError>;

    async fn find_booking(&self, escrow_address: &str)
    -> Result<Option<BookingRecord>, StoreError>;

    async fn insert_log(&self, log: &NewSyncLog) -> Result<(), StoreError>;

    async fn list_events(&self, query: &EventQuery) -> Result<Vec<SyncEventRecord>, StoreError>;

    /// Events that were not processed and carry an error.
    async fn failed_events(&self) -> Result<Vec<SyncEventRecord>, StoreError>;

    /// Number of rows `failed_events` would return.
    async fn count_failed_events(&self) -> Result<u64, StoreError>;

    async fn list_logs(&self, query: &LogQuery) -> Result<Vec<SyncLogRecord>, StoreError>;

    /// Delete event ledger rows created before `cutoff`. Returns the number deleted.
    async fn delete_events_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Delete log rows created before `cutoff`. Returns the number deleted.
    async fn delete_logs_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}
