//! SQLite implementation of [`SyncStore`].
//!
//! Connections come from an r2d2 pool. Every trait call runs its SQL on the blocking thread
//! pool so the async worker never blocks on disk I/O.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use tracing::debug;

use super::schema::initialize_schema;
use super::*;
use crate::sync::BookingStatus;

/// Pooled database connection.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

const EVENT_COLUMNS: &str = "id, event_id, event_type, ledger, event_timestamp, booking_id, \
	property_id, user_id, tx_hash, contract_id, event_data, processed, error, created_at, \
	processed_at";

const BOOKING_COLUMNS: &str = "id, escrow_address, property_id, user_id, start_date, end_date, \
	guests, total_price, deposit, status, created_at, updated_at";

/// SQLite-backed sync store.
#[derive(Clone)]
pub struct SqliteSyncStore {
	pool: Pool<SqliteConnectionManager>,
}

impl SqliteSyncStore {
	/// Open (or create) the database file at `path` and bring its schema up to date.
	pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
		let path = path.as_ref();

		if let Some(parent) = path.parent() {
			if !parent.as_os_str().is_empty() {
				std::fs::create_dir_all(parent)?;
			}
		}

		let manager = SqliteConnectionManager::file(path).with_init(|conn| {
			conn.execute_batch(
				r#"
				PRAGMA journal_mode = WAL;
				PRAGMA synchronous = NORMAL;
				PRAGMA busy_timeout = 5000;
				PRAGMA foreign_keys = ON;
			"#,
			)
		});
		let pool = Pool::builder().max_size(4).build(manager)?;

		let store = Self { pool };
		store.initialize()?;
		debug!(path = %path.display(), "Opened sync store");
		Ok(store)
	}

	/// Open a private in-memory database.
	///
	/// The pool holds a single connection since every in-memory connection is its own database.
	pub fn open_in_memory() -> Result<Self, StoreError> {
		let manager = SqliteConnectionManager::memory();
		let pool = Pool::builder().max_size(1).build(manager)?;

		let store = Self { pool };
		store.initialize()?;
		Ok(store)
	}

	fn initialize(&self) -> Result<(), StoreError> {
		let conn = self.connection()?;
		initialize_schema(&conn)
	}

	/// Get a connection from the pool.
	pub fn connection(&self) -> Result<PooledConnection, StoreError> {
		self.pool.get().map_err(StoreError::from)
	}

	/// Number of rows in the booking projection.
	pub async fn count_bookings(&self) -> Result<u64, StoreError> {
		self.with_connection(|conn| {
			let count: i64 = conn.query_row("SELECT COUNT(*) FROM bookings", [], |row| row.get(0))?;
			Ok(count as u64)
		})
		.await
	}

	/// Run `f` with a pooled connection on the blocking thread pool.
	async fn with_connection<T, F>(&self, f: F) -> Result<T, StoreError>
	where
		T: Send + 'static,
		F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
	{
		let pool = self.pool.clone();
		tokio::task::spawn_blocking(move || {
			let conn = pool.get()?;
			f(&conn)
		})
		.await
		.map_err(|e| StoreError::Task(e.to_string()))?
	}

	/// Run `f` inside a transaction on the blocking thread pool. The transaction is committed
	/// only when `f` succeeds.
	async fn transaction<T, F>(&self, f: F) -> Result<T, StoreError>
	where
		T: Send + 'static,
		F: FnOnce(&rusqlite::Transaction) -> Result<T, StoreError> + Send + 'static,
	{
		let pool = self.pool.clone();
		tokio::task::spawn_blocking(move || {
			let mut conn = pool.get()?;
			let tx = conn.transaction()?;
			let result = f(&tx)?;
			tx.commit()?;
			Ok(result)
		})
		.await
		.map_err(|e| StoreError::Task(e.to_string()))?
	}
}

#[async_trait::async_trait]
impl SyncStore for SqliteSyncStore {
	async fn load_sync_state(&self) -> Result<Option<SyncStateRecord>, StoreError> {
		self.with_connection(|conn| {
			let state = conn
				.query_row(
					"SELECT last_processed_block, total_events_processed, failed_events, \
					 last_sync_time FROM sync_state WHERE id = 1",
					[],
					|row| {
						Ok(SyncStateRecord {
							last_processed_block: row.get(0)?,
							total_events_processed: row.get::<_, i64>(1)? as u64,
							failed_events: row.get::<_, i64>(2)? as u64,
							last_sync_time: opt_timestamp(row, 3)?,
						})
					},
				)
				.optional()?;
			Ok(state)
		})
		.await
	}

	async fn save_sync_state(&self, state: &SyncStateRecord) -> Result<(), StoreError> {
		let state = state.clone();
		self.with_connection(move |conn| {
			conn.execute(
				"INSERT INTO sync_state \
				 (id, last_processed_block, total_events_processed, failed_events, last_sync_time, updated_at) \
				 VALUES (1, ?1, ?2, ?3, ?4, ?5) \
				 ON CONFLICT(id) DO UPDATE SET \
				 last_processed_block = excluded.last_processed_block, \
				 total_events_processed = excluded.total_events_processed, \
				 failed_events = excluded.failed_events, \
				 last_sync_time = excluded.last_sync_time, \
				 updated_at = excluded.updated_at",
				params![
					state.last_processed_block,
					state.total_events_processed as i64,
					state.failed_events as i64,
					state.last_sync_time.map(encode_timestamp),
					encode_timestamp(Utc::now()),
				],
			)?;
			Ok(())
		})
		.await
	}

	async fn record_event(&self, event: &NewSyncEvent) -> Result<RecordOutcome, StoreError> {
		let event = event.clone();
		let event_data = serde_json::to_string(&event.event_data)?;
		self.transaction(move |tx| {
			let inserted = tx.execute(
				"INSERT INTO sync_events \
				 (event_id, event_type, ledger, event_timestamp, booking_id, property_id, user_id, \
				  tx_hash, contract_id, event_data, processed, created_at) \
				 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11) \
				 ON CONFLICT(event_id) DO NOTHING",
				params![
					event.event_id,
					event.event_type,
					event.ledger,
					event.event_timestamp.map(encode_timestamp),
					event.booking_id,
					event.property_id,
					event.user_id,
					event.tx_hash,
					event.contract_id,
					event_data,
					encode_timestamp(Utc::now()),
				],
			)?;

			if inserted == 1 {
				return Ok(RecordOutcome::Inserted);
			}

			let processed: bool = tx.query_row(
				"SELECT processed FROM sync_events WHERE event_id = ?1",
				params![event.event_id],
				|row| row.get(0),
			)?;
			Ok(if processed {
				RecordOutcome::AlreadyProcessed
			} else {
				RecordOutcome::Pending
			})
		})
		.await
	}

	async fn mark_event_processed(&self, event_id: &str) -> Result<(), StoreError> {
		let event_id = event_id.to_string();
		self.with_connection(move |conn| {
			conn.execute(
				"UPDATE sync_events SET processed = 1, error = NULL, processed_at = ?1 \
				 WHERE event_id = ?2",
				params![encode_timestamp(Utc::now()), event_id],
			)?;
			Ok(())
		})
		.await
	}

	async fn mark_event_failed(&self, event_id: &str, error: &str) -> Result<(), StoreError> {
		let event_id = event_id.to_string();
		let error = error.to_string();
		self.with_connection(move |conn| {
			conn.execute(
				"UPDATE sync_events SET processed = 0, error = ?1, processed_at = ?2 \
				 WHERE event_id = ?3",
				params![error, encode_timestamp(Utc::now()), event_id],
			)?;
			Ok(())
		})
		.await
	}

	async fn reset_event(&self, event_id: &str) -> Result<(), StoreError> {
		let event_id = event_id.to_string();
		self.with_connection(move |conn| {
			conn.execute(
				"UPDATE sync_events SET error = NULL, processed_at = NULL WHERE event_id = ?1",
				params![event_id],
			)?;
			Ok(())
		})
		.await
	}

	async fn upsert_booking(&self, booking: &BookingUpsert) -> Result<(), StoreError> {
		let booking = booking.clone();
		self.with_connection(move |conn| {
			let now = encode_timestamp(Utc::now());
			conn.execute(
				"INSERT INTO bookings \
				 (escrow_address, property_id, user_id, start_date, end_date, guests, total_price, \
				  deposit, status, created_at, updated_at) \
				 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10) \
				 ON CONFLICT(escrow_address) DO UPDATE SET \
				 status = excluded.status, updated_at = excluded.updated_at",
				params![
					booking.escrow_address,
					booking.property_id,
					booking.user_id,
					booking.start_date.map(encode_timestamp),
					booking.end_date.map(encode_timestamp),
					booking.guests,
					booking.total_price,
					booking.deposit,
					booking.status.as_str(),
					now,
				],
			)?;
			Ok(())
		})
		.await
	}

	async fn update_booking_status(
		&self,
		escrow_address: &str,
		status: BookingStatus,
	) -> Result<u64, StoreError> {
		let escrow_address = escrow_address.to_string();
		self.with_connection(move |conn| {
			let changed = conn.execute(
				"UPDATE bookings SET status = ?1, updated_at = ?2 WHERE escrow_address = ?3",
				params![status.as_str(), encode_timestamp(Utc::now()), escrow_address],
			)?;
			Ok(changed as u64)
		})
		.await
	}

	async fn find_booking(
		&self,
		escrow_address: &str,
	) -> Result<Option<BookingRecord>, StoreError> {
		let escrow_address = escrow_address.to_string();
		self.with_connection(move |conn| {
			let booking = conn
				.query_row(
					&format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE escrow_address = ?1"),
					params![escrow_address],
					booking_from_row,
				)
				.optional()?;
			Ok(booking)
		})
		.await
	}

	async fn insert_log(&self, log: &NewSyncLog) -> Result<(), StoreError> {
		let log = log.clone();
		let details = log.details.as_ref().map(serde_json::to_string).transpose()?;
		self.with_connection(move |conn| {
			conn.execute(
				"INSERT INTO sync_logs (operation, status, message, details, created_at) \
				 VALUES (?1, ?2, ?3, ?4, ?5)",
				params![
					log.operation,
					log.status.as_str(),
					log.message,
					details,
					encode_timestamp(Utc::now()),
				],
			)?;
			Ok(())
		})
		.await
	}

	async fn list_events(&self, query: &EventQuery) -> Result<Vec<SyncEventRecord>, StoreError> {
		let query = query.clone();
		self.with_connection(move |conn| {
			let mut clauses = Vec::new();
			let mut values = Vec::new();
			if let Some(event_type) = query.event_type {
				clauses.push("event_type = ?");
				values.push(Value::Text(event_type));
			}
			if let Some(processed) = query.processed {
				clauses.push("processed = ?");
				values.push(Value::Integer(processed as i64));
			}
			values.push(Value::Integer(query.limit as i64));
			values.push(Value::Integer(query.offset as i64));

			let sql = format!(
				"SELECT {EVENT_COLUMNS} FROM sync_events {} ORDER BY id DESC LIMIT ? OFFSET ?",
				where_clause(&clauses)
			);
			let mut stmt = conn.prepare(&sql)?;
			let rows = stmt.query_map(params_from_iter(values), event_from_row)?;
			Ok(rows.collect::<Result<Vec<_>, _>>()?)
		})
		.await
	}

	async fn failed_events(&self) -> Result<Vec<SyncEventRecord>, StoreError> {
		self.with_connection(|conn| {
			let mut stmt = conn.prepare(&format!(
				"SELECT {EVENT_COLUMNS} FROM sync_events \
				 WHERE processed = 0 AND error IS NOT NULL ORDER BY id ASC"
			))?;
			let rows = stmt.query_map([], event_from_row)?;
			Ok(rows.collect::<Result<Vec<_>, _>>()?)
		})
		.await
	}

	async fn count_failed_events(&self) -> Result<u64, StoreError> {
		self.with_connection(|conn| {
			let count: i64 = conn.query_row(
				"SELECT COUNT(*) FROM sync_events WHERE processed = 0 AND error IS NOT NULL",
				[],
				|row| row.get(0),
			)?;
			Ok(count as u64)
		})
		.await
	}

	async fn list_logs(&self, query: &LogQuery) -> Result<Vec<SyncLogRecord>, StoreError> {
		let query = query.clone();
		self.with_connection(move |conn| {
			let mut clauses = Vec::new();
			let mut values = Vec::new();
			if let Some(status) = query.status {
				clauses.push("status = ?");
				values.push(Value::Text(status.as_str().to_string()));
			}
			if let Some(operation) = query.operation {
				clauses.push("operation = ?");
				values.push(Value::Text(operation));
			}
			values.push(Value::Integer(query.limit as i64));
			values.push(Value::Integer(query.offset as i64));

			let sql = format!(
				"SELECT id, operation, status, message, details, created_at FROM sync_logs {} \
				 ORDER BY id DESC LIMIT ? OFFSET ?",
				where_clause(&clauses)
			);
			let mut stmt = conn.prepare(&sql)?;
			let rows = stmt.query_map(params_from_iter(values), log_from_row)?;
			Ok(rows.collect::<Result<Vec<_>, _>>()?)
		})
		.await
	}

	async fn delete_events_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
		self.with_connection(move |conn| {
			let deleted = conn.execute(
				"DELETE FROM sync_events WHERE created_at < ?1",
				params![encode_timestamp(cutoff)],
			)?;
			Ok(deleted as u64)
		})
		.await
	}

	async fn delete_logs_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
		self.with_connection(move |conn| {
			let deleted = conn.execute(
				"DELETE FROM sync_logs WHERE created_at < ?1",
				params![encode_timestamp(cutoff)],
			)?;
			Ok(deleted as u64)
		})
		.await
	}
}

fn where_clause(clauses: &[&str]) -> String {
	if clauses.is_empty() {
		String::new()
	} else {
		format!("WHERE {}", clauses.join(" AND "))
	}
}

/// Timestamps are stored as fixed-width RFC 3339 text so that string order matches time order.
fn encode_timestamp(ts: DateTime<Utc>) -> String {
	ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
	let raw: String = row.get(idx)?;
	DateTime::parse_from_rfc3339(&raw)
		.map(|ts| ts.with_timezone(&Utc))
		.map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
	match row.get::<_, Option<String>>(idx)? {
		None => Ok(None),
		Some(_) => timestamp(row, idx).map(Some),
	}
}

fn json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<serde_json::Value>> {
	let raw: Option<String> = row.get(idx)?;
	raw.map(|raw| {
		serde_json::from_str(&raw)
			.map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
	})
	.transpose()
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<SyncEventRecord> {
	Ok(SyncEventRecord {
		id: row.get(0)?,
		event_id: row.get(1)?,
		event_type: row.get(2)?,
		ledger: row.get(3)?,
		event_timestamp: opt_timestamp(row, 4)?,
		booking_id: row.get(5)?,
		property_id: row.get(6)?,
		user_id: row.get(7)?,
		tx_hash: row.get(8)?,
		contract_id: row.get(9)?,
		event_data: json_column(row, 10)?.unwrap_or(serde_json::Value::Null),
		processed: row.get(11)?,
		error: row.get(12)?,
		created_at: timestamp(row, 13)?,
		processed_at: opt_timestamp(row, 14)?,
	})
}

fn booking_from_row(row: &Row<'_>) -> rusqlite::Result<BookingRecord> {
	let status: String = row.get(9)?;
	let status = status
		.parse::<BookingStatus>()
		.map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(e)))?;

	Ok(BookingRecord {
		id: row.get(0)?,
		escrow_address: row.get(1)?,
		property_id: row.get(2)?,
		user_id: row.get(3)?,
		start_date: opt_timestamp(row, 4)?,
		end_date: opt_timestamp(row, 5)?,
		guests: row.get(6)?,
		total_price: row.get(7)?,
		deposit: row.get(8)?,
		status,
		created_at: timestamp(row, 10)?,
		updated_at: timestamp(row, 11)?,
	})
}

fn log_from_row(row: &Row<'_>) -> rusqlite::Result<SyncLogRecord> {
	let status: String = row.get(2)?;
	let status = LogStatus::parse(&status).ok_or_else(|| {
		rusqlite::Error::FromSqlConversionFailure(
			2,
			Type::Text,
			format!("unknown log status {status:?}").into(),
		)
	})?;

	Ok(SyncLogRecord {
		id: row.get(0)?,
		operation: row.get(1)?,
		status,
		message: row.get(3)?,
		details: json_column(row, 4)?,
		created_at: timestamp(row, 5)?,
	})
}
