//! Database schema for the sync store.
//!
//! The schema version is tracked with `PRAGMA user_version`. A fresh database is created at
//! [`CURRENT_VERSION`]; a database written by a newer release is refused.

use rusqlite::Connection;
use tracing::info;

use super::StoreError;

/// Schema version written by this release.
pub const CURRENT_VERSION: i32 = 1;

/// Single-row watermark and counters.
pub const CREATE_SYNC_STATE: &str = r#"
CREATE TABLE IF NOT EXISTS sync_state (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    last_processed_block INTEGER NOT NULL DEFAULT 0,
    total_events_processed INTEGER NOT NULL DEFAULT 0,
    failed_events INTEGER NOT NULL DEFAULT 0,
    last_sync_time TEXT,
    updated_at TEXT NOT NULL
);
"#;

/// Event ledger: one row per contract event ever received.
pub const CREATE_SYNC_EVENTS: &str = r#"
CREATE TABLE IF NOT EXISTS sync_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id TEXT NOT NULL UNIQUE,
    event_type TEXT NOT NULL,
    ledger INTEGER,
    event_timestamp TEXT,
    booking_id TEXT,
    property_id TEXT,
    user_id TEXT,
    tx_hash TEXT,
    contract_id TEXT,
    event_data TEXT NOT NULL,
    processed INTEGER NOT NULL DEFAULT 0,
    error TEXT,
    created_at TEXT NOT NULL,
    processed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_sync_events_created_at ON sync_events (created_at);
CREATE INDEX IF NOT EXISTS idx_sync_events_processed ON sync_events (processed);
"#;

/// Booking projection keyed by escrow address.
pub const CREATE_BOOKINGS: &str = r#"
CREATE TABLE IF NOT EXISTS bookings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    escrow_address TEXT NOT NULL UNIQUE,
    property_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    start_date TEXT,
    end_date TEXT,
    guests INTEGER NOT NULL DEFAULT 1,
    total_price INTEGER NOT NULL DEFAULT 0,
    deposit INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// Operational log of sync operations.
pub const CREATE_SYNC_LOGS: &str = r#"
CREATE TABLE IF NOT EXISTS sync_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    operation TEXT NOT NULL,
    status TEXT NOT NULL,
    message TEXT NOT NULL,
    details TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sync_logs_created_at ON sync_logs (created_at);
"#;

/// Create the schema on a fresh database or check the version of an existing one.
pub fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if version > CURRENT_VERSION {
        return Err(StoreError::Integrity(format!(
            "database schema version {} is newer than supported version {}",
            version, CURRENT_VERSION
        )));
    }

    if version < CURRENT_VERSION {
        info!(from = version, to = CURRENT_VERSION, "Initializing sync schema");
        conn.execute_batch(CREATE_SYNC_STATE)?;
        conn.execute_batch(CREATE_SYNC_EVENTS)?;
        conn.execute_batch(CREATE_BOOKINGS)?;
        conn.execute_batch(CREATE_SYNC_LOGS)?;
        conn.pragma_update(None, "user_version", CURRENT_VERSION)?;
    }

    Ok(())
}
