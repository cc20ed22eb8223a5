//! Keeps a rental platform's booking database in step with its Soroban booking contract.
//!
//! The crate polls a Soroban JSON-RPC endpoint for contract events, records each event in an
//! event ledger, projects booking events onto a `bookings` table and commits a ledger watermark
//! after every successful poll cycle.
//!
//! ```ignore
//! use stellar_rent_sync::{SyncConfig, SyncService};
//!
//! let config = SyncConfig::from_env()?;
//! let service = SyncService::from_config(&config)?;
//! service.start().await?;
//! ```

pub mod config;
pub mod rpc;
pub mod store;
pub mod sync;

pub use config::{ConfigError, SyncConfig};
pub use sync::{SyncError, SyncService, SyncStatus};
