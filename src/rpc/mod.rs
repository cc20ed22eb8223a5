//! Soroban RPC integration module
//!
//! This module provides the JSON-RPC client used to read ledger heights and contract events
//! from a Soroban RPC endpoint, along with the wire types and the XDR decoding of event payloads.
//! The sync service depends only on the [`LedgerSource`] trait so it can be driven by other
//! sources in tests.

/// JSON-RPC client for a Soroban RPC endpoint
mod client;
/// XDR `ScVal` decoding for event topics and values
pub mod scval;
/// Type definitions for RPC requests, responses and errors
mod types;

pub use client::SorobanRpcClient;
pub use types::*;

/// Source of ledger heights and contract events.
#[async_trait::async_trait]
pub trait LedgerSource: Send + Sync {
	/// Sequence number of the most recent ledger.
	async fn latest_ledger(&self) -> Result<u32, RpcError>;

	/// Contract events emitted in ledgers `start..=end`, in ledger order.
	async fn contract_events(&self, start: u32, end: u32) -> Result<Vec<ContractEvent>, RpcError>;

	/// Passphrase of the network the source is connected to, when it can report one.
	async fn network_passphrase(&self) -> Result<Option<String>, RpcError> {
		Ok(None)
	}

	/// Oldest ledger the source still serves events for, when it can report one.
	async fn oldest_ledger(&self) -> Result<Option<u32>, RpcError> {
		Ok(None)
	}
}
