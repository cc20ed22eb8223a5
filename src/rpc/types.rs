//! Types for the Soroban JSON-RPC integration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// JSON-RPC 2.0 request envelope
#[derive(Debug, Serialize)]
pub struct RpcRequest<'a, P: Serialize> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<P>,
}

/// JSON-RPC 2.0 response envelope. Exactly one of `result` and `error` is set by a
/// well-behaved server.
#[derive(Debug, Deserialize)]
pub struct RpcResponse<R> {
    pub result: Option<R>,
    pub error: Option<RpcErrorObject>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

/// Result of `getLatestLedger`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestLedgerResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub protocol_version: Option<u32>,
    pub sequence: u32,
}

/// Result of `getNetwork`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkResponse {
    pub passphrase: String,
    #[serde(default)]
    pub protocol_version: Option<u32>,
}

/// Result of `getHealth`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub latest_ledger: Option<u32>,
    /// First ledger the endpoint still serves events for.
    #[serde(default)]
    pub oldest_ledger: Option<u32>,
    #[serde(default)]
    pub ledger_retention_window: Option<u32>,
}

/// Parameters of `getEvents`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetEventsParams {
    /// Omitted when paging with a cursor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_ledger: Option<u32>,
    /// Exclusive upper bound of the search window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_ledger: Option<u32>,
    pub filters: Vec<EventFilterParams>,
    pub pagination: PaginationParams,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFilterParams {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub contract_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaginationParams {
    pub limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Result of `getEvents`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetEventsResponse {
    #[serde(default)]
    pub events: Vec<RawEvent>,
    #[serde(default)]
    pub latest_ledger: Option<u32>,
    #[serde(default)]
    pub cursor: Option<String>,
}

/// A contract event as returned on the wire, with XDR-encoded topics and value.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub ledger: u32,
    pub ledger_closed_at: String,
    #[serde(default)]
    pub contract_id: Option<String>,
    pub id: String,
    #[serde(default)]
    pub paging_token: Option<String>,
    #[serde(default)]
    pub topic: Vec<String>,
    pub value: String,
    #[serde(default)]
    pub tx_hash: Option<String>,
}

/// A contract event with its topics and value decoded into JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractEvent {
    pub id: String,
    pub ledger: u32,
    pub ledger_closed_at: DateTime<Utc>,
    pub contract_id: Option<String>,
    pub tx_hash: Option<String>,
    pub topic: Vec<serde_json::Value>,
    pub value: serde_json::Value,
}

/// Error types for Soroban RPC operations
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("HTTP status {0}")]
    StatusError(u16),

    #[error("JSON-RPC error {code}: {message}")]
    JsonRpcError { code: i64, message: String },

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("XDR decode error: {0}")]
    XdrError(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("No data returned")]
    NoData,
}

impl RpcError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RpcError::HttpError(e) => !e.is_builder() && !e.is_decode(),
            RpcError::StatusError(status) => *status == 429 || *status >= 500,
            // -32603 is the JSON-RPC "internal error" code
            RpcError::JsonRpcError { code, .. } => *code == -32603,
            RpcError::NoData => true,
            RpcError::JsonError(_) | RpcError::XdrError(_) | RpcError::InvalidEvent(_) => false,
        }
    }
}
