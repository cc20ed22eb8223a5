//!
//! JSON-RPC client for a Soroban RPC endpoint.
//!
//! This module provides an async client for the subset of the Soroban RPC API the sync service
//! needs: the latest ledger sequence, the network passphrase, and paginated contract events.
//! Event topics and values are decoded from XDR before they are handed to callers.

use super::scval::decode_scval;
use super::types::*;
use super::LedgerSource;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Soroban JSON-RPC client scoped to one contract
pub struct SorobanRpcClient {
	/// The underlying HTTP client for JSON-RPC calls.
	http_client: Client,
	/// The JSON-RPC endpoint URL.
	rpc_url: String,
	/// The contract whose events are queried.
	contract_id: String,
	/// Maximum number of events requested per page.
	page_limit: u32,
	next_request_id: AtomicU64,
}

impl SorobanRpcClient {
	/// Create a new RPC client.
	///
	/// # Arguments
	/// * `rpc_url` - The JSON-RPC endpoint.
	/// * `contract_id` - The contract whose events are queried.
	/// * `timeout` - Per-request timeout.
	///
	/// # Returns
	/// A new `SorobanRpcClient`, or an `RpcError` if the HTTP client cannot be built.
	pub fn new(
		rpc_url: String,
		contract_id: String,
		timeout: Duration,
	) -> Result<Self, RpcError> {
		let http_client = Client::builder().timeout(timeout).build()?;

		Ok(Self {
			http_client,
			rpc_url,
			contract_id,
			page_limit: crate::config::DEFAULT_EVENT_PAGE_LIMIT,
			next_request_id: AtomicU64::new(1),
		})
	}

	/// Set the number of events requested per `getEvents` page.
	pub fn with_page_limit(mut self, page_limit: u32) -> Self {
		self.page_limit = page_limit.max(1);
		self
	}

	/// Fetch the latest ledger via `getLatestLedger`.
	pub async fn get_latest_ledger(&self) -> Result<LatestLedgerResponse, RpcError> {
		self.call::<(), _>("getLatestLedger", None).await
	}

	/// Fetch the retained ledger range via `getHealth`.
	pub async fn get_health(&self) -> Result<HealthResponse, RpcError> {
		self.call::<(), _>("getHealth", None).await
	}

	/// Fetch network details via `getNetwork`.
	pub async fn get_network(&self) -> Result<NetworkResponse, RpcError> {
		self.call::<(), _>("getNetwork", None).await
	}

	/// Fetch one page of contract events via `getEvents`.
	///
	/// # Arguments
	/// * `start_ledger` - First ledger of the window; ignored when `cursor` is set.
	/// * `end_ledger` - Last ledger of the window (inclusive).
	/// * `cursor` - Paging cursor returned by a previous page.
	pub async fn get_events(
		&self,
		start_ledger: u32,
		end_ledger: u32,
		cursor: Option<String>,
	) -> Result<GetEventsResponse, RpcError> {
		let params = GetEventsParams {
			start_ledger: if cursor.is_some() {
				None
			} else {
				Some(start_ledger)
			},
			end_ledger: Some(end_ledger.saturating_add(1)),
			filters: vec![EventFilterParams {
				kind: "contract",
				contract_ids: vec![self.contract_id.clone()],
			}],
			pagination: PaginationParams {
				limit: self.page_limit,
				cursor,
			},
		};

		self.call("getEvents", Some(params)).await
	}

	/// Execute a JSON-RPC call.
	///
	/// # Arguments
	/// * `method` - The JSON-RPC method name.
	/// * `params` - Optional parameters for the call.
	///
	/// # Returns
	/// The decoded `result` member, or an `RpcError` if the request or the call fails.
	pub async fn call<P, R>(&self, method: &str, params: Option<P>) -> Result<R, RpcError>
	where
		P: Serialize,
		R: DeserializeOwned,
	{
		let request = RpcRequest {
			jsonrpc: "2.0",
			id: self.next_request_id.fetch_add(1, Ordering::Relaxed),
			method,
			params,
		};

		debug!("Calling Soroban RPC method {}", method);

		let response = self
			.http_client
			.post(&self.rpc_url)
			.header("Content-Type", "application/json")
			.json(&request)
			.send()
			.await?;

		if !response.status().is_success() {
			return Err(RpcError::StatusError(response.status().as_u16()));
		}

		let body: RpcResponse<R> = response.json().await?;

		if let Some(error) = body.error {
			return Err(RpcError::JsonRpcError {
				code: error.code,
				message: error.message,
			});
		}

		body.result.ok_or(RpcError::NoData)
	}
}

#[async_trait::async_trait]
impl LedgerSource for SorobanRpcClient {
	async fn latest_ledger(&self) -> Result<u32, RpcError> {
		Ok(self.get_latest_ledger().await?.sequence)
	}

	async fn contract_events(&self, start: u32, end: u32) -> Result<Vec<ContractEvent>, RpcError> {
		let events = collect_events(start, end, self.page_limit, |cursor| {
			self.get_events(start, end, cursor)
		})
		.await?;

		debug!(
			"Fetched {} contract events for ledgers {}-{}",
			events.len(),
			start,
			end
		);
		Ok(events)
	}

	async fn network_passphrase(&self) -> Result<Option<String>, RpcError> {
		Ok(Some(self.get_network().await?.passphrase))
	}

	async fn oldest_ledger(&self) -> Result<Option<u32>, RpcError> {
		Ok(self.get_health().await?.oldest_ledger)
	}
}

/// Follow `getEvents` cursors until a short page or an empty cursor, keeping events in
/// `start..=end`.
///
/// `fetch_page` is called with `None` for the first page and with the previous page's cursor
/// afterwards.
pub(crate) async fn collect_events<F, Fut>(
	start: u32,
	end: u32,
	page_limit: u32,
	mut fetch_page: F,
) -> Result<Vec<ContractEvent>, RpcError>
where
	F: FnMut(Option<String>) -> Fut,
	Fut: Future<Output = Result<GetEventsResponse, RpcError>>,
{
	let mut events = Vec::new();
	let mut cursor = None;

	loop {
		let page = fetch_page(cursor.take()).await?;
		let page_len = page.events.len();

		for raw in page.events {
			if raw.ledger < start || raw.ledger > end {
				continue;
			}
			events.push(decode_event(raw)?);
		}

		match page.cursor {
			Some(next) if page_len as u32 >= page_limit && !next.is_empty() => {
				cursor = Some(next);
			}
			_ => break,
		}
	}

	Ok(events)
}

/// Decode the XDR topics and value of a wire event.
pub(crate) fn decode_event(raw: RawEvent) -> Result<ContractEvent, RpcError> {
	let ledger_closed_at = DateTime::parse_from_rfc3339(&raw.ledger_closed_at)
		.map(|ts| ts.with_timezone(&Utc))
		.map_err(|e| {
			RpcError::InvalidEvent(format!(
				"event {} has invalid ledgerClosedAt {:?}: {}",
				raw.id, raw.ledger_closed_at, e
			))
		})?;

	let topic = raw
		.topic
		.iter()
		.map(|t| decode_scval(t))
		.collect::<Result<Vec<_>, _>>()?;

	let value = decode_scval(&raw.value).unwrap_or_else(|e| {
		warn!("Event {} carries an undecodable value: {}", raw.id, e);
		serde_json::Value::Null
	});

	Ok(ContractEvent {
		id: raw.id,
		ledger: raw.ledger,
		ledger_closed_at,
		contract_id: raw.contract_id,
		tx_hash: raw.tx_hash,
		topic,
		value,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use base64::{Engine, engine::general_purpose::STANDARD};
	use serde_json::json;
	use stellar_xdr::curr::{Limits, ScSymbol, ScVal, StringM, WriteXdr};

	fn encoded_symbol(s: &str) -> String {
		let val = ScVal::Symbol(ScSymbol(StringM::try_from(s).unwrap()));
		STANDARD.encode(val.to_xdr(Limits::none()).unwrap())
	}

	fn raw_event(id: &str, ledger: u32) -> RawEvent {
		RawEvent {
			kind: "contract".to_string(),
			ledger,
			ledger_closed_at: "2025-03-01T12:00:00Z".to_string(),
			contract_id: Some("CABC".to_string()),
			id: id.to_string(),
			paging_token: Some(id.to_string()),
			topic: vec![encoded_symbol("booking_created")],
			value: encoded_symbol("v"),
			tx_hash: None,
		}
	}

	fn page(events: Vec<RawEvent>, cursor: &str) -> GetEventsResponse {
		GetEventsResponse {
			events,
			latest_ledger: Some(200),
			cursor: Some(cursor.to_string()),
		}
	}

	/// Serves `pages` in order and records the cursor of every request.
	async fn collect_pages(
		start: u32,
		end: u32,
		page_limit: u32,
		pages: Vec<GetEventsResponse>,
	) -> (Vec<ContractEvent>, Vec<Option<String>>) {
		let pages = std::sync::Mutex::new(std::collections::VecDeque::from(pages));
		let cursors = std::sync::Mutex::new(Vec::new());

		let events = collect_events(start, end, page_limit, |cursor| {
			cursors.lock().unwrap().push(cursor);
			let next = pages.lock().unwrap().pop_front();
			async move { next.ok_or(RpcError::NoData) }
		})
		.await
		.unwrap();

		(events, cursors.into_inner().unwrap())
	}

	#[tokio::test]
	async fn test_paging_follows_cursor_until_short_page() {
		let (events, cursors) = collect_pages(
			100,
			200,
			2,
			vec![
				page(vec![raw_event("a", 100), raw_event("b", 110)], "c1"),
				page(vec![raw_event("c", 120), raw_event("d", 130)], "c2"),
				page(vec![raw_event("e", 140)], "c3"),
			],
		)
		.await;

		let ids: Vec<_> = events.iter().map(|e| e.id.as_str()).collect();
		assert_eq!(ids, ["a", "b", "c", "d", "e"]);
		assert_eq!(
			cursors,
			[None, Some("c1".to_string()), Some("c2".to_string())]
		);
	}

	#[tokio::test]
	async fn test_paging_stops_on_empty_cursor() {
		let (events, cursors) = collect_pages(
			100,
			200,
			2,
			vec![
				page(vec![raw_event("a", 100), raw_event("b", 110)], ""),
				page(vec![raw_event("never", 120)], "c2"),
			],
		)
		.await;

		assert_eq!(events.len(), 2);
		assert_eq!(cursors, [None]);
	}

	#[tokio::test]
	async fn test_paging_drops_events_outside_range() {
		let (events, cursors) = collect_pages(
			100,
			200,
			3,
			vec![
				page(vec![raw_event("early", 99), raw_event("a", 100), raw_event("b", 200)], "c1"),
				page(vec![raw_event("late", 201)], "c2"),
			],
		)
		.await;

		let ids: Vec<_> = events.iter().map(|e| e.id.as_str()).collect();
		assert_eq!(ids, ["a", "b"]);
		assert_eq!(cursors.len(), 2);
	}

	#[tokio::test]
	async fn test_paging_propagates_page_errors() {
		let err = collect_events(1, 10, 5, |_| async {
			Err::<GetEventsResponse, _>(RpcError::StatusError(503))
		})
		.await
		.unwrap_err();
		assert!(matches!(err, RpcError::StatusError(503)));
	}

	#[test]
	fn test_decode_events_response() {
		let body = json!({
			"events": [{
				"type": "contract",
				"ledger": 1001,
				"ledgerClosedAt": "2025-03-01T12:00:00Z",
				"contractId": "CB3ILSDNHL6TWZYZJAS4L27GLHNAGW4ISW6YXIBHGHL4QYI4JPLP6W3E",
				"id": "0004299262910464-0000000001",
				"pagingToken": "0004299262910464-0000000001",
				"topic": [encoded_symbol("booking_created")],
				"value": encoded_symbol("ignored"),
				"inSuccessfulContractCall": true,
				"txHash": "abcd"
			}],
			"latestLedger": 1010,
			"cursor": "0004299262910464-0000000001"
		});

		let response: GetEventsResponse = serde_json::from_value(body).unwrap();
		assert_eq!(response.latest_ledger, Some(1010));

		let event = decode_event(response.events.into_iter().next().unwrap()).unwrap();
		assert_eq!(event.ledger, 1001);
		assert_eq!(event.topic, vec![json!("booking_created")]);
		assert_eq!(event.value, json!("ignored"));
		assert_eq!(event.tx_hash.as_deref(), Some("abcd"));
		assert_eq!(event.ledger_closed_at.to_rfc3339(), "2025-03-01T12:00:00+00:00");
	}

	#[test]
	fn test_decode_event_rejects_bad_timestamp() {
		let raw = RawEvent {
			kind: "contract".to_string(),
			ledger: 5,
			ledger_closed_at: "yesterday".to_string(),
			contract_id: None,
			id: "evt".to_string(),
			paging_token: None,
			topic: vec![],
			value: encoded_symbol("x"),
			tx_hash: None,
		};
		assert!(matches!(decode_event(raw), Err(RpcError::InvalidEvent(_))));
	}

	#[test]
	fn test_rpc_error_envelope() {
		let body: RpcResponse<LatestLedgerResponse> = serde_json::from_value(json!({
			"jsonrpc": "2.0",
			"id": 1,
			"error": {"code": -32602, "message": "invalid params"}
		}))
		.unwrap();
		assert!(body.result.is_none());
		assert_eq!(body.error.unwrap().code, -32602);
	}

	#[test]
	fn test_client_builds() {
		let client = SorobanRpcClient::new(
			"https://soroban-testnet.stellar.org".to_string(),
			"CABC".to_string(),
			Duration::from_secs(5),
		)
		.unwrap()
		.with_page_limit(0);
		assert_eq!(client.page_limit, 1);
	}
}
