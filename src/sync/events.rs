//! Event model for the booking contract.
//!
//! Contract events are normalized into [`SyncEvent`] before they reach the processor. The event
//! type comes from the first topic; the payload fields come from the event value, which the
//! contract emits as a map keyed by field name.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::rpc::ContractEvent;
use crate::store::{NewSyncEvent, SyncEventRecord};

/// Event types emitted by the booking contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    BookingCreated,
    BookingUpdated,
    BookingCancelled,
    PaymentConfirmed,
    PropertyCreated,
    PropertyUpdated,
    EscrowCreated,
    EscrowReleased,
    Unknown,
}

impl EventType {
    /// Map an event topic onto an event type. Unrecognized topics are [`EventType::Unknown`].
    pub fn from_topic(topic: &str) -> Self {
        match topic {
            "booking_created" => EventType::BookingCreated,
            "booking_updated" => EventType::BookingUpdated,
            "booking_cancelled" => EventType::BookingCancelled,
            "payment_confirmed" => EventType::PaymentConfirmed,
            "property_created" => EventType::PropertyCreated,
            "property_updated" => EventType::PropertyUpdated,
            "escrow_created" => EventType::EscrowCreated,
            "escrow_released" => EventType::EscrowReleased,
            _ => EventType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::BookingCreated => "booking_created",
            EventType::BookingUpdated => "booking_updated",
            EventType::BookingCancelled => "booking_cancelled",
            EventType::PaymentConfirmed => "payment_confirmed",
            EventType::PropertyCreated => "property_created",
            EventType::PropertyUpdated => "property_updated",
            EventType::EscrowCreated => "escrow_created",
            EventType::EscrowReleased => "escrow_released",
            EventType::Unknown => "unknown",
        }
    }
}

/// Payload fields the contract attaches to booking and property events.
///
/// Every field is optional. Numeric fields accept JSON numbers as well as numeric strings,
/// since 128-bit contract integers are decoded as strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BlockchainEventData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escrow_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Unix seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<i64>,
    /// Unix seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_price: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deposit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guests: Option<u32>,
}

impl BlockchainEventData {
    /// Read the payload fields out of a decoded event value. Anything that is not an object
    /// yields an empty payload.
    pub fn from_value(value: &Value) -> Self {
        let Some(fields) = value.as_object() else {
            return Self::default();
        };

        Self {
            escrow_id: text_field(fields, "escrow_id"),
            property_id: text_field(fields, "property_id"),
            user_id: text_field(fields, "user_id"),
            start_date: int_field(fields, "start_date"),
            end_date: int_field(fields, "end_date"),
            total_price: int_field(fields, "total_price"),
            deposit: int_field(fields, "deposit"),
            status: text_field(fields, "status"),
            guests: int_field(fields, "guests").and_then(|g| u32::try_from(g).ok()),
        }
    }

    pub fn start_datetime(&self) -> Option<DateTime<Utc>> {
        self.start_date.and_then(|s| DateTime::from_timestamp(s, 0))
    }

    pub fn end_datetime(&self) -> Option<DateTime<Utc>> {
        self.end_date.and_then(|s| DateTime::from_timestamp(s, 0))
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn text_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    match fields.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn int_field(fields: &Map<String, Value>, key: &str) -> Option<i64> {
    match fields.get(key)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().and_then(|u| i64::try_from(u).ok())),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A contract event, normalized for processing.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncEvent {
    /// Globally unique event id assigned by the RPC server.
    pub id: String,
    pub event_type: EventType,
    pub ledger: u32,
    pub timestamp: DateTime<Utc>,
    pub booking_id: Option<String>,
    pub property_id: Option<String>,
    pub user_id: Option<String>,
    pub data: BlockchainEventData,
    pub tx_hash: Option<String>,
    pub contract_id: Option<String>,
}

impl SyncEvent {
    pub fn from_contract_event(event: ContractEvent) -> Self {
        let event_type = event
            .topic
            .first()
            .and_then(Value::as_str)
            .map(EventType::from_topic)
            .unwrap_or(EventType::Unknown);
        let data = BlockchainEventData::from_value(&event.value);

        Self {
            id: event.id,
            event_type,
            ledger: event.ledger,
            timestamp: event.ledger_closed_at,
            booking_id: data.escrow_id.clone(),
            property_id: data.property_id.clone(),
            user_id: data.user_id.clone(),
            data,
            tx_hash: event.tx_hash,
            contract_id: event.contract_id,
        }
    }

    /// Rebuild an event from its event ledger row, e.g. to retry it.
    pub fn from_record(record: &SyncEventRecord) -> Self {
        let data = BlockchainEventData::from_value(&record.event_data);

        Self {
            id: record.event_id.clone(),
            event_type: EventType::from_topic(&record.event_type),
            ledger: record.ledger.unwrap_or_default(),
            timestamp: record.event_timestamp.unwrap_or(record.created_at),
            booking_id: record.booking_id.clone().or_else(|| data.escrow_id.clone()),
            property_id: record.property_id.clone().or_else(|| data.property_id.clone()),
            user_id: record.user_id.clone().or_else(|| data.user_id.clone()),
            data,
            tx_hash: record.tx_hash.clone(),
            contract_id: record.contract_id.clone(),
        }
    }

    /// The event ledger row for this event.
    pub fn to_new_record(&self) -> NewSyncEvent {
        NewSyncEvent {
            event_id: self.id.clone(),
            event_type: self.event_type.as_str().to_string(),
            ledger: Some(self.ledger),
            event_timestamp: Some(self.timestamp),
            booking_id: self.data.escrow_id.clone().or_else(|| self.booking_id.clone()),
            property_id: self.data.property_id.clone().or_else(|| self.property_id.clone()),
            user_id: self.data.user_id.clone().or_else(|| self.user_id.clone()),
            tx_hash: self.tx_hash.clone(),
            contract_id: self.contract_id.clone(),
            event_data: self.data.to_value(),
        }
    }
}
