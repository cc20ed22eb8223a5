//! Booking status vocabulary shared by the contract and the database.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Status of a booking row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
	Pending,
	Confirmed,
	Completed,
	Cancelled,
}

impl BookingStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			BookingStatus::Pending => "pending",
			BookingStatus::Confirmed => "confirmed",
			BookingStatus::Completed => "completed",
			BookingStatus::Cancelled => "cancelled",
		}
	}
}

impl fmt::Display for BookingStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, thiserror::Error)]
#[error("unknown booking status: {0:?}")]
pub struct ParseStatusError(pub String);

impl FromStr for BookingStatus {
	type Err = ParseStatusError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"pending" => Ok(BookingStatus::Pending),
			"confirmed" => Ok(BookingStatus::Confirmed),
			"completed" => Ok(BookingStatus::Completed),
			"cancelled" => Ok(BookingStatus::Cancelled),
			other => Err(ParseStatusError(other.to_string())),
		}
	}
}

/// Map a status string emitted by the contract onto the database vocabulary.
///
/// Contract statuses are capitalized (`"Confirmed"`). Anything unrecognized maps to
/// [`BookingStatus::Pending`].
pub fn map_blockchain_status(status: &str) -> BookingStatus {
	match status {
		"Pending" => BookingStatus::Pending,
		"Confirmed" => BookingStatus::Confirmed,
		"Completed" => BookingStatus::Completed,
		"Cancelled" => BookingStatus::Cancelled,
		_ => BookingStatus::Pending,
	}
}
