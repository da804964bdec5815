//! Order lifecycle types.
//!
//! This module defines the persisted order record together with the closed
//! set of lifecycle states and the events that move an order between them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Error returned when a persisted state name cannot be parsed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unknown {kind}: '{value}'")]
pub struct ParseLifecycleError {
	kind: &'static str,
	value: String,
}

/// Lifecycle state of an order.
///
/// `Submitted` is the unique initial state. `Fulfilled` is an end state that
/// can still be cancelled, `Cancelled` has no outgoing transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
	/// Order has been created and awaits payment.
	Submitted,
	/// Payment has been confirmed.
	Paid,
	/// Goods have been delivered.
	Fulfilled,
	/// Order was cancelled.
	Cancelled,
}

impl OrderState {
	/// Initial state assigned to every newly created order.
	pub const INITIAL: OrderState = OrderState::Submitted;

	/// Returns the persisted string form of the state.
	pub fn as_str(&self) -> &'static str {
		match self {
			OrderState::Submitted => "SUBMITTED",
			OrderState::Paid => "PAID",
			OrderState::Fulfilled => "FULFILLED",
			OrderState::Cancelled => "CANCELLED",
		}
	}

	/// Returns an iterator over all states.
	pub fn all() -> impl Iterator<Item = Self> {
		[Self::Submitted, Self::Paid, Self::Fulfilled, Self::Cancelled].into_iter()
	}
}

impl fmt::Display for OrderState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for OrderState {
	type Err = ParseLifecycleError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"SUBMITTED" => Ok(Self::Submitted),
			"PAID" => Ok(Self::Paid),
			"FULFILLED" => Ok(Self::Fulfilled),
			"CANCELLED" => Ok(Self::Cancelled),
			other => Err(ParseLifecycleError {
				kind: "order state",
				value: other.to_string(),
			}),
		}
	}
}

/// Discriminant of an [`OrderEvent`], used as the transition table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderEventKind {
	Pay,
	Fulfill,
	Cancel,
}

impl OrderEventKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			OrderEventKind::Pay => "PAY",
			OrderEventKind::Fulfill => "FULFILL",
			OrderEventKind::Cancel => "CANCEL",
		}
	}

	/// Returns an iterator over all event kinds.
	pub fn all() -> impl Iterator<Item = Self> {
		[Self::Pay, Self::Fulfill, Self::Cancel].into_iter()
	}
}

impl fmt::Display for OrderEventKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// An event sent to an order's state machine.
///
/// Each variant carries the auxiliary data relevant to it. That data is
/// handed to hooks for auditing and never influences the transition itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderEvent {
	/// Payment for the order was confirmed.
	Pay {
		/// Confirmation token issued by the payment provider.
		confirmation: String,
	},
	/// The order was fulfilled.
	Fulfill,
	/// The order was cancelled.
	Cancel,
}

impl OrderEvent {
	/// Returns the discriminant used for transition lookups.
	pub fn kind(&self) -> OrderEventKind {
		match self {
			OrderEvent::Pay { .. } => OrderEventKind::Pay,
			OrderEvent::Fulfill => OrderEventKind::Fulfill,
			OrderEvent::Cancel => OrderEventKind::Cancel,
		}
	}

	/// Payment confirmation carried by a `Pay` event.
	pub fn confirmation(&self) -> Option<&str> {
		match self {
			OrderEvent::Pay { confirmation } => Some(confirmation),
			_ => None,
		}
	}
}

impl fmt::Display for OrderEvent {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.kind().as_str())
	}
}

/// Persisted order record.
///
/// The `state` field is kept in its string form, exactly as it is stored;
/// use [`OrderRecord::order_state`] to obtain the typed value. `version` is an
/// optimistic concurrency counter maintained by the entity store: a record
/// that has never been saved has version 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
	/// Unique identifier for this order.
	pub id: String,
	/// Timestamp when this order was created.
	pub created_at: DateTime<Utc>,
	/// Current lifecycle state, serialized as a string.
	pub state: String,
	/// Number of successful saves of this record.
	#[serde(default)]
	pub version: u64,
}

impl OrderRecord {
	/// Creates an unsaved record in the initial state with a fresh identifier.
	pub fn new(created_at: DateTime<Utc>) -> Self {
		Self {
			id: Uuid::new_v4().to_string(),
			created_at,
			state: OrderState::INITIAL.as_str().to_string(),
			version: 0,
		}
	}

	/// Parses the persisted state string.
	pub fn order_state(&self) -> Result<OrderState, ParseLifecycleError> {
		self.state.parse()
	}

	/// Returns a copy of this record moved to `state`.
	pub fn with_state(&self, state: OrderState) -> Self {
		Self {
			state: state.as_str().to_string(),
			..self.clone()
		}
	}
}

impl fmt::Display for OrderRecord {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"Order(id={}, created_at={}, state={}, version={})",
			self.id,
			self.created_at.to_rfc3339(),
			self.state,
			self.version
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_state_string_form() {
		for state in OrderState::all() {
			assert_eq!(state.as_str().parse::<OrderState>().unwrap(), state);
		}
		assert!("paid".parse::<OrderState>().is_err());
	}

	#[test]
	fn test_state_serializes_upper_case() {
		let json = serde_json::to_string(&OrderState::Fulfilled).unwrap();
		assert_eq!(json, "\"FULFILLED\"");
	}

	#[test]
	fn test_new_record_is_submitted_and_unsaved() {
		let record = OrderRecord::new(Utc::now());
		assert_eq!(record.order_state().unwrap(), OrderState::Submitted);
		assert_eq!(record.version, 0);
		assert!(Uuid::parse_str(&record.id).is_ok());
	}

	#[test]
	fn test_with_state_keeps_identity() {
		let record = OrderRecord::new(Utc::now());
		let paid = record.with_state(OrderState::Paid);
		assert_eq!(paid.id, record.id);
		assert_eq!(paid.created_at, record.created_at);
		assert_eq!(paid.state, "PAID");
	}

	#[test]
	fn test_event_payload() {
		let event = OrderEvent::Pay {
			confirmation: "tok1".to_string(),
		};
		assert_eq!(event.kind(), OrderEventKind::Pay);
		assert_eq!(event.confirmation(), Some("tok1"));
		assert_eq!(OrderEvent::Cancel.confirmation(), None);
	}

	#[test]
	fn test_corrupted_state_is_reported() {
		let mut record = OrderRecord::new(Utc::now());
		record.state = "SHIPPED".to_string();
		let err = record.order_state().unwrap_err();
		assert!(err.to_string().contains("SHIPPED"));
	}
}
