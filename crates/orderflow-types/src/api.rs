//! API types for the order HTTP API.
//!
//! Request and response bodies for the order endpoints, plus the structured
//! error type the handlers return.

use crate::{OrderEventKind, OrderRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Request body for creating an order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateOrderRequest {
	/// Creation timestamp; the server clock is used when absent.
	#[serde(rename = "createdAt")]
	pub created_at: Option<DateTime<Utc>>,
}

/// Request body for paying an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayOrderRequest {
	/// Confirmation token issued by the payment provider.
	#[serde(rename = "confirmationToken")]
	pub confirmation_token: String,
}

/// Order representation returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
	pub id: String,
	#[serde(rename = "createdAt")]
	pub created_at: DateTime<Utc>,
	pub state: String,
	pub version: u64,
	/// Events that the current state accepts.
	#[serde(rename = "allowedEvents")]
	pub allowed_events: Vec<OrderEventKind>,
}

impl OrderResponse {
	pub fn new(record: OrderRecord, allowed_events: Vec<OrderEventKind>) -> Self {
		Self {
			id: record.id,
			created_at: record.created_at,
			state: record.state,
			version: record.version,
			allowed_events,
		}
	}
}

/// Result of sending an event to an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionResponse {
	#[serde(rename = "orderId")]
	pub order_id: String,
	pub event: OrderEventKind,
	pub state: String,
}

/// API error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
	/// Error type/code
	pub error: String,
	/// Human-readable description
	pub message: String,
	/// Additional error context
	pub details: Option<serde_json::Value>,
	/// Suggested retry delay in seconds
	#[serde(rename = "retryAfter")]
	pub retry_after: Option<u64>,
}

/// Structured API error type with appropriate HTTP status mapping.
#[derive(Debug)]
pub enum APIError {
	/// Bad request with validation errors (400)
	BadRequest { error_type: String, message: String },
	/// Referenced resource does not exist (404)
	NotFound { error_type: String, message: String },
	/// Request conflicts with the current resource state (409)
	Conflict {
		error_type: String,
		message: String,
		details: Option<serde_json::Value>,
		retry_after: Option<u64>,
	},
	/// Service unavailable with optional retry information (503)
	ServiceUnavailable {
		error_type: String,
		message: String,
		retry_after: Option<u64>,
	},
	/// Internal server error (500)
	InternalServerError { error_type: String, message: String },
}

impl APIError {
	/// Get the HTTP status code for this error.
	pub fn status_code(&self) -> u16 {
		match self {
			APIError::BadRequest { .. } => 400,
			APIError::NotFound { .. } => 404,
			APIError::Conflict { .. } => 409,
			APIError::ServiceUnavailable { .. } => 503,
			APIError::InternalServerError { .. } => 500,
		}
	}

	/// Convert to ErrorResponse for JSON serialization.
	pub fn to_error_response(&self) -> ErrorResponse {
		match self {
			APIError::BadRequest {
				error_type,
				message,
			}
			| APIError::NotFound {
				error_type,
				message,
			}
			| APIError::InternalServerError {
				error_type,
				message,
			} => ErrorResponse {
				error: error_type.clone(),
				message: message.clone(),
				details: None,
				retry_after: None,
			},
			APIError::Conflict {
				error_type,
				message,
				details,
				retry_after,
			} => ErrorResponse {
				error: error_type.clone(),
				message: message.clone(),
				details: details.clone(),
				retry_after: *retry_after,
			},
			APIError::ServiceUnavailable {
				error_type,
				message,
				retry_after,
			} => ErrorResponse {
				error: error_type.clone(),
				message: message.clone(),
				details: None,
				retry_after: *retry_after,
			},
		}
	}
}

impl fmt::Display for APIError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			APIError::BadRequest { message, .. } => write!(f, "Bad Request: {}", message),
			APIError::NotFound { message, .. } => write!(f, "Not Found: {}", message),
			APIError::Conflict { message, .. } => write!(f, "Conflict: {}", message),
			APIError::ServiceUnavailable { message, .. } => {
				write!(f, "Service Unavailable: {}", message)
			},
			APIError::InternalServerError { message, .. } => {
				write!(f, "Internal Server Error: {}", message)
			},
		}
	}
}

impl std::error::Error for APIError {}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for APIError {
	fn into_response(self) -> axum::response::Response {
		use axum::{http::StatusCode, response::Json};

		let status = StatusCode::from_u16(self.status_code())
			.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

		let error_response = self.to_error_response();
		(status, Json(error_response)).into_response()
	}
}
