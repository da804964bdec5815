//! Order API implementation.
//!
//! Translates HTTP requests into order service calls and service errors
//! into structured API errors.

use orderflow_core::{OrderServiceError, OrderflowEngine, TransitionTable};
use orderflow_types::{
	APIError, CreateOrderRequest, OrderEvent, OrderRecord, OrderResponse, TransitionResponse,
};
use tracing::{info, warn};
use uuid::Uuid;

/// Suggested delay before retrying after losing a concurrent update.
const CONFLICT_RETRY_AFTER_SECS: u64 = 1;
/// Suggested delay before retrying after a storage failure.
const UNAVAILABLE_RETRY_AFTER_SECS: u64 = 5;

/// Handles order creation.
pub async fn create_order(
	engine: &OrderflowEngine,
	request: CreateOrderRequest,
) -> Result<OrderResponse, APIError> {
	let created_at = request.created_at.unwrap_or_else(chrono::Utc::now);
	let record = engine
		.orders()
		.create(created_at)
		.await
		.map_err(map_service_error)?;
	info!("Created order {}", record.id);
	to_response(record)
}

/// Handles order retrieval by ID.
pub async fn get_order_by_id(engine: &OrderflowEngine, id: &str) -> Result<OrderResponse, APIError> {
	validate_order_id(id)?;

	let record = engine
		.orders()
		.by_id(id)
		.await
		.map_err(map_service_error)?
		.ok_or_else(|| APIError::NotFound {
			error_type: "ORDER_NOT_FOUND".to_string(),
			message: format!("Order not found: {}", id),
		})?;
	to_response(record)
}

/// Sends a lifecycle event to an order.
pub async fn send_order_event(
	engine: &OrderflowEngine,
	id: &str,
	event: OrderEvent,
) -> Result<TransitionResponse, APIError> {
	validate_order_id(id)?;

	let kind = event.kind();
	let orders = engine.orders();
	let result = match event {
		OrderEvent::Pay { confirmation } => {
			if confirmation.trim().is_empty() {
				return Err(APIError::BadRequest {
					error_type: "INVALID_CONFIRMATION".to_string(),
					message: "Confirmation token cannot be empty".to_string(),
				});
			}
			orders.pay(id, confirmation).await
		},
		OrderEvent::Fulfill => orders.fulfill(id).await,
		OrderEvent::Cancel => orders.cancel(id).await,
	};

	let state = result.map_err(|e| {
		warn!("Event {} for order {} failed: {}", kind, id, e);
		map_service_error(e)
	})?;

	Ok(TransitionResponse {
		order_id: id.to_string(),
		event: kind,
		state: state.as_str().to_string(),
	})
}

/// Maps order service errors onto API errors.
pub fn map_service_error(err: OrderServiceError) -> APIError {
	let message = err.to_string();
	match err {
		OrderServiceError::NotFound(_) => APIError::NotFound {
			error_type: "ORDER_NOT_FOUND".to_string(),
			message,
		},
		OrderServiceError::TransitionRejected { state, event, .. } => APIError::Conflict {
			error_type: "TRANSITION_REJECTED".to_string(),
			message,
			details: Some(serde_json::json!({
				"state": state,
				"event": event,
				"allowedEvents": TransitionTable::permitted_events(state),
			})),
			retry_after: None,
		},
		OrderServiceError::ConcurrentModification { .. } => APIError::Conflict {
			error_type: "CONCURRENT_MODIFICATION".to_string(),
			message,
			details: None,
			retry_after: Some(CONFLICT_RETRY_AFTER_SECS),
		},
		OrderServiceError::PersistenceFailure(_) => APIError::ServiceUnavailable {
			error_type: "PERSISTENCE_FAILURE".to_string(),
			message,
			retry_after: Some(UNAVAILABLE_RETRY_AFTER_SECS),
		},
		OrderServiceError::Corrupted { .. } => APIError::InternalServerError {
			error_type: "ORDER_CORRUPTED".to_string(),
			message,
		},
	}
}

fn to_response(record: OrderRecord) -> Result<OrderResponse, APIError> {
	let state = record
		.order_state()
		.map_err(|e| APIError::InternalServerError {
			error_type: "ORDER_CORRUPTED".to_string(),
			message: e.to_string(),
		})?;
	Ok(OrderResponse::new(
		record,
		TransitionTable::permitted_events(state),
	))
}

/// Validates the order ID format.
fn validate_order_id(order_id: &str) -> Result<(), APIError> {
	if Uuid::parse_str(order_id).is_err() {
		return Err(APIError::BadRequest {
			error_type: "INVALID_ORDER_ID".to_string(),
			message: format!("Order ID must be a valid UUID: {}", order_id),
		});
	}

	Ok(())
}
