//! HTTP server for the order API.
//!
//! Routes live under `/api`. Every mutating order endpoint maps onto exactly
//! one order service operation.

use crate::apis::order;
use axum::{
	body::Bytes,
	extract::{DefaultBodyLimit, Path, State},
	http::StatusCode,
	response::{IntoResponse, Json},
	routing::{get, post},
	Router,
};
use orderflow_config::ApiConfig;
use orderflow_core::OrderflowEngine;
use orderflow_types::{
	APIError, CreateOrderRequest, OrderEvent, OrderResponse, PayOrderRequest, TransitionResponse,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

/// Shared application state for the API server.
#[derive(Clone)]
pub struct AppState {
	/// Engine serving order operations.
	pub engine: Arc<OrderflowEngine>,
}

/// Builds the API router with its middleware.
pub fn router(state: AppState, api_config: &ApiConfig) -> Router {
	Router::new()
		.nest(
			"/api",
			Router::new()
				.route("/orders", post(handle_create_order))
				.route("/orders/{id}", get(handle_get_order_by_id))
				.route("/orders/{id}/pay", post(handle_pay_order))
				.route("/orders/{id}/fulfill", post(handle_fulfill_order))
				.route("/orders/{id}/cancel", post(handle_cancel_order)),
		)
		.layer(
			ServiceBuilder::new()
				.layer(TraceLayer::new_for_http())
				.layer(CorsLayer::permissive())
				.layer(TimeoutLayer::with_status_code(
					StatusCode::REQUEST_TIMEOUT,
					Duration::from_secs(api_config.timeout_seconds),
				))
				.layer(DefaultBodyLimit::max(api_config.max_request_size)),
		)
		.with_state(state)
}

/// Starts the HTTP server for the API.
pub async fn start_server(
	api_config: ApiConfig,
	engine: Arc<OrderflowEngine>,
) -> Result<(), Box<dyn std::error::Error>> {
	let app = router(AppState { engine }, &api_config);

	let bind_address = format!("{}:{}", api_config.host, api_config.port);
	let listener = TcpListener::bind(&bind_address).await?;

	tracing::info!("Order API server starting on {}", bind_address);

	axum::serve(listener, app).await?;

	Ok(())
}

/// Handles POST /api/orders requests.
///
/// The body is optional; an empty body creates the order with the server
/// clock as its creation time.
async fn handle_create_order(
	State(state): State<AppState>,
	body: Bytes,
) -> Result<impl IntoResponse, APIError> {
	let request = if body.is_empty() {
		CreateOrderRequest::default()
	} else {
		serde_json::from_slice(&body).map_err(|e| APIError::BadRequest {
			error_type: "INVALID_REQUEST".to_string(),
			message: e.to_string(),
		})?
	};

	let response = order::create_order(&state.engine, request).await?;
	Ok((StatusCode::CREATED, Json(response)))
}

/// Handles GET /api/orders/{id} requests.
async fn handle_get_order_by_id(
	Path(id): Path<String>,
	State(state): State<AppState>,
) -> Result<Json<OrderResponse>, APIError> {
	match order::get_order_by_id(&state.engine, &id).await {
		Ok(response) => Ok(Json(response)),
		Err(e) => {
			tracing::warn!("Order retrieval failed: {}", e);
			Err(e)
		},
	}
}

/// Handles POST /api/orders/{id}/pay requests.
async fn handle_pay_order(
	Path(id): Path<String>,
	State(state): State<AppState>,
	body: Bytes,
) -> Result<Json<TransitionResponse>, APIError> {
	let request: PayOrderRequest =
		serde_json::from_slice(&body).map_err(|e| APIError::BadRequest {
			error_type: "INVALID_REQUEST".to_string(),
			message: e.to_string(),
		})?;
	let event = OrderEvent::Pay {
		confirmation: request.confirmation_token,
	};
	order::send_order_event(&state.engine, &id, event)
		.await
		.map(Json)
}

/// Handles POST /api/orders/{id}/fulfill requests.
async fn handle_fulfill_order(
	Path(id): Path<String>,
	State(state): State<AppState>,
) -> Result<Json<TransitionResponse>, APIError> {
	order::send_order_event(&state.engine, &id, OrderEvent::Fulfill)
		.await
		.map(Json)
}

/// Handles POST /api/orders/{id}/cancel requests.
async fn handle_cancel_order(
	Path(id): Path<String>,
	State(state): State<AppState>,
) -> Result<Json<TransitionResponse>, APIError> {
	order::send_order_event(&state.engine, &id, OrderEvent::Cancel)
		.await
		.map(Json)
}
