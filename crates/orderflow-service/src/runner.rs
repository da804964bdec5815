//! Sample driver that walks one order through its happy path.

use orderflow_core::{OrderServiceError, OrderflowEngine};
use orderflow_types::OrderRecord;
use uuid::Uuid;

/// Creates an order, pays it and fulfills it, logging each step.
///
/// Returns the final record as read back from storage.
pub async fn run_demo(engine: &OrderflowEngine) -> Result<OrderRecord, OrderServiceError> {
	let orders = engine.orders();

	let order = orders.create(chrono::Utc::now()).await?;
	tracing::info!("created: {}", order);

	let state = orders.pay(&order.id, Uuid::new_v4().to_string()).await?;
	tracing::info!("after calling pay(): {}", state);
	log_record(engine, &order.id).await?;

	let state = orders.fulfill(&order.id).await?;
	tracing::info!("after calling fulfill(): {}", state);
	let record = log_record(engine, &order.id).await?;

	Ok(record)
}

async fn log_record(engine: &OrderflowEngine, id: &str) -> Result<OrderRecord, OrderServiceError> {
	let record = engine
		.orders()
		.by_id(id)
		.await?
		.ok_or_else(|| OrderServiceError::NotFound(id.to_string()))?;
	tracing::info!("order: {}", record);
	Ok(record)
}
