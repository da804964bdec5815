//! Rehydration of state machines from persisted records.

use super::interceptor::PersistenceInterceptor;
use super::machine::{OrderStateMachine, StateMachineError};
use crate::store::{EntityStore, StoreError};
use orderflow_types::{truncate_id, OrderState};
use std::sync::Arc;

/// Builds machine instances from the entity store.
///
/// Holds no state of its own: every call reads the record afresh.
pub struct OrderStateMachineFactory;

impl OrderStateMachineFactory {
	/// Reads the order and returns a machine in its persisted state.
	///
	/// The machine carries a [`PersistenceInterceptor`] bound to the record
	/// just read, plus the default logging hooks.
	pub async fn rehydrate(
		store: Arc<dyn EntityStore>,
		order_id: &str,
	) -> Result<OrderStateMachine, StateMachineError> {
		let record = store
			.find_by_id(order_id)
			.await?
			.ok_or_else(|| StateMachineError::NotFound(order_id.to_string()))?;

		let state = record.order_state().map_err(|e| StoreError::Corrupted {
			id: record.id.clone(),
			message: e.to_string(),
		})?;

		let mut machine = OrderStateMachine::new(record.id.clone(), state);
		machine.add_interceptor(Box::new(PersistenceInterceptor::new(store, record)));
		register_default_hooks(&mut machine);

		Ok(machine)
	}
}

fn register_default_hooks(machine: &mut OrderStateMachine) {
	machine.on_state_change(|ctx| {
		tracing::info!(
			order_id = %truncate_id(ctx.order_id),
			from = %ctx.from,
			to = %ctx.to,
			event = %ctx.event,
			"State changed"
		);
	});

	machine.on_entry(OrderState::Paid, |ctx| {
		tracing::info!(
			order_id = %truncate_id(ctx.order_id),
			confirmation = ctx.event.confirmation().unwrap_or_default(),
			"Order paid"
		);
	});
	machine.on_entry(OrderState::Fulfilled, |ctx| {
		tracing::info!(order_id = %truncate_id(ctx.order_id), "Order fulfilled");
	});
	machine.on_entry(OrderState::Cancelled, |ctx| {
		tracing::info!(
			order_id = %truncate_id(ctx.order_id),
			event = %ctx.event,
			"Order cancelled"
		);
	});
}
