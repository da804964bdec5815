//! Interceptor that writes each accepted transition to the entity store.

use super::machine::{StateMachineError, TransitionContext, TransitionInterceptor};
use crate::store::EntityStore;
use async_trait::async_trait;
use orderflow_types::{truncate_id, OrderRecord};
use std::sync::Arc;

/// Persists the target state before the machine commits it.
///
/// Holds the record as it was last read or written, so the save is checked
/// against that version. After a successful save the stored record,
/// carrying the new version, replaces the snapshot.
pub struct PersistenceInterceptor {
	store: Arc<dyn EntityStore>,
	record: OrderRecord,
}

impl PersistenceInterceptor {
	pub fn new(store: Arc<dyn EntityStore>, record: OrderRecord) -> Self {
		Self { store, record }
	}

	/// The record as last persisted by this interceptor.
	pub fn record(&self) -> &OrderRecord {
		&self.record
	}
}

#[async_trait]
impl TransitionInterceptor for PersistenceInterceptor {
	async fn before_transition(
		&mut self,
		context: &TransitionContext<'_>,
	) -> Result<(), StateMachineError> {
		let candidate = self.record.with_state(context.to);
		let saved = self.store.save(candidate).await?;

		tracing::debug!(
			order_id = %truncate_id(context.order_id),
			state = %context.to,
			version = saved.version,
			"Persisted transition"
		);

		self.record = saved;
		Ok(())
	}
}
