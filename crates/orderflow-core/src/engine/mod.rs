//! Order engine: the assembled service and its background maintenance.
//!
//! The engine owns the storage backend, the entity store on top of it and
//! the order service, and runs the periodic storage cleanup.

use crate::service::OrderService;
use crate::store::{EntityStore, StorageEntityStore};
use orderflow_config::Config;
use orderflow_storage::StorageService;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
	#[error("Service error: {0}")]
	Service(String),
}

/// Assembled order service with its storage.
#[derive(Clone)]
pub struct OrderflowEngine {
	config: Config,
	storage: Arc<StorageService>,
	orders: Arc<OrderService>,
}

impl OrderflowEngine {
	/// Wires the entity store and order service onto `storage`.
	pub fn new(config: Config, storage: Arc<StorageService>) -> Self {
		let store: Arc<dyn EntityStore> = Arc::new(StorageEntityStore::new(
			storage.clone(),
			config.storage.operation_timeout(),
		));
		let orders = Arc::new(OrderService::new(store));

		Self {
			config,
			storage,
			orders,
		}
	}

	/// Removes expired entries once and returns how many were removed.
	pub async fn cleanup_storage(&self) -> Result<usize, EngineError> {
		self.storage
			.cleanup_expired()
			.await
			.map_err(|e| EngineError::Service(e.to_string()))
	}

	/// Runs storage cleanup every `cleanup_interval_seconds`, forever.
	pub async fn run_cleanup(&self) {
		let mut interval = tokio::time::interval(Duration::from_secs(
			self.config.storage.cleanup_interval_seconds,
		));
		loop {
			interval.tick().await;
			match self.cleanup_storage().await {
				Ok(count) if count > 0 => {
					tracing::debug!("Storage cleanup: removed {} expired entries", count);
				},
				Err(e) => {
					tracing::warn!("Storage cleanup failed: {}", e);
				},
				_ => {},
			}
		}
	}

	/// Returns a reference to the configuration.
	pub fn config(&self) -> &Config {
		&self.config
	}

	/// Returns a reference to the order service.
	pub fn orders(&self) -> &Arc<OrderService> {
		&self.orders
	}
}
