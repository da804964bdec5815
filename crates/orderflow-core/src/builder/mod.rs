//! Builder pattern for constructing the order engine.
//!
//! Storage backends are pluggable: the builder receives a factory per
//! implementation name, instantiates every configured implementation that has
//! a factory, and keeps the one marked as primary.

use crate::engine::OrderflowEngine;
use orderflow_config::Config;
use orderflow_storage::{StorageError, StorageInterface, StorageService};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during engine construction.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
}

/// Factory functions available to the builder, keyed by implementation name.
pub struct OrderflowFactories<SF> {
	pub storage_factories: HashMap<String, SF>,
}

/// Builder for constructing an [`OrderflowEngine`].
pub struct OrderflowBuilder {
	config: Config,
}

impl OrderflowBuilder {
	pub fn new(config: Config) -> Self {
		Self { config }
	}

	/// Builds the engine using the given storage factories.
	pub fn build<SF>(self, factories: OrderflowFactories<SF>) -> Result<OrderflowEngine, BuilderError>
	where
		SF: Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>,
	{
		let mut storage_impls = HashMap::new();
		for (name, config) in &self.config.storage.implementations {
			let Some(factory) = factories.storage_factories.get(name) else {
				tracing::warn!(
					component = "storage",
					implementation = %name,
					"No factory registered, skipping"
				);
				continue;
			};

			match factory(config) {
				Ok(implementation) => {
					storage_impls.insert(name.clone(), implementation);
					let is_primary = &self.config.storage.primary == name;
					tracing::info!(component = "storage", implementation = %name, enabled = %is_primary, "Loaded");
				},
				Err(e) => {
					tracing::error!(
						component = "storage",
						implementation = %name,
						error = %e,
						"Failed to create storage implementation"
					);
					return Err(BuilderError::Config(format!(
						"Failed to create storage implementation '{}': {}",
						name, e
					)));
				},
			}
		}

		if storage_impls.is_empty() {
			return Err(BuilderError::Config(
				"No valid storage implementations available".into(),
			));
		}

		let primary_storage = &self.config.storage.primary;
		let storage_backend = storage_impls.remove(primary_storage).ok_or_else(|| {
			BuilderError::Config(format!(
				"Primary storage '{}' failed to load or has invalid configuration",
				primary_storage
			))
		})?;

		let storage = Arc::new(StorageService::new(storage_backend));
		Ok(OrderflowEngine::new(self.config, storage))
	}
}
