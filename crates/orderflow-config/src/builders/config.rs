//! Configuration builder for tests and local development.

use crate::{ApiConfig, Config, ServiceConfig, StorageConfig};
use std::collections::HashMap;

/// Builder for creating `Config` instances with a fluent API.
///
/// Defaults to an in-memory store so tests need no filesystem setup.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
	service_id: String,
	storage_primary: String,
	storage_implementations: HashMap<String, toml::Value>,
	storage_cleanup_interval_seconds: u64,
	storage_operation_timeout_ms: u64,
	api: Option<ApiConfig>,
}

impl Default for ConfigBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigBuilder {
	pub fn new() -> Self {
		let mut storage_implementations = HashMap::new();
		storage_implementations.insert(
			"memory".to_string(),
			toml::Value::Table(toml::map::Map::new()),
		);

		Self {
			service_id: "orders-test".to_string(),
			storage_primary: "memory".to_string(),
			storage_implementations,
			storage_cleanup_interval_seconds: 60,
			storage_operation_timeout_ms: 5_000,
			api: None,
		}
	}

	pub fn service_id(mut self, id: impl Into<String>) -> Self {
		self.service_id = id.into();
		self
	}

	/// Adds a storage implementation and makes it the primary one.
	pub fn storage(mut self, name: impl Into<String>, config: toml::Value) -> Self {
		let name = name.into();
		self.storage_implementations.insert(name.clone(), config);
		self.storage_primary = name;
		self
	}

	pub fn storage_cleanup_interval_seconds(mut self, interval: u64) -> Self {
		self.storage_cleanup_interval_seconds = interval;
		self
	}

	pub fn storage_operation_timeout_ms(mut self, timeout: u64) -> Self {
		self.storage_operation_timeout_ms = timeout;
		self
	}

	pub fn api(mut self, api: Option<ApiConfig>) -> Self {
		self.api = api;
		self
	}

	pub fn build(self) -> Config {
		Config {
			service: ServiceConfig {
				id: self.service_id,
			},
			storage: StorageConfig {
				primary: self.storage_primary,
				implementations: self.storage_implementations,
				cleanup_interval_seconds: self.storage_cleanup_interval_seconds,
				operation_timeout_ms: self.storage_operation_timeout_ms,
			},
			api: self.api,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_default_build_is_memory_backed() {
		let config = ConfigBuilder::new().build();
		assert_eq!(config.storage.primary, "memory");
		assert!(config.storage.implementations.contains_key("memory"));
		assert!(config.api.is_none());
	}

	#[test]
	fn test_storage_switches_primary() {
		let mut table = toml::map::Map::new();
		table.insert(
			"storage_path".to_string(),
			toml::Value::String("/tmp/orders".to_string()),
		);
		let config = ConfigBuilder::new()
			.storage("file", toml::Value::Table(table))
			.build();
		assert_eq!(config.storage.primary, "file");
		assert_eq!(config.storage.implementations.len(), 2);
	}
}
