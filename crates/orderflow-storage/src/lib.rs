//! Storage module for the order service.
//!
//! This module provides abstractions for persistent storage of order data,
//! supporting different backend implementations such as in-memory or
//! file-based storage. Backends expose raw key-value operations plus an
//! atomic read-modify-write primitive used for optimistic concurrency.

use async_trait::async_trait;
use orderflow_types::{ConfigSchema, ImplementationRegistry};
use serde::{de::DeserializeOwned, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod file;
	pub mod memory;
}

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	/// Error that occurs when a requested item is not found.
	#[error("Not found")]
	NotFound,
	/// The stored value changed since it was read.
	#[error("Conflict: {0}")]
	Conflict(String),
	/// Error that occurs during serialization/deserialization.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// The deadline passed before the operation could write.
	#[error("Deadline exceeded")]
	DeadlineExceeded,
	/// Error that occurs in the storage backend.
	#[error("Backend error: {0}")]
	Backend(String),
	/// Error that occurs during configuration validation.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Update applied atomically to the current value of a key.
///
/// Receives the current bytes (or `None` if the key is absent) and returns
/// the bytes to store. Returning an error leaves the stored value untouched.
pub type BytesUpdate =
	Box<dyn FnOnce(Option<Vec<u8>>) -> Result<Vec<u8>, StorageError> + Send + 'static>;

/// Trait defining the low-level interface for storage backends.
///
/// This trait must be implemented by any storage backend that wants to
/// integrate with the order service. It provides basic key-value operations
/// with optional TTL support.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Retrieves raw bytes for the given key.
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	/// Stores raw bytes with optional time-to-live.
	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError>;

	/// Reads, transforms and writes the value of `key` as one atomic step.
	///
	/// No other `update_bytes` call on the same key may interleave between
	/// the read and the write. Returns the bytes that were written.
	///
	/// Nothing is written once `deadline` has passed: the call fails with
	/// `StorageError::DeadlineExceeded` and the stored value stays as it was.
	async fn update_bytes(
		&self,
		key: &str,
		update: BytesUpdate,
		ttl: Option<Duration>,
		deadline: Instant,
	) -> Result<Vec<u8>, StorageError>;

	/// Deletes the value associated with the given key.
	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	/// Checks if a key exists in storage.
	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	/// Returns the configuration schema for validation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Removes expired entries from storage (optional operation).
	/// Returns the number of entries removed.
	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		Ok(0)
	}
}

/// Type alias for storage factory functions.
pub type StorageFactory = fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>;

/// Registry trait for storage implementations.
pub trait StorageRegistry: ImplementationRegistry<Factory = StorageFactory> {}

/// Get all registered storage implementations.
///
/// Returns a vector of (name, factory) tuples for all available storage implementations.
pub fn get_all_implementations() -> Vec<(&'static str, StorageFactory)> {
	use implementations::{file, memory};

	vec![
		(file::Registry::NAME, file::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
	]
}

/// High-level storage service that provides typed operations.
///
/// The StorageService wraps a low-level storage backend and provides
/// convenient methods for storing and retrieving typed data with
/// automatic JSON serialization. Keys are formed as `namespace:id`.
pub struct StorageService {
	/// The underlying storage backend implementation.
	backend: Box<dyn StorageInterface>,
}

impl StorageService {
	/// Creates a new StorageService with the specified backend.
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	fn key(namespace: &str, id: &str) -> String {
		format!("{}:{}", namespace, id)
	}

	/// Stores a serializable value, creating or overwriting it.
	pub async fn store<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		let bytes =
			serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))?;
		self.backend
			.set_bytes(&Self::key(namespace, id), bytes, None)
			.await
	}

	/// Retrieves and deserializes a value from storage.
	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<T, StorageError> {
		let bytes = self.backend.get_bytes(&Self::key(namespace, id)).await?;
		serde_json::from_slice(&bytes).map_err(|e| StorageError::Serialization(e.to_string()))
	}

	/// Atomically replaces a value with the result of `update`.
	///
	/// `update` receives the currently stored value, if any, and decides what
	/// to write. An error returned by `update` aborts the write and is passed
	/// through unchanged, which lets callers implement compare-and-set.
	/// The write is abandoned with `StorageError::DeadlineExceeded` if it
	/// cannot happen before `deadline`.
	pub async fn update_atomic<T, F>(
		&self,
		namespace: &str,
		id: &str,
		deadline: Instant,
		update: F,
	) -> Result<T, StorageError>
	where
		T: Serialize + DeserializeOwned + Send + 'static,
		F: FnOnce(Option<T>) -> Result<T, StorageError> + Send + 'static,
	{
		let update: BytesUpdate = Box::new(move |current| {
			let current = current
				.map(|bytes| serde_json::from_slice::<T>(&bytes))
				.transpose()
				.map_err(|e| StorageError::Serialization(e.to_string()))?;
			let next = update(current)?;
			serde_json::to_vec(&next).map_err(|e| StorageError::Serialization(e.to_string()))
		});

		let written = self
			.backend
			.update_bytes(&Self::key(namespace, id), update, None, deadline)
			.await?;
		serde_json::from_slice(&written).map_err(|e| StorageError::Serialization(e.to_string()))
	}

	/// Checks if a value exists in storage.
	pub async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		self.backend.exists(&Self::key(namespace, id)).await
	}

	/// Removes expired entries from storage.
	///
	/// This is a no-op for backends that don't support TTL.
	pub async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		self.backend.cleanup_expired().await
	}
}
