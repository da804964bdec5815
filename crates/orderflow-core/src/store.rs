//! Durable persistence of order records.
//!
//! The entity store is the single source of truth for an order's state.
//! Saves are versioned: a record is only written if its `version` matches
//! the stored one, and every successful save bumps the version by one.

use async_trait::async_trait;
use orderflow_storage::{StorageError, StorageService};
use orderflow_types::{OrderRecord, StorageKey};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors returned by an [`EntityStore`].
#[derive(Debug, Error)]
pub enum StoreError {
	/// No record exists for the identifier.
	#[error("Order not found: {0}")]
	NotFound(String),
	/// The stored version differs from the one the caller read.
	#[error("Version conflict on order {id}: {message}")]
	Conflict { id: String, message: String },
	/// The storage call did not finish in time.
	#[error("Storage operation timed out after {0:?}")]
	Timeout(Duration),
	/// The storage backend failed.
	#[error("Storage backend error: {0}")]
	Backend(String),
	/// The stored record cannot be interpreted.
	#[error("Corrupted order record {id}: {message}")]
	Corrupted { id: String, message: String },
}

impl StoreError {
	/// Whether repeating the call may succeed.
	pub fn is_retryable(&self) -> bool {
		matches!(
			self,
			StoreError::Conflict { .. } | StoreError::Timeout(_) | StoreError::Backend(_)
		)
	}

	fn from_storage(id: &str, timeout: Duration, err: StorageError) -> Self {
		match err {
			StorageError::DeadlineExceeded => StoreError::Timeout(timeout),
			StorageError::NotFound => StoreError::NotFound(id.to_string()),
			StorageError::Conflict(message) => StoreError::Conflict {
				id: id.to_string(),
				message,
			},
			StorageError::Serialization(message) => StoreError::Corrupted {
				id: id.to_string(),
				message,
			},
			StorageError::Backend(message) | StorageError::Configuration(message) => {
				StoreError::Backend(message)
			},
		}
	}
}

/// Persistence boundary for order records.
#[async_trait]
pub trait EntityStore: Send + Sync {
	/// Inserts (version 0) or replaces a record, checking its version.
	///
	/// Returns the record as stored, carrying the bumped version.
	async fn save(&self, record: OrderRecord) -> Result<OrderRecord, StoreError>;

	/// Looks up a record by identifier.
	async fn find_by_id(&self, id: &str) -> Result<Option<OrderRecord>, StoreError>;
}

/// [`EntityStore`] on top of a [`StorageService`] backend.
///
/// Every call is bounded by `timeout`. A save that misses its deadline is
/// never written, so a `Timeout` from `save` leaves the stored record as it
/// was.
pub struct StorageEntityStore {
	storage: Arc<StorageService>,
	timeout: Duration,
}

impl StorageEntityStore {
	pub fn new(storage: Arc<StorageService>, timeout: Duration) -> Self {
		Self { storage, timeout }
	}

	async fn bounded<T, F>(&self, limit: Duration, operation: F) -> Result<T, StoreError>
	where
		F: Future<Output = T>,
	{
		tokio::time::timeout(limit, operation)
			.await
			.map_err(|_| StoreError::Timeout(self.timeout))
	}
}

#[async_trait]
impl EntityStore for StorageEntityStore {
	async fn save(&self, record: OrderRecord) -> Result<OrderRecord, StoreError> {
		let id = record.id.clone();
		let expected = record.version;
		let deadline = Instant::now() + self.timeout;

		let operation = self.storage.update_atomic(
			StorageKey::Orders.as_str(),
			&id,
			deadline,
			move |current: Option<OrderRecord>| match current {
				None if expected == 0 => Ok(OrderRecord {
					version: 1,
					..record
				}),
				None => Err(StorageError::NotFound),
				Some(stored) if stored.version != expected => Err(StorageError::Conflict(format!(
					"expected version {}, found {}",
					expected, stored.version
				))),
				Some(_) => Ok(OrderRecord {
					version: expected + 1,
					..record
				}),
			},
		);

		// The backend gives up at the deadline without writing. The outer
		// bound only cuts off a backend that ignores it.
		self.bounded(self.timeout * 2, operation)
			.await?
			.map_err(|e| StoreError::from_storage(&id, self.timeout, e))
	}

	async fn find_by_id(&self, id: &str) -> Result<Option<OrderRecord>, StoreError> {
		let operation = self
			.storage
			.retrieve::<OrderRecord>(StorageKey::Orders.as_str(), id);

		match self.bounded(self.timeout, operation).await? {
			Ok(record) => Ok(Some(record)),
			Err(StorageError::NotFound) => Ok(None),
			Err(e) => Err(StoreError::from_storage(id, self.timeout, e)),
		}
	}
}
