//! Order service: the public operations on orders.
//!
//! Each mutating call rehydrates a fresh machine, sends it exactly one event
//! and drops it. Events the current state does not accept leave the order
//! untouched and are reported as [`OrderServiceError::TransitionRejected`].

use crate::state::{OrderStateMachineFactory, StateMachineError, TransitionTable};
use crate::store::{EntityStore, StoreError};
use chrono::{DateTime, Utc};
use orderflow_types::{truncate_id, OrderEvent, OrderEventKind, OrderRecord, OrderState};
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

/// Errors surfaced to callers of [`OrderService`].
#[derive(Debug, Error)]
pub enum OrderServiceError {
	#[error("Order not found: {0}")]
	NotFound(String),
	/// The event is not valid in the order's current state, which is unchanged.
	#[error("Event {event} rejected for order {order_id} in state {state}")]
	TransitionRejected {
		order_id: String,
		state: OrderState,
		event: OrderEventKind,
	},
	/// Another writer updated the order first.
	#[error("Order {order_id} was modified concurrently: {message}")]
	ConcurrentModification { order_id: String, message: String },
	#[error("Persistence failure: {0}")]
	PersistenceFailure(String),
	#[error("Order {order_id} is corrupted: {message}")]
	Corrupted { order_id: String, message: String },
}

impl OrderServiceError {
	/// Whether repeating the same call may succeed.
	pub fn is_retryable(&self) -> bool {
		matches!(
			self,
			OrderServiceError::ConcurrentModification { .. }
				| OrderServiceError::PersistenceFailure(_)
		)
	}
}

impl From<StoreError> for OrderServiceError {
	fn from(err: StoreError) -> Self {
		match err {
			StoreError::NotFound(id) => OrderServiceError::NotFound(id),
			StoreError::Conflict { id, message } => OrderServiceError::ConcurrentModification {
				order_id: id,
				message,
			},
			StoreError::Corrupted { id, message } => OrderServiceError::Corrupted {
				order_id: id,
				message,
			},
			e @ (StoreError::Timeout(_) | StoreError::Backend(_)) => {
				OrderServiceError::PersistenceFailure(e.to_string())
			},
		}
	}
}

impl From<StateMachineError> for OrderServiceError {
	fn from(err: StateMachineError) -> Self {
		match err {
			StateMachineError::NotFound(id) => OrderServiceError::NotFound(id),
			StateMachineError::Persistence(e) => e.into(),
		}
	}
}

/// Creates orders and drives them through their lifecycle.
pub struct OrderService {
	store: Arc<dyn EntityStore>,
}

impl OrderService {
	pub fn new(store: Arc<dyn EntityStore>) -> Self {
		Self { store }
	}

	/// Creates and persists a new order in the initial state.
	#[instrument(skip_all)]
	pub async fn create(&self, created_at: DateTime<Utc>) -> Result<OrderRecord, OrderServiceError> {
		let record = self.store.save(OrderRecord::new(created_at)).await?;
		tracing::info!(
			order_id = %truncate_id(&record.id),
			state = %record.state,
			"Order created"
		);
		Ok(record)
	}

	#[instrument(skip_all, fields(order_id = %truncate_id(id)))]
	pub async fn pay(
		&self,
		id: &str,
		confirmation: impl Into<String>,
	) -> Result<OrderState, OrderServiceError> {
		self.dispatch(
			id,
			OrderEvent::Pay {
				confirmation: confirmation.into(),
			},
		)
		.await
	}

	#[instrument(skip_all, fields(order_id = %truncate_id(id)))]
	pub async fn fulfill(&self, id: &str) -> Result<OrderState, OrderServiceError> {
		self.dispatch(id, OrderEvent::Fulfill).await
	}

	#[instrument(skip_all, fields(order_id = %truncate_id(id)))]
	pub async fn cancel(&self, id: &str) -> Result<OrderState, OrderServiceError> {
		self.dispatch(id, OrderEvent::Cancel).await
	}

	/// Reads an order without touching its state.
	#[instrument(skip_all, fields(order_id = %truncate_id(id)))]
	pub async fn by_id(&self, id: &str) -> Result<Option<OrderRecord>, OrderServiceError> {
		Ok(self.store.find_by_id(id).await?)
	}

	async fn dispatch(&self, id: &str, event: OrderEvent) -> Result<OrderState, OrderServiceError> {
		let mut machine = OrderStateMachineFactory::rehydrate(self.store.clone(), id).await?;

		let before = machine.state();
		let kind = event.kind();
		let expected = TransitionTable::lookup(before, kind);

		let after = machine.send_event(event).await.inspect_err(|e| {
			tracing::warn!(event = %kind, error = %e, "Transition aborted");
		})?;

		if expected != Some(after) {
			tracing::warn!(event = %kind, state = %after, "Transition rejected");
			return Err(OrderServiceError::TransitionRejected {
				order_id: id.to_string(),
				state: after,
				event: kind,
			});
		}

		Ok(after)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::StorageEntityStore;
	use async_trait::async_trait;
	use fs2::FileExt;
	use orderflow_storage::implementations::file::{FileStorage, TtlConfig};
	use orderflow_storage::implementations::memory::MemoryStorage;
	use orderflow_storage::StorageService;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration;
	use tokio::sync::Barrier;

	/// Entity store that counts saves and can be told to fail them.
	struct CountingStore {
		inner: StorageEntityStore,
		saves: AtomicUsize,
		fail_saves: std::sync::atomic::AtomicBool,
	}

	impl CountingStore {
		fn new() -> Self {
			Self {
				inner: StorageEntityStore::new(
					Arc::new(StorageService::new(Box::new(MemoryStorage::new()))),
					Duration::from_secs(5),
				),
				saves: AtomicUsize::new(0),
				fail_saves: std::sync::atomic::AtomicBool::new(false),
			}
		}

		fn saves(&self) -> usize {
			self.saves.load(Ordering::SeqCst)
		}
	}

	#[async_trait]
	impl EntityStore for CountingStore {
		async fn save(&self, record: OrderRecord) -> Result<OrderRecord, StoreError> {
			self.saves.fetch_add(1, Ordering::SeqCst);
			if self.fail_saves.load(Ordering::SeqCst) {
				return Err(StoreError::Backend("unavailable".into()));
			}
			self.inner.save(record).await
		}

		async fn find_by_id(&self, id: &str) -> Result<Option<OrderRecord>, StoreError> {
			self.inner.find_by_id(id).await
		}
	}

	/// Entity store that holds every update until two are waiting, so both
	/// callers have read the same version before either writes.
	struct BarrierStore {
		inner: StorageEntityStore,
		barrier: Barrier,
	}

	#[async_trait]
	impl EntityStore for BarrierStore {
		async fn save(&self, record: OrderRecord) -> Result<OrderRecord, StoreError> {
			if record.version > 0 {
				self.barrier.wait().await;
			}
			self.inner.save(record).await
		}

		async fn find_by_id(&self, id: &str) -> Result<Option<OrderRecord>, StoreError> {
			self.inner.find_by_id(id).await
		}
	}

	fn service() -> (OrderService, Arc<CountingStore>) {
		let store = Arc::new(CountingStore::new());
		(OrderService::new(store.clone()), store)
	}

	async fn state_of(service: &OrderService, id: &str) -> OrderState {
		service
			.by_id(id)
			.await
			.unwrap()
			.unwrap()
			.order_state()
			.unwrap()
	}

	#[tokio::test]
	async fn test_create_and_pay() {
		let (service, _) = service();
		let order = service.create(Utc::now()).await.unwrap();
		assert_eq!(order.state, "SUBMITTED");

		assert_eq!(
			service.pay(&order.id, "tok1").await.unwrap(),
			OrderState::Paid
		);
		assert_eq!(state_of(&service, &order.id).await, OrderState::Paid);
	}

	#[tokio::test]
	async fn test_fulfill_paid_order() {
		let (service, _) = service();
		let order = service.create(Utc::now()).await.unwrap();
		service.pay(&order.id, "tok1").await.unwrap();

		assert_eq!(
			service.fulfill(&order.id).await.unwrap(),
			OrderState::Fulfilled
		);
		assert_eq!(state_of(&service, &order.id).await, OrderState::Fulfilled);
	}

	#[tokio::test]
	async fn test_fulfill_unpaid_order_is_rejected_without_write() {
		let (service, store) = service();
		let order = service.create(Utc::now()).await.unwrap();
		let saves = store.saves();

		let err = service.fulfill(&order.id).await.unwrap_err();
		assert!(matches!(
			err,
			OrderServiceError::TransitionRejected {
				state: OrderState::Submitted,
				event: OrderEventKind::Fulfill,
				..
			}
		));
		assert!(!err.is_retryable());
		assert_eq!(store.saves(), saves);
		assert_eq!(state_of(&service, &order.id).await, OrderState::Submitted);
	}

	#[tokio::test]
	async fn test_cancel_fulfilled_then_cancel_again() {
		let (service, store) = service();
		let order = service.create(Utc::now()).await.unwrap();
		service.pay(&order.id, "tok1").await.unwrap();
		service.fulfill(&order.id).await.unwrap();

		assert_eq!(
			service.cancel(&order.id).await.unwrap(),
			OrderState::Cancelled
		);
		let saves = store.saves();

		let err = service.cancel(&order.id).await.unwrap_err();
		assert!(matches!(
			err,
			OrderServiceError::TransitionRejected {
				state: OrderState::Cancelled,
				..
			}
		));
		assert_eq!(store.saves(), saves);
		assert_eq!(state_of(&service, &order.id).await, OrderState::Cancelled);
	}

	#[tokio::test]
	async fn test_cancelled_order_rejects_every_event() {
		let (service, store) = service();
		let order = service.create(Utc::now()).await.unwrap();
		service.cancel(&order.id).await.unwrap();
		let saves = store.saves();

		for _ in 0..2 {
			assert!(service.pay(&order.id, "tok").await.is_err());
			assert!(service.fulfill(&order.id).await.is_err());
			assert!(service.cancel(&order.id).await.is_err());
		}

		assert_eq!(store.saves(), saves);
		let record = service.by_id(&order.id).await.unwrap().unwrap();
		assert_eq!(record.state, "CANCELLED");
		assert_eq!(record.version, 2);
	}

	#[tokio::test]
	async fn test_concurrent_pays_have_one_winner() {
		let (service, _) = service();
		let service = Arc::new(service);
		let order = service.create(Utc::now()).await.unwrap();

		let first = {
			let service = service.clone();
			let id = order.id.clone();
			tokio::spawn(async move { service.pay(&id, "tok-a").await })
		};
		let second = {
			let service = service.clone();
			let id = order.id.clone();
			tokio::spawn(async move { service.pay(&id, "tok-b").await })
		};

		let results = [first.await.unwrap(), second.await.unwrap()];
		let winners = results
			.iter()
			.filter(|r| matches!(r, Ok(OrderState::Paid)))
			.count();
		assert_eq!(winners, 1);

		for result in &results {
			match result {
				Ok(state) => assert_eq!(*state, OrderState::Paid),
				Err(OrderServiceError::ConcurrentModification { .. }) => {},
				Err(OrderServiceError::TransitionRejected { state, .. }) => {
					assert_eq!(*state, OrderState::Paid)
				},
				Err(other) => panic!("unexpected error: {other}"),
			}
		}

		let record = service.by_id(&order.id).await.unwrap().unwrap();
		assert_eq!(record.state, "PAID");
		assert_eq!(record.version, 2);
	}

	#[tokio::test]
	async fn test_racing_pays_report_concurrent_modification() {
		let store = Arc::new(BarrierStore {
			inner: StorageEntityStore::new(
				Arc::new(StorageService::new(Box::new(MemoryStorage::new()))),
				Duration::from_secs(5),
			),
			barrier: Barrier::new(2),
		});
		let service = OrderService::new(store);
		let order = service.create(Utc::now()).await.unwrap();

		let (first, second) = tokio::join!(
			service.pay(&order.id, "tok-a"),
			service.pay(&order.id, "tok-b")
		);

		let (winner, loser) = match (first, second) {
			(Ok(state), Err(e)) | (Err(e), Ok(state)) => (state, e),
			(first, second) => panic!("expected one winner, got {first:?} and {second:?}"),
		};
		assert_eq!(winner, OrderState::Paid);
		assert!(matches!(
			loser,
			OrderServiceError::ConcurrentModification { ref order_id, .. } if *order_id == order.id
		));
		assert!(loser.is_retryable());

		let record = service.by_id(&order.id).await.unwrap().unwrap();
		assert_eq!(record.state, "PAID");
		assert_eq!(record.version, 2);
	}

	#[tokio::test]
	async fn test_timed_out_pay_can_be_retried() {
		let dir = tempfile::TempDir::new().unwrap();
		let service = OrderService::new(Arc::new(StorageEntityStore::new(
			Arc::new(StorageService::new(Box::new(FileStorage::new(
				dir.path().to_path_buf(),
				TtlConfig::default(),
			)))),
			Duration::from_millis(100),
		)));
		let order = service.create(Utc::now()).await.unwrap();

		let holder = std::fs::File::create(dir.path().join(format!("orders_{}.lock", order.id)))
			.unwrap();
		FileExt::lock_exclusive(&holder).unwrap();

		let err = service.pay(&order.id, "tok1").await.unwrap_err();
		assert!(matches!(err, OrderServiceError::PersistenceFailure(_)));
		assert!(err.is_retryable());

		FileExt::unlock(&holder).unwrap();
		tokio::time::sleep(Duration::from_millis(200)).await;
		assert_eq!(state_of(&service, &order.id).await, OrderState::Submitted);

		assert_eq!(
			service.pay(&order.id, "tok1").await.unwrap(),
			OrderState::Paid
		);
	}

	#[tokio::test]
	async fn test_store_failure_leaves_order_unchanged() {
		let (service, store) = service();
		let order = service.create(Utc::now()).await.unwrap();

		store.fail_saves.store(true, Ordering::SeqCst);
		let err = service.pay(&order.id, "tok1").await.unwrap_err();
		assert!(matches!(err, OrderServiceError::PersistenceFailure(_)));
		assert!(err.is_retryable());

		store.fail_saves.store(false, Ordering::SeqCst);
		assert_eq!(state_of(&service, &order.id).await, OrderState::Submitted);
		assert_eq!(
			service.pay(&order.id, "tok1").await.unwrap(),
			OrderState::Paid
		);
	}

	#[tokio::test]
	async fn test_unknown_order() {
		let (service, _) = service();
		assert!(service.by_id("missing").await.unwrap().is_none());

		let err = service.pay("missing", "tok1").await.unwrap_err();
		assert!(matches!(err, OrderServiceError::NotFound(id) if id == "missing"));
	}

	#[tokio::test]
	async fn test_orders_are_independent() {
		let (service, _) = service();
		let a = service.create(Utc::now()).await.unwrap();
		let b = service.create(Utc::now()).await.unwrap();
		assert_ne!(a.id, b.id);

		service.cancel(&a.id).await.unwrap();
		assert_eq!(
			service.pay(&b.id, "tok1").await.unwrap(),
			OrderState::Paid
		);
		assert_eq!(state_of(&service, &a.id).await, OrderState::Cancelled);
	}
}
