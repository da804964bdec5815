//! Order state machine instance.
//!
//! A machine holds the current state of one order plus the hooks attached to
//! it. It lives for a single dispatch: it is rehydrated from the store,
//! receives one event and is dropped.

use super::transitions::TransitionTable;
use crate::store::StoreError;
use async_trait::async_trait;
use orderflow_types::{OrderEvent, OrderEventKind, OrderState};
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised while dispatching an event.
#[derive(Debug, Error)]
pub enum StateMachineError {
	#[error("Order not found: {0}")]
	NotFound(String),
	#[error("Persistence error: {0}")]
	Persistence(#[from] StoreError),
}

impl StateMachineError {
	pub fn is_retryable(&self) -> bool {
		match self {
			StateMachineError::Persistence(e) => e.is_retryable(),
			_ => false,
		}
	}
}

/// A transition that has been accepted by the table but not yet committed.
#[derive(Debug)]
pub struct TransitionContext<'a> {
	pub order_id: &'a str,
	pub from: OrderState,
	pub to: OrderState,
	pub event: &'a OrderEvent,
}

/// Passed to entry hooks once the machine has entered `state`.
#[derive(Debug)]
pub struct EntryContext<'a> {
	pub order_id: &'a str,
	pub state: OrderState,
	pub event: &'a OrderEvent,
}

/// Runs before a transition is committed and may veto it.
///
/// Interceptors run in registration order. The first error aborts the
/// transition and the machine keeps its current state.
#[async_trait]
pub trait TransitionInterceptor: Send + Sync {
	async fn before_transition(
		&mut self,
		context: &TransitionContext<'_>,
	) -> Result<(), StateMachineError>;
}

pub type EntryHook = Box<dyn Fn(&EntryContext<'_>) + Send + Sync>;
pub type StateChangeListener = Box<dyn Fn(&TransitionContext<'_>) + Send + Sync>;

/// State machine for a single order.
pub struct OrderStateMachine {
	order_id: String,
	state: OrderState,
	interceptors: Vec<Box<dyn TransitionInterceptor>>,
	entry_hooks: HashMap<OrderState, Vec<EntryHook>>,
	listeners: Vec<StateChangeListener>,
}

impl OrderStateMachine {
	/// Creates a machine in `state` with no hooks attached.
	pub fn new(order_id: impl Into<String>, state: OrderState) -> Self {
		Self {
			order_id: order_id.into(),
			state,
			interceptors: Vec::new(),
			entry_hooks: HashMap::new(),
			listeners: Vec::new(),
		}
	}

	pub fn order_id(&self) -> &str {
		&self.order_id
	}

	pub fn state(&self) -> OrderState {
		self.state
	}

	/// Events the current state accepts.
	pub fn permitted_events(&self) -> Vec<OrderEventKind> {
		TransitionTable::permitted_events(self.state)
	}

	pub fn add_interceptor(&mut self, interceptor: Box<dyn TransitionInterceptor>) {
		self.interceptors.push(interceptor);
	}

	/// Registers a hook run each time the machine enters `state`.
	pub fn on_entry<F>(&mut self, state: OrderState, hook: F)
	where
		F: Fn(&EntryContext<'_>) + Send + Sync + 'static,
	{
		self.entry_hooks
			.entry(state)
			.or_default()
			.push(Box::new(hook));
	}

	/// Registers a listener notified after every committed transition.
	pub fn on_state_change<F>(&mut self, listener: F)
	where
		F: Fn(&TransitionContext<'_>) + Send + Sync + 'static,
	{
		self.listeners.push(Box::new(listener));
	}

	/// Dispatches `event` and returns the resulting state.
	///
	/// An event the current state does not accept is ignored: the current
	/// state is returned, no hook runs and nothing is written. When an
	/// interceptor fails the error is returned and the state is unchanged.
	pub async fn send_event(&mut self, event: OrderEvent) -> Result<OrderState, StateMachineError> {
		let from = self.state;
		let Some(to) = TransitionTable::lookup(from, event.kind()) else {
			return Ok(from);
		};

		let context = TransitionContext {
			order_id: &self.order_id,
			from,
			to,
			event: &event,
		};

		for interceptor in self.interceptors.iter_mut() {
			interceptor.before_transition(&context).await?;
		}

		self.state = to;

		for listener in &self.listeners {
			listener(&context);
		}

		if let Some(hooks) = self.entry_hooks.get(&to) {
			let entry = EntryContext {
				order_id: &self.order_id,
				state: to,
				event: &event,
			};
			for hook in hooks {
				hook(&entry);
			}
		}

		Ok(to)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::{Arc, Mutex};

	struct CountingInterceptor {
		calls: Arc<AtomicUsize>,
	}

	#[async_trait]
	impl TransitionInterceptor for CountingInterceptor {
		async fn before_transition(
			&mut self,
			_context: &TransitionContext<'_>,
		) -> Result<(), StateMachineError> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			Ok(())
		}
	}

	struct FailingInterceptor;

	#[async_trait]
	impl TransitionInterceptor for FailingInterceptor {
		async fn before_transition(
			&mut self,
			_context: &TransitionContext<'_>,
		) -> Result<(), StateMachineError> {
			Err(StateMachineError::Persistence(StoreError::Backend(
				"disk full".into(),
			)))
		}
	}

	fn pay() -> OrderEvent {
		OrderEvent::Pay {
			confirmation: "tok1".to_string(),
		}
	}

	#[tokio::test]
	async fn test_valid_event_moves_state() {
		let mut machine = OrderStateMachine::new("order-1", OrderState::Submitted);
		assert_eq!(machine.send_event(pay()).await.unwrap(), OrderState::Paid);
		assert_eq!(machine.state(), OrderState::Paid);
		assert_eq!(
			machine.send_event(OrderEvent::Fulfill).await.unwrap(),
			OrderState::Fulfilled
		);
	}

	#[tokio::test]
	async fn test_unknown_pair_is_a_silent_no_op() {
		let calls = Arc::new(AtomicUsize::new(0));
		let fired = Arc::new(AtomicUsize::new(0));

		let mut machine = OrderStateMachine::new("order-1", OrderState::Submitted);
		machine.add_interceptor(Box::new(CountingInterceptor {
			calls: calls.clone(),
		}));
		let listener_fired = fired.clone();
		machine.on_state_change(move |_| {
			listener_fired.fetch_add(1, Ordering::SeqCst);
		});

		let state = machine.send_event(OrderEvent::Fulfill).await.unwrap();
		assert_eq!(state, OrderState::Submitted);
		assert_eq!(calls.load(Ordering::SeqCst), 0);
		assert_eq!(fired.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn test_cancelled_accepts_nothing() {
		let mut machine = OrderStateMachine::new("order-1", OrderState::Cancelled);
		for event in [pay(), OrderEvent::Fulfill, OrderEvent::Cancel] {
			assert_eq!(
				machine.send_event(event).await.unwrap(),
				OrderState::Cancelled
			);
		}
		assert!(machine.permitted_events().is_empty());
	}

	#[tokio::test]
	async fn test_interceptor_failure_aborts_transition() {
		let fired = Arc::new(AtomicUsize::new(0));

		let mut machine = OrderStateMachine::new("order-1", OrderState::Submitted);
		machine.add_interceptor(Box::new(FailingInterceptor));
		let hook_fired = fired.clone();
		machine.on_entry(OrderState::Paid, move |_| {
			hook_fired.fetch_add(1, Ordering::SeqCst);
		});

		let err = machine.send_event(pay()).await.unwrap_err();
		assert!(matches!(err, StateMachineError::Persistence(_)));
		assert!(err.is_retryable());
		assert_eq!(machine.state(), OrderState::Submitted);
		assert_eq!(fired.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn test_hook_order_and_payload() {
		let log = Arc::new(Mutex::new(Vec::new()));

		let mut machine = OrderStateMachine::new("order-1", OrderState::Submitted);
		let listener_log = log.clone();
		machine.on_state_change(move |ctx| {
			listener_log
				.lock()
				.unwrap()
				.push(format!("change {}->{}", ctx.from, ctx.to));
		});
		let entry_log = log.clone();
		machine.on_entry(OrderState::Paid, move |ctx| {
			entry_log.lock().unwrap().push(format!(
				"enter {} {} {}",
				ctx.state,
				ctx.order_id,
				ctx.event.confirmation().unwrap_or_default()
			));
		});
		let unrelated_log = log.clone();
		machine.on_entry(OrderState::Cancelled, move |_| {
			unrelated_log.lock().unwrap().push("cancelled".to_string());
		});

		machine.send_event(pay()).await.unwrap();

		assert_eq!(
			*log.lock().unwrap(),
			vec![
				"change SUBMITTED->PAID".to_string(),
				"enter PAID order-1 tok1".to_string(),
			]
		);
	}
}
