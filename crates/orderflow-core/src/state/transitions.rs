//! Declarative transition table for the order lifecycle.
//!
//! Every legal move is a row `(source, event) -> target`. Pairs that are not
//! listed are refused by the state machine without any side effect.

use once_cell::sync::Lazy;
use orderflow_types::{OrderEventKind, OrderState};
use std::collections::HashMap;

static TRANSITIONS: Lazy<HashMap<(OrderState, OrderEventKind), OrderState>> = Lazy::new(|| {
	use OrderEventKind::*;
	use OrderState::*;

	HashMap::from([
		((Submitted, Pay), Paid),
		((Paid, Fulfill), Fulfilled),
		((Submitted, Cancel), Cancelled),
		((Paid, Cancel), Cancelled),
		((Fulfilled, Cancel), Cancelled),
	])
});

/// Read-only view over the static transition table.
pub struct TransitionTable;

impl TransitionTable {
	/// Returns the target state for `event` in `state`, if the pair is legal.
	pub fn lookup(state: OrderState, event: OrderEventKind) -> Option<OrderState> {
		TRANSITIONS.get(&(state, event)).copied()
	}

	/// Events accepted in `state`, in declaration order.
	pub fn permitted_events(state: OrderState) -> Vec<OrderEventKind> {
		OrderEventKind::all()
			.filter(|event| Self::lookup(state, *event).is_some())
			.collect()
	}

	/// Whether no event can move an order out of `state`.
	pub fn is_terminal(state: OrderState) -> bool {
		Self::permitted_events(state).is_empty()
	}
}
