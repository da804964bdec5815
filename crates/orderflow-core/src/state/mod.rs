//! Order lifecycle state machine.
//!
//! The transition table decides which moves are legal, the machine applies
//! them and runs its hooks, and the persistence interceptor writes each
//! accepted move to the entity store before it is committed.

pub mod factory;
pub mod interceptor;
pub mod machine;
pub mod transitions;

pub use factory::OrderStateMachineFactory;
pub use interceptor::PersistenceInterceptor;
pub use machine::{
	EntryContext, EntryHook, OrderStateMachine, StateChangeListener, StateMachineError,
	TransitionContext, TransitionInterceptor,
};
pub use transitions::TransitionTable;
