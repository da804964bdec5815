//! Core of the order lifecycle service.
//!
//! Orders are driven through a persistent state machine: every operation
//! rehydrates the order's machine from the entity store, dispatches one event
//! and writes the resulting state back before it is committed.
//!
//! - [`state`]: transition table, machine instance, hooks and rehydration
//! - [`store`]: versioned persistence of order records
//! - [`service`]: the public order operations
//! - [`builder`] and [`engine`]: wiring from configuration

pub mod builder;
pub mod engine;
pub mod service;
pub mod state;
pub mod store;

pub use builder::{BuilderError, OrderflowBuilder, OrderflowFactories};
pub use engine::{EngineError, OrderflowEngine};
pub use service::{OrderService, OrderServiceError};
pub use state::{OrderStateMachine, OrderStateMachineFactory, StateMachineError, TransitionTable};
pub use store::{EntityStore, StorageEntityStore, StoreError};
