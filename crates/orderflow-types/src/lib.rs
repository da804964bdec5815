//! Common types for the order lifecycle service.
//!
//! This crate defines the data types shared by every other crate: the
//! persisted order record, lifecycle states and events, storage keys,
//! API request and response bodies, and configuration validation.

/// API types for HTTP endpoints and request/response structures.
pub mod api;
/// Order record, lifecycle states and events.
pub mod order;
/// Registry trait for pluggable implementations.
pub mod registry;
/// Storage types for managing persistent data.
pub mod storage;
/// Utility functions for common formatting.
pub mod utils;
/// Configuration validation types for ensuring type-safe configurations.
pub mod validation;

pub use api::*;
pub use order::*;
pub use registry::ImplementationRegistry;
pub use storage::*;
pub use utils::truncate_id;
pub use validation::*;
