//! Utility functions shared across the order service crates.

pub mod formatting;

pub use formatting::truncate_id;
