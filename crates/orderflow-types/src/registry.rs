//! Registry trait for self-registering implementations.

/// Base trait for implementation registries.
///
/// Every pluggable backend module exposes a `Registry` struct implementing
/// this trait, declaring the name used to select it in configuration and the
/// factory that builds it.
pub trait ImplementationRegistry {
	/// Name used in configuration files, e.g. "memory" for
	/// `[storage.implementations.memory]`.
	const NAME: &'static str;

	/// The factory function type this implementation provides.
	type Factory;

	/// Get the factory function for this implementation.
	fn factory() -> Self::Factory;
}
