//! Main entry point for the order lifecycle service.
//!
//! Loads the configuration, wires the storage backend into the order engine
//! and serves the HTTP API next to the periodic storage cleanup. With
//! `--demo` it instead drives one sample order through its lifecycle and
//! exits.

use clap::Parser;
use orderflow_config::Config;
use orderflow_core::{OrderflowBuilder, OrderflowEngine, OrderflowFactories};
use std::path::PathBuf;
use std::sync::Arc;

mod apis;
mod runner;
mod server;

use orderflow_storage::implementations::file::create_storage as create_file_storage;
use orderflow_storage::implementations::memory::create_storage as create_memory_storage;

/// Command-line arguments for the order service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,

	/// Run the sample order walkthrough and exit
	#[arg(long)]
	demo: bool,
}

/// Main entry point for the order service.
///
/// This function:
/// 1. Parses command-line arguments
/// 2. Initializes logging infrastructure
/// 3. Loads configuration from file
/// 4. Builds the order engine with the configured storage
/// 5. Runs the demo, or serves the API until interrupted
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	let default_directive = args.log_level.to_string();
	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	tracing::info!("Started order service");

	let config_path = args
		.config
		.to_str()
		.ok_or("Configuration path is not valid UTF-8")?;
	let config = Config::from_file(config_path).await?;
	tracing::info!("Loaded configuration [{}]", config.service.id);

	let engine = Arc::new(build_engine(config.clone())?);

	if args.demo {
		let record = runner::run_demo(&engine).await?;
		tracing::info!("Demo finished in state {}", record.state);
		return Ok(());
	}

	match config.api.filter(|api| api.enabled) {
		Some(api_config) => {
			let cleanup_task = engine.run_cleanup();
			let api_task = server::start_server(api_config, Arc::clone(&engine));

			tokio::select! {
				_ = cleanup_task => {
					tracing::info!("Storage cleanup finished");
				}
				result = api_task => {
					tracing::info!("API server finished");
					result?;
				}
				_ = tokio::signal::ctrl_c() => {
					tracing::info!("Shutdown requested");
				}
			}
		},
		None => {
			tracing::info!("API disabled, running storage maintenance only");
			tokio::select! {
				_ = engine.run_cleanup() => {}
				_ = tokio::signal::ctrl_c() => {
					tracing::info!("Shutdown requested");
				}
			}
		},
	}

	tracing::info!("Stopped order service");
	Ok(())
}

/// Macro to create a factory HashMap with the appropriate type aliases
macro_rules! create_factory_map {
    ($interface:path, $error:path, $( $name:literal => $factory:expr ),* $(,)?) => {{
        let mut factories = std::collections::HashMap::new();
        $(
            factories.insert(
                $name.to_string(),
                $factory as fn(&toml::Value) -> Result<Box<dyn $interface>, $error>
            );
        )*
        factories
    }};
}

/// Builds the order engine with the available storage backends.
fn build_engine(config: Config) -> Result<OrderflowEngine, Box<dyn std::error::Error>> {
	let storage_factories = create_factory_map!(
		orderflow_storage::StorageInterface,
		orderflow_storage::StorageError,
		"file" => create_file_storage,
		"memory" => create_memory_storage,
	);

	let factories = OrderflowFactories { storage_factories };

	Ok(OrderflowBuilder::new(config).build(factories)?)
}

#[cfg(test)]
mod tests {
	use super::*;
	use orderflow_config::builders::ConfigBuilder;
	use tempfile::tempdir;

	#[test]
	fn test_args_defaults() {
		let args = Args::parse_from(["orderflow"]);
		assert_eq!(args.config, PathBuf::from("config.toml"));
		assert_eq!(args.log_level, "info");
		assert!(!args.demo);
	}

	#[test]
	fn test_args_custom_values() {
		let args = Args::parse_from([
			"orderflow",
			"--config",
			"custom.toml",
			"--log-level",
			"debug",
			"--demo",
		]);
		assert_eq!(args.config, PathBuf::from("custom.toml"));
		assert_eq!(args.log_level, "debug");
		assert!(args.demo);
	}

	#[test]
	fn test_create_factory_map_macro() {
		let factories = create_factory_map!(
			orderflow_storage::StorageInterface,
			orderflow_storage::StorageError,
			"memory" => create_memory_storage,
			"file" => create_file_storage,
		);

		assert_eq!(factories.len(), 2);
		assert!(factories.contains_key("memory"));
		assert!(factories.contains_key("file"));
	}

	#[tokio::test]
	async fn test_build_engine_with_minimal_config() {
		let engine = build_engine(ConfigBuilder::new().build()).unwrap();
		assert_eq!(engine.config().service.id, "orders-test");
	}

	#[tokio::test]
	async fn test_demo_from_config_file() {
		let temp_dir = tempdir().unwrap();
		let config_path = temp_dir.path().join("config.toml");
		let storage_path = temp_dir.path().join("orders");

		let config_content = format!(
			r#"
[service]
id = "orders-file"

[storage]
primary = "file"
cleanup_interval_seconds = 120

[storage.implementations.file]
storage_path = "{}"
"#,
			storage_path.display()
		);
		std::fs::write(&config_path, config_content).unwrap();

		let config = Config::from_file(config_path.to_str().unwrap())
			.await
			.unwrap();
		assert_eq!(config.service.id, "orders-file");

		let engine = build_engine(config).unwrap();
		let record = runner::run_demo(&engine).await.unwrap();
		assert_eq!(record.state, "FULFILLED");
		assert!(storage_path.exists());
	}
}
