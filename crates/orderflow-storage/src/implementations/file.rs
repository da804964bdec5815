//! File-based storage backend.
//!
//! Stores one file per key under a base directory. Every file starts with a
//! fixed-size header carrying an expiry timestamp, writes go through a
//! temporary file and a rename, and read-modify-write cycles hold an
//! exclusive advisory lock on a per-key lock file.

use crate::{BytesUpdate, StorageError, StorageFactory, StorageInterface, StorageRegistry};
use async_trait::async_trait;
use fs2::FileExt;
use orderflow_types::{
	ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, StorageKey, ValidationError,
};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::fs;

fn unix_now() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or_default()
}

/// Fixed-size file header for TTL support.
///
/// Binary layout (32 bytes total):
/// - [0-3]: Magic bytes "ORDF"
/// - [4-5]: Version (u16, little-endian)
/// - [6-13]: Expiration timestamp (u64, little-endian, Unix seconds, 0 = never)
/// - [14-31]: Reserved
#[derive(Debug, Clone, PartialEq, Eq)]
struct FileHeader {
	version: u16,
	expires_at: u64,
}

impl FileHeader {
	const MAGIC: &'static [u8; 4] = b"ORDF";
	const VERSION: u16 = 1;
	const SIZE: usize = 32;

	/// Creates a new header with the given TTL. A zero TTL never expires.
	fn new(ttl: Duration) -> Self {
		let expires_at = if ttl.is_zero() {
			0
		} else {
			unix_now().saturating_add(ttl.as_secs())
		};

		Self {
			version: Self::VERSION,
			expires_at,
		}
	}

	fn serialize(&self) -> [u8; Self::SIZE] {
		let mut bytes = [0u8; Self::SIZE];
		bytes[0..4].copy_from_slice(Self::MAGIC);
		bytes[4..6].copy_from_slice(&self.version.to_le_bytes());
		bytes[6..14].copy_from_slice(&self.expires_at.to_le_bytes());
		bytes
	}

	fn deserialize(bytes: &[u8]) -> Result<Self, StorageError> {
		if bytes.len() < Self::SIZE {
			return Err(StorageError::Backend("File too small for header".into()));
		}
		if &bytes[0..4] != Self::MAGIC {
			return Err(StorageError::Backend("Unrecognized file format".into()));
		}

		let version = u16::from_le_bytes([bytes[4], bytes[5]]);
		if version > Self::VERSION {
			return Err(StorageError::Backend(format!(
				"Unsupported file version: {}",
				version
			)));
		}

		let mut expires_bytes = [0u8; 8];
		expires_bytes.copy_from_slice(&bytes[6..14]);

		Ok(Self {
			version,
			expires_at: u64::from_le_bytes(expires_bytes),
		})
	}

	fn is_expired(&self) -> bool {
		self.expires_at != 0 && unix_now() >= self.expires_at
	}
}

/// Splits file contents into the payload, or `None` when the entry expired.
fn decode_payload(data: Vec<u8>) -> Result<Option<Vec<u8>>, StorageError> {
	let header = FileHeader::deserialize(&data)?;
	if header.is_expired() {
		return Ok(None);
	}
	Ok(Some(data[FileHeader::SIZE..].to_vec()))
}

fn encode_payload(value: &[u8], ttl: Duration) -> Vec<u8> {
	let mut file_data = Vec::with_capacity(FileHeader::SIZE + value.len());
	file_data.extend_from_slice(&FileHeader::new(ttl).serialize());
	file_data.extend_from_slice(value);
	file_data
}

/// Blocking read used while the key lock is held.
fn read_payload_blocking(path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
	match std::fs::read(path) {
		Ok(data) => decode_payload(data),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(StorageError::Backend(e.to_string())),
	}
}

/// Interval between attempts to take a contended key lock.
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(5);

/// Takes the exclusive key lock, giving up once `deadline` has passed.
fn lock_until(lock_file: &File, deadline: Instant) -> Result<(), StorageError> {
	loop {
		match FileExt::try_lock_exclusive(lock_file) {
			Ok(()) => return Ok(()),
			Err(e) if e.kind() == fs2::lock_contended_error().kind() => {},
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		}
		if Instant::now() >= deadline {
			return Err(StorageError::DeadlineExceeded);
		}
		std::thread::sleep(LOCK_RETRY_INTERVAL);
	}
}

/// Blocking temp-file-and-rename write used while the key lock is held.
fn write_payload_blocking(path: &Path, value: &[u8], ttl: Duration) -> Result<(), StorageError> {
	let temp_path = path.with_extension("tmp");
	std::fs::write(&temp_path, encode_payload(value, ttl))
		.map_err(|e| StorageError::Backend(e.to_string()))?;
	std::fs::rename(&temp_path, path).map_err(|e| StorageError::Backend(e.to_string()))
}

/// TTL configuration for different storage keys.
#[derive(Debug, Clone, Default)]
pub struct TtlConfig {
	ttls: HashMap<StorageKey, Duration>,
}

impl TtlConfig {
	/// Reads `ttl_<namespace>` entries from the backend configuration.
	fn from_config(config: &toml::Value) -> Self {
		let mut ttls = HashMap::new();

		if let Some(table) = config.as_table() {
			for storage_key in StorageKey::all() {
				let config_key = format!("ttl_{}", storage_key.as_str());
				if let Some(ttl_value) = table
					.get(&config_key)
					.and_then(|v| v.as_integer())
					.and_then(|v| u64::try_from(v).ok())
				{
					ttls.insert(storage_key, Duration::from_secs(ttl_value));
				}
			}
		}

		Self { ttls }
	}

	fn get_ttl(&self, storage_key: StorageKey) -> Duration {
		self.ttls
			.get(&storage_key)
			.copied()
			.unwrap_or(Duration::ZERO)
	}
}

/// File-based storage implementation.
pub struct FileStorage {
	/// Base directory path for storing files.
	base_path: PathBuf,
	/// TTL configuration for different storage keys.
	ttl_config: TtlConfig,
}

impl FileStorage {
	pub fn new(base_path: PathBuf, ttl_config: TtlConfig) -> Self {
		Self {
			base_path,
			ttl_config,
		}
	}

	/// Converts a storage key to a filesystem-safe file path.
	fn get_file_path(&self, key: &str) -> PathBuf {
		let safe_key = key.replace(['/', ':', '\\'], "_");
		self.base_path.join(format!("{}.bin", safe_key))
	}

	/// Gets the TTL for a given key based on its namespace.
	fn get_ttl_for_key(&self, key: &str) -> Duration {
		// "orders:123" -> "orders"
		let namespace = key.split(':').next().unwrap_or("");

		namespace
			.parse::<StorageKey>()
			.map(|sk| self.ttl_config.get_ttl(sk))
			.unwrap_or(Duration::ZERO)
	}

	async fn ensure_base_dir(&self) -> Result<(), StorageError> {
		fs::create_dir_all(&self.base_path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))
	}

	/// Removes all expired files from storage.
	async fn cleanup_expired_files(&self) -> Result<usize, StorageError> {
		let mut removed = 0;
		let mut entries = match fs::read_dir(&self.base_path).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};

		while let Some(entry) = entries
			.next_entry()
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?
		{
			let path = entry.path();
			if path.extension() != Some(std::ffi::OsStr::new("bin")) {
				continue;
			}

			let data = match fs::read(&path).await {
				Ok(data) => data,
				Err(e) => {
					tracing::debug!("Skipping file {:?}: could not be read: {}", path, e);
					continue;
				},
			};

			match FileHeader::deserialize(&data) {
				Ok(header) if header.is_expired() => {
					if let Err(e) = fs::remove_file(&path).await {
						tracing::warn!("Failed to remove expired file {:?}: {}", path, e);
						continue;
					}
					removed += 1;

					let lock_path = path.with_extension("lock");
					match fs::remove_file(&lock_path).await {
						Ok(()) => {},
						Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
						Err(e) => tracing::warn!("Failed to remove lock file {:?}: {}", lock_path, e),
					}
				},
				Ok(_) => {},
				Err(e) => tracing::debug!("Skipping file {:?}: {}", path, e),
			}
		}
		Ok(removed)
	}
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let path = self.get_file_path(key);

		let data = match fs::read(&path).await {
			Ok(data) => data,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				return Err(StorageError::NotFound)
			},
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};

		decode_payload(data)?.ok_or(StorageError::NotFound)
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		self.ensure_base_dir().await?;

		let path = self.get_file_path(key);
		let ttl = ttl.unwrap_or_else(|| self.get_ttl_for_key(key));

		let temp_path = path.with_extension("tmp");
		fs::write(&temp_path, encode_payload(&value, ttl))
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;

		fs::rename(&temp_path, &path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))
	}

	async fn update_bytes(
		&self,
		key: &str,
		update: BytesUpdate,
		ttl: Option<Duration>,
		deadline: Instant,
	) -> Result<Vec<u8>, StorageError> {
		self.ensure_base_dir().await?;

		let path = self.get_file_path(key);
		let lock_path = path.with_extension("lock");
		let ttl = ttl.unwrap_or_else(|| self.get_ttl_for_key(key));

		tokio::task::spawn_blocking(move || {
			let lock_file = OpenOptions::new()
				.create(true)
				.truncate(false)
				.write(true)
				.open(&lock_path)
				.map_err(|e| StorageError::Backend(e.to_string()))?;
			lock_until(&lock_file, deadline)?;

			let result = read_payload_blocking(&path)
				.and_then(update)
				.and_then(|next| {
					if Instant::now() >= deadline {
						return Err(StorageError::DeadlineExceeded);
					}
					write_payload_blocking(&path, &next, ttl).map(|_| next)
				});

			if let Err(e) = FileExt::unlock(&lock_file) {
				tracing::warn!("Failed to release lock {:?}: {}", lock_path, e);
			}
			result
		})
		.await
		.map_err(|e| StorageError::Backend(e.to_string()))?
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let path = self.get_file_path(key);

		match fs::remove_file(&path).await {
			Ok(_) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		match self.get_bytes(key).await {
			Ok(_) => Ok(true),
			Err(StorageError::NotFound) => Ok(false),
			Err(e) => Err(e),
		}
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(FileStorageSchema)
	}

	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		self.cleanup_expired_files().await
	}
}

/// Configuration schema for FileStorage.
pub struct FileStorageSchema;

impl ConfigSchema for FileStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let mut optional_fields = vec![Field::new("storage_path", FieldType::String)];

		for storage_key in StorageKey::all() {
			optional_fields.push(Field::new(
				format!("ttl_{}", storage_key.as_str()),
				FieldType::Integer {
					min: Some(0),
					max: None,
				},
			));
		}

		Schema::new(vec![], optional_fields).validate(config)
	}
}

/// Factory function to create a file storage backend from configuration.
///
/// Configuration parameters:
/// - `storage_path`: Base directory for file storage (default: "./data/orders")
/// - `ttl_orders`: TTL in seconds for order records (default: 0, never expire)
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	FileStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;

	let storage_path = config
		.get("storage_path")
		.and_then(|v| v.as_str())
		.unwrap_or("./data/orders")
		.to_string();

	Ok(Box::new(FileStorage::new(
		PathBuf::from(storage_path),
		TtlConfig::from_config(config),
	)))
}

/// Registry for the file storage implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "file";
	type Factory = StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl StorageRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;
	use tempfile::TempDir;

	fn storage(dir: &TempDir) -> FileStorage {
		FileStorage::new(dir.path().join("orders"), TtlConfig::default())
	}

	fn deadline() -> Instant {
		Instant::now() + Duration::from_secs(5)
	}

	#[test]
	fn test_header_layout() {
		let header = FileHeader::new(Duration::ZERO);
		let bytes = header.serialize();
		assert_eq!(&bytes[0..4], b"ORDF");
		assert_eq!(FileHeader::deserialize(&bytes).unwrap(), header);
		assert!(!header.is_expired());
	}

	#[test]
	fn test_header_rejects_foreign_file() {
		let result = FileHeader::deserialize(&[0u8; FileHeader::SIZE]);
		assert!(result.is_err());
	}

	#[tokio::test]
	async fn test_set_get_delete() {
		let dir = TempDir::new().unwrap();
		let storage = storage(&dir);

		storage
			.set_bytes("orders:abc", b"payload".to_vec(), None)
			.await
			.unwrap();
		assert_eq!(
			storage.get_bytes("orders:abc").await.unwrap(),
			b"payload".to_vec()
		);
		assert!(storage.exists("orders:abc").await.unwrap());

		storage.delete("orders:abc").await.unwrap();
		assert!(matches!(
			storage.get_bytes("orders:abc").await,
			Err(StorageError::NotFound)
		));
	}

	#[tokio::test]
	async fn test_survives_new_instance() {
		let dir = TempDir::new().unwrap();
		storage(&dir)
			.set_bytes("orders:restart", b"kept".to_vec(), None)
			.await
			.unwrap();

		let reopened = storage(&dir);
		assert_eq!(
			reopened.get_bytes("orders:restart").await.unwrap(),
			b"kept".to_vec()
		);
	}

	#[tokio::test]
	async fn test_expired_entries_are_hidden_and_cleaned() {
		let dir = TempDir::new().unwrap();
		let storage = storage(&dir);
		storage.ensure_base_dir().await.unwrap();

		let mut expired = FileHeader::new(Duration::ZERO);
		expired.expires_at = 1;
		let mut data = expired.serialize().to_vec();
		data.extend_from_slice(b"old");
		let path = storage.get_file_path("orders:old");
		std::fs::write(&path, data).unwrap();
		std::fs::write(path.with_extension("lock"), b"").unwrap();

		assert!(matches!(
			storage.get_bytes("orders:old").await,
			Err(StorageError::NotFound)
		));
		assert_eq!(storage.cleanup_expired().await.unwrap(), 1);
		assert!(!path.exists());
		assert!(!path.with_extension("lock").exists());
	}

	#[tokio::test]
	async fn test_update_bytes_serializes_writers() {
		let dir = TempDir::new().unwrap();
		let storage = Arc::new(storage(&dir));

		let mut handles = Vec::new();
		for _ in 0..8 {
			let storage = Arc::clone(&storage);
			handles.push(tokio::spawn(async move {
				storage
					.update_bytes(
						"orders:count",
						Box::new(|current| {
							let count = current.map(|bytes| bytes.len()).unwrap_or(0);
							Ok(vec![b'x'; count + 1])
						}),
						None,
						deadline(),
					)
					.await
					.unwrap();
			}));
		}
		for handle in handles {
			handle.await.unwrap();
		}

		assert_eq!(storage.get_bytes("orders:count").await.unwrap().len(), 8);
	}

	#[tokio::test]
	async fn test_update_gives_up_while_lock_is_held() {
		let dir = TempDir::new().unwrap();
		let storage = storage(&dir);
		storage
			.set_bytes("orders:held", b"before".to_vec(), None)
			.await
			.unwrap();

		let lock_path = storage.get_file_path("orders:held").with_extension("lock");
		let holder = std::fs::File::create(&lock_path).unwrap();
		FileExt::lock_exclusive(&holder).unwrap();

		let started = Instant::now();
		let result = storage
			.update_bytes(
				"orders:held",
				Box::new(|_| Ok(b"after".to_vec())),
				None,
				Instant::now() + Duration::from_millis(50),
			)
			.await;
		assert!(matches!(result, Err(StorageError::DeadlineExceeded)));
		assert!(started.elapsed() < Duration::from_secs(5));

		FileExt::unlock(&holder).unwrap();
		// Nothing may land after the caller was told the update failed.
		tokio::time::sleep(Duration::from_millis(50)).await;
		assert_eq!(
			storage.get_bytes("orders:held").await.unwrap(),
			b"before".to_vec()
		);

		let written = storage
			.update_bytes(
				"orders:held",
				Box::new(|_| Ok(b"after".to_vec())),
				None,
				deadline(),
			)
			.await
			.unwrap();
		assert_eq!(written, b"after".to_vec());
	}

	#[tokio::test]
	async fn test_update_past_deadline_does_not_write() {
		let dir = TempDir::new().unwrap();
		let storage = storage(&dir);

		let result = storage
			.update_bytes(
				"orders:late",
				Box::new(|_| Ok(b"late".to_vec())),
				None,
				Instant::now(),
			)
			.await;

		assert!(matches!(result, Err(StorageError::DeadlineExceeded)));
		assert!(!storage.get_file_path("orders:late").exists());
	}

	#[test]
	fn test_ttl_config_from_toml() {
		let config: toml::Value = toml::from_str("ttl_orders = 60").unwrap();
		let ttl = TtlConfig::from_config(&config);
		assert_eq!(ttl.get_ttl(StorageKey::Orders), Duration::from_secs(60));
	}

	#[test]
	fn test_factory_validates_schema() {
		let bad: toml::Value = toml::from_str("ttl_orders = -5").unwrap();
		assert!(create_storage(&bad).is_err());

		let good: toml::Value = toml::from_str("storage_path = \"/tmp/orders\"").unwrap();
		assert!(create_storage(&good).is_ok());
	}
}
