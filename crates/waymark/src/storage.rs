// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Key-value storage backends for identity, session and consent records.
//!
//! Two roles exist: *durable* storage survives restarts (identity, first
//! touch, consent, visit metrics, the handoff record) and *ephemeral* storage
//! lives for one browsing context (session, last touch, continued session).
//! Values are JSON strings under `waymark:*` keys.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::StorageError;

/// Storage keys.
pub mod keys {
	pub const IDENTITY: &str = "waymark:identity";
	pub const FIRST_TOUCH: &str = "waymark:first_touch";
	pub const CONSENT: &str = "waymark:consent";
	pub const VISIT_METRICS: &str = "waymark:visit_metrics";
	pub const CROSS_PLATFORM: &str = "waymark:cross_platform";

	pub const SESSION: &str = "waymark:session";
	pub const LAST_TOUCH: &str = "waymark:last_touch";
	pub const CONTINUED_SESSION: &str = "waymark:continued_session";
}

/// Synchronous string store. Implementations must be safe to share across
/// tasks.
pub trait KeyValueStore: Send + Sync + std::fmt::Debug {
	fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

	fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

	fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Reads and decodes a JSON value.
pub fn read_json<T: DeserializeOwned>(
	store: &dyn KeyValueStore,
	key: &str,
) -> Result<Option<T>, StorageError> {
	match store.get(key)? {
		Some(raw) => serde_json::from_str(&raw)
			.map(Some)
			.map_err(|source| StorageError::Corrupt {
				key: key.to_string(),
				source,
			}),
		None => Ok(None),
	}
}

pub fn write_json<T: Serialize>(
	store: &dyn KeyValueStore,
	key: &str,
	value: &T,
) -> Result<(), StorageError> {
	let raw = serde_json::to_string(value).map_err(|source| StorageError::Serialize {
		key: key.to_string(),
		source,
	})?;
	store.set(key, &raw)
}

/// The durable and ephemeral stores used by one tracker.
#[derive(Debug, Clone)]
pub struct Storage {
	pub durable: Arc<dyn KeyValueStore>,
	pub ephemeral: Arc<dyn KeyValueStore>,
}

impl Storage {
	pub fn new(durable: Arc<dyn KeyValueStore>, ephemeral: Arc<dyn KeyValueStore>) -> Self {
		Self { durable, ephemeral }
	}

	#[must_use]
	pub fn in_memory() -> Self {
		Self {
			durable: Arc::new(MemoryStore::new()),
			ephemeral: Arc::new(MemoryStore::new()),
		}
	}

	/// File-backed durable storage under `dir`, falling back to memory when
	/// the disk is unwritable. Ephemeral storage is always in memory.
	pub fn on_disk(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
		let file = FileStore::open(dir.as_ref().join("durable.json"))?;
		Ok(Self {
			durable: Arc::new(FallbackStore::new(
				Arc::new(file),
				Arc::new(MemoryStore::new()),
			)),
			ephemeral: Arc::new(MemoryStore::new()),
		})
	}
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
	entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Drops every entry.
	pub fn clear(&self) {
		self.entries.write().clear();
	}

	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.read().is_empty()
	}
}

impl KeyValueStore for MemoryStore {
	fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
		Ok(self.entries.read().get(key).cloned())
	}

	fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
		self
			.entries
			.write()
			.insert(key.to_string(), value.to_string());
		Ok(())
	}

	fn remove(&self, key: &str) -> Result<(), StorageError> {
		self.entries.write().remove(key);
		Ok(())
	}
}

/// A single JSON document on disk holding every key.
///
/// Reads are served from memory; each write rewrites the document through a
/// temporary file and an atomic rename.
#[derive(Debug)]
pub struct FileStore {
	path: PathBuf,
	entries: RwLock<BTreeMap<String, String>>,
}

impl FileStore {
	/// Opens the document at `path`, creating parent directories. A missing
	/// file is an empty store; an unreadable one is an error.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
		let path = path.into();
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent).map_err(|source| StorageError::Io {
				path: parent.to_path_buf(),
				source,
			})?;
		}

		let entries = match std::fs::read_to_string(&path) {
			Ok(contents) if contents.trim().is_empty() => BTreeMap::new(),
			Ok(contents) => {
				serde_json::from_str(&contents).map_err(|source| StorageError::Corrupt {
					key: path.display().to_string(),
					source,
				})?
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
			Err(source) => return Err(StorageError::Io { path, source }),
		};

		debug!(path = ?path, keys = entries.len(), "opened file store");
		Ok(Self {
			path,
			entries: RwLock::new(entries),
		})
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
		let contents =
			serde_json::to_string_pretty(entries).map_err(|source| StorageError::Serialize {
				key: self.path.display().to_string(),
				source,
			})?;

		let temp_path = self.path.with_extension("tmp");
		let io_err = |source| StorageError::Io {
			path: temp_path.clone(),
			source,
		};
		std::fs::write(&temp_path, contents.as_bytes()).map_err(io_err)?;

		#[cfg(unix)]
		{
			use std::os::unix::fs::PermissionsExt;
			let perms = std::fs::Permissions::from_mode(0o600);
			if let Err(e) = std::fs::set_permissions(&temp_path, perms) {
				warn!(path = ?temp_path, error = %e, "failed to restrict store permissions");
			}
		}

		std::fs::rename(&temp_path, &self.path).map_err(|source| StorageError::Io {
			path: self.path.clone(),
			source,
		})
	}
}

impl KeyValueStore for FileStore {
	fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
		Ok(self.entries.read().get(key).cloned())
	}

	fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
		let mut entries = self.entries.write();
		let previous = entries.insert(key.to_string(), value.to_string());
		if let Err(e) = self.persist(&entries) {
			match previous {
				Some(previous) => entries.insert(key.to_string(), previous),
				None => entries.remove(key),
			};
			return Err(e);
		}
		Ok(())
	}

	fn remove(&self, key: &str) -> Result<(), StorageError> {
		let mut entries = self.entries.write();
		if entries.remove(key).is_some() {
			self.persist(&entries)?;
		}
		Ok(())
	}
}

/// Tries `primary` first and falls back to `secondary` when it fails.
#[derive(Debug)]
pub struct FallbackStore {
	primary: Arc<dyn KeyValueStore>,
	secondary: Arc<dyn KeyValueStore>,
}

impl FallbackStore {
	pub fn new(primary: Arc<dyn KeyValueStore>, secondary: Arc<dyn KeyValueStore>) -> Self {
		Self { primary, secondary }
	}
}

impl KeyValueStore for FallbackStore {
	fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
		match self.primary.get(key) {
			Ok(Some(value)) => Ok(Some(value)),
			Ok(None) => self.secondary.get(key),
			Err(e) => {
				warn!(key, error = %e, "primary store read failed, using fallback");
				self.secondary.get(key)
			}
		}
	}

	fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
		match self.primary.set(key, value) {
			Ok(()) => {
				let _ = self.secondary.remove(key);
				Ok(())
			}
			Err(e) => {
				warn!(key, error = %e, "primary store write failed, using fallback");
				self.secondary.set(key, value)
			}
		}
	}

	fn remove(&self, key: &str) -> Result<(), StorageError> {
		let primary = self.primary.remove(key);
		self.secondary.remove(key)?;
		primary
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde::Deserialize;
	use tempfile::TempDir;

	#[derive(Debug, PartialEq, Serialize, Deserialize)]
	struct Record {
		name: String,
		count: u32,
	}

	/// Fails every call.
	#[derive(Debug)]
	struct BrokenStore;

	impl KeyValueStore for BrokenStore {
		fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
			Err(StorageError::Unavailable("broken".into()))
		}

		fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
			Err(StorageError::Unavailable("broken".into()))
		}

		fn remove(&self, _key: &str) -> Result<(), StorageError> {
			Err(StorageError::Unavailable("broken".into()))
		}
	}

	#[test]
	fn memory_store_json_roundtrip() {
		let store = MemoryStore::new();
		let record = Record {
			name: "a".into(),
			count: 2,
		};
		write_json(&store, keys::IDENTITY, &record).unwrap();
		let loaded: Option<Record> = read_json(&store, keys::IDENTITY).unwrap();
		assert_eq!(loaded, Some(record));

		store.remove(keys::IDENTITY).unwrap();
		assert!(store.is_empty());
	}

	#[test]
	fn corrupt_value_is_reported() {
		let store = MemoryStore::new();
		store.set(keys::SESSION, "{not json").unwrap();
		let result: Result<Option<Record>, _> = read_json(&store, keys::SESSION);
		assert!(matches!(result, Err(StorageError::Corrupt { .. })));
	}

	#[test]
	fn file_store_survives_reopen() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("nested").join("durable.json");

		let store = FileStore::open(&path).unwrap();
		store.set(keys::IDENTITY, "\"uid_1\"").unwrap();
		store.set(keys::CONSENT, "accepted").unwrap();
		store.remove(keys::CONSENT).unwrap();
		drop(store);

		let reopened = FileStore::open(&path).unwrap();
		assert_eq!(
			reopened.get(keys::IDENTITY).unwrap().as_deref(),
			Some("\"uid_1\"")
		);
		assert_eq!(reopened.get(keys::CONSENT).unwrap(), None);
		assert!(!path.with_extension("tmp").exists());
	}

	#[test]
	fn file_store_rejects_corrupt_document() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("durable.json");
		std::fs::write(&path, "[[[").unwrap();
		assert!(matches!(
			FileStore::open(&path),
			Err(StorageError::Corrupt { .. })
		));
	}

	#[test]
	fn fallback_store_uses_secondary_when_primary_fails() {
		let secondary = Arc::new(MemoryStore::new());
		let store = FallbackStore::new(Arc::new(BrokenStore), secondary.clone());

		store.set(keys::IDENTITY, "v").unwrap();
		assert_eq!(store.get(keys::IDENTITY).unwrap().as_deref(), Some("v"));
		assert_eq!(secondary.len(), 1);
	}

	#[test]
	fn fallback_store_prefers_primary() {
		let primary = Arc::new(MemoryStore::new());
		let secondary = Arc::new(MemoryStore::new());
		secondary.set(keys::IDENTITY, "stale").unwrap();
		let store = FallbackStore::new(primary.clone(), secondary.clone());

		store.set(keys::IDENTITY, "fresh").unwrap();
		assert_eq!(store.get(keys::IDENTITY).unwrap().as_deref(), Some("fresh"));
		assert!(secondary.is_empty());
	}

	#[test]
	fn on_disk_storage_keeps_ephemeral_in_memory() {
		let dir = TempDir::new().unwrap();
		let storage = Storage::on_disk(dir.path()).unwrap();
		storage.durable.set(keys::IDENTITY, "\"uid_1\"").unwrap();
		storage.ephemeral.set(keys::SESSION, "{}").unwrap();

		let contents = std::fs::read_to_string(dir.path().join("durable.json")).unwrap();
		assert!(contents.contains(keys::IDENTITY));
		assert!(!contents.contains(keys::SESSION));
	}
}
