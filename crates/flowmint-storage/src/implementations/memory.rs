//! In-memory storage backend.
//!
//! `put_if_absent` is atomic through the map's entry API, which is what
//! the at-most-once tests lean on.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::{StorageBackend, StorageError};

/// In-memory backend suitable for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryStorage {
	data: DashMap<String, Vec<u8>>,
}

impl MemoryStorage {
	pub fn new() -> Self {
		Self {
			data: DashMap::new(),
		}
	}

	fn key(namespace: &str, id: &str) -> String {
		format!("{}:{}", namespace, id)
	}

	fn prefix(namespace: &str) -> String {
		format!("{}:", namespace)
	}
}

#[async_trait]
impl StorageBackend for MemoryStorage {
	async fn get(&self, namespace: &str, id: &str) -> Result<Vec<u8>, StorageError> {
		self.data
			.get(&Self::key(namespace, id))
			.map(|entry| entry.clone())
			.ok_or(StorageError::NotFound)
	}

	async fn put(&self, namespace: &str, id: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
		self.data.insert(Self::key(namespace, id), bytes);
		Ok(())
	}

	async fn put_if_absent(
		&self,
		namespace: &str,
		id: &str,
		bytes: Vec<u8>,
	) -> Result<(), StorageError> {
		match self.data.entry(Self::key(namespace, id)) {
			Entry::Occupied(_) => Err(StorageError::AlreadyExists),
			Entry::Vacant(vacant) => {
				vacant.insert(bytes);
				Ok(())
			}
		}
	}

	async fn delete(&self, namespace: &str, id: &str) -> Result<(), StorageError> {
		self.data.remove(&Self::key(namespace, id));
		Ok(())
	}

	async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		Ok(self.data.contains_key(&Self::key(namespace, id)))
	}

	async fn list_ids(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
		let prefix = Self::prefix(namespace);
		let mut ids: Vec<String> = self
			.data
			.iter()
			.filter_map(|entry| entry.key().strip_prefix(&prefix).map(str::to_string))
			.collect();
		ids.sort();
		Ok(ids)
	}
}
