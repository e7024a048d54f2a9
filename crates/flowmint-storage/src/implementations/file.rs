//! File-based storage backend.
//!
//! One directory per namespace, one JSON file per row. Plain writes go
//! through a temp file and an atomic rename; `put_if_absent` relies on
//! `O_EXCL` (`create_new`) so two processes cannot both win the same id.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::{StorageBackend, StorageError};

/// Filesystem backend for single-node durable deployments.
pub struct FileStorage {
	base_path: PathBuf,
}

impl FileStorage {
	pub fn new(base_path: PathBuf) -> Self {
		Self { base_path }
	}

	/// Ids may contain characters that are not filesystem-safe (job keys
	/// embed `:`); the mapping only needs to be consistent, not
	/// reversible, because every row carries its own identity.
	fn safe_id(id: &str) -> String {
		id.replace(['/', ':', '\\'], "_")
	}

	fn file_path(&self, namespace: &str, id: &str) -> PathBuf {
		self.base_path
			.join(namespace)
			.join(format!("{}.json", Self::safe_id(id)))
	}

	async fn ensure_namespace(&self, namespace: &str) -> Result<(), StorageError> {
		fs::create_dir_all(self.base_path.join(namespace))
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))
	}
}

#[async_trait]
impl StorageBackend for FileStorage {
	async fn get(&self, namespace: &str, id: &str) -> Result<Vec<u8>, StorageError> {
		let path = self.file_path(namespace, id);
		match fs::read(&path).await {
			Ok(data) => Ok(data),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	async fn put(&self, namespace: &str, id: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
		self.ensure_namespace(namespace).await?;
		let path = self.file_path(namespace, id);

		// Write through a temp file then rename so readers never observe
		// a torn row.
		let temp_path = path.with_extension("tmp");
		fs::write(&temp_path, &bytes)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;
		fs::rename(&temp_path, &path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;
		Ok(())
	}

	async fn put_if_absent(
		&self,
		namespace: &str,
		id: &str,
		bytes: Vec<u8>,
	) -> Result<(), StorageError> {
		self.ensure_namespace(namespace).await?;
		let path = self.file_path(namespace, id);

		let mut file = match fs::OpenOptions::new()
			.write(true)
			.create_new(true)
			.open(&path)
			.await
		{
			Ok(file) => file,
			Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
				return Err(StorageError::AlreadyExists)
			}
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};

		file.write_all(&bytes)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;
		file.flush()
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;
		Ok(())
	}

	async fn delete(&self, namespace: &str, id: &str) -> Result<(), StorageError> {
		let path = self.file_path(namespace, id);
		match fs::remove_file(&path).await {
			Ok(_) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		Ok(self.file_path(namespace, id).exists())
	}

	async fn list_ids(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
		let dir = self.base_path.join(namespace);
		let mut entries = match fs::read_dir(&dir).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};

		let mut ids = Vec::new();
		while let Some(entry) = entries
			.next_entry()
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?
		{
			let name = entry.file_name().to_string_lossy().to_string();
			if let Some(stem) = name.strip_suffix(".json") {
				ids.push(stem.to_string());
			}
		}
		ids.sort();
		Ok(ids)
	}
}

/// Factory function to create a storage backend from configuration.
pub fn create_file_storage(path: impl Into<PathBuf>) -> Box<dyn StorageBackend> {
	Box::new(FileStorage::new(path.into()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn roundtrip_and_listing() {
		let dir = tempfile::tempdir().unwrap();
		let storage = FileStorage::new(dir.path().to_path_buf());

		storage.put("locks", "intent-1:60000", b"row".to_vec()).await.unwrap();
		assert_eq!(storage.get("locks", "intent-1:60000").await.unwrap(), b"row");

		// The listed id is the sanitized form and stays fetchable.
		let ids = storage.list_ids("locks").await.unwrap();
		assert_eq!(ids, vec!["intent-1_60000"]);
		assert_eq!(storage.get("locks", &ids[0]).await.unwrap(), b"row");
	}

	#[tokio::test]
	async fn put_if_absent_is_exclusive() {
		let dir = tempfile::tempdir().unwrap();
		let storage = FileStorage::new(dir.path().to_path_buf());

		storage
			.put_if_absent("locks", "key", b"winner".to_vec())
			.await
			.unwrap();
		let err = storage
			.put_if_absent("locks", "key", b"loser".to_vec())
			.await
			.unwrap_err();

		assert!(matches!(err, StorageError::AlreadyExists));
		assert_eq!(storage.get("locks", "key").await.unwrap(), b"winner");
	}

	#[tokio::test]
	async fn missing_namespace_lists_empty() {
		let dir = tempfile::tempdir().unwrap();
		let storage = FileStorage::new(dir.path().to_path_buf());
		assert!(storage.list_ids("nothing").await.unwrap().is_empty());
	}
}
