//! Durable storage for the FlowMint engine.
//!
//! This crate provides the storage abstraction shared by every persisted
//! collection (intents, job locks, receipts, attestations), two backend
//! implementations, and the typed stores built on top. The one primitive
//! that matters for correctness is `put_if_absent`: it is the uniqueness
//! constraint that makes job-lock acquisition at-most-once across
//! processes.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

pub mod implementations {
	pub mod file;
	pub mod memory;
}

pub mod intents;
pub mod locks;

pub use intents::IntentStore;
pub use locks::LockStore;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	/// The requested item does not exist.
	#[error("not found")]
	NotFound,
	/// A `put_if_absent` lost to an existing row (uniqueness conflict).
	#[error("already exists")]
	AlreadyExists,
	/// A domain constraint (status monotonicity, schedule regression)
	/// rejected the write.
	#[error("constraint violated: {0}")]
	Constraint(String),
	#[error("serialization error: {0}")]
	Serialization(String),
	#[error("backend error: {0}")]
	Backend(String),
}

/// Low-level interface implemented by storage backends.
///
/// Collections are namespaced; ids are opaque strings chosen by the
/// stores (uuids, job keys). Backends must make `put_if_absent` atomic
/// with respect to concurrent callers of the same backend instance.
#[async_trait]
pub trait StorageBackend: Send + Sync {
	async fn get(&self, namespace: &str, id: &str) -> Result<Vec<u8>, StorageError>;

	async fn put(&self, namespace: &str, id: &str, bytes: Vec<u8>) -> Result<(), StorageError>;

	/// Inserts only when no row exists; fails with `AlreadyExists`
	/// otherwise. This is the engine's uniqueness constraint.
	async fn put_if_absent(
		&self,
		namespace: &str,
		id: &str,
		bytes: Vec<u8>,
	) -> Result<(), StorageError>;

	async fn delete(&self, namespace: &str, id: &str) -> Result<(), StorageError>;

	async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError>;

	/// Ids currently present in a namespace.
	async fn list_ids(&self, namespace: &str) -> Result<Vec<String>, StorageError>;
}

/// High-level typed storage service.
///
/// Wraps a backend with JSON serialization so the stores deal in domain
/// types, not bytes.
pub struct StorageService {
	backend: Box<dyn StorageBackend>,
}

impl StorageService {
	pub fn new(backend: Box<dyn StorageBackend>) -> Self {
		Self { backend }
	}

	pub async fn store<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		let bytes =
			serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))?;
		self.backend.put(namespace, id, bytes).await
	}

	/// Stores a value only if the id is free. `AlreadyExists` signals a
	/// uniqueness conflict, not a failure.
	pub async fn store_new<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		let bytes =
			serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))?;
		self.backend.put_if_absent(namespace, id, bytes).await
	}

	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<T, StorageError> {
		let bytes = self.backend.get(namespace, id).await?;
		serde_json::from_slice(&bytes).map_err(|e| StorageError::Serialization(e.to_string()))
	}

	pub async fn retrieve_opt<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<Option<T>, StorageError> {
		match self.retrieve(namespace, id).await {
			Ok(value) => Ok(Some(value)),
			Err(StorageError::NotFound) => Ok(None),
			Err(e) => Err(e),
		}
	}

	/// Loads every row of a namespace. Collections here are small (one
	/// row per live intent or lock window); scans are acceptable.
	pub async fn retrieve_all<T: DeserializeOwned>(
		&self,
		namespace: &str,
	) -> Result<Vec<T>, StorageError> {
		let ids = self.backend.list_ids(namespace).await?;
		let mut rows = Vec::with_capacity(ids.len());
		for id in ids {
			match self.retrieve(namespace, &id).await {
				Ok(row) => rows.push(row),
				// Deleted between list and get; skip.
				Err(StorageError::NotFound) => continue,
				Err(e) => return Err(e),
			}
		}
		Ok(rows)
	}

	pub async fn remove(&self, namespace: &str, id: &str) -> Result<(), StorageError> {
		self.backend.delete(namespace, id).await
	}

	pub async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		self.backend.exists(namespace, id).await
	}
}
