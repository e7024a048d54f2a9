//! Typed store for job-lock rows, keyed by `job_key`.

use std::sync::Arc;

use flowmint_types::{JobLock, JobStatus, TimestampMs};

use crate::{StorageError, StorageService};

const NAMESPACE: &str = "locks";

/// Store of job locks. Uniqueness on `job_key` comes from the backend's
/// `put_if_absent`; everything above this layer treats `AlreadyExists`
/// as contention, never as a hard failure.
pub struct LockStore {
	storage: Arc<StorageService>,
}

impl LockStore {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}

	/// Inserts a fresh `running` row. Fails with `AlreadyExists` when any
	/// row (running or terminal) already owns the key.
	pub async fn insert_running(&self, lock: &JobLock) -> Result<(), StorageError> {
		self.storage.store_new(NAMESPACE, &lock.job_key, lock).await
	}

	pub async fn find_by_key(&self, job_key: &str) -> Result<Option<JobLock>, StorageError> {
		self.storage.retrieve_opt(NAMESPACE, job_key).await
	}

	/// Overwrites an existing row (status transition, attempt bump).
	pub async fn update(&self, lock: &JobLock) -> Result<(), StorageError> {
		if !self.storage.exists(NAMESPACE, &lock.job_key).await? {
			return Err(StorageError::NotFound);
		}
		self.storage.store(NAMESPACE, &lock.job_key, lock).await
	}

	/// `running` rows older than `max_age_ms`, candidates for crash
	/// recovery.
	pub async fn find_stale_running(
		&self,
		now: TimestampMs,
		max_age_ms: u64,
	) -> Result<Vec<JobLock>, StorageError> {
		let rows: Vec<JobLock> = self.storage.retrieve_all(NAMESPACE).await?;
		Ok(rows
			.into_iter()
			.filter(|row| row.status == JobStatus::Running && row.age_ms(now) > max_age_ms)
			.collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::implementations::memory::MemoryStorage;

	fn store() -> LockStore {
		LockStore::new(Arc::new(StorageService::new(Box::new(MemoryStorage::new()))))
	}

	fn lock(job_key: &str, started_at: TimestampMs) -> JobLock {
		JobLock {
			id: format!("row-{}", job_key),
			job_key: job_key.into(),
			intent_id: "intent-1".into(),
			status: JobStatus::Running,
			attempts: 1,
			scheduled_at: started_at,
			started_at,
			completed_at: None,
			result: None,
			error: None,
		}
	}

	#[tokio::test]
	async fn duplicate_key_conflicts() {
		let store = store();
		store.insert_running(&lock("intent-1:0", 0)).await.unwrap();

		let err = store
			.insert_running(&lock("intent-1:0", 0))
			.await
			.unwrap_err();
		assert!(matches!(err, StorageError::AlreadyExists));
	}

	#[tokio::test]
	async fn stale_scan_only_returns_old_running_rows() {
		let store = store();
		store.insert_running(&lock("intent-1:0", 0)).await.unwrap();
		store
			.insert_running(&lock("intent-2:0", 9_000))
			.await
			.unwrap();

		let mut done = lock("intent-3:0", 0);
		done.status = JobStatus::Completed;
		store.insert_running(&done).await.unwrap();

		let stale = store.find_stale_running(10_000, 5_000).await.unwrap();
		assert_eq!(stale.len(), 1);
		assert_eq!(stale[0].job_key, "intent-1:0");
	}

	#[tokio::test]
	async fn update_requires_existing_row() {
		let store = store();
		let err = store.update(&lock("missing:0", 0)).await.unwrap_err();
		assert!(matches!(err, StorageError::NotFound));
	}
}
