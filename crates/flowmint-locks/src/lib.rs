//! Job lock service: cross-process mutual exclusion keyed by
//! `(intent, time window)`.
//!
//! Acquisition inserts a `running` row under the deterministic job key;
//! the storage uniqueness constraint resolves races between concurrent
//! schedulers. Terminal-success rows make later acquisitions no-ops
//! (true idempotency), failed rows grant a bounded number of retries,
//! and `reset_stuck_jobs` recovers windows orphaned by a crash.

use std::sync::Arc;

use flowmint_storage::{LockStore, StorageError};
use flowmint_types::{Clock, JobLock, JobStatus, TimestampMs};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LockError {
	#[error("storage error: {0}")]
	Storage(#[from] StorageError),
	/// `release` on a row that is not `running`: a double release, or a
	/// release after crash recovery already reclaimed the row.
	#[error("job {0} is not running")]
	NotRunning(String),
}

/// Retry and windowing policy.
#[derive(Debug, Clone)]
pub struct LockPolicy {
	/// Width of the deduplication window.
	pub window_ms: u64,
	/// Failed attempts allowed per window before escalation.
	pub retry_limit: u32,
	/// A `running` row older than this is considered orphaned.
	pub max_running_ms: u64,
}

impl Default for LockPolicy {
	fn default() -> Self {
		Self {
			window_ms: 60_000,
			retry_limit: 3,
			max_running_ms: 600_000,
		}
	}
}

/// Outcome of an acquisition attempt. Only `Acquired` permits execution;
/// every other variant is a no-op for the caller, except
/// `RetryLimitExceeded` which asks the scheduler to escalate the intent.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquireOutcome {
	Acquired(JobLock),
	/// Another worker currently owns this window.
	AlreadyRunning,
	/// This window already reached a terminal success; treat as done.
	AlreadyDone,
	/// Lost an insert race to a concurrent worker.
	Contended,
	/// The window burned through its retry budget.
	RetryLimitExceeded { attempts: u32, last_error: Option<String> },
}

/// Terminal outcome reported on release.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
	Completed(String),
	Failed(String),
	Skipped(String),
}

/// Cross-process execution lock service.
pub struct JobLockService {
	store: Arc<LockStore>,
	clock: Arc<dyn Clock>,
	policy: LockPolicy,
	/// Serializes the re-acquire path within this process. Cross-process
	/// exclusion still comes from the store's uniqueness constraint.
	acquire_gate: tokio::sync::Mutex<()>,
}

impl JobLockService {
	pub fn new(store: Arc<LockStore>, clock: Arc<dyn Clock>, policy: LockPolicy) -> Self {
		Self {
			store,
			clock,
			policy,
			acquire_gate: tokio::sync::Mutex::new(()),
		}
	}

	pub fn policy(&self) -> &LockPolicy {
		&self.policy
	}

	pub fn job_key(&self, intent_id: &str, scheduled_at: TimestampMs) -> String {
		JobLock::key_for(intent_id, scheduled_at, self.policy.window_ms)
	}

	/// Attempts to take ownership of `(intent, window)`.
	pub async fn acquire(
		&self,
		intent_id: &str,
		scheduled_at: TimestampMs,
	) -> Result<AcquireOutcome, LockError> {
		let _gate = self.acquire_gate.lock().await;

		let job_key = self.job_key(intent_id, scheduled_at);
		let now = self.clock.now_ms();

		let fresh = JobLock {
			id: Uuid::new_v4().to_string(),
			job_key: job_key.clone(),
			intent_id: intent_id.to_string(),
			status: JobStatus::Running,
			attempts: 1,
			scheduled_at,
			started_at: now,
			completed_at: None,
			result: None,
			error: None,
		};

		match self.store.insert_running(&fresh).await {
			Ok(()) => {
				debug!(job_key = %job_key, "job lock acquired");
				return Ok(AcquireOutcome::Acquired(fresh));
			}
			Err(StorageError::AlreadyExists) => {}
			Err(e) => return Err(e.into()),
		}

		// A row already owns the key; decide from its state.
		let Some(existing) = self.store.find_by_key(&job_key).await? else {
			// Deleted between insert and read; report contention and let
			// the next tick retry.
			return Ok(AcquireOutcome::Contended);
		};

		match existing.status {
			JobStatus::Running => Ok(AcquireOutcome::AlreadyRunning),
			JobStatus::Completed | JobStatus::Skipped => Ok(AcquireOutcome::AlreadyDone),
			JobStatus::Failed => {
				if existing.attempts >= self.policy.retry_limit {
					return Ok(AcquireOutcome::RetryLimitExceeded {
						attempts: existing.attempts,
						last_error: existing.error,
					});
				}

				let retry = JobLock {
					id: Uuid::new_v4().to_string(),
					status: JobStatus::Running,
					attempts: existing.attempts + 1,
					scheduled_at,
					started_at: now,
					completed_at: None,
					result: None,
					error: None,
					..existing
				};
				self.store.update(&retry).await?;
				info!(
					job_key = %job_key,
					attempt = retry.attempts,
					"re-acquired failed job lock"
				);
				Ok(AcquireOutcome::Acquired(retry))
			}
		}
	}

	/// Moves a `running` row to its terminal state. Must be called exactly
	/// once per successful `acquire`.
	pub async fn release(&self, lock: &JobLock, outcome: JobOutcome) -> Result<JobLock, LockError> {
		let Some(current) = self.store.find_by_key(&lock.job_key).await? else {
			return Err(LockError::NotRunning(lock.job_key.clone()));
		};
		if current.status != JobStatus::Running || current.id != lock.id {
			return Err(LockError::NotRunning(lock.job_key.clone()));
		}

		let now = self.clock.now_ms();
		let mut released = current;
		released.completed_at = Some(now);
		match outcome {
			JobOutcome::Completed(result) => {
				released.status = JobStatus::Completed;
				released.result = Some(result);
			}
			JobOutcome::Failed(error) => {
				released.status = JobStatus::Failed;
				released.error = Some(error);
			}
			JobOutcome::Skipped(reason) => {
				released.status = JobStatus::Skipped;
				released.result = Some(reason);
			}
		}

		self.store.update(&released).await?;
		debug!(job_key = %released.job_key, status = ?released.status, "job lock released");
		Ok(released)
	}

	/// Crash recovery: forces orphaned `running` rows to `failed` so the
	/// window becomes retryable within the normal budget. Returns how
	/// many rows were reset.
	pub async fn reset_stuck_jobs(&self) -> Result<usize, LockError> {
		let now = self.clock.now_ms();
		let stale = self
			.store
			.find_stale_running(now, self.policy.max_running_ms)
			.await?;

		let mut reset = 0;
		for mut row in stale {
			warn!(
				job_key = %row.job_key,
				age_ms = row.age_ms(now),
				"resetting stuck job"
			);
			row.status = JobStatus::Failed;
			row.completed_at = Some(now);
			row.error = Some(format!(
				"reset after exceeding max running time of {}ms",
				self.policy.max_running_ms
			));
			self.store.update(&row).await?;
			reset += 1;
		}
		Ok(reset)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use flowmint_storage::implementations::memory::MemoryStorage;
	use flowmint_storage::StorageService;
	use flowmint_types::ManualClock;

	fn service(clock: Arc<ManualClock>) -> JobLockService {
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		JobLockService::new(
			Arc::new(LockStore::new(storage)),
			clock,
			LockPolicy::default(),
		)
	}

	#[tokio::test]
	async fn acquire_release_roundtrip() {
		let clock = Arc::new(ManualClock::new(60_000));
		let locks = service(clock);

		let outcome = locks.acquire("intent-1", 61_000).await.unwrap();
		let AcquireOutcome::Acquired(lock) = outcome else {
			panic!("expected acquisition");
		};
		assert_eq!(lock.attempts, 1);

		let released = locks
			.release(&lock, JobOutcome::Completed("sig".into()))
			.await
			.unwrap();
		assert_eq!(released.status, JobStatus::Completed);

		// Same window again: already done, not an error.
		let again = locks.acquire("intent-1", 65_000).await.unwrap();
		assert_eq!(again, AcquireOutcome::AlreadyDone);
	}

	#[tokio::test]
	async fn running_window_blocks_second_worker() {
		let clock = Arc::new(ManualClock::new(0));
		let locks = service(clock);

		let first = locks.acquire("intent-1", 1_000).await.unwrap();
		assert!(matches!(first, AcquireOutcome::Acquired(_)));

		let second = locks.acquire("intent-1", 2_000).await.unwrap();
		assert_eq!(second, AcquireOutcome::AlreadyRunning);
	}

	#[tokio::test]
	async fn at_most_once_under_concurrency() {
		let clock = Arc::new(ManualClock::new(0));
		let locks = Arc::new(service(clock));

		let mut handles = Vec::new();
		for _ in 0..12 {
			let locks = locks.clone();
			handles.push(tokio::spawn(
				async move { locks.acquire("intent-1", 500).await },
			));
		}

		let mut acquired = Vec::new();
		for handle in handles {
			match handle.await.unwrap().unwrap() {
				AcquireOutcome::Acquired(lock) => acquired.push(lock),
				AcquireOutcome::AlreadyRunning | AcquireOutcome::Contended => {}
				other => panic!("unexpected outcome {:?}", other),
			}
		}
		assert_eq!(acquired.len(), 1);

		// Exactly one running -> completed transition is possible.
		let released = locks
			.release(&acquired[0], JobOutcome::Completed("done".into()))
			.await
			.unwrap();
		assert_eq!(released.status, JobStatus::Completed);
	}

	#[tokio::test]
	async fn failed_window_grants_bounded_retries() {
		let clock = Arc::new(ManualClock::new(0));
		let locks = service(clock);

		for attempt in 1..=3u32 {
			let outcome = locks.acquire("intent-1", 1_000).await.unwrap();
			let AcquireOutcome::Acquired(lock) = outcome else {
				panic!("attempt {} should acquire", attempt);
			};
			assert_eq!(lock.attempts, attempt);
			locks
				.release(&lock, JobOutcome::Failed("boom".into()))
				.await
				.unwrap();
		}

		let outcome = locks.acquire("intent-1", 1_000).await.unwrap();
		match outcome {
			AcquireOutcome::RetryLimitExceeded {
				attempts,
				last_error,
			} => {
				assert_eq!(attempts, 3);
				assert_eq!(last_error.as_deref(), Some("boom"));
			}
			other => panic!("expected retry limit, got {:?}", other),
		}
	}

	#[tokio::test]
	async fn stuck_job_is_reset_then_retryable_once() {
		let clock = Arc::new(ManualClock::new(0));
		let locks = service(clock.clone());

		let outcome = locks.acquire("intent-1", 1_000).await.unwrap();
		assert!(matches!(outcome, AcquireOutcome::Acquired(_)));

		// Not yet stale.
		clock.advance_ms(599_999);
		assert_eq!(locks.reset_stuck_jobs().await.unwrap(), 0);

		clock.advance_ms(2);
		assert_eq!(locks.reset_stuck_jobs().await.unwrap(), 1);

		// The reset row reads as a failed attempt: one more acquire works.
		let retry = locks.acquire("intent-1", 1_000).await.unwrap();
		let AcquireOutcome::Acquired(lock) = retry else {
			panic!("expected re-acquisition after reset");
		};
		assert_eq!(lock.attempts, 2);

		// A second reset pass finds nothing new.
		assert_eq!(locks.reset_stuck_jobs().await.unwrap(), 0);
	}

	#[tokio::test]
	async fn double_release_is_rejected() {
		let clock = Arc::new(ManualClock::new(0));
		let locks = service(clock);

		let AcquireOutcome::Acquired(lock) = locks.acquire("intent-1", 0).await.unwrap() else {
			panic!("expected acquisition");
		};
		locks
			.release(&lock, JobOutcome::Completed("ok".into()))
			.await
			.unwrap();

		let err = locks
			.release(&lock, JobOutcome::Failed("late".into()))
			.await
			.unwrap_err();
		assert!(matches!(err, LockError::NotRunning(_)));
	}

	#[tokio::test]
	async fn skipped_release_counts_as_done() {
		let clock = Arc::new(ManualClock::new(0));
		let locks = service(clock);

		let AcquireOutcome::Acquired(lock) = locks.acquire("intent-1", 0).await.unwrap() else {
			panic!("expected acquisition");
		};
		locks
			.release(&lock, JobOutcome::Skipped("cancelled".into()))
			.await
			.unwrap();

		let again = locks.acquire("intent-1", 100).await.unwrap();
		assert_eq!(again, AcquireOutcome::AlreadyDone);
	}
}
