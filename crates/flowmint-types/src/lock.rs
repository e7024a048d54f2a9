//! Job lock rows: the unit of idempotency.
//!
//! One row exists per `(intent, scheduling window)`; the backing store's
//! uniqueness constraint on `job_key` is what makes execution at-most-once
//! across processes.

use serde::{Deserialize, Serialize};

use crate::TimestampMs;

/// State of a job lock row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
	Running,
	Completed,
	Failed,
	Skipped,
}

impl JobStatus {
	/// Terminal states never transition again; `Completed` and `Skipped`
	/// additionally block any future acquisition of the same key.
	pub fn is_terminal(&self) -> bool {
		!matches!(self, JobStatus::Running)
	}

	pub fn is_success(&self) -> bool {
		matches!(self, JobStatus::Completed | JobStatus::Skipped)
	}
}

/// One lock row, keyed by `job_key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobLock {
	/// Row id (uuid), distinct from the deterministic key.
	pub id: String,
	/// `"{intent_id}:{window_start_ms}"`, deterministic per window.
	pub job_key: String,
	pub intent_id: String,
	pub status: JobStatus,
	/// How many times this window has been attempted (first run = 1).
	pub attempts: u32,
	pub scheduled_at: TimestampMs,
	pub started_at: TimestampMs,
	pub completed_at: Option<TimestampMs>,
	pub result: Option<String>,
	pub error: Option<String>,
}

impl JobLock {
	/// Floors `scheduled_at` to the window and joins it with the intent id.
	pub fn key_for(intent_id: &str, scheduled_at: TimestampMs, window_ms: u64) -> String {
		let window_start = (scheduled_at / window_ms) * window_ms;
		format!("{}:{}", intent_id, window_start)
	}

	pub fn age_ms(&self, now: TimestampMs) -> u64 {
		now.saturating_sub(self.started_at)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn key_floors_to_window() {
		let key_a = JobLock::key_for("intent-1", 61_000, 60_000);
		let key_b = JobLock::key_for("intent-1", 119_999, 60_000);
		let key_c = JobLock::key_for("intent-1", 120_000, 60_000);

		assert_eq!(key_a, "intent-1:60000");
		assert_eq!(key_a, key_b);
		assert_ne!(key_b, key_c);
	}

	#[test]
	fn running_is_the_only_non_terminal_state() {
		assert!(!JobStatus::Running.is_terminal());
		assert!(JobStatus::Completed.is_terminal());
		assert!(JobStatus::Failed.is_terminal());
		assert!(JobStatus::Skipped.is_terminal());
	}
}
