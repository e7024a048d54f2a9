//! Injectable time source.
//!
//! Services never call `Utc::now()` directly; they hold an `Arc<dyn Clock>`
//! so that staleness, windowing, and retry timing are deterministic under
//! test. Retry delays are plain `Duration` config values (set to zero in
//! tests) rather than hidden sleeps.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::TimestampMs;

/// Time source abstraction.
pub trait Clock: Send + Sync {
	/// Current wall-clock time.
	fn now(&self) -> DateTime<Utc>;

	/// Current time as unix milliseconds.
	fn now_ms(&self) -> TimestampMs {
		self.now().timestamp_millis().max(0) as u64
	}

	/// Current time as unix seconds.
	fn now_secs(&self) -> u64 {
		self.now_ms() / 1000
	}
}

/// Real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now(&self) -> DateTime<Utc> {
		Utc::now()
	}
}

/// Manually-advanced clock for tests.
///
/// Starts at a fixed epoch offset and only moves when `advance` is called.
#[derive(Debug, Default)]
pub struct ManualClock {
	now_ms: AtomicU64,
}

impl ManualClock {
	pub fn new(start_ms: TimestampMs) -> Self {
		Self {
			now_ms: AtomicU64::new(start_ms),
		}
	}

	pub fn advance(&self, duration: Duration) {
		self.now_ms
			.fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
	}

	pub fn advance_ms(&self, ms: u64) {
		self.now_ms.fetch_add(ms, Ordering::SeqCst);
	}

	pub fn set_ms(&self, ms: TimestampMs) {
		self.now_ms.store(ms, Ordering::SeqCst);
	}
}

impl Clock for ManualClock {
	fn now(&self) -> DateTime<Utc> {
		let ms = self.now_ms.load(Ordering::SeqCst);
		DateTime::<Utc>::from_timestamp_millis(ms as i64).unwrap_or(DateTime::<Utc>::MIN_UTC)
	}
}
