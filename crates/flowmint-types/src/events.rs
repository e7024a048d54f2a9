//! Engine events broadcast to decoupled collaborators (notifications,
//! metrics, the stats API).

use serde::{Deserialize, Serialize};

use crate::{TimestampMs, UserKey};

/// Everything the engine announces about its work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
	IntentExecuted {
		intent_id: String,
		receipt_id: String,
		out_amount: u64,
	},
	IntentSkipped {
		intent_id: String,
		reason: String,
	},
	IntentCompleted {
		intent_id: String,
		user_key: UserKey,
	},
	IntentFailed {
		intent_id: String,
		user_key: UserKey,
		error: String,
	},
	LockContended {
		intent_id: String,
		job_key: String,
	},
	StuckJobsReset {
		count: usize,
	},
	TickFinished {
		due: usize,
		executed: usize,
		skipped: usize,
		failed: usize,
		at: TimestampMs,
	},
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn events_are_tagged() {
		let event = EngineEvent::IntentSkipped {
			intent_id: "i-1".into(),
			reason: "price stale".into(),
		};
		let json = serde_json::to_value(&event).unwrap();
		assert_eq!(json["event"], "intent_skipped");
		assert_eq!(json["reason"], "price stale");
	}
}
