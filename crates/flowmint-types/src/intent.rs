//! Intent model: a user's standing instruction to execute a swap under
//! stated conditions.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Bps, FeedId, TimestampMs, TokenMint, UserKey};

/// Errors raised by intent state transitions.
#[derive(Debug, Error)]
pub enum IntentError {
	/// A terminal intent can never become active again.
	#[error("illegal status transition: {from:?} -> {to:?}")]
	IllegalTransition { from: IntentStatus, to: IntentStatus },
}

/// Lifecycle state of an intent. Transitions are monotonic: once an
/// intent reaches a terminal state it stays there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
	Active,
	Completed,
	Cancelled,
	Failed,
}

impl IntentStatus {
	pub fn is_terminal(&self) -> bool {
		!matches!(self, IntentStatus::Active)
	}

	/// Whether moving to `next` is allowed. Terminal states accept no
	/// further transitions; `Active -> Active` is a no-op and allowed.
	pub fn can_transition_to(&self, next: IntentStatus) -> bool {
		match self {
			IntentStatus::Active => true,
			_ => *self == next,
		}
	}
}

/// Which side of the threshold triggers a conditional order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceDirection {
	Above,
	Below,
}

/// Kind-specific terms of an intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntentKind {
	/// Periodic fixed-size purchases.
	Dca {
		interval_seconds: u64,
		amount_per_slice: u64,
		next_execution_at: TimestampMs,
	},
	/// Conditional sell triggered when price crosses a threshold.
	StopLoss {
		price_threshold: Decimal,
		direction: PriceDirection,
		feed_id: FeedId,
	},
}

/// A user's standing instruction.
///
/// Mutated exclusively by the scheduler and by explicit user
/// cancellation; all amounts are token base units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
	pub id: String,
	pub user_key: UserKey,
	#[serde(flatten)]
	pub kind: IntentKind,
	pub token_from: TokenMint,
	pub token_to: TokenMint,
	pub total_amount: u64,
	pub remaining_amount: u64,
	pub slippage_budget_bps: Bps,
	/// Protected mode requests the stricter on-chain slippage ceiling.
	#[serde(default)]
	pub protected: bool,
	pub status: IntentStatus,
	pub execution_count: u64,
	pub last_execution_at: Option<TimestampMs>,
	pub created_at: TimestampMs,
}

impl Intent {
	pub fn is_dca(&self) -> bool {
		matches!(self.kind, IntentKind::Dca { .. })
	}

	pub fn is_conditional(&self) -> bool {
		matches!(self.kind, IntentKind::StopLoss { .. })
	}

	/// A DCA intent is due once its schedule time has passed. Conditional
	/// intents are evaluated every tick and are never "due" by time.
	pub fn is_due(&self, now: TimestampMs) -> bool {
		if self.status != IntentStatus::Active || self.remaining_amount == 0 {
			return false;
		}
		match &self.kind {
			IntentKind::Dca {
				next_execution_at, ..
			} => *next_execution_at <= now,
			IntentKind::StopLoss { .. } => false,
		}
	}

	/// Amount for the next execution. The final DCA slice may be smaller
	/// than the configured slice; stop-loss sells the full remainder.
	pub fn next_slice_amount(&self) -> u64 {
		match &self.kind {
			IntentKind::Dca {
				amount_per_slice, ..
			} => (*amount_per_slice).min(self.remaining_amount),
			IntentKind::StopLoss { .. } => self.remaining_amount,
		}
	}

	/// Applies a successful execution of `amount` at `now`, advancing the
	/// schedule and completing the intent when nothing remains.
	pub fn record_fill(&mut self, amount: u64, now: TimestampMs) -> Result<(), IntentError> {
		self.remaining_amount = self.remaining_amount.saturating_sub(amount);
		self.execution_count += 1;
		self.last_execution_at = Some(now);

		match &mut self.kind {
			IntentKind::Dca {
				interval_seconds,
				next_execution_at,
				..
			} => {
				*next_execution_at += *interval_seconds * 1000;
				if self.remaining_amount == 0 {
					self.transition(IntentStatus::Completed)?;
				}
			}
			IntentKind::StopLoss { .. } => {
				// A triggered stop-loss sells everything in one execution.
				self.remaining_amount = 0;
				self.transition(IntentStatus::Completed)?;
			}
		}
		Ok(())
	}

	/// Moves the intent to `next`, enforcing monotonic transitions.
	pub fn transition(&mut self, next: IntentStatus) -> Result<(), IntentError> {
		if !self.status.can_transition_to(next) {
			return Err(IntentError::IllegalTransition {
				from: self.status,
				to: next,
			});
		}
		self.status = next;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn dca_intent() -> Intent {
		Intent {
			id: "intent-1".into(),
			user_key: "user-1".into(),
			kind: IntentKind::Dca {
				interval_seconds: 3600,
				amount_per_slice: 100,
				next_execution_at: 10_000,
			},
			token_from: "USDC".into(),
			token_to: "SOL".into(),
			total_amount: 1000,
			remaining_amount: 1000,
			slippage_budget_bps: 50,
			protected: false,
			status: IntentStatus::Active,
			execution_count: 0,
			last_execution_at: None,
			created_at: 0,
		}
	}

	#[test]
	fn dca_due_only_after_schedule() {
		let intent = dca_intent();
		assert!(!intent.is_due(9_999));
		assert!(intent.is_due(10_000));
	}

	#[test]
	fn record_fill_advances_schedule() {
		let mut intent = dca_intent();
		intent.record_fill(100, 10_000).unwrap();

		assert_eq!(intent.remaining_amount, 900);
		assert_eq!(intent.execution_count, 1);
		assert_eq!(intent.last_execution_at, Some(10_000));
		match intent.kind {
			IntentKind::Dca {
				next_execution_at, ..
			} => assert_eq!(next_execution_at, 10_000 + 3_600_000),
			_ => unreachable!(),
		}
	}

	#[test]
	fn final_slice_is_clamped_to_remainder() {
		let mut intent = dca_intent();
		intent.remaining_amount = 40;
		assert_eq!(intent.next_slice_amount(), 40);

		intent.record_fill(40, 20_000).unwrap();
		assert_eq!(intent.remaining_amount, 0);
		assert_eq!(intent.status, IntentStatus::Completed);
	}

	#[test]
	fn terminal_status_cannot_resurrect() {
		let mut intent = dca_intent();
		intent.transition(IntentStatus::Cancelled).unwrap();

		let err = intent.transition(IntentStatus::Active).unwrap_err();
		assert!(matches!(err, IntentError::IllegalTransition { .. }));
		assert_eq!(intent.status, IntentStatus::Cancelled);
	}

	#[test]
	fn intent_roundtrips_through_json() {
		let intent = dca_intent();
		let json = serde_json::to_string(&intent).unwrap();
		let back: Intent = serde_json::from_str(&json).unwrap();
		assert_eq!(intent, back);
	}
}
