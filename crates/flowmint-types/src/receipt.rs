//! Receipt model: the full audit trail of one execution attempt, plus the
//! hash-chained attestation legs for multi-step executions.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Bps, FeeProfile, TimestampMs, TokenMint, UserKey};

/// Swap sizing semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
	/// Spend exactly `amount_in`, receive at least the quoted minimum.
	ExactIn,
	/// Receive exactly the requested output (payment path).
	ExactOut,
}

/// What the engine asked the swap provider to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapRequest {
	pub user_key: UserKey,
	pub token_in: TokenMint,
	pub token_out: TokenMint,
	pub amount_in: u64,
	pub slippage_bps: Bps,
	pub mode: ExecutionMode,
	pub protected: bool,
	pub profile: FeeProfile,
}

/// One hop of the quoted route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteLeg {
	pub token_in: TokenMint,
	pub token_out: TokenMint,
	pub amount_in: u64,
	pub amount_out: u64,
	pub venue: String,
}

/// What the swap provider promised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
	pub out_amount: u64,
	pub price_impact_bps: Bps,
	pub expires_at: TimestampMs,
	pub route: Vec<RouteLeg>,
}

impl Quote {
	pub fn is_expired(&self, now: TimestampMs) -> bool {
		now >= self.expires_at
	}
}

/// One submission attempt against one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionAttempt {
	pub endpoint: String,
	pub latency_ms: u64,
	pub error: Option<String>,
	pub at: TimestampMs,
}

/// Terminal (and pre-terminal) states of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
	Pending,
	Confirmed,
	Failed,
	/// Cancelled before the point of no return.
	Skipped,
}

impl Default for ExecutionStatus {
	fn default() -> Self {
		ExecutionStatus::Pending
	}
}

/// Submission history for one receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExecutionRecord {
	#[serde(default)]
	pub status: ExecutionStatus,
	pub attempts: Vec<ExecutionAttempt>,
	pub signature: Option<String>,
}

/// What actually happened on-chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapResult {
	pub out_amount_actual: u64,
	/// Signed balance movements observed on the user's accounts.
	pub balance_delta_in: i128,
	pub balance_delta_out: i128,
}

/// Quoted-versus-actual comparison. Only constructible when both sides
/// are known; absence of either leaves the receipt without a diff,
/// never a zero-filled one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteDiff {
	pub quoted_out: u64,
	pub actual_out: u64,
	pub delta_amount: i128,
	pub delta_pct: Decimal,
}

impl QuoteDiff {
	/// `None` unless both the quote and the result are present.
	pub fn compute(quote: Option<&Quote>, result: Option<&SwapResult>) -> Option<QuoteDiff> {
		let quote = quote?;
		let result = result?;
		if quote.out_amount == 0 {
			return None;
		}
		let delta = result.out_amount_actual as i128 - quote.out_amount as i128;
		let delta_pct = Decimal::from(delta) / Decimal::from(quote.out_amount) * Decimal::from(100);
		Some(QuoteDiff {
			quoted_out: quote.out_amount,
			actual_out: result.out_amount_actual,
			delta_amount: delta,
			delta_pct,
		})
	}
}

/// Full lifecycle record of one execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
	pub receipt_id: String,
	pub intent_id: String,
	pub request: SwapRequest,
	pub quote: Option<Quote>,
	pub execution: ExecutionRecord,
	pub result: Option<SwapResult>,
	pub diff: Option<QuoteDiff>,
	pub created_at: TimestampMs,
	pub finalized_at: Option<TimestampMs>,
}

/// One link of the attestation hash chain. `hash` covers the leg's
/// economic fields plus `previous_hash` (absent for the first leg), so
/// any mutation is detectable downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttestationLeg {
	pub leg_index: u32,
	pub token_in: TokenMint,
	pub token_out: TokenMint,
	pub amount_in: u64,
	pub amount_out: u64,
	pub venue: String,
	/// Keccak-256 over this leg's fields and the previous hash, hex.
	pub hash: String,
	pub previous_hash: Option<String>,
}

/// The hash-chained proof over a multi-leg execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attestation {
	pub attestation_id: String,
	pub receipt_id: String,
	pub legs: Vec<AttestationLeg>,
	/// Binary Merkle root over the leg hashes, hex.
	pub merkle_root: String,
	pub created_at: TimestampMs,
}
