//! Swap provider seam.
//!
//! The engine treats swap routing, transaction construction, and
//! submission as an opaque collaborator: it only needs a quote, a
//! submittable transaction, and the final success/failure with actual
//! amounts.

use async_trait::async_trait;
use flowmint_types::{ExecutionAttempt, FeeEstimate, Quote, SwapRequest, SwapResult};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SwapError {
	#[error("quote failed: {0}")]
	Quote(String),
	#[error("transaction build failed: {0}")]
	Build(String),
	#[error("result extraction failed: {0}")]
	ResultExtraction(String),
}

/// A signed, submittable transaction returned by the provider.
#[derive(Debug, Clone)]
pub struct PreparedSwap {
	pub transaction_base64: String,
}

/// A confirmed execution with its observed amounts. `result` is absent
/// when the transaction landed but its balance movements could not be
/// read back; the receipt then carries no diff rather than a fabricated
/// one.
#[derive(Debug, Clone)]
pub struct ConfirmedExecution {
	pub signature: String,
	pub result: Option<SwapResult>,
}

/// Everything the engine needs to record about one execution: the
/// attempt timeline (for the receipt) and the terminal outcome.
#[derive(Debug)]
pub struct ExecutionReport {
	pub attempts: Vec<ExecutionAttempt>,
	pub outcome: Result<ConfirmedExecution, String>,
}

/// External swap/execution provider.
#[async_trait]
pub trait SwapProvider: Send + Sync {
	/// Quotes the requested swap.
	async fn quote(&self, request: &SwapRequest) -> Result<Quote, SwapError>;

	/// Builds a signed transaction for the quoted route with the given
	/// fee recommendation applied.
	async fn build_transaction(
		&self,
		request: &SwapRequest,
		quote: &Quote,
		fee: &FeeEstimate,
	) -> Result<PreparedSwap, SwapError>;

	/// Submits the transaction and waits for a terminal outcome. Never
	/// returns an `Err` at the Rust level: failures are data, reported
	/// in the attempt timeline and outcome.
	async fn execute(&self, request: &SwapRequest, prepared: &PreparedSwap) -> ExecutionReport;
}
