//! Receipt service: the durable, queryable audit trail of execution
//! attempts, plus tamper-evident attestations for multi-leg executions.
//!
//! A pending receipt is persisted before execution begins, so a crash
//! mid-flight still leaves an inspectable partial record. The diff
//! between quoted and actual amounts is only computed when both sides
//! are known.

use std::sync::Arc;

use flowmint_storage::{StorageError, StorageService};
use flowmint_types::{
	Clock, ExecutionAttempt, ExecutionStatus, Quote, QuoteDiff, Receipt, SwapRequest, SwapResult,
};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub mod attestation;

pub use attestation::{AttestationService, VerifyReport};

const NAMESPACE: &str = "receipts";

#[derive(Debug, Error)]
pub enum ReceiptError {
	#[error("storage error: {0}")]
	Storage(#[from] StorageError),
	#[error("receipt {0} not found")]
	NotFound(String),
	#[error("receipt {0} is already finalized")]
	AlreadyFinalized(String),
}

/// Persists and finalizes execution receipts.
pub struct ReceiptService {
	storage: Arc<StorageService>,
	clock: Arc<dyn Clock>,
}

impl ReceiptService {
	pub fn new(storage: Arc<StorageService>, clock: Arc<dyn Clock>) -> Self {
		Self { storage, clock }
	}

	/// Persists request and quote before execution begins.
	pub async fn create_pending(
		&self,
		intent_id: &str,
		request: SwapRequest,
		quote: Option<Quote>,
	) -> Result<Receipt, ReceiptError> {
		let receipt = Receipt {
			receipt_id: Uuid::new_v4().to_string(),
			intent_id: intent_id.to_string(),
			request,
			quote,
			execution: Default::default(),
			result: None,
			diff: None,
			created_at: self.clock.now_ms(),
			finalized_at: None,
		};

		self.storage
			.store_new(NAMESPACE, &receipt.receipt_id, &receipt)
			.await?;
		debug!(receipt_id = %receipt.receipt_id, intent_id, "pending receipt created");
		Ok(receipt)
	}

	/// Appends one submission attempt to the timeline.
	pub async fn record_attempts(
		&self,
		receipt_id: &str,
		attempts: Vec<ExecutionAttempt>,
	) -> Result<(), ReceiptError> {
		let mut receipt = self.load(receipt_id).await?;
		receipt.execution.attempts.extend(attempts);
		self.storage.store(NAMESPACE, receipt_id, &receipt).await?;
		Ok(())
	}

	/// Records the terminal outcome and computes the quoted-versus-actual
	/// diff when both sides are known.
	pub async fn finalize(
		&self,
		receipt_id: &str,
		status: ExecutionStatus,
		signature: Option<String>,
		result: Option<SwapResult>,
	) -> Result<Receipt, ReceiptError> {
		let mut receipt = self.load(receipt_id).await?;
		if receipt.finalized_at.is_some() {
			return Err(ReceiptError::AlreadyFinalized(receipt_id.to_string()));
		}

		receipt.execution.status = status;
		receipt.execution.signature = signature;
		receipt.result = result;
		receipt.diff = QuoteDiff::compute(receipt.quote.as_ref(), receipt.result.as_ref());
		receipt.finalized_at = Some(self.clock.now_ms());

		self.storage.store(NAMESPACE, receipt_id, &receipt).await?;
		debug!(receipt_id, status = ?receipt.execution.status, "receipt finalized");
		Ok(receipt)
	}

	pub async fn get(&self, receipt_id: &str) -> Result<Receipt, ReceiptError> {
		self.load(receipt_id).await
	}

	async fn load(&self, receipt_id: &str) -> Result<Receipt, ReceiptError> {
		self.storage
			.retrieve_opt(NAMESPACE, receipt_id)
			.await?
			.ok_or_else(|| ReceiptError::NotFound(receipt_id.to_string()))
	}
}
