//! Transaction submission with confirmation polling.
//!
//! Submission is safe to retry across endpoints: a signed transaction
//! carries its signature, so a resubmission of the same payload is
//! deduplicated by the cluster.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::debug;

use crate::{RpcError, RpcPool, TracedOutcome};

/// Outcome of a confirmed submission.
#[derive(Debug, Clone)]
pub struct SubmissionOutcome {
	pub signature: String,
	pub slot: Option<u64>,
}

/// Submits pre-signed transactions through the pool and waits for
/// confirmation.
pub struct TransactionSubmitter {
	pool: Arc<RpcPool>,
	confirm_timeout: Duration,
	poll_interval: Duration,
}

impl TransactionSubmitter {
	pub fn new(pool: Arc<RpcPool>, confirm_timeout: Duration, poll_interval: Duration) -> Self {
		Self {
			pool,
			confirm_timeout,
			poll_interval,
		}
	}

	/// Sends the base64 transaction and polls until it is confirmed,
	/// failing over to other endpoints on error or timeout. The attempt
	/// trace feeds the receipt timeline.
	pub async fn submit_and_confirm(
		&self,
		tx_base64: &str,
	) -> TracedOutcome<SubmissionOutcome> {
		let confirm_timeout = self.confirm_timeout;
		let poll_interval = self.poll_interval;

		self.pool
			.execute_traced("submit_transaction", move |endpoint| {
				let tx_base64 = tx_base64.to_string();
				async move {
					let signature = endpoint
						.rpc_call(
							"sendTransaction",
							json!([tx_base64, {"encoding": "base64"}]),
						)
						.await?
						.as_str()
						.map(str::to_string)
						.ok_or_else(|| {
							RpcError::MalformedResponse(
								"sendTransaction did not return a signature".to_string(),
							)
						})?;

					debug!(%signature, "transaction submitted, awaiting confirmation");

					let deadline = Instant::now() + confirm_timeout;
					loop {
						if Instant::now() >= deadline {
							return Err(RpcError::ConfirmationTimeout(signature));
						}

						let statuses = endpoint
							.rpc_call("getSignatureStatuses", json!([[signature]]))
							.await?;
						let status = &statuses["value"][0];

						if !status.is_null() {
							if confirmation_reached(status)? {
								let slot = status.get("slot").and_then(Value::as_u64);
								return Ok(SubmissionOutcome { signature, slot });
							}
						}

						tokio::time::sleep(poll_interval).await;
					}
				}
			})
			.await
	}

	/// Fetches a confirmed transaction (with metadata) for result
	/// extraction.
	pub async fn get_transaction(&self, signature: &str) -> Result<Value, RpcError> {
		self.pool
			.execute_with_failover("get_transaction", move |endpoint| {
				let signature = signature.to_string();
				async move {
					endpoint
						.rpc_call(
							"getTransaction",
							json!([
								signature,
								{"encoding": "json", "maxSupportedTransactionVersion": 0}
							]),
						)
						.await
				}
			})
			.await
	}

}

/// Interprets one `getSignatureStatuses` entry. An on-chain error is
/// terminal for this attempt; an unreached commitment just means "keep
/// polling".
fn confirmation_reached(status: &Value) -> Result<bool, RpcError> {
	if let Some(err) = status.get("err") {
		if !err.is_null() {
			return Err(RpcError::TransactionFailed(err.to_string()));
		}
	}

	Ok(matches!(
		status.get("confirmationStatus").and_then(Value::as_str),
		Some("confirmed") | Some("finalized")
	))
}
