//! Jupiter-backed swap provider.
//!
//! Quotes and transaction construction go to the Jupiter HTTP API;
//! submission and confirmation go through the health-aware RPC pool.
//! Actual output amounts are read back from the confirmed transaction's
//! token balance movements.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flowmint_rpc::TransactionSubmitter;
use flowmint_types::{
	Clock, ExecutionAttempt, ExecutionMode, FeeEstimate, Quote, RouteLeg, SwapRequest, SwapResult,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::swap::{ConfirmedExecution, ExecutionReport, PreparedSwap, SwapError, SwapProvider};

/// Swap provider speaking the Jupiter v6 API.
pub struct JupiterSwapProvider {
	http: reqwest::Client,
	base_url: String,
	submitter: Arc<TransactionSubmitter>,
	clock: Arc<dyn Clock>,
	quote_ttl: Duration,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
	#[serde(rename = "outAmount")]
	out_amount: String,
	#[serde(rename = "priceImpactPct")]
	price_impact_pct: String,
	#[serde(rename = "routePlan", default)]
	route_plan: Vec<RoutePlanStep>,
}

#[derive(Debug, Deserialize)]
struct RoutePlanStep {
	#[serde(rename = "swapInfo")]
	swap_info: SwapInfo,
}

#[derive(Debug, Deserialize)]
struct SwapInfo {
	#[serde(default)]
	label: String,
	#[serde(rename = "inputMint")]
	input_mint: String,
	#[serde(rename = "outputMint")]
	output_mint: String,
	#[serde(rename = "inAmount")]
	in_amount: String,
	#[serde(rename = "outAmount")]
	out_amount: String,
}

#[derive(Debug, Deserialize)]
struct SwapResponse {
	#[serde(rename = "swapTransaction")]
	swap_transaction: String,
}

impl JupiterSwapProvider {
	pub fn new(
		base_url: impl Into<String>,
		submitter: Arc<TransactionSubmitter>,
		clock: Arc<dyn Clock>,
		quote_ttl: Duration,
	) -> Self {
		Self {
			http: reqwest::Client::new(),
			base_url: base_url.into(),
			submitter,
			clock,
			quote_ttl,
		}
	}

	fn swap_mode(mode: ExecutionMode) -> &'static str {
		match mode {
			ExecutionMode::ExactIn => "ExactIn",
			ExecutionMode::ExactOut => "ExactOut",
		}
	}
}

#[async_trait]
impl SwapProvider for JupiterSwapProvider {
	async fn quote(&self, request: &SwapRequest) -> Result<Quote, SwapError> {
		let url = format!("{}/v6/quote", self.base_url);
		let response = self
			.http
			.get(&url)
			.query(&[
				("inputMint", request.token_in.as_str()),
				("outputMint", request.token_out.as_str()),
				("amount", &request.amount_in.to_string()),
				("slippageBps", &request.slippage_bps.to_string()),
				("swapMode", Self::swap_mode(request.mode)),
			])
			.send()
			.await
			.map_err(|e| SwapError::Quote(e.to_string()))?;

		if !response.status().is_success() {
			return Err(SwapError::Quote(format!(
				"quote endpoint returned {}",
				response.status()
			)));
		}

		let payload: QuoteResponse = response
			.json()
			.await
			.map_err(|e| SwapError::Quote(e.to_string()))?;

		let out_amount: u64 = payload
			.out_amount
			.parse()
			.map_err(|_| SwapError::Quote(format!("bad outAmount {:?}", payload.out_amount)))?;

		let route = payload
			.route_plan
			.iter()
			.map(|step| {
				Ok(RouteLeg {
					token_in: step.swap_info.input_mint.clone(),
					token_out: step.swap_info.output_mint.clone(),
					amount_in: step
						.swap_info
						.in_amount
						.parse()
						.map_err(|_| SwapError::Quote("bad route inAmount".to_string()))?,
					amount_out: step
						.swap_info
						.out_amount
						.parse()
						.map_err(|_| SwapError::Quote("bad route outAmount".to_string()))?,
					venue: step.swap_info.label.clone(),
				})
			})
			.collect::<Result<Vec<_>, SwapError>>()?;

		Ok(Quote {
			out_amount,
			price_impact_bps: price_impact_bps(&payload.price_impact_pct)?,
			expires_at: self.clock.now_ms() + self.quote_ttl.as_millis() as u64,
			route,
		})
	}

	async fn build_transaction(
		&self,
		request: &SwapRequest,
		_quote: &Quote,
		fee: &FeeEstimate,
	) -> Result<PreparedSwap, SwapError> {
		let url = format!("{}/v6/swap", self.base_url);
		let body = json!({
			"userPublicKey": request.user_key,
			"inputMint": request.token_in,
			"outputMint": request.token_out,
			"amount": request.amount_in.to_string(),
			"slippageBps": request.slippage_bps,
			"swapMode": Self::swap_mode(request.mode),
			"prioritizationFeeMicroLamports": fee.priority_fee_micro_lamports,
			"computeUnitLimit": fee.compute_unit_limit,
		});

		let response = self
			.http
			.post(&url)
			.json(&body)
			.send()
			.await
			.map_err(|e| SwapError::Build(e.to_string()))?;

		if !response.status().is_success() {
			return Err(SwapError::Build(format!(
				"swap endpoint returned {}",
				response.status()
			)));
		}

		let payload: SwapResponse = response
			.json()
			.await
			.map_err(|e| SwapError::Build(e.to_string()))?;

		Ok(PreparedSwap {
			transaction_base64: payload.swap_transaction,
		})
	}

	async fn execute(&self, request: &SwapRequest, prepared: &PreparedSwap) -> ExecutionReport {
		let traced = self
			.submitter
			.submit_and_confirm(&prepared.transaction_base64)
			.await;

		let attempts: Vec<ExecutionAttempt> = traced
			.attempts
			.into_iter()
			.map(|attempt| ExecutionAttempt {
				endpoint: attempt.endpoint,
				latency_ms: attempt.latency_ms,
				error: attempt.error,
				at: attempt.at,
			})
			.collect();

		match traced.result {
			Ok(submission) => {
				let result = match self.submitter.get_transaction(&submission.signature).await {
					Ok(tx) => match extract_swap_result(&tx, request) {
						Ok(result) => Some(result),
						Err(error) => {
							warn!(
								signature = %submission.signature,
								%error,
								"confirmed but result extraction failed"
							);
							None
						}
					},
					Err(error) => {
						warn!(
							signature = %submission.signature,
							%error,
							"confirmed but transaction fetch failed"
						);
						None
					}
				};

				ExecutionReport {
					attempts,
					outcome: Ok(ConfirmedExecution {
						signature: submission.signature,
						result,
					}),
				}
			}
			Err(error) => ExecutionReport {
				attempts,
				outcome: Err(error.to_string()),
			},
		}
	}
}

/// Jupiter reports price impact as a percentage string ("0.12" = 0.12%).
fn price_impact_bps(pct: &str) -> Result<u16, SwapError> {
	let pct: f64 = pct
		.parse()
		.map_err(|_| SwapError::Quote(format!("bad priceImpactPct {:?}", pct)))?;
	Ok((pct * 100.0).round().clamp(0.0, u16::MAX as f64) as u16)
}

/// Reads the user's token balance movements out of a confirmed
/// transaction's metadata.
fn extract_swap_result(tx: &Value, request: &SwapRequest) -> Result<SwapResult, SwapError> {
	let meta = tx
		.get("meta")
		.filter(|meta| !meta.is_null())
		.ok_or_else(|| SwapError::ResultExtraction("transaction has no meta".to_string()))?;

	let delta_out = token_delta(meta, &request.token_out, &request.user_key)?;
	let delta_in = token_delta(meta, &request.token_in, &request.user_key)?;

	if delta_out < 0 {
		return Err(SwapError::ResultExtraction(
			"output balance decreased".to_string(),
		));
	}

	Ok(SwapResult {
		out_amount_actual: delta_out as u64,
		balance_delta_in: delta_in,
		balance_delta_out: delta_out,
	})
}

/// Post-minus-pre balance for `(mint, owner)` across the transaction.
fn token_delta(meta: &Value, mint: &str, owner: &str) -> Result<i128, SwapError> {
	let sum = |key: &str| -> Result<i128, SwapError> {
		let balances = meta
			.get(key)
			.and_then(Value::as_array)
			.ok_or_else(|| SwapError::ResultExtraction(format!("meta missing {}", key)))?;

		let mut total = 0i128;
		for balance in balances {
			let entry_mint = balance.get("mint").and_then(Value::as_str).unwrap_or("");
			let entry_owner = balance.get("owner").and_then(Value::as_str).unwrap_or("");
			if entry_mint != mint || entry_owner != owner {
				continue;
			}
			let amount = balance
				.pointer("/uiTokenAmount/amount")
				.and_then(Value::as_str)
				.ok_or_else(|| {
					SwapError::ResultExtraction("balance entry missing amount".to_string())
				})?;
			total += amount.parse::<i128>().map_err(|_| {
				SwapError::ResultExtraction(format!("bad balance amount {:?}", amount))
			})?;
		}
		Ok(total)
	};

	Ok(sum("postTokenBalances")? - sum("preTokenBalances")?)
}

#[cfg(test)]
mod tests {
	use super::*;
	use flowmint_types::FeeProfile;

	fn request() -> SwapRequest {
		SwapRequest {
			user_key: "user-wallet".into(),
			token_in: "USDC".into(),
			token_out: "SOL".into(),
			amount_in: 1_000,
			slippage_bps: 50,
			mode: ExecutionMode::ExactIn,
			protected: false,
			profile: FeeProfile::Auto,
		}
	}

	fn confirmed_tx() -> Value {
		json!({
			"slot": 1234,
			"meta": {
				"preTokenBalances": [
					{"mint": "USDC", "owner": "user-wallet", "uiTokenAmount": {"amount": "5000"}},
					{"mint": "SOL", "owner": "user-wallet", "uiTokenAmount": {"amount": "100"}},
					{"mint": "SOL", "owner": "pool-vault", "uiTokenAmount": {"amount": "999000"}}
				],
				"postTokenBalances": [
					{"mint": "USDC", "owner": "user-wallet", "uiTokenAmount": {"amount": "4000"}},
					{"mint": "SOL", "owner": "user-wallet", "uiTokenAmount": {"amount": "2080"}},
					{"mint": "SOL", "owner": "pool-vault", "uiTokenAmount": {"amount": "997020"}}
				]
			}
		})
	}

	#[test]
	fn extracts_user_balance_deltas() {
		let result = extract_swap_result(&confirmed_tx(), &request()).unwrap();
		assert_eq!(result.out_amount_actual, 1_980);
		assert_eq!(result.balance_delta_in, -1_000);
		assert_eq!(result.balance_delta_out, 1_980);
	}

	#[test]
	fn missing_meta_is_an_extraction_error() {
		let tx = json!({"slot": 1, "meta": null});
		let err = extract_swap_result(&tx, &request()).unwrap_err();
		assert!(matches!(err, SwapError::ResultExtraction(_)));
	}

	#[test]
	fn price_impact_converts_percent_to_bps() {
		assert_eq!(price_impact_bps("0.12").unwrap(), 12);
		assert_eq!(price_impact_bps("1.5").unwrap(), 150);
		assert_eq!(price_impact_bps("0").unwrap(), 0);
		assert!(price_impact_bps("nan%").is_err());
	}
}
