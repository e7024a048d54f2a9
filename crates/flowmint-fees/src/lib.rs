//! Fee and compute-budget estimator.
//!
//! Translates a caller-selected profile and recent network congestion
//! into a concrete priority-fee and compute-unit recommendation. The
//! estimator never fails its caller: when congestion data cannot be
//! fetched it returns conservative defaults with low confidence.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use flowmint_rpc::{RpcError, RpcPool};
use flowmint_types::{Clock, FeeEstimate, FeeProfile};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum FeeError {
	#[error("congestion fetch failed: {0}")]
	Fetch(String),
}

impl From<RpcError> for FeeError {
	fn from(error: RpcError) -> Self {
		FeeError::Fetch(error.to_string())
	}
}

/// Source of recent priority-fee observations (micro-lamports per
/// compute unit).
#[async_trait]
pub trait CongestionProvider: Send + Sync {
	async fn recent_priority_fees(&self) -> Result<Vec<u64>, FeeError>;
}

/// Congestion provider backed by the RPC pool.
pub struct RpcCongestionProvider {
	pool: Arc<RpcPool>,
}

impl RpcCongestionProvider {
	pub fn new(pool: Arc<RpcPool>) -> Self {
		Self { pool }
	}
}

#[async_trait]
impl CongestionProvider for RpcCongestionProvider {
	async fn recent_priority_fees(&self) -> Result<Vec<u64>, FeeError> {
		let result = self
			.pool
			.execute_with_failover("recent_prioritization_fees", |endpoint| async move {
				endpoint
					.rpc_call("getRecentPrioritizationFees", json!([]))
					.await
			})
			.await?;

		let fees = result
			.as_array()
			.ok_or_else(|| FeeError::Fetch("expected an array of fee samples".to_string()))?
			.iter()
			.filter_map(|entry| entry.get("prioritizationFee").and_then(Value::as_u64))
			.collect();
		Ok(fees)
	}
}

/// Per-profile tuning: percentile of recent fees, multiplier, clamps,
/// and the compute-unit buffer absorbing execution variance.
#[derive(Debug, Clone, Copy)]
struct ProfileParams {
	percentile: f64,
	multiplier: f64,
	min_fee: u64,
	max_fee: u64,
	compute_buffer: f64,
}

fn params_for(profile: FeeProfile) -> ProfileParams {
	match profile {
		FeeProfile::Fast => ProfileParams {
			percentile: 0.90,
			multiplier: 1.5,
			min_fee: 10_000,
			max_fee: 2_000_000,
			compute_buffer: 1.4,
		},
		FeeProfile::Auto => ProfileParams {
			percentile: 0.75,
			multiplier: 1.25,
			min_fee: 5_000,
			max_fee: 1_000_000,
			compute_buffer: 1.2,
		},
		FeeProfile::Cheap => ProfileParams {
			percentile: 0.50,
			multiplier: 1.0,
			min_fee: 1_000,
			max_fee: 500_000,
			compute_buffer: 1.1,
		},
	}
}

struct FeeSnapshot {
	fees: Vec<u64>,
	fetched_at_ms: u64,
}

/// Estimator with a short-lived congestion cache.
pub struct FeeEstimator {
	provider: Arc<dyn CongestionProvider>,
	clock: Arc<dyn Clock>,
	cache: ArcSwapOption<FeeSnapshot>,
	cache_ttl: Duration,
	base_compute_units: u32,
}

impl FeeEstimator {
	pub fn new(
		provider: Arc<dyn CongestionProvider>,
		clock: Arc<dyn Clock>,
		cache_ttl: Duration,
		base_compute_units: u32,
	) -> Self {
		Self {
			provider,
			clock,
			cache: ArcSwapOption::const_empty(),
			cache_ttl,
			base_compute_units,
		}
	}

	/// Produces a recommendation for `profile`. Infallible by design.
	pub async fn estimate(&self, profile: FeeProfile) -> FeeEstimate {
		let params = params_for(profile);
		let now_ms = self.clock.now_ms();

		let snapshot = self.refresh_if_needed(now_ms).await;

		let Some(snapshot) = snapshot else {
			warn!(?profile, "no congestion data, using conservative defaults");
			return FeeEstimate {
				priority_fee_micro_lamports: params.min_fee,
				compute_unit_limit: self.buffered_units(params),
				confidence: 0.1,
				sample_count: 0,
				profile,
			};
		};

		let raw = percentile(&snapshot.fees, params.percentile);
		let multiplied = (raw as f64 * params.multiplier) as u64;
		let fee = multiplied.clamp(params.min_fee, params.max_fee);

		let estimate = FeeEstimate {
			priority_fee_micro_lamports: fee,
			compute_unit_limit: self.buffered_units(params),
			confidence: self.confidence(&snapshot, now_ms),
			sample_count: snapshot.fees.len(),
			profile,
		};
		debug!(?profile, fee = estimate.priority_fee_micro_lamports, "fee estimated");
		estimate
	}

	fn buffered_units(&self, params: ProfileParams) -> u32 {
		(self.base_compute_units as f64 * params.compute_buffer) as u32
	}

	/// Confidence grows with sample count and decays as the snapshot
	/// ages past its TTL.
	fn confidence(&self, snapshot: &FeeSnapshot, now_ms: u64) -> f64 {
		let sample_factor = (snapshot.fees.len() as f64 / 50.0).min(1.0);
		let age_ms = now_ms.saturating_sub(snapshot.fetched_at_ms) as f64;
		let ttl_ms = self.cache_ttl.as_millis().max(1) as f64;
		let age_factor = (1.0 - (age_ms / (ttl_ms * 2.0))).clamp(0.0, 1.0);
		(sample_factor * age_factor).max(0.05)
	}

	async fn refresh_if_needed(&self, now_ms: u64) -> Option<Arc<FeeSnapshot>> {
		if let Some(snapshot) = self.cache.load_full() {
			let age = now_ms.saturating_sub(snapshot.fetched_at_ms);
			if age < self.cache_ttl.as_millis() as u64 {
				return Some(snapshot);
			}
		}

		match self.provider.recent_priority_fees().await {
			Ok(fees) if !fees.is_empty() => {
				let snapshot = Arc::new(FeeSnapshot {
					fees,
					fetched_at_ms: now_ms,
				});
				self.cache.store(Some(snapshot.clone()));
				Some(snapshot)
			}
			Ok(_) => {
				// An empty sample set is as useless as a failed fetch, but
				// a previous snapshot may still carry (decayed) signal.
				self.cache.load_full()
			}
			Err(error) => {
				warn!(%error, "congestion fetch failed");
				self.cache.load_full()
			}
		}
	}
}

/// Nearest-rank percentile over an unsorted sample set.
fn percentile(samples: &[u64], pct: f64) -> u64 {
	if samples.is_empty() {
		return 0;
	}
	let mut sorted = samples.to_vec();
	sorted.sort_unstable();
	let rank = ((pct * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len());
	sorted[rank - 1]
}
