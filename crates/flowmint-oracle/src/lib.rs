//! Oracle gate: decides whether a price observation is trustworthy
//! enough to act on.
//!
//! Prices are fetched from a Pyth-style feed provider, cached for a few
//! seconds, and re-aged on every read. Confidence and staleness
//! ceilings differ between outright trading and stop-loss trigger
//! evaluation; a provider outage degrades the cached value to the worst
//! staleness tier instead of passing it off as fresh.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use flowmint_types::{Clock, FeedId, OraclePrice, PriceDirection, StalenessLevel};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, warn};

pub mod implementations {
	pub mod hermes;
}

pub use implementations::hermes::HermesProvider;

/// Maximum confidence/price ratio for outright trading (0.5%).
pub const TRADING_MAX_CONFIDENCE: Decimal = Decimal::from_parts(5, 0, 0, false, 3);
/// Maximum confidence/price ratio for stop-loss evaluation (1.0%).
pub const STOP_LOSS_MAX_CONFIDENCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

#[derive(Debug, Error)]
pub enum OracleError {
	#[error("feed {0} has no published price")]
	NoPrice(FeedId),
	#[error("provider error: {0}")]
	Provider(String),
	#[error("malformed provider response: {0}")]
	MalformedResponse(String),
}

/// External price feed, consumed over HTTPS.
#[async_trait]
pub trait PriceFeedProvider: Send + Sync {
	async fn latest_price(&self, feed_id: &str) -> Result<OraclePrice, OracleError>;
}

/// Gate verdict for a trading-eligible price request.
#[derive(Debug, Clone, PartialEq)]
pub struct GateCheck {
	pub usable: bool,
	pub reason: String,
	pub price: Option<OraclePrice>,
}

/// Verdict for a stop-loss trigger evaluation. `triggered` says whether
/// the threshold condition holds; `can_execute` additionally requires a
/// price good enough to act on. The reason string travels to skipped-
/// tick records.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerDecision {
	pub triggered: bool,
	pub can_execute: bool,
	pub reason: String,
	pub price: Option<Decimal>,
}

struct CachedPrice {
	price: OraclePrice,
	fetched_at_ms: u64,
	/// Set when the provider failed and this is a fallback value; forces
	/// the worst staleness tier.
	degraded: bool,
}

/// Price gate with fetch-or-cache semantics.
pub struct OracleGate {
	provider: Arc<dyn PriceFeedProvider>,
	clock: Arc<dyn Clock>,
	cache: DashMap<FeedId, CachedPrice>,
	cache_ttl: Duration,
}

impl OracleGate {
	pub fn new(
		provider: Arc<dyn PriceFeedProvider>,
		clock: Arc<dyn Clock>,
		cache_ttl: Duration,
	) -> Self {
		Self {
			provider,
			clock,
			cache: DashMap::new(),
			cache_ttl,
		}
	}

	/// Serves from cache within the TTL; otherwise refetches. On
	/// provider failure the last cached value is returned degraded
	/// rather than dropped, so the caller still sees *a* price with an
	/// honest staleness.
	async fn fetch_or_cached(&self, feed_id: &str) -> Result<(OraclePrice, bool), OracleError> {
		let now_ms = self.clock.now_ms();

		if let Some(entry) = self.cache.get(feed_id) {
			let age = now_ms.saturating_sub(entry.fetched_at_ms);
			if age < self.cache_ttl.as_millis() as u64 {
				return Ok((entry.price.clone(), entry.degraded));
			}
		}

		match self.provider.latest_price(feed_id).await {
			Ok(price) => {
				self.cache.insert(
					feed_id.to_string(),
					CachedPrice {
						price: price.clone(),
						fetched_at_ms: now_ms,
						degraded: false,
					},
				);
				Ok((price, false))
			}
			Err(error) => {
				warn!(feed_id, %error, "price fetch failed, falling back to cache");
				match self.cache.get_mut(feed_id) {
					Some(mut entry) => {
						entry.degraded = true;
						Ok((entry.price.clone(), true))
					}
					None => Err(error),
				}
			}
		}
	}

	fn staleness_of(&self, price: &OraclePrice, degraded: bool) -> StalenessLevel {
		if degraded {
			return StalenessLevel::VeryStale;
		}
		price.staleness(self.clock.now_secs())
	}

	/// Whether `feed_id` currently provides a trading-eligible price:
	/// fresh and with a tight confidence interval.
	pub async fn usable_for_trading(&self, feed_id: &str) -> Result<GateCheck, OracleError> {
		let (price, degraded) = self.fetch_or_cached(feed_id).await?;
		let staleness = self.staleness_of(&price, degraded);

		if staleness > StalenessLevel::Fresh {
			return Ok(GateCheck {
				usable: false,
				reason: format!(
					"price for {} is {} ({}s old), too stale for trading",
					feed_id,
					staleness_label(staleness),
					price.age_seconds(self.clock.now_secs())
				),
				price: Some(price),
			});
		}

		if price.confidence_pct() > TRADING_MAX_CONFIDENCE {
			return Ok(GateCheck {
				usable: false,
				reason: format!(
					"confidence interval {:.4}% exceeds trading ceiling",
					price.confidence_pct() * Decimal::from(100)
				),
				price: Some(price),
			});
		}

		Ok(GateCheck {
			usable: true,
			reason: "price is fresh and confident".to_string(),
			price: Some(price),
		})
	}

	/// Evaluates a stop-loss trigger. Missing, stale, or low-confidence
	/// prices never trigger: the intent stays active and is re-evaluated
	/// next tick.
	pub async fn check_stop_loss_trigger(
		&self,
		feed_id: &str,
		threshold: Decimal,
		direction: PriceDirection,
	) -> TriggerDecision {
		let (price, degraded) = match self.fetch_or_cached(feed_id).await {
			Ok(pair) => pair,
			Err(error) => {
				return TriggerDecision {
					triggered: false,
					can_execute: false,
					reason: format!("no price available for {}: {}", feed_id, error),
					price: None,
				}
			}
		};

		let staleness = self.staleness_of(&price, degraded);
		if staleness > StalenessLevel::Acceptable {
			return TriggerDecision {
				triggered: false,
				can_execute: false,
				reason: format!(
					"price for {} is {} ({}s old), too stale for stop-loss evaluation",
					feed_id,
					staleness_label(staleness),
					price.age_seconds(self.clock.now_secs())
				),
				price: Some(price.price),
			};
		}

		if price.confidence_pct() > STOP_LOSS_MAX_CONFIDENCE {
			return TriggerDecision {
				triggered: false,
				can_execute: false,
				reason: format!(
					"confidence interval {:.4}% too wide for stop-loss evaluation",
					price.confidence_pct() * Decimal::from(100)
				),
				price: Some(price.price),
			};
		}

		let triggered = match direction {
			PriceDirection::Below => price.price <= threshold,
			PriceDirection::Above => price.price >= threshold,
		};

		let reason = if triggered {
			format!(
				"price {} crossed {} threshold {}",
				price.price,
				direction_label(direction),
				threshold
			)
		} else {
			format!("price {} has not reached {}", price.price, threshold)
		};

		debug!(feed_id, triggered, %reason, "stop-loss evaluated");
		TriggerDecision {
			triggered,
			can_execute: triggered,
			reason,
			price: Some(price.price),
		}
	}
}

fn staleness_label(level: StalenessLevel) -> &'static str {
	match level {
		StalenessLevel::Fresh => "fresh",
		StalenessLevel::Acceptable => "acceptable",
		StalenessLevel::Stale => "stale",
		StalenessLevel::VeryStale => "very stale",
	}
}

fn direction_label(direction: PriceDirection) -> &'static str {
	match direction {
		PriceDirection::Below => "below",
		PriceDirection::Above => "above",
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use flowmint_types::ManualClock;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use tokio::sync::Mutex;

	/// Scripted provider: pops responses front-to-back, then repeats the
	/// last one; `fail` switches it to erroring.
	struct ScriptedProvider {
		responses: Mutex<Vec<OraclePrice>>,
		failing: std::sync::atomic::AtomicBool,
		calls: AtomicUsize,
	}

	impl ScriptedProvider {
		fn new(responses: Vec<OraclePrice>) -> Self {
			Self {
				responses: Mutex::new(responses),
				failing: std::sync::atomic::AtomicBool::new(false),
				calls: AtomicUsize::new(0),
			}
		}

		fn fail_from_now_on(&self) {
			self.failing.store(true, Ordering::SeqCst);
		}
	}

	#[async_trait]
	impl PriceFeedProvider for ScriptedProvider {
		async fn latest_price(&self, feed_id: &str) -> Result<OraclePrice, OracleError> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			if self.failing.load(Ordering::SeqCst) {
				return Err(OracleError::Provider("feed offline".to_string()));
			}
			let mut responses = self.responses.lock().await;
			if responses.len() > 1 {
				Ok(responses.remove(0))
			} else {
				responses
					.first()
					.cloned()
					.ok_or_else(|| OracleError::NoPrice(feed_id.to_string()))
			}
		}
	}

	fn price(value: i64, confidence_milli: i64, publish_time: u64) -> OraclePrice {
		OraclePrice {
			feed_id: "feed".into(),
			price: Decimal::new(value, 0),
			confidence: Decimal::new(confidence_milli, 3),
			publish_time,
		}
	}

	fn gate(provider: Arc<ScriptedProvider>, clock: Arc<ManualClock>) -> OracleGate {
		OracleGate::new(provider, clock, Duration::from_secs(5))
	}

	#[tokio::test]
	async fn stop_loss_does_not_trigger_above_threshold() {
		// Price 105, threshold 100 below, confidence 0.2%, age 10s.
		let clock = Arc::new(ManualClock::new(1_010_000));
		let provider = Arc::new(ScriptedProvider::new(vec![price(105, 210, 1_000)]));
		let gate = gate(provider, clock);

		let decision = gate
			.check_stop_loss_trigger("feed", Decimal::new(100, 0), PriceDirection::Below)
			.await;

		assert!(!decision.triggered);
		assert!(!decision.can_execute);
		assert!(decision.reason.contains("has not reached 100"));
	}

	#[tokio::test]
	async fn stop_loss_triggers_when_crossed() {
		let clock = Arc::new(ManualClock::new(1_010_000));
		let provider = Arc::new(ScriptedProvider::new(vec![price(95, 190, 1_000)]));
		let gate = gate(provider, clock);

		let decision = gate
			.check_stop_loss_trigger("feed", Decimal::new(100, 0), PriceDirection::Below)
			.await;

		assert!(decision.triggered);
		assert!(decision.can_execute);
	}

	#[tokio::test]
	async fn stale_price_blocks_execution_regardless_of_value() {
		// Same crossed price but 700s old.
		let clock = Arc::new(ManualClock::new(1_700_000));
		let provider = Arc::new(ScriptedProvider::new(vec![price(95, 190, 1_000)]));
		let gate = gate(provider, clock);

		let decision = gate
			.check_stop_loss_trigger("feed", Decimal::new(100, 0), PriceDirection::Below)
			.await;

		assert!(!decision.triggered);
		assert!(!decision.can_execute);
		assert!(decision.reason.contains("stale"));
	}

	#[tokio::test]
	async fn wide_confidence_blocks_stop_loss() {
		// Confidence 2% of price.
		let clock = Arc::new(ManualClock::new(1_010_000));
		let provider = Arc::new(ScriptedProvider::new(vec![price(100, 2_000, 1_000)]));
		let gate = gate(provider, clock);

		let decision = gate
			.check_stop_loss_trigger("feed", Decimal::new(100, 0), PriceDirection::Below)
			.await;

		assert!(!decision.can_execute);
		assert!(decision.reason.contains("confidence"));
	}

	#[tokio::test]
	async fn cache_serves_within_ttl_and_ages_on_read() {
		let clock = Arc::new(ManualClock::new(1_000_000));
		let provider = Arc::new(ScriptedProvider::new(vec![price(100, 200, 1_000)]));
		let gate = gate(provider.clone(), clock.clone());

		let first = gate.usable_for_trading("feed").await.unwrap();
		assert!(first.usable);
		assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

		// Within TTL: served from cache, no second fetch.
		clock.advance(Duration::from_secs(2));
		let second = gate.usable_for_trading("feed").await.unwrap();
		assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
		assert!(second.usable);

		// Age keeps growing between reads of the same cached value.
		let age_a = second.price.unwrap().age_seconds(clock.now_secs());
		clock.advance(Duration::from_secs(1));
		let age_b = gate
			.usable_for_trading("feed")
			.await
			.unwrap()
			.price
			.unwrap()
			.age_seconds(clock.now_secs());
		assert!(age_b > age_a);
	}

	#[tokio::test]
	async fn trading_requires_fresh_price() {
		// 45s old: acceptable for stop-loss, too old for trading.
		let clock = Arc::new(ManualClock::new(1_045_000));
		let provider = Arc::new(ScriptedProvider::new(vec![price(100, 200, 1_000)]));
		let gate = gate(provider, clock);

		let check = gate.usable_for_trading("feed").await.unwrap();
		assert!(!check.usable);
		assert!(check.reason.contains("stale"));
	}

	#[tokio::test]
	async fn provider_failure_degrades_cached_value_to_very_stale() {
		let clock = Arc::new(ManualClock::new(1_000_000));
		let provider = Arc::new(ScriptedProvider::new(vec![price(95, 190, 1_000)]));
		let gate = gate(provider.clone(), clock.clone());

		// Prime the cache with a perfectly good price.
		let decision = gate
			.check_stop_loss_trigger("feed", Decimal::new(100, 0), PriceDirection::Below)
			.await;
		assert!(decision.can_execute);

		// Provider goes down; TTL expires; the fallback must not pass as
		// fresh even though the cached observation is seconds old.
		provider.fail_from_now_on();
		clock.advance(Duration::from_secs(6));

		let degraded = gate
			.check_stop_loss_trigger("feed", Decimal::new(100, 0), PriceDirection::Below)
			.await;
		assert!(!degraded.can_execute);
		assert!(degraded.reason.contains("stale"));
	}

	#[tokio::test]
	async fn missing_feed_reports_no_price() {
		let clock = Arc::new(ManualClock::new(1_000_000));
		let provider = Arc::new(ScriptedProvider::new(vec![]));
		let gate = gate(provider, clock);

		let decision = gate
			.check_stop_loss_trigger("feed", Decimal::new(100, 0), PriceDirection::Below)
			.await;
		assert!(!decision.triggered);
		assert!(!decision.can_execute);
		assert!(decision.reason.contains("no price available"));
	}
}
