//! Oracle price observations and staleness classification.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::FeedId;

/// Seconds after which a price stops being trading-eligible.
pub const FRESH_MAX_AGE_SECS: u64 = 30;
/// Seconds after which a price stops being stop-loss-eligible.
pub const ACCEPTABLE_MAX_AGE_SECS: u64 = 60;
/// Seconds after which a price is no better than very stale.
pub const STALE_MAX_AGE_SECS: u64 = 600;

/// Staleness tiers ordered from freshest to stalest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StalenessLevel {
	Fresh,
	Acceptable,
	Stale,
	VeryStale,
}

impl StalenessLevel {
	pub fn classify(age_seconds: u64) -> Self {
		if age_seconds <= FRESH_MAX_AGE_SECS {
			StalenessLevel::Fresh
		} else if age_seconds <= ACCEPTABLE_MAX_AGE_SECS {
			StalenessLevel::Acceptable
		} else if age_seconds <= STALE_MAX_AGE_SECS {
			StalenessLevel::Stale
		} else {
			StalenessLevel::VeryStale
		}
	}
}

/// A point-in-time price observation from the feed provider.
///
/// Age and staleness are derived on every read, never stored: a cached
/// observation keeps aging between reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OraclePrice {
	pub feed_id: FeedId,
	pub price: Decimal,
	/// Absolute confidence interval, same unit as `price`.
	pub confidence: Decimal,
	/// Provider publish time, unix seconds.
	pub publish_time: u64,
}

impl OraclePrice {
	/// Confidence as a fraction of price (0.005 = 0.5%). A zero price
	/// yields the worst possible confidence.
	pub fn confidence_pct(&self) -> Decimal {
		if self.price.is_zero() {
			return Decimal::MAX;
		}
		self.confidence / self.price
	}

	pub fn age_seconds(&self, now_secs: u64) -> u64 {
		now_secs.saturating_sub(self.publish_time)
	}

	pub fn staleness(&self, now_secs: u64) -> StalenessLevel {
		StalenessLevel::classify(self.age_seconds(now_secs))
	}
}
