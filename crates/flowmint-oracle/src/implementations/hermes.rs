//! Hermes (Pyth) price feed provider.
//!
//! Fetches the latest published price for a feed id and decodes the
//! integer mantissa + exponent representation into decimals at this
//! boundary, so the rest of the engine never handles raw feed encoding.

use async_trait::async_trait;
use flowmint_types::OraclePrice;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::{OracleError, PriceFeedProvider};

/// HTTP client for the Hermes price API.
pub struct HermesProvider {
	http: reqwest::Client,
	base_url: String,
}

#[derive(Debug, Deserialize)]
struct LatestPriceResponse {
	parsed: Vec<ParsedFeed>,
}

#[derive(Debug, Deserialize)]
struct ParsedFeed {
	id: String,
	price: FeedPrice,
}

#[derive(Debug, Deserialize)]
struct FeedPrice {
	price: String,
	conf: String,
	expo: i32,
	publish_time: i64,
}

impl HermesProvider {
	pub fn new(base_url: impl Into<String>) -> Self {
		Self {
			http: reqwest::Client::new(),
			base_url: base_url.into(),
		}
	}
}

#[async_trait]
impl PriceFeedProvider for HermesProvider {
	async fn latest_price(&self, feed_id: &str) -> Result<OraclePrice, OracleError> {
		let url = format!("{}/v2/updates/price/latest", self.base_url);
		let response = self
			.http
			.get(&url)
			.query(&[("ids[]", feed_id)])
			.send()
			.await
			.map_err(|e| OracleError::Provider(e.to_string()))?;

		if !response.status().is_success() {
			return Err(OracleError::Provider(format!(
				"hermes returned {}",
				response.status()
			)));
		}

		let payload: LatestPriceResponse = response
			.json()
			.await
			.map_err(|e| OracleError::MalformedResponse(e.to_string()))?;

		let feed = payload
			.parsed
			.into_iter()
			.find(|feed| feed.id.eq_ignore_ascii_case(feed_id.trim_start_matches("0x")))
			.ok_or_else(|| OracleError::NoPrice(feed_id.to_string()))?;

		let price = decode_fixed_point(&feed.price.price, feed.price.expo)?;
		let confidence = decode_fixed_point(&feed.price.conf, feed.price.expo)?;

		Ok(OraclePrice {
			feed_id: feed_id.to_string(),
			price,
			confidence,
			publish_time: feed.price.publish_time.max(0) as u64,
		})
	}
}

/// Decodes Pyth's `mantissa * 10^expo` representation.
fn decode_fixed_point(mantissa: &str, expo: i32) -> Result<Decimal, OracleError> {
	let value: i128 = mantissa
		.parse()
		.map_err(|_| OracleError::MalformedResponse(format!("bad mantissa {:?}", mantissa)))?;

	if expo <= 0 {
		let scale = expo.unsigned_abs();
		if scale > 28 {
			return Err(OracleError::MalformedResponse(format!(
				"unsupported exponent {}",
				expo
			)));
		}
		Decimal::try_from_i128_with_scale(value, scale)
			.map_err(|e| OracleError::MalformedResponse(e.to_string()))
	} else {
		let factor = 10i128
			.checked_pow(expo as u32)
			.ok_or_else(|| OracleError::MalformedResponse(format!("exponent {} overflows", expo)))?;
		let scaled = value
			.checked_mul(factor)
			.ok_or_else(|| OracleError::MalformedResponse("mantissa overflows".to_string()))?;
		Decimal::try_from_i128_with_scale(scaled, 0)
			.map_err(|e| OracleError::MalformedResponse(e.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn decodes_negative_exponent() {
		// 6_123_450_000 * 10^-8 = 61.2345
		let value = decode_fixed_point("6123450000", -8).unwrap();
		assert_eq!(value, Decimal::new(612345, 4));
	}

	#[test]
	fn decodes_zero_and_positive_exponent() {
		assert_eq!(decode_fixed_point("42", 0).unwrap(), Decimal::new(42, 0));
		assert_eq!(decode_fixed_point("42", 2).unwrap(), Decimal::new(4200, 0));
	}

	#[test]
	fn rejects_garbage_mantissa() {
		assert!(decode_fixed_point("not-a-number", -8).is_err());
	}
}
