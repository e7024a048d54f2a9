//! Fee and compute-budget recommendation types.

use serde::{Deserialize, Serialize};

/// Caller-selected execution profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeProfile {
	/// Land quickly; pay up.
	Fast,
	/// Balanced default.
	Auto,
	/// Minimize cost, accept slower inclusion.
	Cheap,
}

impl Default for FeeProfile {
	fn default() -> Self {
		FeeProfile::Auto
	}
}

/// A concrete priority-fee and compute-unit recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeEstimate {
	/// Price per compute unit, micro-lamports.
	pub priority_fee_micro_lamports: u64,
	/// Compute-unit limit including the profile's buffer.
	pub compute_unit_limit: u32,
	/// 0.0..=1.0; decays with sample age, grows with sample count.
	pub confidence: f64,
	/// How many congestion samples backed this estimate.
	pub sample_count: usize,
	pub profile: FeeProfile,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn profile_serializes_snake_case() {
		assert_eq!(serde_json::to_string(&FeeProfile::Fast).unwrap(), "\"fast\"");
		assert_eq!(
			serde_json::from_str::<FeeProfile>("\"cheap\"").unwrap(),
			FeeProfile::Cheap
		);
	}
}
