//! Typed configuration sections with serde defaults.

use serde::{Deserialize, Serialize};

/// Root configuration for the engine binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
	pub engine: EngineSection,
	#[serde(default)]
	pub storage: StorageSection,
	pub rpc: RpcSection,
	pub oracle: OracleSection,
	pub swap: SwapSection,
	#[serde(default)]
	pub locks: LockSection,
	#[serde(default)]
	pub fees: FeeSection,
	#[serde(default)]
	pub protocol: ProtocolSection,
}

impl EngineConfig {
	/// Semantic checks that serde cannot express.
	pub fn validate(&self) -> Result<(), String> {
		if self.rpc.endpoints.is_empty() {
			return Err("at least one rpc endpoint must be configured".to_string());
		}
		if self.rpc.endpoints.iter().any(|e| e.weight <= 0.0) {
			return Err("rpc endpoint weights must be positive".to_string());
		}
		if self.engine.tick_interval_secs == 0 {
			return Err("tick interval must be positive".to_string());
		}
		if self.engine.max_concurrent == 0 {
			return Err("max_concurrent must be positive".to_string());
		}
		if self.locks.retry_limit == 0 {
			return Err("lock retry limit must be at least 1".to_string());
		}
		if self.locks.window_ms == 0 {
			return Err("lock window must be positive".to_string());
		}
		if self.protocol.protected_slippage_bps > self.protocol.default_slippage_bps {
			return Err(
				"protected slippage ceiling cannot exceed the default ceiling".to_string(),
			);
		}
		Ok(())
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
	pub name: String,
	#[serde(default = "default_tick_interval")]
	pub tick_interval_secs: u64,
	#[serde(default = "default_max_concurrent")]
	pub max_concurrent: usize,
	#[serde(default = "default_log_level")]
	pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
	#[serde(default = "default_storage_backend")]
	pub backend: String,
	pub path: Option<String>,
}

impl Default for StorageSection {
	fn default() -> Self {
		Self {
			backend: default_storage_backend(),
			path: None,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcSection {
	pub endpoints: Vec<RpcEndpointSection>,
	#[serde(default = "default_max_attempts")]
	pub max_attempts: u32,
	#[serde(default = "default_failure_rate_threshold")]
	pub failure_rate_threshold: f64,
	#[serde(default = "default_sample_window")]
	pub sample_window: usize,
	#[serde(default = "default_cooldown_secs")]
	pub cooldown_secs: u64,
	#[serde(default = "default_confirm_timeout_secs")]
	pub confirm_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcEndpointSection {
	pub url: String,
	#[serde(default = "default_weight")]
	pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleSection {
	pub hermes_url: String,
	#[serde(default = "default_oracle_cache_ttl_secs")]
	pub cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapSection {
	pub jupiter_url: String,
	#[serde(default = "default_quote_ttl_secs")]
	pub quote_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockSection {
	#[serde(default = "default_window_ms")]
	pub window_ms: u64,
	#[serde(default = "default_retry_limit")]
	pub retry_limit: u32,
	#[serde(default = "default_max_running_ms")]
	pub max_running_ms: u64,
}

impl Default for LockSection {
	fn default() -> Self {
		Self {
			window_ms: default_window_ms(),
			retry_limit: default_retry_limit(),
			max_running_ms: default_max_running_ms(),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeSection {
	#[serde(default = "default_base_compute_units")]
	pub base_compute_units: u32,
	#[serde(default = "default_fee_cache_ttl_secs")]
	pub cache_ttl_secs: u64,
}

impl Default for FeeSection {
	fn default() -> Self {
		Self {
			base_compute_units: default_base_compute_units(),
			cache_ttl_secs: default_fee_cache_ttl_secs(),
		}
	}
}

/// Mirror of the on-chain protocol config the engine validates against
/// before quoting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolSection {
	#[serde(default = "default_slippage_bps")]
	pub default_slippage_bps: u16,
	#[serde(default = "default_protected_slippage_bps")]
	pub protected_slippage_bps: u16,
	#[serde(default = "default_max_price_impact_bps")]
	pub max_price_impact_bps: u16,
	#[serde(default)]
	pub protected_mode_enabled: bool,
}

impl Default for ProtocolSection {
	fn default() -> Self {
		Self {
			default_slippage_bps: default_slippage_bps(),
			protected_slippage_bps: default_protected_slippage_bps(),
			max_price_impact_bps: default_max_price_impact_bps(),
			protected_mode_enabled: false,
		}
	}
}

fn default_tick_interval() -> u64 {
	10
}

fn default_max_concurrent() -> usize {
	8
}

fn default_log_level() -> String {
	"info".to_string()
}

fn default_storage_backend() -> String {
	"memory".to_string()
}

fn default_max_attempts() -> u32 {
	3
}

fn default_failure_rate_threshold() -> f64 {
	0.5
}

fn default_sample_window() -> usize {
	20
}

fn default_cooldown_secs() -> u64 {
	30
}

fn default_confirm_timeout_secs() -> u64 {
	90
}

fn default_weight() -> f64 {
	1.0
}

fn default_oracle_cache_ttl_secs() -> u64 {
	5
}

fn default_quote_ttl_secs() -> u64 {
	30
}

fn default_window_ms() -> u64 {
	60_000
}

fn default_retry_limit() -> u32 {
	3
}

fn default_max_running_ms() -> u64 {
	600_000
}

fn default_base_compute_units() -> u32 {
	200_000
}

fn default_fee_cache_ttl_secs() -> u64 {
	15
}

fn default_slippage_bps() -> u16 {
	100
}

fn default_protected_slippage_bps() -> u16 {
	50
}

fn default_max_price_impact_bps() -> u16 {
	200
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_validate() {
		let config: EngineConfig = toml::from_str(
			r#"
[engine]
name = "x"

[[rpc.endpoints]]
url = "http://localhost:8899"

[oracle]
hermes_url = "http://localhost:9900"

[swap]
jupiter_url = "http://localhost:9901"
"#,
		)
		.unwrap();

		config.validate().unwrap();
		assert_eq!(config.rpc.max_attempts, 3);
		assert_eq!(config.locks.window_ms, 60_000);
		assert_eq!(config.protocol.default_slippage_bps, 100);
	}

	#[test]
	fn zero_tick_interval_is_rejected() {
		let mut config: EngineConfig = toml::from_str(
			r#"
[engine]
name = "x"

[[rpc.endpoints]]
url = "http://localhost:8899"

[oracle]
hermes_url = "http://localhost:9900"

[swap]
jupiter_url = "http://localhost:9901"
"#,
		)
		.unwrap();
		config.engine.tick_interval_secs = 0;
		assert!(config.validate().is_err());
	}
}
