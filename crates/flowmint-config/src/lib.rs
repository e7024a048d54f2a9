//! Configuration loading for the FlowMint engine.
//!
//! A TOML file is the single source of truth. `${VAR}` references are
//! substituted from the environment before parsing, and a small set of
//! `FLOWMINT_`-prefixed variables override their file counterparts so
//! deployments can tweak hot settings without editing the file.

use std::env;
use std::path::Path;

use regex::Regex;
use thiserror::Error;

mod types;

pub use types::*;

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("file not found: {0}")]
	FileNotFound(String),

	#[error("parse error: {0}")]
	ParseError(String),

	#[error("validation error: {0}")]
	ValidationError(String),

	#[error("environment variable not found: {0}")]
	EnvVarNotFound(String),

	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
}

/// Configuration loader with environment variable substitution.
#[derive(Default)]
pub struct ConfigLoader {
	file_path: Option<String>,
	env_prefix: String,
}

impl ConfigLoader {
	pub fn new() -> Self {
		Self {
			file_path: None,
			env_prefix: "FLOWMINT_".to_string(),
		}
	}

	pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
		self.file_path = Some(path.as_ref().to_string_lossy().to_string());
		self
	}

	pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.env_prefix = prefix.into();
		self
	}

	pub async fn load(&self) -> Result<EngineConfig, ConfigError> {
		let file_path = self.file_path.as_ref().ok_or_else(|| {
			ConfigError::FileNotFound("no configuration file specified".to_string())
		})?;

		let mut config = self.load_from_file(file_path).await?;
		self.apply_env_overrides(&mut config)?;
		config
			.validate()
			.map_err(ConfigError::ValidationError)?;

		Ok(config)
	}

	async fn load_from_file(&self, file_path: &str) -> Result<EngineConfig, ConfigError> {
		let content = tokio::fs::read_to_string(file_path).await.map_err(|e| {
			if e.kind() == std::io::ErrorKind::NotFound {
				ConfigError::FileNotFound(file_path.to_string())
			} else {
				ConfigError::Io(e)
			}
		})?;

		let substituted = self.substitute_env_vars(&content)?;

		toml::from_str(&substituted).map_err(|e| ConfigError::ParseError(e.to_string()))
	}

	fn substitute_env_vars(&self, content: &str) -> Result<String, ConfigError> {
		let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
			.map_err(|e| ConfigError::ParseError(e.to_string()))?;

		let mut result = content.to_string();
		for cap in re.captures_iter(content) {
			let full_match = &cap[0];
			let var_name = &cap[1];

			let env_value = env::var(var_name)
				.map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;

			result = result.replace(full_match, &env_value);
		}

		Ok(result)
	}

	fn apply_env_overrides(&self, config: &mut EngineConfig) -> Result<(), ConfigError> {
		if let Ok(log_level) = env::var(format!("{}LOG_LEVEL", self.env_prefix)) {
			config.engine.log_level = log_level;
		}

		if let Ok(tick) = env::var(format!("{}TICK_INTERVAL_SECS", self.env_prefix)) {
			config.engine.tick_interval_secs = tick.parse().map_err(|e| {
				ConfigError::ValidationError(format!("invalid tick interval: {}", e))
			})?;
		}

		if let Ok(path) = env::var(format!("{}STORAGE_PATH", self.env_prefix)) {
			config.storage.path = Some(path);
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	fn minimal_toml() -> &'static str {
		r#"
[engine]
name = "flowmint-test"

[[rpc.endpoints]]
url = "http://localhost:8899"
weight = 1.0

[oracle]
hermes_url = "http://localhost:9900"

[swap]
jupiter_url = "http://localhost:9901"
"#
	}

	#[tokio::test]
	async fn loads_minimal_file_with_defaults() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		file.write_all(minimal_toml().as_bytes()).unwrap();

		let config = ConfigLoader::new()
			.with_file(file.path())
			.load()
			.await
			.unwrap();

		assert_eq!(config.engine.name, "flowmint-test");
		assert_eq!(config.engine.tick_interval_secs, 10);
		assert_eq!(config.locks.retry_limit, 3);
		assert_eq!(config.rpc.endpoints.len(), 1);
	}

	#[tokio::test]
	async fn missing_file_is_reported() {
		let err = ConfigLoader::new()
			.with_file("/definitely/not/here.toml")
			.load()
			.await
			.unwrap_err();
		assert!(matches!(err, ConfigError::FileNotFound(_)));
	}

	#[tokio::test]
	async fn substitutes_environment_variables() {
		std::env::set_var("FLOWMINT_TEST_RPC_URL", "http://example.com:8899");

		let toml = r#"
[engine]
name = "flowmint-test"

[[rpc.endpoints]]
url = "${FLOWMINT_TEST_RPC_URL}"

[oracle]
hermes_url = "http://localhost:9900"

[swap]
jupiter_url = "http://localhost:9901"
"#;
		let mut file = tempfile::NamedTempFile::new().unwrap();
		file.write_all(toml.as_bytes()).unwrap();

		let config = ConfigLoader::new()
			.with_file(file.path())
			.load()
			.await
			.unwrap();

		assert_eq!(config.rpc.endpoints[0].url, "http://example.com:8899");
	}

	#[tokio::test]
	async fn unknown_variable_fails_loudly() {
		let toml = r#"
[engine]
name = "flowmint-test"

[[rpc.endpoints]]
url = "${FLOWMINT_TEST_NO_SUCH_VAR}"

[oracle]
hermes_url = "http://localhost:9900"

[swap]
jupiter_url = "http://localhost:9901"
"#;
		let mut file = tempfile::NamedTempFile::new().unwrap();
		file.write_all(toml.as_bytes()).unwrap();

		let err = ConfigLoader::new()
			.with_file(file.path())
			.load()
			.await
			.unwrap_err();
		assert!(matches!(err, ConfigError::EnvVarNotFound(_)));
	}

	#[tokio::test]
	async fn rejects_config_without_endpoints() {
		let toml = r#"
[engine]
name = "flowmint-test"

[rpc]
endpoints = []

[oracle]
hermes_url = "http://localhost:9900"

[swap]
jupiter_url = "http://localhost:9901"
"#;
		let mut file = tempfile::NamedTempFile::new().unwrap();
		file.write_all(toml.as_bytes()).unwrap();

		let err = ConfigLoader::new()
			.with_file(file.path())
			.load()
			.await
			.unwrap_err();
		assert!(matches!(err, ConfigError::ValidationError(_)));
	}
}
