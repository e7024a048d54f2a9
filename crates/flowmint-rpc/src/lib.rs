//! Health-aware network client.
//!
//! Maintains a weighted set of upstream RPC endpoints with rolling
//! success/failure tracking, and executes operations with automatic
//! failover and bounded retries. Health state is process-local by
//! design: every scheduler process rebuilds its own view.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use flowmint_types::{Clock, TimestampMs};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

pub mod submit;

pub use submit::{SubmissionOutcome, TransactionSubmitter};

#[derive(Debug, Error)]
pub enum RpcError {
	#[error("no endpoints configured")]
	NoEndpoints,
	#[error("no healthy endpoint available")]
	NoHealthyEndpoint,
	#[error("http error: {0}")]
	Http(String),
	#[error("rpc error {code}: {message}")]
	Rpc { code: i64, message: String },
	#[error("malformed response: {0}")]
	MalformedResponse(String),
	#[error("confirmation timeout for {0}")]
	ConfirmationTimeout(String),
	#[error("transaction failed: {0}")]
	TransactionFailed(String),
	#[error("all endpoints failed after {attempts} attempts: {last}")]
	AllEndpointsFailed { attempts: u32, last: String },
}

/// Static configuration for one upstream endpoint.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
	pub url: String,
	/// Selection bias; higher weight means proportionally more traffic.
	pub weight: f64,
}

/// Pool-wide tuning.
#[derive(Debug, Clone)]
pub struct RpcPoolConfig {
	pub endpoints: Vec<EndpointConfig>,
	/// Attempts per `execute_with_failover` call.
	pub max_attempts: u32,
	/// Failure rate over the trailing window above which an endpoint is
	/// unhealthy.
	pub failure_rate_threshold: f64,
	/// Trailing sample window size per endpoint.
	pub sample_window: usize,
	/// How long an unhealthy endpoint sits out before being retested.
	pub cooldown_ms: u64,
}

impl Default for RpcPoolConfig {
	fn default() -> Self {
		Self {
			endpoints: Vec::new(),
			max_attempts: 3,
			failure_rate_threshold: 0.5,
			sample_window: 20,
			cooldown_ms: 30_000,
		}
	}
}

/// Handle passed to operations: the endpoint's identity plus a shared
/// HTTP client.
pub struct RpcEndpoint {
	url: String,
	http: reqwest::Client,
}

impl RpcEndpoint {
	pub fn url(&self) -> &str {
		&self.url
	}

	/// One JSON-RPC 2.0 call. The response is parsed at this boundary
	/// into `Ok(result)` or a typed error; callers never inspect raw
	/// response shapes.
	pub async fn rpc_call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
		let body = json!({
			"jsonrpc": "2.0",
			"id": 1,
			"method": method,
			"params": params,
		});

		let response = self
			.http
			.post(&self.url)
			.json(&body)
			.send()
			.await
			.map_err(|e| RpcError::Http(e.to_string()))?;

		let payload: Value = response
			.json()
			.await
			.map_err(|e| RpcError::Http(e.to_string()))?;

		if let Some(error) = payload.get("error") {
			return Err(RpcError::Rpc {
				code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
				message: error
					.get("message")
					.and_then(Value::as_str)
					.unwrap_or("unknown")
					.to_string(),
			});
		}

		payload
			.get("result")
			.cloned()
			.ok_or_else(|| RpcError::MalformedResponse("missing result field".to_string()))
	}
}

#[derive(Debug, Clone, Copy)]
struct Sample {
	success: bool,
	latency_ms: u64,
}

/// Rolling per-endpoint health state.
struct EndpointSlot {
	endpoint: Arc<RpcEndpoint>,
	weight: f64,
	samples: Mutex<VecDeque<Sample>>,
	cooldown_until: Mutex<Option<TimestampMs>>,
}

impl EndpointSlot {
	fn failure_rate(&self) -> f64 {
		let samples = self.samples.lock().expect("sample lock poisoned");
		if samples.is_empty() {
			return 0.0;
		}
		let failures = samples.iter().filter(|s| !s.success).count();
		failures as f64 / samples.len() as f64
	}

	fn average_latency_ms(&self) -> Option<u64> {
		let samples = self.samples.lock().expect("sample lock poisoned");
		let successes: Vec<u64> = samples
			.iter()
			.filter(|s| s.success)
			.map(|s| s.latency_ms)
			.collect();
		if successes.is_empty() {
			None
		} else {
			Some(successes.iter().sum::<u64>() / successes.len() as u64)
		}
	}

	fn sample_count(&self) -> usize {
		self.samples.lock().expect("sample lock poisoned").len()
	}
}

/// Point-in-time health snapshot for one endpoint.
#[derive(Debug, Clone)]
pub struct EndpointHealth {
	pub url: String,
	pub healthy: bool,
	pub failure_rate: f64,
	pub sample_count: usize,
	pub average_latency_ms: Option<u64>,
}

/// One attempt as observed by the pool, for receipt timelines.
#[derive(Debug, Clone)]
pub struct AttemptTrace {
	pub endpoint: String,
	pub latency_ms: u64,
	pub error: Option<String>,
	pub at: TimestampMs,
}

/// Result of a traced failover execution.
pub struct TracedOutcome<T> {
	pub result: Result<T, RpcError>,
	pub attempts: Vec<AttemptTrace>,
}

/// Weighted, health-aware endpoint pool.
pub struct RpcPool {
	slots: Vec<Arc<EndpointSlot>>,
	config: RpcPoolConfig,
	clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RpcPool {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RpcPool")
			.field("slots", &self.slots.len())
			.field("config", &self.config)
			.finish_non_exhaustive()
	}
}

impl RpcPool {
	pub fn new(config: RpcPoolConfig, clock: Arc<dyn Clock>) -> Result<Self, RpcError> {
		if config.endpoints.is_empty() {
			return Err(RpcError::NoEndpoints);
		}

		let http = reqwest::Client::new();
		let slots = config
			.endpoints
			.iter()
			.map(|endpoint| {
				Arc::new(EndpointSlot {
					endpoint: Arc::new(RpcEndpoint {
						url: endpoint.url.clone(),
						http: http.clone(),
					}),
					weight: endpoint.weight,
					samples: Mutex::new(VecDeque::new()),
					cooldown_until: Mutex::new(None),
				})
			})
			.collect();

		Ok(Self {
			slots,
			config,
			clock,
		})
	}

	/// An endpoint with no history is healthy by default (optimistic);
	/// otherwise its trailing failure rate must stay under the threshold.
	fn is_healthy(&self, slot: &EndpointSlot) -> bool {
		let now = self.clock.now_ms();
		{
			let mut cooldown = slot.cooldown_until.lock().expect("cooldown lock poisoned");
			if let Some(until) = *cooldown {
				if now < until {
					return false;
				}
				// Cooldown expired: forget the bad streak and retest
				// optimistically.
				*cooldown = None;
				slot.samples.lock().expect("sample lock poisoned").clear();
			}
		}
		slot.failure_rate() < self.config.failure_rate_threshold
	}

	fn record(&self, slot: &EndpointSlot, success: bool, latency_ms: u64) {
		{
			let mut samples = slot.samples.lock().expect("sample lock poisoned");
			samples.push_back(Sample {
				success,
				latency_ms,
			});
			while samples.len() > self.config.sample_window {
				samples.pop_front();
			}
		}

		if !success && slot.failure_rate() >= self.config.failure_rate_threshold {
			let until = self.clock.now_ms() + self.config.cooldown_ms;
			let mut cooldown = slot.cooldown_until.lock().expect("cooldown lock poisoned");
			if cooldown.is_none() {
				*cooldown = Some(until);
				warn!(
					url = %slot.endpoint.url,
					failure_rate = slot.failure_rate(),
					"endpoint crossed failure threshold, cooling down"
				);
			}
		}
	}

	/// Weighted random pick among healthy, not-yet-tried endpoints.
	/// Falls back to any untried endpoint when none are healthy rather
	/// than failing a call that still has attempts left.
	fn select(&self, exclude: &[String]) -> Option<Arc<EndpointSlot>> {
		let candidates: Vec<&Arc<EndpointSlot>> = self
			.slots
			.iter()
			.filter(|slot| !exclude.contains(&slot.endpoint.url))
			.filter(|slot| self.is_healthy(slot))
			.collect();

		let pool = if candidates.is_empty() {
			self.slots
				.iter()
				.filter(|slot| !exclude.contains(&slot.endpoint.url))
				.collect::<Vec<_>>()
		} else {
			candidates
		};

		if pool.is_empty() {
			return None;
		}

		let total_weight: f64 = pool.iter().map(|slot| slot.weight).sum();
		let mut roll = fastrand::f64() * total_weight;
		for slot in &pool {
			roll -= slot.weight;
			if roll <= 0.0 {
				return Some(Arc::clone(slot));
			}
		}
		pool.last().map(|slot| Arc::clone(slot))
	}

	/// Runs `operation` against healthy endpoints, failing over on error,
	/// and returns the per-attempt trace alongside the result.
	pub async fn execute_traced<T, F, Fut>(&self, label: &str, operation: F) -> TracedOutcome<T>
	where
		F: Fn(Arc<RpcEndpoint>) -> Fut,
		Fut: Future<Output = Result<T, RpcError>>,
	{
		let mut tried: Vec<String> = Vec::new();
		let mut attempts = Vec::new();
		let mut last_error: Option<RpcError> = None;

		for attempt in 1..=self.config.max_attempts {
			let Some(slot) = self.select(&tried) else {
				break;
			};
			let url = slot.endpoint.url.clone();
			tried.push(url.clone());

			let started = Instant::now();
			let result = operation(Arc::clone(&slot.endpoint)).await;
			let latency_ms = started.elapsed().as_millis() as u64;

			match result {
				Ok(value) => {
					self.record(&slot, true, latency_ms);
					attempts.push(AttemptTrace {
						endpoint: url,
						latency_ms,
						error: None,
						at: self.clock.now_ms(),
					});
					debug!(label, attempt, "rpc operation succeeded");
					return TracedOutcome {
						result: Ok(value),
						attempts,
					};
				}
				Err(error) => {
					self.record(&slot, false, latency_ms);
					warn!(label, attempt, endpoint = %url, %error, "rpc operation failed");
					attempts.push(AttemptTrace {
						endpoint: url,
						latency_ms,
						error: Some(error.to_string()),
						at: self.clock.now_ms(),
					});
					last_error = Some(error);
				}
			}
		}

		let result = Err(match last_error {
			Some(error) => RpcError::AllEndpointsFailed {
				attempts: attempts.len() as u32,
				last: error.to_string(),
			},
			None => RpcError::NoHealthyEndpoint,
		});
		TracedOutcome { result, attempts }
	}

	/// `execute_traced` without the attempt log.
	pub async fn execute_with_failover<T, F, Fut>(
		&self,
		label: &str,
		operation: F,
	) -> Result<T, RpcError>
	where
		F: Fn(Arc<RpcEndpoint>) -> Fut,
		Fut: Future<Output = Result<T, RpcError>>,
	{
		self.execute_traced(label, operation).await.result
	}

	/// Health snapshot across all endpoints.
	pub fn health(&self) -> Vec<EndpointHealth> {
		self.slots
			.iter()
			.map(|slot| EndpointHealth {
				url: slot.endpoint.url.clone(),
				healthy: self.is_healthy(slot),
				failure_rate: slot.failure_rate(),
				sample_count: slot.sample_count(),
				average_latency_ms: slot.average_latency_ms(),
			})
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use flowmint_types::ManualClock;
	use std::collections::HashMap;
	use std::sync::atomic::{AtomicUsize, Ordering};

	fn pool(urls: &[(&str, f64)], max_attempts: u32, clock: Arc<ManualClock>) -> RpcPool {
		let config = RpcPoolConfig {
			endpoints: urls
				.iter()
				.map(|(url, weight)| EndpointConfig {
					url: (*url).to_string(),
					weight: *weight,
				})
				.collect(),
			max_attempts,
			failure_rate_threshold: 0.5,
			sample_window: 4,
			cooldown_ms: 30_000,
		};
		RpcPool::new(config, clock).unwrap()
	}

	#[tokio::test]
	async fn empty_pool_is_rejected() {
		let clock = Arc::new(ManualClock::new(0));
		let err = RpcPool::new(RpcPoolConfig::default(), clock).unwrap_err();
		assert!(matches!(err, RpcError::NoEndpoints));
	}

	#[tokio::test]
	async fn fails_over_to_a_working_endpoint() {
		let clock = Arc::new(ManualClock::new(0));
		// Zero weight keeps the good endpoint fallback-only, so the first
		// pick is deterministic.
		let pool = pool(&[("http://bad", 1_000.0), ("http://good", 0.0)], 2, clock);

		let outcome = pool
			.execute_traced("test", |endpoint| async move {
				if endpoint.url() == "http://bad" {
					Err(RpcError::Http("connection refused".into()))
				} else {
					Ok(endpoint.url().to_string())
				}
			})
			.await;

		assert_eq!(outcome.result.unwrap(), "http://good");
		assert_eq!(outcome.attempts.len(), 2);
		assert_eq!(outcome.attempts[0].endpoint, "http://bad");
		assert!(outcome.attempts[0].error.is_some());
		assert_eq!(outcome.attempts[1].endpoint, "http://good");
		assert!(outcome.attempts[1].error.is_none());
	}

	#[tokio::test]
	async fn unhealthy_endpoint_ages_out_of_selection() {
		let clock = Arc::new(ManualClock::new(0));
		let pool = pool(&[("http://bad", 1_000.0), ("http://good", 0.0)], 2, clock);

		// Drive the bad endpoint over the failure threshold.
		for _ in 0..4 {
			let _ = pool
				.execute_with_failover("test", |endpoint| async move {
					if endpoint.url() == "http://bad" {
						Err(RpcError::Http("connection refused".into()))
					} else {
						Ok(())
					}
				})
				.await;
		}

		let health: HashMap<String, bool> = pool
			.health()
			.into_iter()
			.map(|h| (h.url, h.healthy))
			.collect();
		assert_eq!(health["http://bad"], false);
		assert_eq!(health["http://good"], true);

		// Once unhealthy, the bad endpoint is never selected despite its
		// weight: every call succeeds on the first attempt.
		let bad_calls = Arc::new(AtomicUsize::new(0));
		for _ in 0..20 {
			let bad_calls = bad_calls.clone();
			let outcome = pool
				.execute_traced("test", move |endpoint| {
					let bad_calls = bad_calls.clone();
					async move {
						if endpoint.url() == "http://bad" {
							bad_calls.fetch_add(1, Ordering::SeqCst);
							Err(RpcError::Http("connection refused".into()))
						} else {
							Ok(())
						}
					}
				})
				.await;
			assert!(outcome.result.is_ok());
			assert_eq!(outcome.attempts.len(), 1);
		}
		assert_eq!(bad_calls.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn cooldown_expiry_retests_the_endpoint() {
		let clock = Arc::new(ManualClock::new(0));
		let pool = pool(
			&[("http://flaky", 1_000.0), ("http://good", 0.0)],
			2,
			clock.clone(),
		);

		for _ in 0..4 {
			let _ = pool
				.execute_with_failover("test", |endpoint| async move {
					if endpoint.url() == "http://flaky" {
						Err(RpcError::Http("boom".into()))
					} else {
						Ok(())
					}
				})
				.await;
		}
		assert!(!pool
			.health()
			.iter()
			.find(|h| h.url == "http://flaky")
			.unwrap()
			.healthy);

		// After the cooldown the endpoint is optimistically healthy again.
		clock.advance_ms(30_001);
		assert!(pool
			.health()
			.iter()
			.find(|h| h.url == "http://flaky")
			.unwrap()
			.healthy);
	}

	#[tokio::test]
	async fn exhaustion_surfaces_the_last_error() {
		let clock = Arc::new(ManualClock::new(0));
		let pool = pool(&[("http://a", 1.0), ("http://b", 1.0)], 2, clock);

		let result: Result<(), RpcError> = pool
			.execute_with_failover("test", |_endpoint| async move {
				Err(RpcError::Http("always down".into()))
			})
			.await;

		match result.unwrap_err() {
			RpcError::AllEndpointsFailed { attempts, last } => {
				assert_eq!(attempts, 2);
				assert!(last.contains("always down"));
			}
			other => panic!("unexpected error {:?}", other),
		}
	}
}
