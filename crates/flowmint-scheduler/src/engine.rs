//! The scheduling engine: tick loop, per-intent gated execution, and
//! state transitions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flowmint_fees::FeeEstimator;
use flowmint_locks::{AcquireOutcome, JobLockService, JobOutcome};
use flowmint_oracle::OracleGate;
use flowmint_receipts::{AttestationService, ReceiptService};
use flowmint_storage::IntentStore;
use flowmint_types::{
	Clock, EngineEvent, ExecutionMode, ExecutionStatus, FeeProfile, Intent, IntentKind,
	IntentStatus, JobLock, SwapRequest,
};
use futures::future::join_all;
use serde_json::json;
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, error, info, warn};

use crate::event_bus::EventBus;
use crate::notify::Notifier;
use crate::swap::SwapProvider;
use crate::SchedulerError;

/// Engine-level tuning and the protocol ceilings mirrored from the
/// on-chain config.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
	pub tick_interval: Duration,
	/// Cap on intents processed concurrently within one tick.
	pub max_concurrent: usize,
	pub default_slippage_bps: u16,
	pub protected_slippage_bps: u16,
	pub max_price_impact_bps: u16,
	pub protected_mode_enabled: bool,
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		Self {
			tick_interval: Duration::from_secs(10),
			max_concurrent: 8,
			default_slippage_bps: 100,
			protected_slippage_bps: 50,
			max_price_impact_bps: 200,
			protected_mode_enabled: false,
		}
	}
}

/// What one tick accomplished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
	pub due: usize,
	pub executed: usize,
	pub skipped: usize,
	pub failed: usize,
}

/// Lifetime counters, cheap to snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerStats {
	pub ticks: u64,
	pub executed: u64,
	pub skipped: u64,
	pub failed: u64,
}

enum IntentOutcome {
	Executed,
	Skipped,
	Failed,
}

/// The orchestrator. All collaborators are injected; the engine owns no
/// global state.
pub struct SchedulerEngine {
	intents: Arc<IntentStore>,
	locks: Arc<JobLockService>,
	oracle: Arc<OracleGate>,
	fees: Arc<FeeEstimator>,
	swaps: Arc<dyn SwapProvider>,
	receipts: Arc<ReceiptService>,
	attestations: Arc<AttestationService>,
	notifier: Arc<dyn Notifier>,
	clock: Arc<dyn Clock>,
	events: EventBus,
	config: SchedulerConfig,
	semaphore: Arc<Semaphore>,
	shutdown: broadcast::Sender<()>,
	ticks: AtomicU64,
	executed: AtomicU64,
	skipped: AtomicU64,
	failed: AtomicU64,
}

impl SchedulerEngine {
	/// Runs the periodic tick loop until `shutdown` is signalled.
	pub async fn run(&self) -> Result<(), SchedulerError> {
		info!(
			interval_secs = self.config.tick_interval.as_secs(),
			"scheduler started"
		);
		let mut interval = tokio::time::interval(self.config.tick_interval);
		interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
		let mut shutdown_rx = self.shutdown.subscribe();

		loop {
			tokio::select! {
				_ = interval.tick() => {
					let summary = self.tick().await;
					debug!(?summary, "tick finished");
				}
				_ = shutdown_rx.recv() => {
					info!("scheduler received shutdown signal");
					break;
				}
			}
		}
		Ok(())
	}

	/// Signals the tick loop to stop after the current tick.
	pub fn shutdown(&self) {
		let _ = self.shutdown.send(());
	}

	pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
		self.events.subscribe()
	}

	pub fn stats(&self) -> SchedulerStats {
		SchedulerStats {
			ticks: self.ticks.load(Ordering::Relaxed),
			executed: self.executed.load(Ordering::Relaxed),
			skipped: self.skipped.load(Ordering::Relaxed),
			failed: self.failed.load(Ordering::Relaxed),
		}
	}

	/// One scheduling pass: crash recovery, discovery, then bounded
	/// concurrent processing of every due intent.
	pub async fn tick(&self) -> TickSummary {
		self.ticks.fetch_add(1, Ordering::Relaxed);

		match self.locks.reset_stuck_jobs().await {
			Ok(0) => {}
			Ok(count) => {
				warn!(count, "reset stuck jobs");
				self.events.publish(EngineEvent::StuckJobsReset { count });
			}
			Err(error) => error!(%error, "stuck job recovery failed"),
		}

		let now = self.clock.now_ms();
		let mut batch = Vec::new();
		match self.intents.due_dca_intents(now).await {
			Ok(due) => batch.extend(due),
			Err(error) => error!(%error, "failed to query due intents"),
		}
		match self.intents.active_conditional_intents().await {
			Ok(conditional) => batch.extend(conditional),
			Err(error) => error!(%error, "failed to query conditional intents"),
		}

		let mut summary = TickSummary {
			due: batch.len(),
			..Default::default()
		};

		let outcomes = join_all(
			batch
				.into_iter()
				.map(|intent| self.process_guarded(intent)),
		)
		.await;

		for outcome in outcomes {
			match outcome {
				IntentOutcome::Executed => summary.executed += 1,
				IntentOutcome::Skipped => summary.skipped += 1,
				IntentOutcome::Failed => summary.failed += 1,
			}
		}

		self.executed
			.fetch_add(summary.executed as u64, Ordering::Relaxed);
		self.skipped
			.fetch_add(summary.skipped as u64, Ordering::Relaxed);
		self.failed
			.fetch_add(summary.failed as u64, Ordering::Relaxed);

		self.events.publish(EngineEvent::TickFinished {
			due: summary.due,
			executed: summary.executed,
			skipped: summary.skipped,
			failed: summary.failed,
			at: self.clock.now_ms(),
		});

		summary
	}

	/// Concurrency-capped, error-isolated wrapper: one intent's failure
	/// never aborts the batch.
	async fn process_guarded(&self, intent: Intent) -> IntentOutcome {
		let _permit = match self.semaphore.acquire().await {
			Ok(permit) => permit,
			Err(_) => return IntentOutcome::Skipped,
		};

		let intent_id = intent.id.clone();
		match self.process_intent(intent).await {
			Ok(outcome) => outcome,
			Err(error) => {
				error!(intent_id, %error, "intent processing failed");
				IntentOutcome::Failed
			}
		}
	}

	/// Lock acquisition and the dispatch on its outcome.
	async fn process_intent(&self, intent: Intent) -> Result<IntentOutcome, SchedulerError> {
		let scheduled_at = self.clock.now_ms();

		match self.locks.acquire(&intent.id, scheduled_at).await? {
			AcquireOutcome::Acquired(lock) => self.execute_locked(intent, lock).await,
			AcquireOutcome::AlreadyRunning | AcquireOutcome::Contended => {
				debug!(intent_id = %intent.id, "window is owned elsewhere");
				self.events.publish(EngineEvent::LockContended {
					intent_id: intent.id.clone(),
					job_key: self.locks.job_key(&intent.id, scheduled_at),
				});
				Ok(IntentOutcome::Skipped)
			}
			AcquireOutcome::AlreadyDone => {
				debug!(intent_id = %intent.id, "window already executed");
				Ok(IntentOutcome::Skipped)
			}
			AcquireOutcome::RetryLimitExceeded {
				attempts,
				last_error,
			} => {
				let reason = last_error
					.unwrap_or_else(|| format!("retry limit exceeded after {} attempts", attempts));
				self.fail_intent(&intent.id, &reason).await?;
				Ok(IntentOutcome::Failed)
			}
		}
	}

	/// Holds the lock across the gated sequence and guarantees a release
	/// on every path, including infrastructure errors.
	async fn execute_locked(
		&self,
		intent: Intent,
		lock: JobLock,
	) -> Result<IntentOutcome, SchedulerError> {
		match self.run_gated(&intent, &lock).await {
			Ok(outcome) => Ok(outcome),
			Err(error) => {
				warn!(intent_id = %intent.id, %error, "gated execution errored");
				if let Err(release_error) = self
					.locks
					.release(&lock, JobOutcome::Failed(error.to_string()))
					.await
				{
					error!(intent_id = %intent.id, %release_error, "lock release failed");
				}
				Ok(IntentOutcome::Failed)
			}
		}
	}

	/// The gated sequence proper. Every `return` before the swap is
	/// submitted releases the lock itself; after submission the outcome
	/// is whatever the chain says.
	async fn run_gated(
		&self,
		intent: &Intent,
		lock: &JobLock,
	) -> Result<IntentOutcome, SchedulerError> {
		// Refetch: the intent may have been cancelled since discovery.
		let intent = self.intents.get(&intent.id).await?;
		if intent.status != IntentStatus::Active {
			return self
				.skip(&intent, lock, format!("intent is {:?}", intent.status))
				.await;
		}

		// Conditional intents pass through the oracle gate every tick.
		if let IntentKind::StopLoss {
			price_threshold,
			direction,
			feed_id,
		} = &intent.kind
		{
			let decision = self
				.oracle
				.check_stop_loss_trigger(feed_id, *price_threshold, *direction)
				.await;
			if !decision.can_execute {
				return self.skip(&intent, lock, decision.reason).await;
			}
			info!(intent_id = %intent.id, reason = %decision.reason, "stop-loss triggered");
		}

		// Slippage budget against the protocol ceilings.
		let protected = intent.protected || self.config.protected_mode_enabled;
		let ceiling = if protected {
			self.config.protected_slippage_bps
		} else {
			self.config.default_slippage_bps
		};
		if intent.slippage_budget_bps > ceiling {
			return self
				.fail_attempt(
					&intent,
					lock,
					None,
					format!(
						"slippage budget {}bps exceeds ceiling {}bps",
						intent.slippage_budget_bps, ceiling
					),
				)
				.await;
		}

		let profile = if intent.is_conditional() {
			FeeProfile::Fast
		} else {
			FeeProfile::Auto
		};
		let request = SwapRequest {
			user_key: intent.user_key.clone(),
			token_in: intent.token_from.clone(),
			token_out: intent.token_to.clone(),
			amount_in: intent.next_slice_amount(),
			slippage_bps: intent.slippage_budget_bps,
			mode: ExecutionMode::ExactIn,
			protected,
			profile,
		};

		let quote = match self.swaps.quote(&request).await {
			Ok(quote) => quote,
			Err(error) => {
				return self.fail_attempt(&intent, lock, None, error.to_string()).await;
			}
		};

		if protected && quote.price_impact_bps > self.config.max_price_impact_bps {
			return self
				.fail_attempt(
					&intent,
					lock,
					None,
					format!(
						"price impact {}bps exceeds protected ceiling {}bps",
						quote.price_impact_bps, self.config.max_price_impact_bps
					),
				)
				.await;
		}

		// Persist the pending receipt before anything irreversible.
		let receipt = self
			.receipts
			.create_pending(&intent.id, request.clone(), Some(quote.clone()))
			.await?;

		let fee = self.fees.estimate(profile).await;

		// Last cancellation check before the point of no return.
		let latest = self.intents.get(&intent.id).await?;
		if latest.status == IntentStatus::Cancelled {
			self.receipts
				.finalize(&receipt.receipt_id, ExecutionStatus::Skipped, None, None)
				.await?;
			return self
				.skip(&intent, lock, "cancelled before submission".to_string())
				.await;
		}

		if quote.is_expired(self.clock.now_ms()) {
			return self
				.fail_attempt(
					&intent,
					lock,
					Some(&receipt.receipt_id),
					"quote expired before submission".to_string(),
				)
				.await;
		}

		let prepared = match self.swaps.build_transaction(&request, &quote, &fee).await {
			Ok(prepared) => prepared,
			Err(error) => {
				return self
					.fail_attempt(&intent, lock, Some(&receipt.receipt_id), error.to_string())
					.await;
			}
		};

		// Point of no return: from here cancellation is not honored.
		let report = self.swaps.execute(&request, &prepared).await;
		self.receipts
			.record_attempts(&receipt.receipt_id, report.attempts)
			.await?;

		match report.outcome {
			Ok(confirmed) => {
				let out_amount = confirmed
					.result
					.as_ref()
					.map(|r| r.out_amount_actual)
					.unwrap_or_default();
				self.receipts
					.finalize(
						&receipt.receipt_id,
						ExecutionStatus::Confirmed,
						Some(confirmed.signature.clone()),
						confirmed.result.clone(),
					)
					.await?;
				self.attestations
					.attest(&receipt.receipt_id, &quote.route)
					.await?;

				// Mark the window complete before mutating the intent: a
				// stalled schedule beats a duplicated execution.
				self.locks
					.release(lock, JobOutcome::Completed(confirmed.signature.clone()))
					.await?;

				let mut updated = intent.clone();
				updated
					.record_fill(request.amount_in, self.clock.now_ms())
					.map_err(|e| SchedulerError::Intent(e.to_string()))?;
				self.intents.update(&updated).await?;

				info!(
					intent_id = %intent.id,
					signature = %confirmed.signature,
					out_amount,
					"intent executed"
				);
				self.events.publish(EngineEvent::IntentExecuted {
					intent_id: intent.id.clone(),
					receipt_id: receipt.receipt_id.clone(),
					out_amount,
				});

				if updated.status == IntentStatus::Completed {
					self.events.publish(EngineEvent::IntentCompleted {
						intent_id: intent.id.clone(),
						user_key: intent.user_key.clone(),
					});
					self.notifier
						.notify(
							&intent.user_key,
							"intent_completed",
							json!({
								"intent_id": intent.id,
								"executions": updated.execution_count,
							}),
						)
						.await;
				}

				Ok(IntentOutcome::Executed)
			}
			Err(error) => {
				self.receipts
					.finalize(&receipt.receipt_id, ExecutionStatus::Failed, None, None)
					.await?;
				self.locks
					.release(lock, JobOutcome::Failed(error.clone()))
					.await?;
				warn!(intent_id = %intent.id, %error, "execution failed, will retry next tick");
				Ok(IntentOutcome::Failed)
			}
		}
	}

	/// Gate rejections and cancellations: a skipped tick, not an error.
	async fn skip(
		&self,
		intent: &Intent,
		lock: &JobLock,
		reason: String,
	) -> Result<IntentOutcome, SchedulerError> {
		debug!(intent_id = %intent.id, %reason, "tick skipped");
		self.locks
			.release(lock, JobOutcome::Skipped(reason.clone()))
			.await?;
		self.events.publish(EngineEvent::IntentSkipped {
			intent_id: intent.id.clone(),
			reason,
		});
		Ok(IntentOutcome::Skipped)
	}

	/// A failed attempt within the retry budget: record it on the lock
	/// (and receipt, when one exists) and leave the intent active.
	async fn fail_attempt(
		&self,
		intent: &Intent,
		lock: &JobLock,
		receipt_id: Option<&str>,
		error: String,
	) -> Result<IntentOutcome, SchedulerError> {
		if let Some(receipt_id) = receipt_id {
			self.receipts
				.finalize(receipt_id, ExecutionStatus::Failed, None, None)
				.await?;
		}
		self.locks
			.release(lock, JobOutcome::Failed(error.clone()))
			.await?;
		warn!(intent_id = %intent.id, %error, "attempt failed");
		Ok(IntentOutcome::Failed)
	}

	/// Terminal escalation once the retry budget is exhausted.
	async fn fail_intent(&self, intent_id: &str, reason: &str) -> Result<(), SchedulerError> {
		let mut intent = self.intents.get(intent_id).await?;
		if intent.status != IntentStatus::Active {
			return Ok(());
		}
		intent
			.transition(IntentStatus::Failed)
			.map_err(|e| SchedulerError::Intent(e.to_string()))?;
		self.intents.update(&intent).await?;

		error!(intent_id, reason, "intent failed terminally");
		self.events.publish(EngineEvent::IntentFailed {
			intent_id: intent_id.to_string(),
			user_key: intent.user_key.clone(),
			error: reason.to_string(),
		});
		self.notifier
			.notify(
				&intent.user_key,
				"intent_failed",
				json!({
					"intent_id": intent_id,
					"reason": reason,
				}),
			)
			.await;
		Ok(())
	}
}

/// Builder wiring the engine's collaborators. Everything is explicit:
/// no globals, no module-level singletons.
pub struct SchedulerBuilder {
	intents: Option<Arc<IntentStore>>,
	locks: Option<Arc<JobLockService>>,
	oracle: Option<Arc<OracleGate>>,
	fees: Option<Arc<FeeEstimator>>,
	swaps: Option<Arc<dyn SwapProvider>>,
	receipts: Option<Arc<ReceiptService>>,
	attestations: Option<Arc<AttestationService>>,
	notifier: Option<Arc<dyn Notifier>>,
	clock: Option<Arc<dyn Clock>>,
	events: Option<EventBus>,
	config: SchedulerConfig,
}

impl SchedulerBuilder {
	pub fn new() -> Self {
		Self {
			intents: None,
			locks: None,
			oracle: None,
			fees: None,
			swaps: None,
			receipts: None,
			attestations: None,
			notifier: None,
			clock: None,
			events: None,
			config: SchedulerConfig::default(),
		}
	}

	pub fn with_intents(mut self, intents: Arc<IntentStore>) -> Self {
		self.intents = Some(intents);
		self
	}

	pub fn with_locks(mut self, locks: Arc<JobLockService>) -> Self {
		self.locks = Some(locks);
		self
	}

	pub fn with_oracle(mut self, oracle: Arc<OracleGate>) -> Self {
		self.oracle = Some(oracle);
		self
	}

	pub fn with_fees(mut self, fees: Arc<FeeEstimator>) -> Self {
		self.fees = Some(fees);
		self
	}

	pub fn with_swap_provider(mut self, swaps: Arc<dyn SwapProvider>) -> Self {
		self.swaps = Some(swaps);
		self
	}

	pub fn with_receipts(mut self, receipts: Arc<ReceiptService>) -> Self {
		self.receipts = Some(receipts);
		self
	}

	pub fn with_attestations(mut self, attestations: Arc<AttestationService>) -> Self {
		self.attestations = Some(attestations);
		self
	}

	pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
		self.notifier = Some(notifier);
		self
	}

	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = Some(clock);
		self
	}

	pub fn with_events(mut self, events: EventBus) -> Self {
		self.events = Some(events);
		self
	}

	pub fn with_config(mut self, config: SchedulerConfig) -> Self {
		self.config = config;
		self
	}

	pub fn build(self) -> Result<SchedulerEngine, SchedulerError> {
		let missing = |what: &str| SchedulerError::Config(format!("{} not provided", what));

		let config = self.config;
		Ok(SchedulerEngine {
			intents: self.intents.ok_or_else(|| missing("intent store"))?,
			locks: self.locks.ok_or_else(|| missing("job lock service"))?,
			oracle: self.oracle.ok_or_else(|| missing("oracle gate"))?,
			fees: self.fees.ok_or_else(|| missing("fee estimator"))?,
			swaps: self.swaps.ok_or_else(|| missing("swap provider"))?,
			receipts: self.receipts.ok_or_else(|| missing("receipt service"))?,
			attestations: self
				.attestations
				.ok_or_else(|| missing("attestation service"))?,
			notifier: self.notifier.ok_or_else(|| missing("notifier"))?,
			clock: self.clock.ok_or_else(|| missing("clock"))?,
			events: self.events.unwrap_or_default(),
			semaphore: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
			shutdown: broadcast::channel(4).0,
			ticks: AtomicU64::new(0),
			executed: AtomicU64::new(0),
			skipped: AtomicU64::new(0),
			failed: AtomicU64::new(0),
			config,
		})
	}
}

impl Default for SchedulerBuilder {
	fn default() -> Self {
		Self::new()
	}
}
