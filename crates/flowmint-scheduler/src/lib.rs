//! Intent scheduler: the orchestrator that drives intents from "due" to
//! a terminal outcome, exactly once per scheduling window.
//!
//! Each tick discovers due DCA intents and active conditional intents,
//! then runs every one through the gated sequence: job lock → cancel
//! check → oracle gate → fee estimate → quote → pending receipt →
//! cancel check → execution with failover → receipt finalization →
//! intent state transition → lock release. A single intent's failure
//! never aborts the rest of the batch.

use thiserror::Error;

pub mod engine;
pub mod event_bus;
pub mod notify;
pub mod swap;

pub mod implementations {
	pub mod jupiter;
}

pub use engine::{SchedulerBuilder, SchedulerConfig, SchedulerEngine, SchedulerStats, TickSummary};
pub use event_bus::EventBus;
pub use notify::{Notifier, TracingNotifier};
pub use swap::{ConfirmedExecution, ExecutionReport, PreparedSwap, SwapError, SwapProvider};

#[derive(Debug, Error)]
pub enum SchedulerError {
	#[error("configuration error: {0}")]
	Config(String),
	#[error("storage error: {0}")]
	Storage(#[from] flowmint_storage::StorageError),
	#[error("lock error: {0}")]
	Lock(#[from] flowmint_locks::LockError),
	#[error("receipt error: {0}")]
	Receipt(#[from] flowmint_receipts::ReceiptError),
	#[error("swap provider error: {0}")]
	Swap(#[from] swap::SwapError),
	#[error("intent error: {0}")]
	Intent(String),
}
