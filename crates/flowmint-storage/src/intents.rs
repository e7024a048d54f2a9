//! Typed store for intents.
//!
//! The store enforces the invariants the scheduler depends on: status
//! transitions are monotonic and a DCA schedule only moves forward.

use std::sync::Arc;

use flowmint_types::{Intent, IntentKind, IntentStatus, TimestampMs};

use crate::{StorageError, StorageService};

const NAMESPACE: &str = "intents";

/// Store of user intents, shared by the scheduler and the (external)
/// API layer that creates and cancels them.
pub struct IntentStore {
	storage: Arc<StorageService>,
}

impl IntentStore {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}

	/// Inserts a new intent; the id must be unused.
	pub async fn insert(&self, intent: &Intent) -> Result<(), StorageError> {
		self.storage.store_new(NAMESPACE, &intent.id, intent).await
	}

	pub async fn get(&self, id: &str) -> Result<Intent, StorageError> {
		self.storage.retrieve(NAMESPACE, id).await
	}

	/// Persists a mutated intent, rejecting writes that would resurrect
	/// a terminal intent or move a DCA schedule backwards.
	pub async fn update(&self, intent: &Intent) -> Result<(), StorageError> {
		let current: Intent = self.storage.retrieve(NAMESPACE, &intent.id).await?;

		if !current.status.can_transition_to(intent.status) {
			return Err(StorageError::Constraint(format!(
				"intent {} cannot move from {:?} to {:?}",
				intent.id, current.status, intent.status
			)));
		}

		if let (
			IntentKind::Dca {
				next_execution_at: current_next,
				..
			},
			IntentKind::Dca {
				next_execution_at: new_next,
				..
			},
		) = (&current.kind, &intent.kind)
		{
			if new_next < current_next {
				return Err(StorageError::Constraint(format!(
					"intent {} schedule would move backwards",
					intent.id
				)));
			}
		}

		if intent.remaining_amount > intent.total_amount {
			return Err(StorageError::Constraint(format!(
				"intent {} remaining exceeds total",
				intent.id
			)));
		}

		self.storage.store(NAMESPACE, &intent.id, intent).await
	}

	/// Active DCA intents whose schedule time has passed.
	pub async fn due_dca_intents(&self, now: TimestampMs) -> Result<Vec<Intent>, StorageError> {
		let mut due: Vec<Intent> = self
			.storage
			.retrieve_all::<Intent>(NAMESPACE)
			.await?
			.into_iter()
			.filter(|intent| intent.is_dca() && intent.is_due(now))
			.collect();
		due.sort_by(|a, b| a.id.cmp(&b.id));
		Ok(due)
	}

	/// Active conditional intents, evaluated every tick.
	pub async fn active_conditional_intents(&self) -> Result<Vec<Intent>, StorageError> {
		let mut active: Vec<Intent> = self
			.storage
			.retrieve_all::<Intent>(NAMESPACE)
			.await?
			.into_iter()
			.filter(|intent| intent.is_conditional() && intent.status == IntentStatus::Active)
			.collect();
		active.sort_by(|a, b| a.id.cmp(&b.id));
		Ok(active)
	}

	/// User-initiated cancellation. Idempotent for already-cancelled
	/// intents; rejected for completed or failed ones.
	pub async fn cancel(&self, id: &str) -> Result<Intent, StorageError> {
		let mut intent: Intent = self.storage.retrieve(NAMESPACE, id).await?;
		intent
			.transition(IntentStatus::Cancelled)
			.map_err(|e| StorageError::Constraint(e.to_string()))?;
		self.storage.store(NAMESPACE, id, &intent).await?;
		Ok(intent)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::implementations::memory::MemoryStorage;
	use flowmint_types::PriceDirection;
	use rust_decimal::Decimal;

	fn store() -> IntentStore {
		IntentStore::new(Arc::new(StorageService::new(Box::new(MemoryStorage::new()))))
	}

	fn dca(id: &str, next_execution_at: TimestampMs) -> Intent {
		Intent {
			id: id.into(),
			user_key: "user".into(),
			kind: IntentKind::Dca {
				interval_seconds: 60,
				amount_per_slice: 100,
				next_execution_at,
			},
			token_from: "USDC".into(),
			token_to: "SOL".into(),
			total_amount: 1000,
			remaining_amount: 1000,
			slippage_budget_bps: 50,
			protected: false,
			status: IntentStatus::Active,
			execution_count: 0,
			last_execution_at: None,
			created_at: 0,
		}
	}

	fn stop_loss(id: &str) -> Intent {
		Intent {
			kind: IntentKind::StopLoss {
				price_threshold: Decimal::new(100, 0),
				direction: PriceDirection::Below,
				feed_id: "feed".into(),
			},
			..dca(id, 0)
		}
	}

	#[tokio::test]
	async fn due_query_filters_by_schedule() {
		let store = store();
		store.insert(&dca("a", 5_000)).await.unwrap();
		store.insert(&dca("b", 50_000)).await.unwrap();
		store.insert(&stop_loss("c")).await.unwrap();

		let due = store.due_dca_intents(10_000).await.unwrap();
		assert_eq!(due.len(), 1);
		assert_eq!(due[0].id, "a");

		let conditional = store.active_conditional_intents().await.unwrap();
		assert_eq!(conditional.len(), 1);
		assert_eq!(conditional[0].id, "c");
	}

	#[tokio::test]
	async fn update_rejects_resurrection() {
		let store = store();
		let mut intent = dca("a", 0);
		store.insert(&intent).await.unwrap();

		store.cancel("a").await.unwrap();

		intent.status = IntentStatus::Active;
		let err = store.update(&intent).await.unwrap_err();
		assert!(matches!(err, StorageError::Constraint(_)));
	}

	#[tokio::test]
	async fn update_rejects_schedule_regression() {
		let store = store();
		store.insert(&dca("a", 60_000)).await.unwrap();

		let regressed = dca("a", 30_000);
		let err = store.update(&regressed).await.unwrap_err();
		assert!(matches!(err, StorageError::Constraint(_)));
	}

	#[tokio::test]
	async fn duplicate_insert_is_rejected() {
		let store = store();
		store.insert(&dca("a", 0)).await.unwrap();
		let err = store.insert(&dca("a", 0)).await.unwrap_err();
		assert!(matches!(err, StorageError::AlreadyExists));
	}
}
