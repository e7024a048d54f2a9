//! Notification dispatch seam.
//!
//! Delivery itself (email, push, webhooks) is an external collaborator.
//! The engine only calls this trait, fire-and-forget: a notification
//! failure must never fail the execution path, so the trait cannot
//! return one.

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

/// Fire-and-forget user notification sink.
#[async_trait]
pub trait Notifier: Send + Sync {
	async fn notify(&self, user_key: &str, event_kind: &str, payload: Value);
}

/// Default sink that records notifications on the log stream, used until
/// a real dispatcher is wired in.
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
	async fn notify(&self, user_key: &str, event_kind: &str, payload: Value) {
		info!(user_key, event_kind, %payload, "user notification");
	}
}
