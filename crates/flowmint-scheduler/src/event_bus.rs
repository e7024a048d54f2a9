//! Broadcast-based event bus decoupling the engine from its observers.

use flowmint_types::EngineEvent;
use tokio::sync::broadcast;

/// Event bus for broadcasting engine events to multiple subscribers.
///
/// Publishing never fails the caller: with no subscribers the event is
/// simply dropped, which is the correct behavior for fire-and-forget
/// observability.
#[derive(Clone)]
pub struct EventBus {
	sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
		self.sender.subscribe()
	}

	pub fn publish(&self, event: EngineEvent) {
		let _ = self.sender.send(event);
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new(1024)
	}
}
