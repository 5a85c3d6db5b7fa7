//! C9: network-change observation.
//!
//! Detecting actual link state is platform-specific and out of scope here
//! (see SPEC_FULL.md); what this module owns is the event model and the
//! broadcast fan-out, grounded on the teacher's signal-driven async-stream
//! idiom — any number of subscribers can observe the same event stream
//! without a mailbox per subscriber, and a slow subscriber only misses
//! events (per `broadcast`'s lagged semantics), it never blocks the driver.

use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
	LinkUp,
	LinkDown,
	InterfaceChanged { name: String },
	StatusChanged { reachable: bool },
}

const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// The fan-out point for network-change events. Cheap to clone (shares the
/// underlying broadcast channel).
#[derive(Clone)]
pub struct NetworkObserver {
	tx: broadcast::Sender<NetworkEvent>,
}

impl NetworkObserver {
	pub fn new() -> Self {
		let (tx, _rx) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
		Self { tx }
	}

	/// Publishes an event to every current subscriber. A driver (platform
	/// link-state poller, test harness, manual operator signal) calls this;
	/// it never blocks even with zero subscribers.
	pub fn emit(&self, event: NetworkEvent) {
		let _ = self.tx.send(event);
	}

	/// A stream of events from this point forward. Events emitted before a
	/// given subscriber was created are never delivered to it.
	pub fn events(&self) -> impl Stream<Item = NetworkEvent> + 'static {
		BroadcastStream::new(self.tx.subscribe()).filter_map(|r| r.ok())
	}

	pub fn subscriber_count(&self) -> usize {
		self.tx.receiver_count()
	}
}

impl Default for NetworkObserver {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn subscriber_sees_events_emitted_after_it_subscribed() {
		let observer = NetworkObserver::new();
		let mut stream = std::pin::pin!(observer.events());
		observer.emit(NetworkEvent::LinkDown);
		observer.emit(NetworkEvent::LinkUp);
		assert_eq!(stream.next().await, Some(NetworkEvent::LinkDown));
		assert_eq!(stream.next().await, Some(NetworkEvent::LinkUp));
	}

	#[tokio::test]
	async fn multiple_subscribers_each_see_every_event() {
		let observer = NetworkObserver::new();
		let mut a = std::pin::pin!(observer.events());
		let mut b = std::pin::pin!(observer.events());
		observer.emit(NetworkEvent::StatusChanged { reachable: false });
		assert_eq!(a.next().await, Some(NetworkEvent::StatusChanged { reachable: false }));
		assert_eq!(b.next().await, Some(NetworkEvent::StatusChanged { reachable: false }));
	}

	#[test]
	fn emit_with_no_subscribers_does_not_panic() {
		let observer = NetworkObserver::new();
		observer.emit(NetworkEvent::LinkUp);
	}
}
